use crate::RegistrationStats;
use model::{RegistrationId, Reply};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// Mode in which a registered function is run when it's triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Run asynchronously, distributed across the cluster.
    #[default]
    Async,
    /// Run asynchronously on the triggering node only.
    AsyncLocal,
    /// Run synchronously with the triggering event.
    Sync,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Async => "async",
            Mode::AsyncLocal => "async_local",
            Mode::Sync => "sync",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "async" => Ok(Mode::Async),
            "async_local" => Ok(Mode::AsyncLocal),
            "sync" => Ok(Mode::Sync),
            _ => Err(crate::Error::InvalidArgument(format!(
                "invalid execution mode {s:?} (expected async, async_local or sync)"
            ))),
        }
    }
}

/// RegistrationPayload is the function definition of a registration
/// together with the criteria which trigger it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload {
    pub function: String,
    pub reader: String,
    pub prefix: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RegistrationPayload {
    pub const DEFAULT_READER: &'static str = "KeysReader";
    pub const DEFAULT_PREFIX: &'static str = "*";

    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            reader: Self::DEFAULT_READER.to_string(),
            prefix: Self::DEFAULT_PREFIX.to_string(),
            mode: Mode::default(),
            description: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), crate::Error> {
        if self.function.trim().is_empty() {
            return Err(crate::Error::InvalidArgument(
                "registration function must not be empty".to_string(),
            ));
        }
        if self.reader.is_empty() {
            return Err(crate::Error::InvalidArgument(
                "registration reader must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// State of a registration. The origin node holds its registration as
/// Pending until every member has acknowledged it. Other members hold
/// the registrations they've installed as Committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RegistrationState {
    Pending,
    Committed,
    Failed,
}

impl RegistrationState {
    pub fn as_str(self) -> &'static str {
        match self {
            RegistrationState::Pending => "pending",
            RegistrationState::Committed => "committed",
            RegistrationState::Failed => "failed",
        }
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration is a stream-processing function known to this node.
pub struct Registration {
    id: RegistrationId,
    payload: RegistrationPayload,
    state: Mutex<RegistrationState>,
    stats: RegistrationStats,
}

impl Registration {
    pub(crate) fn new(id: RegistrationId, payload: RegistrationPayload, state: RegistrationState) -> Self {
        Self {
            id,
            payload,
            state: Mutex::new(state),
            stats: RegistrationStats::default(),
        }
    }

    pub fn id(&self) -> &RegistrationId {
        &self.id
    }

    pub fn payload(&self) -> &RegistrationPayload {
        &self.payload
    }

    pub fn state(&self) -> RegistrationState {
        *self.state.lock().unwrap()
    }

    pub fn stats(&self) -> &RegistrationStats {
        &self.stats
    }

    pub(crate) fn set_state(&self, state: RegistrationState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn to_reply(&self) -> Reply {
        let RegistrationPayload {
            function,
            reader,
            prefix,
            mode,
            description,
        } = &self.payload;

        Reply::Array(vec![
            "id".into(),
            self.id.to_string().into(),
            "state".into(),
            Reply::simple(self.state().as_str()),
            "reader".into(),
            reader.as_str().into(),
            "desc".into(),
            match description {
                Some(description) => description.as_str().into(),
                None => Reply::Null,
            },
            "function".into(),
            function.as_str().into(),
            "prefix".into(),
            prefix.as_str().into(),
            "mode".into(),
            Reply::simple(mode.as_str()),
            "stats".into(),
            self.stats.snapshot().to_reply(),
        ])
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("payload", &self.payload)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use model::NodeId;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("ASYNC_LOCAL".parse::<Mode>().unwrap(), Mode::AsyncLocal);
        assert_eq!("sync".parse::<Mode>().unwrap(), Mode::Sync);
        insta::assert_snapshot!(
            "eventually".parse::<Mode>().unwrap_err(),
            @r###"invalid argument: invalid execution mode "eventually" (expected async, async_local or sync)"###
        );
    }

    #[test]
    fn test_payload_encoding() {
        let mut payload = RegistrationPayload::new("emit 1");
        payload.mode = Mode::AsyncLocal;

        insta::assert_snapshot!(
            serde_json::to_string(&payload).unwrap(),
            @r###"{"function":"emit 1","reader":"KeysReader","prefix":"*","mode":"async_local"}"###
        );
        assert!(RegistrationPayload::new("  ").validate().is_err());
    }

    #[test]
    fn test_registration_reply() {
        let mut payload = RegistrationPayload::new("emit 1");
        payload.description = Some("counts keys".to_string());
        let id = RegistrationId::new(NodeId::new("n1").unwrap(), 3);
        let registration = Registration::new(id, payload, RegistrationState::Committed);

        insta::assert_snapshot!(registration.to_reply(), @r###"
         1) "id"
         2) "n1-3"
         3) "state"
         4) committed
         5) "reader"
         6) "KeysReader"
         7) "desc"
         8) "counts keys"
         9) "function"
        10) "emit 1"
        11) "prefix"
        12) "*"
        13) "mode"
        14) async
        15) "stats"
        16)  1) "numTriggered"
             2) (integer) 0
             3) "numSuccess"
             4) (integer) 0
             5) "numFailures"
             6) (integer) 0
             7) "numAborted"
             8) (integer) 0
             9) "totalRunDurationMS"
            10) (integer) 0
            11) "maxRunDurationMS"
            12) (integer) 0
            13) "avgRunDurationMS"
            14) (double) 0
            15) "lastError"
            16) (nil)
        "###);
    }
}
