use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Config of the command layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Number of executions retained before the oldest idle ones are evicted.
    pub max_executions: usize,
    /// Bound on the wait for members to acknowledge a registration.
    #[serde(with = "humantime_serde")]
    pub registration_ack_timeout: Duration,
    /// Default bound on blocking result retrievals. Unbounded if absent.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub blocking_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_executions: 1000,
            registration_ack_timeout: Duration::from_secs(30),
            blocking_timeout: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_encoding() {
        insta::assert_snapshot!(
            serde_json::to_string(&Config::default()).unwrap(),
            @r###"{"maxExecutions":1000,"registrationAckTimeout":"30s"}"###
        );

        let config: Config =
            serde_json::from_str(r#"{"maxExecutions": 10, "blockingTimeout": "1m 30s"}"#).unwrap();
        assert_eq!(
            config,
            Config {
                max_executions: 10,
                registration_ack_timeout: Duration::from_secs(30),
                blocking_timeout: Some(Duration::from_secs(90)),
            }
        );

        let err = serde_json::from_str::<Config>(r#"{"maxExecution": 10}"#).unwrap_err();
        assert!(err.to_string().starts_with("unknown field `maxExecution`"));
    }
}
