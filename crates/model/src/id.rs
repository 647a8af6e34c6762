use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    #[error("invalid node id {0:?}: must be non-empty and must not contain whitespace")]
    Node(String),
    #[error("invalid id {0:?}: expected <node-id>-<sequence>")]
    Sequenced(String),
}

/// NodeId identifies a single member of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
        let id = id.into();

        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(ParseIdError::Node(id));
        }
        Ok(Self(id))
    }

    /// Generate a random NodeId of 32 lowercase hex characters.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl FromStr for NodeId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// Both ExecutionId and RegistrationId are a NodeId joined with a
// sequence number which is monotonic within that node: "<node-id>-<seq>".
macro_rules! sequenced_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name {
            node: NodeId,
            seq: u64,
        }

        impl $name {
            pub fn new(node: NodeId, seq: u64) -> Self {
                Self { node, seq }
            }

            /// Node which allocated this id.
            pub fn node(&self) -> &NodeId {
                &self.node
            }

            pub fn seq(&self) -> u64 {
                self.seq
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", self.node, self.seq)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let invalid = || ParseIdError::Sequenced(s.to_string());

                // Split on the *last* separator: node ids may themselves contain '-'.
                let (node, seq) = s.rsplit_once('-').ok_or_else(invalid)?;
                // Canonical decimal only: no sign and no leading zeros.
                if !seq.bytes().all(|b| b.is_ascii_digit()) || (seq.len() > 1 && seq.starts_with('0')) {
                    return Err(invalid());
                }
                let seq = seq.parse::<u64>().map_err(|_| invalid())?;
                let node = NodeId::new(node).map_err(|_| invalid())?;

                Ok(Self { node, seq })
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_string()
            }
        }
    };
}

sequenced_id!(
    /// ExecutionId is the cluster-unique identifier of an Execution Plan.
    ExecutionId
);
sequenced_id!(
    /// RegistrationId is the cluster-unique identifier of a registered
    /// stream-processing function.
    RegistrationId
);
