use crate::Reply;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Record is the polymorphic unit of data which flows through a pipeline
/// and is returned to clients. Records are immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Record {
    Long(i64),
    Double(#[serde(with = "double")] f64),
    String(String),
    Bytes(Bytes),
    List(Vec<RecordRef>),
    Map(IndexMap<String, RecordRef>),
    /// Error marks a pipeline-level failure, carrying its message.
    Error(String),
}

/// RecordRef is a shared reference to an immutable Record.
/// It's held by the producing stage and any number of consumers,
/// and the Record is freed when the last reference is released.
pub type RecordRef = Arc<Record>;

impl Record {
    pub fn string(s: impl Into<String>) -> RecordRef {
        Arc::new(Record::String(s.into()))
    }

    pub fn error(message: impl Into<String>) -> RecordRef {
        Arc::new(Record::Error(message.into()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Record::Error(_))
    }

    /// Map this Record into its client-facing Reply.
    pub fn to_reply(&self) -> Reply {
        match self {
            Record::Long(v) => Reply::Integer(*v),
            Record::Double(v) => Reply::Double(*v),
            Record::String(s) => Reply::Bulk(Bytes::copy_from_slice(s.as_bytes())),
            Record::Bytes(b) => Reply::Bulk(b.clone()),
            Record::List(items) => Reply::Array(items.iter().map(|r| r.to_reply()).collect()),
            Record::Map(map) => Reply::Array(
                map.iter()
                    .flat_map(|(k, v)| [Reply::from(k.as_str()), v.to_reply()])
                    .collect(),
            ),
            Record::Error(message) => Reply::Error(message.clone()),
        }
    }

    /// Encode this Record for transfer to another node.
    pub fn to_bytes(&self) -> Bytes {
        serde_json::to_vec(self)
            .expect("Record always serializes")
            .into()
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

// Doubles are JSON numbers, except for non-finite values which JSON can't
// represent and are instead encoded as "NaN", "Infinity" or "-Infinity".
mod double {
    use serde::de::{self, Unexpected};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_infinite() && value.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else if value.is_infinite() {
            serializer.serialize_str("-Infinity")
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::invalid_value(
                    Unexpected::Str(other),
                    &"a number, NaN, Infinity or -Infinity",
                )),
            },
        }
    }
}

impl From<i64> for Record {
    fn from(value: i64) -> Self {
        Record::Long(value)
    }
}

impl From<f64> for Record {
    fn from(value: f64) -> Self {
        Record::Double(value)
    }
}

impl From<&str> for Record {
    fn from(value: &str) -> Self {
        Record::String(value.to_string())
    }
}

impl From<String> for Record {
    fn from(value: String) -> Self {
        Record::String(value)
    }
}
