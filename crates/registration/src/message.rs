use crate::RegistrationPayload;
use bytes::Bytes;
use model::{NodeId, RegistrationId};
use serde::{Deserialize, Serialize};

/// Message is exchanged between cluster members to coordinate a registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Message {
    /// Install a registration of the origin node, and acknowledge it.
    Register {
        id: RegistrationId,
        payload: RegistrationPayload,
    },
    /// Acknowledgement of a Register by a member.
    Ack(Ack),
}

/// Ack is a member's reply to a Register message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub registration: RegistrationId,
    pub node: NodeId,
    /// Detail of the member's failure to install, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    pub fn to_bytes(&self) -> Bytes {
        serde_json::to_vec(self)
            .expect("Message always serializes")
            .into()
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_encoding() {
        let node = NodeId::new("n1").unwrap();
        let id = RegistrationId::new(node.clone(), 7);

        let register = Message::Register {
            id: id.clone(),
            payload: RegistrationPayload::new("emit 1"),
        };
        let ack = Message::Ack(Ack {
            registration: id,
            node: NodeId::new("n2").unwrap(),
            error: Some("syntax error".to_string()),
        });

        insta::assert_snapshot!(
            String::from_utf8_lossy(&register.to_bytes()),
            @r###"{"register":{"id":"n1-7","payload":{"function":"emit 1","reader":"KeysReader","prefix":"*","mode":"async"}}}"###
        );
        insta::assert_snapshot!(
            String::from_utf8_lossy(&ack.to_bytes()),
            @r###"{"ack":{"registration":"n1-7","node":"n2","error":"syntax error"}}"###
        );
        assert_eq!(Message::from_bytes(&ack.to_bytes()).unwrap(), ack);

        // Malformed identifiers are rejected while decoding.
        assert!(Message::from_bytes(br#"{"ack":{"registration":"n1","node":"n2"}}"#).is_err());
    }
}
