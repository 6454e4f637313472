//! Relay wire protocol.
//!
//! Every WebSocket text frame is `{"event": <name>, "data": <json>}`. The
//! `data` of a `message` event is kept as raw JSON so the relay can persist
//! and rebroadcast it without re-encoding a single byte.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::{EVENT_CONNECT, EVENT_DELETE_MESSAGE, EVENT_ERROR, EVENT_MESSAGE};
use crate::crypto::EncryptedPayload;
use crate::error::ProtocolError;
use crate::types::UserId;

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    event: String,
    data: Box<RawValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAck {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayErrorBody {
    pub message: String,
}

/// One decoded relay frame, in either direction.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// server -> client, once the socket has joined its room
    Connect(ConnectAck),
    /// opaque message payload, both directions
    Message(Box<RawValue>),
    /// message id, both directions
    DeleteMessage(String),
    /// server -> client, malformed input
    Error(RelayErrorBody),
}

impl RelayEvent {
    /// Wrap a typed payload as a `message` event.
    pub fn message<T: Serialize>(payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::Message(serde_json::value::to_raw_value(payload)?))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(RelayErrorBody {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => EVENT_CONNECT,
            Self::Message(_) => EVENT_MESSAGE,
            Self::DeleteMessage(_) => EVENT_DELETE_MESSAGE,
            Self::Error(_) => EVENT_ERROR,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let data = match self {
            Self::Connect(ack) => serde_json::value::to_raw_value(ack)?,
            Self::Message(raw) => raw.clone(),
            Self::DeleteMessage(id) => serde_json::value::to_raw_value(id)?,
            Self::Error(body) => serde_json::value::to_raw_value(body)?,
        };
        serde_json::to_string(&Frame {
            event: self.name().to_string(),
            data,
        })
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: Frame = serde_json::from_str(text).map_err(ProtocolError::MalformedFrame)?;

        match frame.event.as_str() {
            EVENT_MESSAGE => Ok(Self::Message(frame.data)),
            EVENT_DELETE_MESSAGE => serde_json::from_str(frame.data.get())
                .map(Self::DeleteMessage)
                .map_err(|source| ProtocolError::InvalidPayload {
                    event: EVENT_DELETE_MESSAGE,
                    source,
                }),
            EVENT_CONNECT => serde_json::from_str(frame.data.get())
                .map(Self::Connect)
                .map_err(|source| ProtocolError::InvalidPayload {
                    event: EVENT_CONNECT,
                    source,
                }),
            EVENT_ERROR => serde_json::from_str(frame.data.get())
                .map(Self::Error)
                .map_err(|source| ProtocolError::InvalidPayload {
                    event: EVENT_ERROR,
                    source,
                }),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

/// The payload shape both clients put inside a `message` event.
///
/// The relay never relies on it; it is for clients composing and reading
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_tag: Option<String>,
}

impl ChatMessage {
    /// The ciphertext triple, when all three parts are present.
    pub fn encrypted(&self) -> Option<EncryptedPayload> {
        match (&self.ciphertext, &self.iv, &self.auth_tag) {
            (Some(ciphertext), Some(iv), Some(auth_tag)) => Some(EncryptedPayload {
                ciphertext: ciphertext.clone(),
                iv: iv.clone(),
                auth_tag: auth_tag.clone(),
            }),
            _ => None,
        }
    }

    pub fn with_encrypted(mut self, payload: EncryptedPayload) -> Self {
        self.ciphertext = Some(payload.ciphertext);
        self.iv = Some(payload.iv);
        self.auth_tag = Some(payload.auth_tag);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_data_is_byte_identical() {
        let frame = r#"{"event":"message","data":{"id":"m1",  "content":"hi","zeta":1,"alpha":[2, 3]}}"#;

        let event = RelayEvent::decode(frame).unwrap();
        let RelayEvent::Message(ref raw) = event else {
            panic!("expected message event");
        };
        assert_eq!(raw.get(), r#"{"id":"m1",  "content":"hi","zeta":1,"alpha":[2, 3]}"#);

        let encoded = event.encode().unwrap();
        assert!(encoded.contains(r#"{"id":"m1",  "content":"hi","zeta":1,"alpha":[2, 3]}"#));
    }

    #[test]
    fn test_delete_message_frame() {
        let event = RelayEvent::decode(r#"{"event":"deleteMessage","data":"m42"}"#).unwrap();
        assert!(matches!(event, RelayEvent::DeleteMessage(ref id) if id == "m42"));
        assert_eq!(
            event.encode().unwrap(),
            r#"{"event":"deleteMessage","data":"m42"}"#
        );
    }

    #[test]
    fn test_connect_roundtrip() {
        let user_id = UserId::new();
        let encoded = RelayEvent::Connect(ConnectAck { user_id }).encode().unwrap();
        match RelayEvent::decode(&encoded).unwrap() {
            RelayEvent::Connect(ack) => assert_eq!(ack.user_id, user_id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = RelayEvent::decode(r#"{"event":"typing","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent(ref name) if name == "typing"));
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(matches!(
            RelayEvent::decode("not json"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(
            RelayEvent::decode(r#"{"event":"deleteMessage","data":{"id":1}}"#),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_chat_message_wire_names() {
        let msg = ChatMessage {
            id: "m1".into(),
            content: Some("hello".into()),
            sender_id: "u1".into(),
            created_at: "2024-05-01T10:00:00Z".parse().unwrap(),
            ciphertext: None,
            iv: None,
            auth_tag: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["senderId"], "u1");
        assert_eq!(json["createdAt"], "2024-05-01T10:00:00Z");
        assert!(json.get("ciphertext").is_none());
        assert!(msg.encrypted().is_none());
    }

    #[test]
    fn test_chat_message_encrypted_triple() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"id":"m2","senderId":"u1","createdAt":"2024-05-01T10:00:00.123Z",
                "ciphertext":"aa","iv":"bb","authTag":"0000000000000000"}"#,
        )
        .unwrap();
        let encrypted = msg.encrypted().unwrap();
        assert_eq!(encrypted.ciphertext, "aa");
        assert_eq!(encrypted.auth_tag, "0000000000000000");
        assert!(msg.content.is_none());
    }
}
