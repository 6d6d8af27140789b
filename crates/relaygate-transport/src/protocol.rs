//! JSON frames exchanged with the automation sidecar.
//!
//! Every frame is a text message carrying one object tagged by `type`.
//! Commands carry a numeric `id`; the sidecar answers each with a `result`
//! frame echoing it. Everything else the sidecar sends is an event.

use relaygate_core::{RawMessage, TransportError, TransportEvent};
use serde::{Deserialize, Serialize};

/// Commands sent to the sidecar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Initialize,
    Send { to: String, body: String },
    Close,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Send { .. } => "send",
            Self::Close => "close",
        }
    }
}

/// Serialize a command with its correlation id.
pub fn encode(id: u64, command: &Command) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(command)?;
    if let Some(fields) = value.as_object_mut() {
        fields.insert("id".into(), id.into());
    }
    serde_json::to_string(&value)
}

/// Outcome of one command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub ok: bool,
    pub error: Option<String>,
    pub message_id: Option<String>,
}

impl Reply {
    pub fn into_result(self) -> Result<Option<String>, TransportError> {
        if self.ok {
            Ok(self.message_id)
        } else {
            Err(TransportError::Rejected(
                self.error.unwrap_or_else(|| "command failed".into()),
            ))
        }
    }
}

/// Frames received from the sidecar.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Qr {
        qr: String,
    },
    Ready,
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    Message {
        message: RawMessage,
    },
    Fatal {
        reason: String,
    },
    Result {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default, rename = "messageId")]
        message_id: Option<String>,
    },
}

impl Frame {
    /// Correlation id and outcome if this is a command reply.
    pub fn into_reply(self) -> Result<(u64, Reply), Self> {
        match self {
            Self::Result {
                id,
                ok,
                error,
                message_id,
            } => Ok((
                id,
                Reply {
                    ok,
                    error,
                    message_id,
                },
            )),
            other => Err(other),
        }
    }

    /// Session events; `None` for command replies.
    pub fn into_event(self) -> Option<TransportEvent> {
        match self {
            Self::Qr { qr } => Some(TransportEvent::Qr(qr)),
            Self::Ready => Some(TransportEvent::Ready),
            Self::Disconnected { reason } => Some(TransportEvent::Disconnected(
                reason.unwrap_or_else(|| "unknown".into()),
            )),
            Self::Message { message } => Some(TransportEvent::Message(message)),
            Self::Fatal { reason } => Some(TransportEvent::Fatal(reason)),
            Self::Result { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_adds_correlation_id() {
        let command = Command::Send {
            to: "555@c.us".into(),
            body: "hola".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&encode(7, &command).unwrap()).unwrap();
        assert_eq!(
            json,
            json!({"id": 7, "type": "send", "to": "555@c.us", "body": "hola"})
        );

        let json: serde_json::Value =
            serde_json::from_str(&encode(1, &Command::Initialize).unwrap()).unwrap();
        assert_eq!(json, json!({"id": 1, "type": "initialize"}));
    }

    #[test]
    fn parses_events() {
        let frame: Frame = serde_json::from_str(r#"{"type":"qr","qr":"2@abc"}"#).unwrap();
        assert_eq!(frame.into_event(), Some(TransportEvent::Qr("2@abc".into())));

        let frame: Frame = serde_json::from_str(r#"{"type":"disconnected"}"#).unwrap();
        assert_eq!(
            frame.into_event(),
            Some(TransportEvent::Disconnected("unknown".into()))
        );

        let frame: Frame = serde_json::from_value(json!({
            "type": "message",
            "message": {
                "id": "ABCD",
                "from": "555@c.us",
                "to": "777@c.us",
                "body": "hola",
                "fromMe": false,
                "notifyName": "Ana"
            }
        }))
        .unwrap();
        match frame.into_event() {
            Some(TransportEvent::Message(raw)) => {
                assert_eq!(raw.from, "555@c.us");
                assert_eq!(raw.notify_name.as_deref(), Some("Ana"));
                assert!(!raw.from_me);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parses_replies() {
        let frame: Frame =
            serde_json::from_str(r#"{"type":"result","id":3,"ok":true,"messageId":"m1"}"#).unwrap();
        assert_eq!(
            frame.into_reply(),
            Ok((
                3,
                Reply {
                    ok: true,
                    error: None,
                    message_id: Some("m1".into())
                }
            ))
        );

        let reply = Reply {
            ok: false,
            error: Some("not on platform".into()),
            message_id: None,
        };
        assert_eq!(
            reply.into_result(),
            Err(TransportError::Rejected("not on platform".into()))
        );
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        assert!(serde_json::from_str::<Frame>(r#"{"type":"battery","level":3}"#).is_err());
    }
}
