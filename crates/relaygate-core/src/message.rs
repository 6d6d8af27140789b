use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// A message exactly as the transport reported it, before filtering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Sender address in the platform's addressing scheme (`555@c.us`, `123@g.us`, ...).
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub body: String,
    /// Set when the session's own account authored the message.
    #[serde(default)]
    pub from_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_name: Option<String>,
}

/// A direct, externally originated message accepted by the relay filter.
/// Ephemeral: forwarded to observers and the webhook, then dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    pub session_id: SessionId,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub client_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn from_raw(session_id: SessionId, raw: RawMessage) -> Self {
        Self {
            session_id,
            sender_id: raw.from,
            recipient_id: raw.to,
            body: raw.body.trim().to_owned(),
            client_name: raw.notify_name,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_parses_camel_case_with_defaults() {
        let raw: RawMessage =
            serde_json::from_str(r#"{"from":"555@c.us","body":"hi","fromMe":true}"#).unwrap();
        assert_eq!(raw.from, "555@c.us");
        assert!(raw.from_me);
        assert_eq!(raw.to, "");
        assert_eq!(raw.notify_name, None);
    }

    #[test]
    fn inbound_trims_body_and_keeps_notify_name() {
        let raw = RawMessage {
            id: None,
            from: "555@c.us".into(),
            to: "777@c.us".into(),
            body: "  quiero un turno \n".into(),
            from_me: false,
            notify_name: Some("Ana".into()),
        };
        let msg = InboundMessage::from_raw(SessionId::from_raw("p1"), raw);
        assert_eq!(msg.body, "quiero un turno");
        assert_eq!(msg.sender_id, "555@c.us");
        assert_eq!(msg.recipient_id, "777@c.us");
        assert_eq!(msg.client_name.as_deref(), Some("Ana"));
    }
}
