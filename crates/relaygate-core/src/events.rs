use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::message::InboundMessage;
use crate::state::SessionState;

/// Events fanned out to observers of a single session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// Emitted on every state-machine transition.
    #[serde(rename = "status")]
    Status {
        session_id: SessionId,
        state: SessionState,
        reason: Option<String>,
    },

    #[serde(rename = "qr")]
    Qr {
        session_id: SessionId,
        qr: String,
        attempt: u32,
    },

    #[serde(rename = "connected")]
    Connected { session_id: SessionId },

    #[serde(rename = "message_received")]
    MessageReceived {
        session_id: SessionId,
        from: String,
        body: String,
        timestamp: DateTime<Utc>,
    },
}

impl GatewayEvent {
    pub fn status(session_id: SessionId, state: SessionState, reason: Option<String>) -> Self {
        Self::Status {
            session_id,
            state,
            reason,
        }
    }

    pub fn message_received(msg: &InboundMessage) -> Self {
        Self::MessageReceived {
            session_id: msg.session_id.clone(),
            from: msg.sender_id.clone(),
            body: msg.body.clone(),
            timestamp: msg.received_at,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Status { session_id, .. }
            | Self::Qr { session_id, .. }
            | Self::Connected { session_id }
            | Self::MessageReceived { session_id, .. } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Qr { .. } => "qr",
            Self::Connected { .. } => "connected",
            Self::MessageReceived { .. } => "message_received",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_type_tag() {
        let event = GatewayEvent::status(SessionId::from_raw("p1"), SessionState::Ready, None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["session_id"], "p1");
        assert_eq!(json["state"], "READY");
    }

    #[test]
    fn session_id_accessor_covers_all_variants() {
        let sid = SessionId::from_raw("p9");
        let events = [
            GatewayEvent::status(sid.clone(), SessionState::Init, None),
            GatewayEvent::Qr {
                session_id: sid.clone(),
                qr: "ABC".into(),
                attempt: 1,
            },
            GatewayEvent::Connected {
                session_id: sid.clone(),
            },
            GatewayEvent::MessageReceived {
                session_id: sid.clone(),
                from: "555@c.us".into(),
                body: "hola".into(),
                timestamp: Utc::now(),
            },
        ];
        for event in &events {
            assert_eq!(event.session_id(), &sid, "{}", event.event_type());
        }
    }

    #[test]
    fn message_received_copies_inbound_fields() {
        let msg = InboundMessage {
            session_id: SessionId::from_raw("p1"),
            sender_id: "555@c.us".into(),
            recipient_id: "777@c.us".into(),
            body: "hola".into(),
            client_name: None,
            received_at: Utc::now(),
        };
        let event = GatewayEvent::message_received(&msg);
        assert_eq!(event.event_type(), "message_received");
        match event {
            GatewayEvent::MessageReceived { from, body, timestamp, .. } => {
                assert_eq!(from, "555@c.us");
                assert_eq!(body, "hola");
                assert_eq!(timestamp, msg.received_at);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
