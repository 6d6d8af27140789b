//! Frames of the real-time WebSocket channel.
//!
//! Server → client: `{"event": "<kind>", "data": {...}}`.
//! Client → server: `{"type": "join" | "leave", "sessionId": "p1"}`.

use relaygate_core::{GatewayEvent, SessionId};
use serde_json::{json, Value};

/// A request from an observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientFrame {
    Join(SessionId),
    Leave(SessionId),
}

pub fn parse_client_frame(text: &str) -> Result<ClientFrame, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or("missing frame type")?;
    let session_id = value
        .get("sessionId")
        .and_then(SessionId::from_json)
        .ok_or("sessionId is required")?;
    match kind {
        "join" => Ok(ClientFrame::Join(session_id)),
        "leave" => Ok(ClientFrame::Leave(session_id)),
        other => Err(format!("unknown frame type: {other}")),
    }
}

/// Wire name of an event kind.
pub fn event_name(event: &GatewayEvent) -> &'static str {
    match event {
        GatewayEvent::Status { .. } => "status",
        GatewayEvent::Qr { .. } => "qr",
        GatewayEvent::Connected { .. } => "connected",
        GatewayEvent::MessageReceived { .. } => "messageReceived",
    }
}

pub fn event_frame(event: &GatewayEvent) -> Value {
    let data = match event {
        GatewayEvent::Status {
            session_id,
            state,
            reason,
        } => {
            let mut data = json!({
                "sessionId": session_id,
                "status": state.as_status_str(),
                "state": state,
            });
            if let Some(reason) = reason {
                data["reason"] = json!(reason);
            }
            data
        }
        GatewayEvent::Qr {
            session_id,
            qr,
            attempt,
        } => json!({ "sessionId": session_id, "qr": qr, "attempt": attempt }),
        GatewayEvent::Connected { session_id } => json!({ "sessionId": session_id }),
        GatewayEvent::MessageReceived {
            session_id,
            from,
            body,
            timestamp,
        } => json!({
            "sessionId": session_id,
            "from": from,
            "body": body,
            "timestamp": timestamp,
        }),
    };
    json!({ "event": event_name(event), "data": data })
}

pub fn joined_frame(session_id: &SessionId) -> Value {
    json!({ "event": "status", "data": { "sessionId": session_id, "status": "joined" } })
}

pub fn left_frame(session_id: &SessionId) -> Value {
    json!({ "event": "status", "data": { "sessionId": session_id, "status": "left" } })
}

pub fn error_frame(message: &str) -> Value {
    json!({ "event": "error", "data": { "message": message } })
}
