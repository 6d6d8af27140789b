//! HTTP API handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use relaygate_core::{GatewayError, SessionId};
use serde_json::{json, Value};

use crate::server::AppState;

/// A [`GatewayError`] rendered as `{success: false, error, code}`.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "success": false,
            "error": self.0.to_string(),
            "code": self.0.error_kind(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn invalid(message: impl Into<String>) -> ApiError {
    ApiError(GatewayError::InvalidRequest(message.into()))
}

/// Unwrap the JSON body, turning extractor failures into `InvalidRequest`.
fn body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| invalid(rejection.body_text()))
}

fn session_id_field(body: &Value) -> Result<SessionId, ApiError> {
    body.get("sessionId")
        .and_then(SessionId::from_json)
        .ok_or_else(|| invalid("sessionId is required"))
}

fn text_field<'a>(body: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| body.get(*name).and_then(Value::as_str))
}

/// POST /api/start-session
pub async fn start_session(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let body = body(payload)?;
    let session_id = session_id_field(&body)?;
    let session = state.registry.ensure_session(session_id.clone());
    tracing::info!(session_id = %session_id, state = %session.state(), "start-session requested");
    Ok(Json(json!({
        "success": true,
        "sessionId": session_id,
        "state": session.state(),
    })))
}

/// POST /api/send-message
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let body = body(payload)?;
    let session_id = session_id_field(&body)?;
    let to = text_field(&body, &["to", "chatId"]).unwrap_or_default();
    let message = text_field(&body, &["message"]).unwrap_or_default();

    let ack = state.dispatcher.send(&session_id, to, message).await.map_err(|e| {
        tracing::warn!(session_id = %session_id, error = %e, "send-message failed");
        ApiError(e)
    })?;

    let mut response = json!({
        "success": true,
        "to": ack.recipient_id,
        "message": message,
    });
    if let Some(message_id) = ack.message_id {
        response["messageId"] = json!(message_id);
    }
    Ok(Json(response))
}

/// POST /api/close-session
pub async fn close_session(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let body = body(payload)?;
    let session_id = session_id_field(&body)?;
    state.registry.close_session(&session_id).await?;
    Ok(Json(json!({ "success": true, "sessionId": session_id })))
}

/// GET /api/status/{session_id}
pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    let session_id = SessionId::from_raw(session_id.trim());
    let current = state.registry.state(&session_id);
    Json(json!({
        "sessionId": session_id,
        "ready": current.is_some_and(|s| s.is_ready()),
        "state": current,
    }))
}

/// GET /api/qr/{session_id}
pub async fn session_qr(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let session_id = SessionId::from_raw(session_id.trim());
    let pending = state
        .registry
        .hub()
        .snapshot(&session_id)
        .and_then(|snapshot| snapshot.qr);
    match pending {
        Some((qr, attempt)) => {
            Json(json!({ "sessionId": session_id, "qr": qr, "attempt": attempt })).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": format!("no QR code pending for session {session_id}"),
            })),
        )
            .into_response(),
    }
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .map(|summary| {
            json!({
                "sessionId": summary.session_id,
                "state": summary.state,
                "ready": summary.state.is_ready(),
                "createdAt": summary.created_at,
                "lastError": summary.last_error,
            })
        })
        .collect();
    Json(json!({ "sessions": sessions }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "sessions": state.registry.len(),
        "observers": state.registry.hub().observer_count(),
    }))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
