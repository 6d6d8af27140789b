use std::time::Duration;

use crate::ids::SessionId;
use crate::state::SessionState;

/// Errors raised at the transport adapter boundary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("transport timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport rejected command: {0}")]
    Rejected(String),
    #[error("transport connection lost: {0}")]
    ConnectionLost(String),
    #[error("transport protocol error: {0}")]
    Protocol(String),
}

/// Caller-facing error taxonomy. Internal relay failures are logged and
/// never returned to the sender of a message.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session {session_id} is not ready")]
    SessionNotReady {
        session_id: SessionId,
        state: Option<SessionState>,
    },

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("delivery failed: {cause}")]
    DeliveryFailed {
        session_id: SessionId,
        #[source]
        cause: TransportError,
    },

    #[error("webhook unreachable: {0}")]
    WebhookUnreachable(String),

    #[error("adapter initialization failed: {0}")]
    AdapterInitFailed(String),
}

impl GatewayError {
    /// HTTP status used when the error is returned to an API caller.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::SessionNotReady { .. } => 400,
            Self::SessionNotFound(_) => 404,
            Self::DeliveryFailed { .. } | Self::WebhookUnreachable(_) | Self::AdapterInitFailed(_) => {
                500
            }
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::SessionNotReady { .. } => "session_not_ready",
            Self::SessionNotFound(_) => "session_not_found",
            Self::DeliveryFailed { .. } => "delivery_failed",
            Self::WebhookUnreachable(_) => "webhook_unreachable",
            Self::AdapterInitFailed(_) => "adapter_init_failed",
        }
    }
}
