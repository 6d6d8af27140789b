//! Contract with the external messaging client.
//!
//! An adapter speaks the platform protocol for exactly one session. The core
//! never looks inside it: it issues `initialize`/`send_message`/`close` and
//! consumes the ordered [`TransportEvent`] stream the adapter writes into the
//! channel it was created with.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::ids::SessionId;
use crate::message::RawMessage;

/// Lifecycle and message events emitted by an adapter, in delivery order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A pairing code must be scanned before the session can connect.
    Qr(String),
    Ready,
    Disconnected(String),
    Message(RawMessage),
    /// The adapter cannot continue; the session must close.
    Fatal(String),
}

/// Acknowledgement returned to the caller of a successful send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryAck {
    /// Recipient after normalization into the transport's addressing scheme.
    pub recipient_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Start (or restart) the connection. May resolve before `Ready` is emitted.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Send a text message. Returns the platform message id when known.
    async fn send_message(&self, recipient_id: &str, body: &str) -> Result<Option<String>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Builds one exclusively owned adapter per session.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        session_id: &SessionId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Arc<dyn TransportAdapter>;
}
