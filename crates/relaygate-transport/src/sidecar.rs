//! Transport adapter backed by an automation sidecar over WebSocket.
//!
//! Each session owns one socket to `{sidecar_url}/sessions/{id}`. A link
//! task multiplexes commands and their `result` replies on that socket and
//! forwards every other frame, in order, as a [`TransportEvent`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use relaygate_core::{SessionId, TransportAdapter, TransportError, TransportEvent, TransportFactory};
use relaygate_settings::TransportSettings;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::protocol::{self, Command, Frame, Reply};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending command waiting for its `result` frame.
type PendingTx = oneshot::Sender<Result<Reply, TransportError>>;

const COMMAND_BUFFER: usize = 32;

/// Reason reported when the socket drops under a live session.
pub const CONNECTION_LOST: &str = "sidecar connection lost";

struct Outgoing {
    command: Command,
    reply: PendingTx,
}

/// Handle to one running link task.
#[derive(Clone)]
struct Link {
    commands: mpsc::Sender<Outgoing>,
    /// Closes the socket and fails pending commands without a disconnect event.
    shutdown: CancellationToken,
}

pub struct SidecarTransportFactory {
    base_url: String,
    command_timeout: Duration,
}

impl SidecarTransportFactory {
    pub fn new(base_url: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            command_timeout,
        }
    }

    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self::new(
            settings.sidecar_url.clone(),
            Duration::from_millis(settings.command_timeout_ms),
        )
    }
}

impl TransportFactory for SidecarTransportFactory {
    fn create(&self, session_id: &SessionId, events: mpsc::Sender<TransportEvent>) -> Arc<dyn TransportAdapter> {
        Arc::new(SidecarTransport::new(
            &self.base_url,
            session_id.clone(),
            events,
            self.command_timeout,
        ))
    }
}

pub struct SidecarTransport {
    session_id: SessionId,
    url: String,
    events: mpsc::Sender<TransportEvent>,
    command_timeout: Duration,
    link: Mutex<Option<Link>>,
}

impl SidecarTransport {
    pub fn new(
        base_url: &str,
        session_id: SessionId,
        events: mpsc::Sender<TransportEvent>,
        command_timeout: Duration,
    ) -> Self {
        let url = format!("{}/sessions/{}", base_url.trim_end_matches('/'), session_id);
        Self {
            session_id,
            url,
            events,
            command_timeout,
            link: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Dial the sidecar, replacing any previous link.
    async fn connect(&self) -> Result<Link, TransportError> {
        let mut current = self.link.lock().await;
        if let Some(old) = current.take() {
            debug!(session_id = %self.session_id, "replacing existing sidecar link");
            old.shutdown.cancel();
        }

        debug!(session_id = %self.session_id, url = %self.url, "connecting to sidecar");
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionLost(format!("connect {}: {e}", self.url)))?;

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let link = Link {
            commands: tx,
            shutdown: CancellationToken::new(),
        };
        tokio::spawn(run_link(
            ws,
            rx,
            link.shutdown.clone(),
            self.events.clone(),
            self.session_id.clone(),
        ));
        *current = Some(link.clone());
        Ok(link)
    }

    async fn current_link(&self) -> Option<Link> {
        self.link
            .lock()
            .await
            .as_ref()
            .filter(|link| !link.commands.is_closed())
            .cloned()
    }

    async fn request(&self, link: &Link, command: Command) -> Result<Option<String>, TransportError> {
        let name = command.name();
        // `initialize` lasts until the platform client is up, which may include
        // a QR scan; the session policy bounds it, not the command timeout.
        let limit = match command {
            Command::Initialize => None,
            _ => Some(self.command_timeout),
        };
        let (reply, replied) = oneshot::channel();
        link.commands
            .send(Outgoing { command, reply })
            .await
            .map_err(|_| TransportError::NotConnected)?;

        let replied = match limit {
            None => replied.await,
            Some(limit) => match tokio::time::timeout(limit, replied).await {
                Ok(replied) => replied,
                Err(_) => {
                    warn!(
                        session_id = %self.session_id,
                        command = name,
                        timeout_ms = limit.as_millis() as u64,
                        "sidecar command timed out"
                    );
                    return Err(TransportError::Timeout(limit));
                }
            },
        };
        match replied {
            Ok(result) => result?.into_result(),
            Err(_) => Err(TransportError::ConnectionLost(CONNECTION_LOST.into())),
        }
    }
}

#[async_trait]
impl TransportAdapter for SidecarTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        let link = self.connect().await?;
        self.request(&link, Command::Initialize).await.map(|_| ())
    }

    async fn send_message(&self, recipient_id: &str, body: &str) -> Result<Option<String>, TransportError> {
        let link = self.current_link().await.ok_or(TransportError::NotConnected)?;
        self.request(
            &link,
            Command::Send {
                to: recipient_id.to_string(),
                body: body.to_string(),
            },
        )
        .await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let Some(link) = self.link.lock().await.take() else {
            return Ok(());
        };
        if link.commands.is_closed() {
            return Ok(());
        }
        let result = self.request(&link, Command::Close).await.map(|_| ());
        link.shutdown.cancel();
        result
    }
}

async fn run_link(
    ws: WsStream,
    mut commands: mpsc::Receiver<Outgoing>,
    shutdown: CancellationToken,
    events: mpsc::Sender<TransportEvent>,
    session_id: SessionId,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let mut next_id: u64 = 1;

    let lost = loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.close().await;
                break None;
            }
            outgoing = commands.recv() => {
                let Some(Outgoing { command, reply }) = outgoing else {
                    let _ = ws_tx.close().await;
                    break None;
                };
                let id = next_id;
                next_id += 1;
                let frame = match protocol::encode(id, &command) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = reply.send(Err(TransportError::Protocol(e.to_string())));
                        continue;
                    }
                };
                // Callers that timed out dropped their receiver.
                pending.retain(|_, tx| !tx.is_closed());
                let _ = pending.insert(id, reply);
                trace!(session_id = %session_id, id, command = command.name(), "sidecar command");
                if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                    break Some(format!("write failed: {e}"));
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(session_id = %session_id, error = %e, "unparseable sidecar frame");
                                continue;
                            }
                        };
                        match frame.into_reply() {
                            Ok((id, reply)) => match pending.remove(&id) {
                                Some(tx) => {
                                    let _ = tx.send(Ok(reply));
                                }
                                None => debug!(session_id = %session_id, id, "reply for unknown command"),
                            },
                            Err(frame) => {
                                if let Some(event) = frame.into_event() {
                                    if events.send(event).await.is_err() {
                                        debug!(session_id = %session_id, "session gone, dropping sidecar event");
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Some("closed by sidecar".to_string()),
                    Some(Err(e)) => break Some(format!("socket error: {e}")),
                    Some(Ok(_)) => {}
                }
            }
        }
    };
    // Senders see the link as dead before anyone hears about it.
    drop(commands);

    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(TransportError::ConnectionLost(CONNECTION_LOST.into())));
    }

    match lost {
        Some(detail) => {
            warn!(session_id = %session_id, detail, "sidecar link lost");
            let _ = events
                .send(TransportEvent::Disconnected(CONNECTION_LOST.into()))
                .await;
        }
        None => debug!(session_id = %session_id, "sidecar link closed"),
    }
}
