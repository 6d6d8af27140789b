use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use metrics::gauge;
use parking_lot::Mutex;
use relaygate_core::{ClientId, SessionId};
use relaygate_sessions::{ObserverHub, Subscription};
use relaygate_telemetry::metrics::WS_CONNECTIONS_ACTIVE;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::wire::{self, ClientFrame};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// A connected WebSocket observer.
pub struct Client {
    pub id: ClientId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
    /// One forwarding task per joined session.
    rooms: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }

    /// Joined sessions, sorted.
    pub fn rooms(&self) -> Vec<SessionId> {
        let mut rooms: Vec<SessionId> = self.rooms.lock().keys().cloned().collect();
        rooms.sort();
        rooms
    }

    fn leave_all(&self) {
        for (_, task) in self.rooms.lock().drain() {
            task.abort();
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket observers and the rooms they joined.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    hub: Arc<ObserverHub>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(hub: Arc<ObserverHub>, max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            hub,
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a new client and return its ID + outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients.insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        (id, rx)
    }

    /// Remove a client and stop all its room forwarders.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
            client.leave_all();
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Join a session room. The client first gets a `joined` acknowledgement,
    /// then the session snapshot, then live events.
    pub fn join(&self, client_id: &ClientId, session_id: SessionId) -> bool {
        let Some(client) = self.get(client_id) else {
            return false;
        };
        let _ = self.send_to(client_id, wire::joined_frame(&session_id).to_string());

        let subscription = self.hub.subscribe(&session_id);
        let task = tokio::spawn(forward(subscription, client.tx.clone(), client_id.clone()));
        if let Some(previous) = client.rooms.lock().insert(session_id.clone(), task) {
            previous.abort();
        }
        tracing::debug!(client_id = %client_id, session_id = %session_id, "client joined session");
        true
    }

    /// Leave a session room. Returns whether the client was in it.
    pub fn leave(&self, client_id: &ClientId, session_id: &SessionId) -> bool {
        let Some(client) = self.get(client_id) else {
            return false;
        };
        let Some(task) = client.rooms.lock().remove(session_id) else {
            return false;
        };
        task.abort();
        let _ = self.send_to(client_id, wire::left_frame(session_id).to_string());
        tracing::debug!(client_id = %client_id, session_id = %session_id, "client left session");
        true
    }

    /// Queue a frame for one client. Drops it if the client's queue is full.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        let Some(client) = self.get(client_id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %client_id,
                    msg_len = msg.len(),
                    "client queue full, frame dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Connected observers.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Drop observers that stopped answering pings or whose socket closed.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive() || !entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(client_id = %id, "pruned unresponsive client");
        }
        dead.len()
    }

    fn handle_frame(&self, client_id: &ClientId, text: &str) {
        match wire::parse_client_frame(text) {
            Ok(ClientFrame::Join(session_id)) => {
                self.join(client_id, session_id);
            }
            Ok(ClientFrame::Leave(session_id)) => {
                self.leave(client_id, &session_id);
            }
            Err(reason) => {
                tracing::debug!(client_id = %client_id, reason, "bad client frame");
                let _ = self.send_to(client_id, wire::error_frame(&reason).to_string());
            }
        }
    }
}

/// Pump one session's events into a client's outbound queue.
async fn forward(mut subscription: Subscription, tx: mpsc::Sender<String>, client_id: ClientId) {
    while let Some(event) = subscription.recv().await {
        let frame = wire::event_frame(&event).to_string();
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    client_id = %client_id,
                    session_id = %subscription.session_id(),
                    event_type = event.event_type(),
                    "client queue full, event dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

/// Serve one observer socket until either direction closes.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound frames and heartbeat.
    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "heartbeat ping");
                }
            }
        }

        if let Some(client) = writer_registry.get(&writer_cid) {
            client.connected.store(false, Ordering::Relaxed);
        }
    });

    // Join/leave frames and pongs.
    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => reader_registry.handle_frame(&reader_cid, text.as_str()),
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
    tracing::info!(client_id = %client_id, "observer disconnected");
}

/// Start a background task that periodically cleans up dead clients and
/// idle observer topics.
pub fn start_cleanup_task(registry: Arc<ClientRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "observer cleanup");
            }
            let topics = registry.hub.prune_idle();
            if topics > 0 {
                tracing::debug!(topics, "Pruned idle observer topics");
            }
        }
    })
}
