//! One live session and the actor task that drives it.
//!
//! All state changes for a session happen on its actor task, in the order
//! the adapter reported them. Callers only hold an [`Arc<Session>`]: they can
//! read the state, send through the adapter once ready, and request a close.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use relaygate_core::{
    GatewayError, GatewayEvent, SessionId, SessionState, TransportAdapter, TransportError,
    TransportEvent, TransportFactory,
};
use relaygate_settings::SessionSettings;
use relaygate_telemetry::metrics::{SESSIONS_ACTIVE, SESSION_RECONNECTS_TOTAL, SESSION_TRANSITIONS_TOTAL};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::machine::{Action, Signal, StateMachine, Transition};
use crate::relay::EventRelay;

pub(crate) type SessionMap = DashMap<SessionId, Arc<Session>>;

const COMMAND_BUFFER: usize = 8;

/// Lifecycle limits applied to every session.
#[derive(Clone, Debug)]
pub struct SessionPolicy {
    /// Automatic reinitializations allowed after a disconnect.
    pub reconnect_attempts: u32,
    /// `None` waits for `initialize` indefinitely.
    pub init_timeout: Option<Duration>,
    pub teardown_timeout: Duration,
    /// Capacity of the adapter event channel.
    pub event_buffer: usize,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

impl From<&SessionSettings> for SessionPolicy {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            reconnect_attempts: settings.reconnect_attempts,
            init_timeout: settings.init_timeout(),
            teardown_timeout: settings.teardown_timeout(),
            event_buffer: settings.event_buffer.max(1),
        }
    }
}

enum Command {
    Close { done: oneshot::Sender<()> },
}

/// Handle to a registered session.
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    last_error: Mutex<Option<String>>,
    adapter: Arc<dyn TransportAdapter>,
    send_lock: tokio::sync::Mutex<()>,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Build a session and the actor that will drive it. The actor must be
    /// spawned by the caller once the session is visible in `sessions`.
    pub(crate) fn create(
        id: SessionId,
        factory: &dyn TransportFactory,
        relay: Arc<EventRelay>,
        sessions: Arc<SessionMap>,
        policy: SessionPolicy,
    ) -> (Arc<Self>, SessionActor) {
        let (events_tx, events_rx) = mpsc::channel(policy.event_buffer);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (init_tx, init_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Init);
        let adapter = factory.create(&id, events_tx);

        let session = Arc::new(Self {
            id,
            created_at: Utc::now(),
            state,
            last_error: Mutex::new(None),
            adapter,
            send_lock: tokio::sync::Mutex::new(()),
            commands: commands_tx,
            cancel: CancellationToken::new(),
        });

        let actor = SessionActor {
            session: Arc::clone(&session),
            machine: StateMachine::new(policy.reconnect_attempts),
            relay,
            sessions,
            policy,
            events: events_rx,
            commands: commands_rx,
            init_tx,
            init_rx,
            generation: 0,
            init_progressed: false,
            qr_attempt: 0,
            close_waiters: Vec::new(),
        };
        (session, actor)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Reason attached to the most recent disconnect or close.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Watch state changes as they happen.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Wait until the session reaches `target`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, target: SessionState, within: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let result = tokio::time::timeout(within, rx.wait_for(|s| *s == target)).await;
        matches!(result, Ok(Ok(_)))
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn TransportAdapter> {
        &self.adapter
    }

    pub(crate) fn send_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.send_lock
    }

    /// Ask the actor to close the session and wait until teardown finished.
    /// Returns immediately if the session is already gone.
    pub async fn close(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Close { done }).await.is_err() {
            return;
        }
        // A dropped sender also means the actor is done.
        let _ = finished.await;
    }

    /// Stop in-flight work without waiting for the actor.
    pub(crate) fn abort(&self) {
        self.cancel.cancel();
    }
}

struct InitOutcome {
    generation: u64,
    result: Result<(), TransportError>,
}

/// Owns the state machine of one session.
pub(crate) struct SessionActor {
    session: Arc<Session>,
    machine: StateMachine,
    relay: Arc<EventRelay>,
    sessions: Arc<SessionMap>,
    policy: SessionPolicy,
    events: mpsc::Receiver<TransportEvent>,
    commands: mpsc::Receiver<Command>,
    init_tx: mpsc::UnboundedSender<InitOutcome>,
    init_rx: mpsc::UnboundedReceiver<InitOutcome>,
    /// Bumped per `initialize` call; outcomes of older calls are ignored.
    generation: u64,
    /// Adapter reported a QR or readiness since the last `initialize`.
    init_progressed: bool,
    qr_attempt: u32,
    close_waiters: Vec<oneshot::Sender<()>>,
}

impl SessionActor {
    pub(crate) fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    pub(crate) async fn run(mut self) {
        let id = self.session.id.clone();
        info!(session_id = %id, "session starting");
        self.relay
            .publish(GatewayEvent::status(id.clone(), SessionState::Init, None));
        self.start_initialize();

        while self.machine.state() != SessionState::Closed {
            tokio::select! {
                biased;

                Some(command) = self.commands.recv() => match command {
                    Command::Close { done } => {
                        self.close_waiters.push(done);
                        self.apply(Signal::CloseRequested);
                    }
                },
                Some(outcome) = self.init_rx.recv() => self.on_init_outcome(outcome),
                Some(event) = self.events.recv() => self.on_transport_event(event),
                else => break,
            }
        }

        self.teardown().await;
    }

    fn start_initialize(&mut self) {
        self.generation += 1;
        self.init_progressed = false;

        let generation = self.generation;
        let adapter = Arc::clone(&self.session.adapter);
        let outcomes = self.init_tx.clone();
        let cancel = self.session.cancel.clone();
        let limit = self.policy.init_timeout;
        let session_id = self.session.id.clone();

        debug!(session_id = %session_id, generation, "initializing adapter");
        tokio::spawn(async move {
            let init = async {
                match limit {
                    Some(limit) => tokio::time::timeout(limit, adapter.initialize())
                        .await
                        .unwrap_or(Err(TransportError::Timeout(limit))),
                    None => adapter.initialize().await,
                }
            };
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = init => result,
            };
            let _ = outcomes.send(InitOutcome { generation, result });
        });
    }

    fn on_init_outcome(&mut self, outcome: InitOutcome) {
        let id = &self.session.id;
        if outcome.generation != self.generation {
            debug!(session_id = %id, generation = outcome.generation, "ignoring stale initialize outcome");
            return;
        }
        match outcome.result {
            Ok(()) => debug!(session_id = %id, "adapter initialize returned"),
            // The adapter is already talking to us; a slow `initialize` is not a failure.
            Err(TransportError::Timeout(_)) if self.init_progressed => {
                debug!(session_id = %id, "initialize timed out after adapter progressed");
            }
            Err(e) => {
                let error = GatewayError::AdapterInitFailed(e.to_string());
                warn!(session_id = %id, error = %error, error_kind = error.error_kind(), "adapter initialize failed");
                self.apply(Signal::InitFailed(e.to_string()));
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Qr(code) => {
                if self.apply(Signal::ScanNeeded).is_some() {
                    self.init_progressed = true;
                    self.qr_attempt += 1;
                    self.relay.publish(GatewayEvent::Qr {
                        session_id: self.session.id.clone(),
                        qr: code,
                        attempt: self.qr_attempt,
                    });
                } else {
                    debug!(session_id = %self.session.id, "ignoring QR while ready");
                }
            }
            TransportEvent::Ready => {
                if self.apply(Signal::Ready).is_some() {
                    self.init_progressed = true;
                    self.qr_attempt = 0;
                    self.relay.publish(GatewayEvent::Connected {
                        session_id: self.session.id.clone(),
                    });
                }
            }
            TransportEvent::Disconnected(reason) => {
                self.apply(Signal::Disconnected(reason));
            }
            TransportEvent::Fatal(reason) => {
                self.apply(Signal::Fatal(reason));
            }
            TransportEvent::Message(raw) => {
                self.relay.on_inbound(&self.session.id, raw);
            }
        }
    }

    /// Run a signal through the machine and carry out what it decided.
    fn apply(&mut self, signal: Signal) -> Option<Transition> {
        let transition = self.machine.apply(signal)?;
        let id = &self.session.id;

        // A failed reconnect with budget left stays DISCONNECTED but still
        // carries a reason observers must see.
        if transition.from != transition.to || transition.reason.is_some() {
            if let Some(reason) = &transition.reason {
                *self.session.last_error.lock() = Some(reason.clone());
            }
            self.session.state.send_replace(transition.to);
            counter!(SESSION_TRANSITIONS_TOTAL, "state" => transition.to.as_status_str()).increment(1);
            info!(
                session_id = %id,
                from = %transition.from,
                to = %transition.to,
                reason = transition.reason.as_deref().unwrap_or(""),
                "session state changed"
            );
            self.relay.publish(GatewayEvent::status(
                id.clone(),
                transition.to,
                transition.reason.clone(),
            ));
        }

        if transition.action == Action::Reinitialize {
            counter!(SESSION_RECONNECTS_TOTAL).increment(1);
            info!(
                session_id = %id,
                reconnects_left = self.machine.reconnects_left(),
                "reinitializing after disconnect"
            );
            self.start_initialize();
        }
        Some(transition)
    }

    async fn teardown(self) {
        let id = self.session.id.clone();
        // Stop an in-flight initialize before the adapter goes away.
        self.session.cancel.cancel();
        match tokio::time::timeout(self.policy.teardown_timeout, self.session.adapter.close()).await {
            Ok(Ok(())) => debug!(session_id = %id, "adapter closed"),
            Ok(Err(e)) => warn!(session_id = %id, error = %e, "adapter close failed"),
            Err(_) => warn!(
                session_id = %id,
                timeout_ms = self.policy.teardown_timeout.as_millis() as u64,
                "adapter close timed out"
            ),
        }

        let session = &self.session;
        if self
            .sessions
            .remove_if(&id, |_, current| Arc::ptr_eq(current, session))
            .is_some()
        {
            gauge!(SESSIONS_ACTIVE).decrement(1.0);
        }
        info!(session_id = %id, "session closed");

        for waiter in self.close_waiters {
            let _ = waiter.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_from_settings() {
        let settings = SessionSettings {
            reconnect_attempts: 3,
            init_timeout_ms: 0,
            event_buffer: 0,
            ..Default::default()
        };
        let policy = SessionPolicy::from(&settings);
        assert_eq!(policy.reconnect_attempts, 3);
        assert_eq!(policy.init_timeout, None);
        assert_eq!(policy.event_buffer, 1);
    }

    #[test]
    fn default_policy_allows_one_reconnect() {
        let policy = SessionPolicy::default();
        assert_eq!(policy.reconnect_attempts, 1);
        assert_eq!(policy.init_timeout, Some(Duration::from_secs(120)));
    }
}
