//! Per-session pub/sub fan-out.
//!
//! Each session id owns an independent topic, so an observer of one session
//! can never see another session's events. A late subscriber gets the
//! current state as a snapshot, then only live events.

use std::collections::VecDeque;

use dashmap::DashMap;
use metrics::counter;
use relaygate_core::{GatewayEvent, SessionId, SessionState};
use relaygate_telemetry::metrics::OBSERVER_DROPS_TOTAL;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

/// Last known state of a topic, replayed to new subscribers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub state: Option<SessionState>,
    pub reason: Option<String>,
    /// Pending pairing code and its attempt number, while awaiting a scan.
    pub qr: Option<(String, u32)>,
}

impl Snapshot {
    fn apply(&mut self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Status { state, reason, .. } => {
                self.state = Some(*state);
                self.reason = reason.clone();
                if *state != SessionState::AwaitingScan {
                    self.qr = None;
                }
            }
            GatewayEvent::Qr { qr, attempt, .. } => self.qr = Some((qr.clone(), *attempt)),
            GatewayEvent::Connected { .. } | GatewayEvent::MessageReceived { .. } => {}
        }
    }

    fn to_events(&self, session_id: &SessionId) -> VecDeque<GatewayEvent> {
        let mut events = VecDeque::new();
        if let Some(state) = self.state {
            events.push_back(GatewayEvent::status(session_id.clone(), state, self.reason.clone()));
        }
        if let Some((qr, attempt)) = &self.qr {
            events.push_back(GatewayEvent::Qr {
                session_id: session_id.clone(),
                qr: qr.clone(),
                attempt: *attempt,
            });
        }
        events
    }
}

struct Topic {
    tx: broadcast::Sender<GatewayEvent>,
    snapshot: Snapshot,
}

/// Routes events to the observers of exactly one session each.
pub struct ObserverHub {
    topics: DashMap<SessionId, Topic>,
    capacity: usize,
}

impl ObserverHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Publish an event to the observers of its session.
    pub fn publish(&self, event: GatewayEvent) {
        let session_id = event.session_id().clone();
        let mut topic = self
            .topics
            .entry(session_id.clone())
            .or_insert_with(|| Topic {
                tx: broadcast::channel(self.capacity).0,
                snapshot: Snapshot::default(),
            });
        topic.snapshot.apply(&event);
        let event_type = event.event_type();
        // No receivers is not an error: nobody is watching this session.
        let recipients = topic.tx.send(event).unwrap_or(0);
        debug!(session_id = %session_id, event_type, recipients, "published event");
    }

    /// Subscribe to one session. The returned subscription yields the
    /// current snapshot first, then live events.
    pub fn subscribe(&self, session_id: &SessionId) -> Subscription {
        let topic = self
            .topics
            .entry(session_id.clone())
            .or_insert_with(|| Topic {
                tx: broadcast::channel(self.capacity).0,
                snapshot: Snapshot::default(),
            });
        Subscription {
            session_id: session_id.clone(),
            pending: topic.snapshot.to_events(session_id),
            rx: topic.tx.subscribe(),
        }
    }

    /// Current snapshot of a session, if anything was ever published for it.
    pub fn snapshot(&self, session_id: &SessionId) -> Option<Snapshot> {
        self.topics.get(session_id).map(|t| t.snapshot.clone())
    }

    /// Total live subscriptions across all topics.
    pub fn observer_count(&self) -> usize {
        self.topics.iter().map(|t| t.tx.receiver_count()).sum()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Drop topics nobody listens to whose session is gone or never existed.
    pub fn prune_idle(&self) -> usize {
        let before = self.topics.len();
        self.topics.retain(|_, topic| {
            topic.tx.receiver_count() > 0
                || matches!(topic.snapshot.state, Some(s) if !s.is_terminal())
        });
        before.saturating_sub(self.topics.len())
    }
}

/// One observer's view of one session.
pub struct Subscription {
    session_id: SessionId,
    pending: VecDeque<GatewayEvent>,
    rx: broadcast::Receiver<GatewayEvent>,
}

impl Subscription {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Next event, waiting if necessary. Returns `None` once the hub is gone.
    /// A lagging observer skips the overwritten events and keeps going.
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.record_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is immediately available.
    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn record_lag(&self, skipped: u64) {
        counter!(OBSERVER_DROPS_TOTAL).increment(skipped);
        warn!(session_id = %self.session_id, skipped, "observer lagged, dropped events");
    }
}
