//! Scriptable in-memory transport for tests.
//!
//! `MockTransportFactory` hands out one [`MockTransport`] per session and
//! keeps it reachable so a test can push adapter events and inspect the
//! calls the session made.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relaygate_core::{SessionId, TransportAdapter, TransportError, TransportEvent, TransportFactory};
use tokio::sync::mpsc;

/// A call the session made on the adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    Initialize,
    Send { to: String, body: String },
    Close,
}

#[derive(Clone, Debug, Default)]
struct Behavior {
    init_error: Option<TransportError>,
    init_delay: Option<Duration>,
    send_error: Option<TransportError>,
    close_delay: Option<Duration>,
}

pub struct MockTransport {
    session_id: SessionId,
    events: mpsc::Sender<TransportEvent>,
    calls: Mutex<Vec<MockCall>>,
    init_results: Mutex<VecDeque<Result<(), TransportError>>>,
    behavior: Mutex<Behavior>,
    next_message_id: Mutex<u64>,
}

impl MockTransport {
    fn new(session_id: SessionId, events: mpsc::Sender<TransportEvent>, behavior: Behavior) -> Self {
        Self {
            session_id,
            events,
            calls: Mutex::new(Vec::new()),
            init_results: Mutex::new(VecDeque::new()),
            behavior: Mutex::new(behavior),
            next_message_id: Mutex::new(0),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Push an event as if the platform client had emitted it.
    pub async fn emit(&self, event: TransportEvent) {
        // The session may already be gone; tests assert on what it saw.
        let _ = self.events.send(event).await;
    }

    /// Queue the result of the next `initialize` call. Unqueued calls
    /// use the factory default.
    pub fn push_init_result(&self, result: Result<(), TransportError>) {
        self.init_results.lock().push_back(result);
    }

    pub fn fail_sends(&self, error: TransportError) {
        self.behavior.lock().send_error = Some(error);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn initialize_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Initialize))
    }

    pub fn close_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Close))
    }

    /// `(to, body)` of every send, in order.
    pub fn sends(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::Send { to, body } => Some((to.clone(), body.clone())),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        self.calls.lock().push(MockCall::Initialize);
        let (delay, default) = {
            let behavior = self.behavior.lock();
            (behavior.init_delay, behavior.init_error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.init_results.lock().pop_front();
        match queued {
            Some(result) => result,
            None => default.map_or(Ok(()), Err),
        }
    }

    async fn send_message(&self, recipient_id: &str, body: &str) -> Result<Option<String>, TransportError> {
        self.calls.lock().push(MockCall::Send {
            to: recipient_id.to_string(),
            body: body.to_string(),
        });
        if let Some(error) = self.behavior.lock().send_error.clone() {
            return Err(error);
        }
        let mut next = self.next_message_id.lock();
        *next += 1;
        Ok(Some(format!("mock-{}-{}", self.session_id, *next)))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.calls.lock().push(MockCall::Close);
        let delay = self.behavior.lock().close_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Creates [`MockTransport`]s and remembers them by session id.
#[derive(Default)]
pub struct MockTransportFactory {
    adapters: Mutex<HashMap<SessionId, Arc<MockTransport>>>,
    created: Mutex<usize>,
    behavior: Behavior,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `initialize` fails with `error` unless a result was queued.
    pub fn with_init_error(mut self, error: TransportError) -> Self {
        self.behavior.init_error = Some(error);
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.behavior.init_delay = Some(delay);
        self
    }

    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.behavior.close_delay = Some(delay);
        self
    }

    /// Most recent adapter created for `session_id`.
    pub fn adapter(&self, session_id: &SessionId) -> Option<Arc<MockTransport>> {
        self.adapters.lock().get(session_id).cloned()
    }

    /// Total adapters created.
    pub fn created(&self) -> usize {
        *self.created.lock()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, session_id: &SessionId, events: mpsc::Sender<TransportEvent>) -> Arc<dyn TransportAdapter> {
        let adapter = Arc::new(MockTransport::new(session_id.clone(), events, self.behavior.clone()));
        self.adapters.lock().insert(session_id.clone(), Arc::clone(&adapter));
        *self.created.lock() += 1;
        adapter
    }
}
