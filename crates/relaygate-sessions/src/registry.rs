//! Process-wide map of live sessions.
//!
//! `ensure_session` is single-flight: concurrent calls for the same id
//! observe exactly one session and its adapter is initialized once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use metrics::{counter, gauge};
use relaygate_core::{GatewayError, SessionId, SessionState, TransportFactory};
use relaygate_telemetry::metrics::{SESSIONS_ACTIVE, SESSIONS_CREATED_TOTAL};
use serde::Serialize;
use tracing::{info, warn};

use crate::hub::ObserverHub;
use crate::relay::EventRelay;
use crate::session::{Session, SessionActor, SessionMap, SessionPolicy};

/// Point-in-time view of a session for listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    factory: Arc<dyn TransportFactory>,
    relay: Arc<EventRelay>,
    policy: SessionPolicy,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn TransportFactory>, relay: Arc<EventRelay>, policy: SessionPolicy) -> Self {
        Self {
            sessions: Arc::new(SessionMap::new()),
            factory,
            relay,
            policy,
        }
    }

    /// Return the live session for `session_id`, creating and starting one
    /// if none exists. A session that already reached CLOSED is replaced.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure_session(&self, session_id: SessionId) -> Arc<Session> {
        let actor = match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(entry) if !entry.get().state().is_terminal() => {
                return Arc::clone(entry.get());
            }
            Entry::Occupied(mut entry) => {
                let (session, actor) = self.build(session_id.clone());
                entry.insert(session);
                actor
            }
            Entry::Vacant(entry) => {
                let (session, actor) = self.build(session_id.clone());
                entry.insert(session);
                gauge!(SESSIONS_ACTIVE).increment(1.0);
                actor
            }
        };

        // Spawned after the map guard is released; the session is already
        // visible so its actor can always find and retire it.
        let session = actor.session();
        counter!(SESSIONS_CREATED_TOTAL).increment(1);
        info!(session_id = %session_id, "session created");
        tokio::spawn(actor.run());
        session
    }

    fn build(&self, session_id: SessionId) -> (Arc<Session>, SessionActor) {
        Session::create(
            session_id,
            self.factory.as_ref(),
            Arc::clone(&self.relay),
            Arc::clone(&self.sessions),
            self.policy.clone(),
        )
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    /// `None` for unknown sessions.
    pub fn state(&self, session_id: &SessionId) -> Option<SessionState> {
        self.sessions.get(session_id).map(|s| s.state())
    }

    /// Close a session and wait for its teardown. Teardown is bounded; a
    /// session whose actor does not finish in time is dropped regardless.
    pub async fn close_session(&self, session_id: &SessionId) -> Result<(), GatewayError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.clone()))?;

        let limit = self.policy.teardown_timeout + Duration::from_secs(1);
        if tokio::time::timeout(limit, session.close()).await.is_err() {
            warn!(session_id = %session_id, "session close timed out, dropping it");
            session.abort();
            if self
                .sessions
                .remove_if(session_id, |_, current| Arc::ptr_eq(current, &session))
                .is_some()
            {
                gauge!(SESSIONS_ACTIVE).decrement(1.0);
            }
        }
        Ok(())
    }

    /// Summaries of all registered sessions, ordered by id.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                SessionSummary {
                    session_id: session.id().clone(),
                    state: session.state(),
                    created_at: session.created_at(),
                    last_error: session.last_error(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        summaries
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn relay(&self) -> &Arc<EventRelay> {
        &self.relay
    }

    pub fn hub(&self) -> &Arc<ObserverHub> {
        self.relay.hub()
    }

    /// Close every session concurrently.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "closing all sessions");
        let results = join_all(ids.iter().map(|id| self.close_session(id))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            // Sessions that retired on their own while we were closing.
            info!(count = failed, "sessions already gone at shutdown");
        }
    }
}
