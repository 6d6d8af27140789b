//! Outbound sends through a session's adapter.
//!
//! A send is only attempted while the session is READY. Sends on one session
//! are serialized; different sessions never wait on each other.

use std::sync::Arc;

use metrics::counter;
use relaygate_core::{DeliveryAck, GatewayError, SessionId};
use relaygate_telemetry::metrics::OUTBOUND_SENDS_TOTAL;
use tracing::{debug, warn};

use crate::registry::SessionRegistry;

/// Turn a bare account identifier into a fully qualified address.
/// Already-qualified recipients are kept as they are.
pub fn normalize_recipient(recipient: &str, suffix: &str) -> String {
    let recipient = recipient.trim();
    if recipient.contains('@') {
        recipient.to_string()
    } else {
        format!("{recipient}{suffix}")
    }
}

pub struct OutboundDispatcher {
    registry: Arc<SessionRegistry>,
    address_suffix: String,
}

impl OutboundDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, address_suffix: impl Into<String>) -> Self {
        Self {
            registry,
            address_suffix: address_suffix.into(),
        }
    }

    pub async fn send(
        &self,
        session_id: &SessionId,
        recipient: &str,
        body: &str,
    ) -> Result<DeliveryAck, GatewayError> {
        let result = self.try_send(session_id, recipient, body).await;
        let outcome = match &result {
            Ok(_) => "sent",
            Err(e) => e.error_kind(),
        };
        counter!(OUTBOUND_SENDS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_send(
        &self,
        session_id: &SessionId,
        recipient: &str,
        body: &str,
    ) -> Result<DeliveryAck, GatewayError> {
        if recipient.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("recipient is required".into()));
        }
        if body.is_empty() {
            return Err(GatewayError::InvalidRequest("message body is required".into()));
        }

        let not_ready = |state| GatewayError::SessionNotReady {
            session_id: session_id.clone(),
            state,
        };
        let session = self.registry.get(session_id).ok_or_else(|| not_ready(None))?;
        if !session.is_ready() {
            return Err(not_ready(Some(session.state())));
        }

        let recipient_id = normalize_recipient(recipient, &self.address_suffix);
        let _serial = session.send_lock().lock().await;
        // The session may have dropped while we queued behind another send.
        let state = session.state();
        if !state.is_ready() {
            return Err(not_ready(Some(state)));
        }

        match session.adapter().send_message(&recipient_id, body).await {
            Ok(message_id) => {
                debug!(session_id = %session_id, to = %recipient_id, "message sent");
                Ok(DeliveryAck {
                    recipient_id,
                    message_id,
                })
            }
            Err(cause) => {
                warn!(session_id = %session_id, to = %recipient_id, error = %cause, "send failed");
                Err(GatewayError::DeliveryFailed {
                    session_id: session_id.clone(),
                    cause,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use relaygate_core::{SessionState, TransportError, TransportEvent};

    use crate::hub::ObserverHub;
    use crate::mock::{MockCall, MockTransportFactory};
    use crate::relay::EventRelay;
    use crate::session::SessionPolicy;

    const WAIT: Duration = Duration::from_secs(2);

    fn setup() -> (Arc<MockTransportFactory>, Arc<SessionRegistry>, OutboundDispatcher) {
        let factory = Arc::new(MockTransportFactory::new());
        let relay = Arc::new(EventRelay::new(Arc::new(ObserverHub::new(16)), None));
        let registry = Arc::new(SessionRegistry::new(
            factory.clone(),
            relay,
            SessionPolicy::default(),
        ));
        let dispatcher = OutboundDispatcher::new(Arc::clone(&registry), "@c.us");
        (factory, registry, dispatcher)
    }

    async fn ready_session(factory: &MockTransportFactory, registry: &SessionRegistry, id: &str) {
        let session = registry.ensure_session(SessionId::from_raw(id));
        factory
            .adapter(session.id())
            .unwrap()
            .emit(TransportEvent::Ready)
            .await;
        assert!(session.wait_for_state(SessionState::Ready, WAIT).await);
    }

    #[test]
    fn normalizes_bare_identifiers() {
        assert_eq!(normalize_recipient("5493484699717", "@c.us"), "5493484699717@c.us");
        assert_eq!(normalize_recipient(" 555 ", "@c.us"), "555@c.us");
        assert_eq!(normalize_recipient("555@c.us", "@c.us"), "555@c.us");
        assert_eq!(normalize_recipient("555@domain", "@c.us"), "555@domain");
    }

    #[tokio::test]
    async fn ready_session_sends_exactly_once() {
        let (factory, registry, dispatcher) = setup();
        ready_session(&factory, &registry, "p1").await;

        let ack = dispatcher
            .send(&SessionId::from_raw("p1"), "555@domain", "hi")
            .await
            .unwrap();
        assert_eq!(ack.recipient_id, "555@domain");
        assert!(ack.message_id.is_some());

        let adapter = factory.adapter(&SessionId::from_raw("p1")).unwrap();
        assert_eq!(adapter.sends(), vec![("555@domain".to_string(), "hi".to_string())]);
    }

    #[tokio::test]
    async fn bare_recipient_gets_suffix() {
        let (factory, registry, dispatcher) = setup();
        ready_session(&factory, &registry, "p1").await;

        dispatcher
            .send(&SessionId::from_raw("p1"), "5491100000000", "hola")
            .await
            .unwrap();
        let adapter = factory.adapter(&SessionId::from_raw("p1")).unwrap();
        assert_eq!(adapter.sends()[0].0, "5491100000000@c.us");
    }

    #[tokio::test]
    async fn session_in_init_is_not_ready() {
        let (factory, registry, dispatcher) = setup();
        let session = registry.ensure_session(SessionId::from_raw("p1"));
        assert_eq!(session.state(), SessionState::Init);

        let err = dispatcher
            .send(&SessionId::from_raw("p1"), "555", "hi")
            .await
            .unwrap_err();
        assert_matches!(
            err,
            GatewayError::SessionNotReady { state: Some(SessionState::Init), .. }
        );
        let adapter = factory.adapter(session.id()).unwrap();
        assert!(adapter.sends().is_empty());
    }

    #[tokio::test]
    async fn disconnected_session_is_not_ready() {
        let (factory, registry, dispatcher) = setup();
        ready_session(&factory, &registry, "p1").await;
        let session = registry.get(&SessionId::from_raw("p1")).unwrap();
        let adapter = factory.adapter(session.id()).unwrap();
        adapter.emit(TransportEvent::Disconnected("NAVIGATION".into())).await;
        assert!(session.wait_for_state(SessionState::Disconnected, WAIT).await);

        let err = dispatcher
            .send(session.id(), "555", "hi")
            .await
            .unwrap_err();
        assert_matches!(
            err,
            GatewayError::SessionNotReady { state: Some(SessionState::Disconnected), .. }
        );
        assert!(!adapter.calls().iter().any(|c| matches!(c, MockCall::Send { .. })));
    }

    #[tokio::test]
    async fn unknown_session_is_not_ready() {
        let (_factory, _registry, dispatcher) = setup();
        let err = dispatcher
            .send(&SessionId::from_raw("ghost"), "555", "hi")
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::SessionNotReady { state: None, .. });
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn missing_fields_are_invalid() {
        let (_factory, _registry, dispatcher) = setup();
        let sid = SessionId::from_raw("p1");
        assert_matches!(
            dispatcher.send(&sid, "  ", "hi").await,
            Err(GatewayError::InvalidRequest(_))
        );
        assert_matches!(
            dispatcher.send(&sid, "555", "").await,
            Err(GatewayError::InvalidRequest(_))
        );
    }

    #[tokio::test]
    async fn adapter_failure_is_delivery_failed() {
        let (factory, registry, dispatcher) = setup();
        ready_session(&factory, &registry, "p1").await;
        let sid = SessionId::from_raw("p1");
        factory
            .adapter(&sid)
            .unwrap()
            .fail_sends(TransportError::Rejected("not on platform".into()));

        let err = dispatcher.send(&sid, "555", "hi").await.unwrap_err();
        assert_matches!(
            &err,
            GatewayError::DeliveryFailed { cause: TransportError::Rejected(_), .. }
        );
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn sessions_send_independently() {
        let (factory, registry, dispatcher) = setup();
        ready_session(&factory, &registry, "p1").await;
        ready_session(&factory, &registry, "p2").await;

        let p1 = SessionId::from_raw("p1");
        let p2 = SessionId::from_raw("p2");
        let (a, b) = tokio::join!(dispatcher.send(&p1, "1", "a"), dispatcher.send(&p2, "2", "b"));
        a.unwrap();
        b.unwrap();

        assert_eq!(factory.adapter(&p1).unwrap().sends(), vec![("1@c.us".to_string(), "a".to_string())]);
        assert_eq!(factory.adapter(&p2).unwrap().sends(), vec![("2@c.us".to_string(), "b".to_string())]);
    }
}
