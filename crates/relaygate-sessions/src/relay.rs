//! Forwards session events to observers and inbound messages to the backend.

use std::sync::Arc;

use metrics::counter;
use relaygate_core::{GatewayError, GatewayEvent, InboundMessage, RawMessage, SessionId};
use relaygate_telemetry::metrics::{INBOUND_MESSAGES_TOTAL, WEBHOOK_DELIVERIES_TOTAL};
use tracing::{debug, warn};

use crate::filter;
use crate::hub::ObserverHub;
use crate::webhook::{DeliveryAttempt, WebhookClient, WebhookPayload};

pub struct EventRelay {
    hub: Arc<ObserverHub>,
    webhook: Option<Arc<WebhookClient>>,
}

impl EventRelay {
    pub fn new(hub: Arc<ObserverHub>, webhook: Option<WebhookClient>) -> Self {
        Self {
            hub,
            webhook: webhook.map(Arc::new),
        }
    }

    pub fn hub(&self) -> &Arc<ObserverHub> {
        &self.hub
    }

    /// Lifecycle events go to observers only, never to the webhook.
    pub fn publish(&self, event: GatewayEvent) {
        self.hub.publish(event);
    }

    /// Filter an inbound message; relay it if it is a direct external one.
    /// Returns whether the message was accepted.
    pub fn on_inbound(&self, session_id: &SessionId, raw: RawMessage) -> bool {
        if let Err(rejection) = filter::classify(&raw) {
            counter!(INBOUND_MESSAGES_TOTAL, "outcome" => rejection.as_str()).increment(1);
            debug!(
                session_id = %session_id,
                from = %raw.from,
                reason = rejection.as_str(),
                "inbound message filtered"
            );
            return false;
        }
        counter!(INBOUND_MESSAGES_TOTAL, "outcome" => "accepted").increment(1);

        let message = InboundMessage::from_raw(session_id.clone(), raw);
        // Observers are notified before the webhook is attempted.
        self.hub.publish(GatewayEvent::message_received(&message));

        if let Some(webhook) = &self.webhook {
            let webhook = Arc::clone(webhook);
            tokio::spawn(deliver(webhook, message));
        }
        true
    }
}

async fn deliver(webhook: Arc<WebhookClient>, message: InboundMessage) {
    let mut attempt = DeliveryAttempt::new(WebhookPayload::from(&message));
    match webhook.deliver(&mut attempt).await {
        Ok(()) => {
            counter!(WEBHOOK_DELIVERIES_TOTAL, "outcome" => "delivered").increment(1);
            debug!(
                session_id = %message.session_id,
                attempts = attempt.attempt_count,
                "webhook delivered"
            );
        }
        Err(e) => {
            counter!(WEBHOOK_DELIVERIES_TOTAL, "outcome" => "dropped").increment(1);
            let error = GatewayError::WebhookUnreachable(e.to_string());
            warn!(
                session_id = %message.session_id,
                from = %message.sender_id,
                attempts = attempt.attempt_count,
                error = %error,
                "backend notification dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::webhook::WebhookConfig;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn raw(from: &str, from_me: bool) -> RawMessage {
        RawMessage {
            id: None,
            from: from.into(),
            to: "777@c.us".into(),
            body: " hola ".into(),
            from_me,
            notify_name: Some("Ana".into()),
        }
    }

    fn webhook(server: &MockServer, timeout: Duration) -> WebhookClient {
        WebhookClient::new(WebhookConfig {
            url: format!("{}/api/webhook/whatsapp", server.uri()),
            token: None,
            timeout,
            max_attempts: 1,
            retry_delay: Duration::from_millis(10),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn filtered_messages_reach_neither_hub_nor_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let hub = Arc::new(ObserverHub::new(16));
        let relay = EventRelay::new(Arc::clone(&hub), Some(webhook(&server, Duration::from_secs(1))));
        let sid = SessionId::from_raw("p1");
        let mut sub = hub.subscribe(&sid);

        assert!(!relay.on_inbound(&sid, raw("123@g.us", false)));
        assert!(!relay.on_inbound(&sid, raw("status@broadcast", false)));
        assert!(!relay.on_inbound(&sid, raw("9@newsletter", false)));
        assert!(!relay.on_inbound(&sid, raw("555@c.us", true)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn accepted_message_goes_to_hub_and_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let hub = Arc::new(ObserverHub::new(16));
        let relay = EventRelay::new(Arc::clone(&hub), Some(webhook(&server, Duration::from_secs(1))));
        let sid = SessionId::from_raw("p1");
        let mut sub = hub.subscribe(&sid);

        assert!(relay.on_inbound(&sid, raw("555@c.us", false)));

        match sub.try_recv() {
            Some(GatewayEvent::MessageReceived { from, body, .. }) => {
                assert_eq!(from, "555@c.us");
                assert_eq!(body, "hola");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["session"], "p1");
        assert_eq!(body["body"], "hola");
        assert_eq!(body["client_name"], "Ana");
    }

    #[tokio::test]
    async fn webhook_timeout_still_reaches_observers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let hub = Arc::new(ObserverHub::new(16));
        let relay = EventRelay::new(Arc::clone(&hub), Some(webhook(&server, Duration::from_millis(50))));
        let sid = SessionId::from_raw("p1");
        let mut sub = hub.subscribe(&sid);

        assert!(relay.on_inbound(&sid, raw("555@c.us", false)));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(sub.try_recv().map(|e| e.event_type()), Some("message_received"));
    }

    #[tokio::test]
    async fn relay_without_backend_only_publishes() {
        let hub = Arc::new(ObserverHub::new(16));
        let relay = EventRelay::new(Arc::clone(&hub), None);
        let sid = SessionId::from_raw("p1");
        let mut sub = hub.subscribe(&sid);

        assert!(relay.on_inbound(&sid, raw("555@c.us", false)));
        assert!(sub.try_recv().is_some());
    }
}
