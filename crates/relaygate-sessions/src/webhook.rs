//! Backend notification of inbound messages.
//!
//! Delivery is best-effort with a bounded timeout. With the default budget
//! of one attempt it is at-most-once; failures are reported to the caller,
//! which logs and drops them.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::histogram;
use relaygate_core::InboundMessage;
use relaygate_settings::BackendSettings;
use relaygate_telemetry::metrics::WEBHOOK_DURATION_SECONDS;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

/// Header carrying the shared secret.
pub const TOKEN_HEADER: &str = "X-Webhook-Token";

/// Body posted to the backend for each relayed message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub session: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub client_name: Option<String>,
}

impl From<&InboundMessage> for WebhookPayload {
    fn from(msg: &InboundMessage) -> Self {
        Self {
            session: msg.session_id.to_string(),
            from: msg.sender_id.clone(),
            to: msg.recipient_id.clone(),
            body: msg.body.clone(),
            client_name: msg.client_name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook timed out after {0:?}")]
    Timeout(Duration),
    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("webhook network error: {0}")]
    Network(String),
}

impl WebhookError {
    /// 4xx answers mean the backend saw and refused the event; retrying won't help.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500,
        }
    }
}

/// In-memory record of one event's delivery, kept only while delivering.
#[derive(Clone, Debug)]
pub struct DeliveryAttempt {
    pub payload: WebhookPayload,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl DeliveryAttempt {
    pub fn new(payload: WebhookPayload) -> Self {
        Self {
            payload,
            attempt_count: 0,
            last_attempt_at: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl WebhookConfig {
    /// `None` when no backend is configured.
    pub fn from_settings(settings: &BackendSettings) -> Option<Self> {
        Some(Self {
            url: settings.webhook_url()?,
            token: settings.webhook_token.clone().filter(|t| !t.is_empty()),
            timeout: settings.timeout(),
            max_attempts: settings.max_attempts.max(1),
            retry_delay: settings.retry_delay(),
        })
    }
}

pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
    token: Option<SecretString>,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
}

impl WebhookClient {
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WebhookError::Network(e.to_string()))?;
        Ok(Self {
            http,
            url: config.url,
            token: config.token.map(SecretString::from),
            timeout: config.timeout,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver within the attempt budget, updating `attempt` as it goes.
    pub async fn deliver(&self, attempt: &mut DeliveryAttempt) -> Result<(), WebhookError> {
        loop {
            attempt.attempt_count += 1;
            attempt.last_attempt_at = Some(Utc::now());

            match self.post_once(&attempt.payload).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt.attempt_count < self.max_attempts => {
                    debug!(
                        attempt = attempt.attempt_count,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "webhook attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let started = Instant::now();
        let mut request = self.http.post(&self.url).json(payload);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                WebhookError::Timeout(self.timeout)
            } else {
                WebhookError::Network(e.to_string())
            }
        })?;

        histogram!(WEBHOOK_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(WebhookError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
