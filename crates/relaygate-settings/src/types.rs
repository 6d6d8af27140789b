//! Settings types. Every section has compiled defaults so a partial JSON file
//! only needs to name what it overrides.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySettings {
    pub server: ServerSettings,
    pub backend: BackendSettings,
    pub sessions: SessionSettings,
    pub transport: TransportSettings,
    pub logging: LoggingSettings,
}

impl GatewaySettings {
    /// Reject combinations the gateway cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.backend.max_attempts == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "backend.maxAttempts must be at least 1".into(),
            ));
        }
        if self.backend.timeout_ms == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "backend.timeoutMs must be positive".into(),
            ));
        }
        if self.sessions.event_buffer == 0 || self.sessions.observer_buffer == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "session buffers must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP/WebSocket listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Per-WebSocket-client outbound queue length.
    pub max_send_queue: usize,
    /// Interval of the dead-client and idle-topic sweep.
    pub cleanup_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 256,
            cleanup_interval_secs: 60,
        }
    }
}

/// Backend notified of inbound messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackendSettings {
    /// Base URL of the backend. Webhook delivery is disabled when unset.
    pub url: Option<String>,
    pub webhook_path: String,
    /// Shared secret sent as `X-Webhook-Token`.
    pub webhook_token: Option<String>,
    pub timeout_ms: u64,
    /// 1 = at-most-once.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: None,
            webhook_path: "/api/webhook/whatsapp".into(),
            webhook_token: None,
            timeout_ms: 15_000,
            max_attempts: 1,
            retry_delay_ms: 1_000,
        }
    }
}

impl BackendSettings {
    /// Full webhook endpoint, if a backend is configured.
    pub fn webhook_url(&self) -> Option<String> {
        let base = self.url.as_deref()?.trim();
        if base.is_empty() {
            return None;
        }
        let path = self.webhook_path.trim_start_matches('/');
        Some(format!("{}/{}", base.trim_end_matches('/'), path))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Session lifecycle policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    /// Automatic reinitializations allowed after a disconnect.
    pub reconnect_attempts: u32,
    /// Bound on a single adapter initialization. 0 disables the bound.
    pub init_timeout_ms: u64,
    /// Bound on adapter teardown during close.
    pub teardown_timeout_ms: u64,
    /// Capacity of each session's transport event channel.
    pub event_buffer: usize,
    /// Capacity of each observer topic.
    pub observer_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reconnect_attempts: 1,
            init_timeout_ms: 120_000,
            teardown_timeout_ms: 10_000,
            event_buffer: 256,
            observer_buffer: 128,
        }
    }
}

impl SessionSettings {
    pub fn init_timeout(&self) -> Option<Duration> {
        (self.init_timeout_ms > 0).then(|| Duration::from_millis(self.init_timeout_ms))
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

/// External messaging client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportSettings {
    /// WebSocket base URL of the automation sidecar.
    pub sidecar_url: String,
    /// Appended to recipients given without a domain.
    pub address_suffix: String,
    /// Reply bound for sidecar commands other than `initialize`.
    pub command_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            sidecar_url: "ws://127.0.0.1:3100".into(),
            address_suffix: "@c.us".into(),
            command_timeout_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module level overrides, e.g. `{"relaygate_sessions": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let s = GatewaySettings::default();
        assert_eq!(s.server.port, 3000);
        assert_eq!(s.backend.timeout(), Duration::from_secs(15));
        assert_eq!(s.backend.max_attempts, 1);
        assert_eq!(s.sessions.reconnect_attempts, 1);
        assert_eq!(s.transport.address_suffix, "@c.us");
        assert!(s.backend.webhook_url().is_none());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn webhook_url_joins_base_and_path() {
        let backend = BackendSettings {
            url: Some("http://127.0.0.1:8000/".into()),
            ..Default::default()
        };
        assert_eq!(
            backend.webhook_url().as_deref(),
            Some("http://127.0.0.1:8000/api/webhook/whatsapp")
        );
    }

    #[test]
    fn blank_backend_url_disables_webhook() {
        let backend = BackendSettings {
            url: Some("  ".into()),
            ..Default::default()
        };
        assert!(backend.webhook_url().is_none());
    }

    #[test]
    fn zero_init_timeout_means_unbounded() {
        let sessions = SessionSettings {
            init_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(sessions.init_timeout(), None);
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut s = GatewaySettings::default();
        s.backend.max_attempts = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: GatewaySettings = serde_json::from_str(r#"{"server":{"port":4000}}"#).unwrap();
        assert_eq!(s.server.port, 4000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.backend.webhook_path, "/api/webhook/whatsapp");
    }
}
