//! Layered settings: compiled defaults, then the JSON file merged over them
//! key by key, then `RELAYGATE_*` environment overrides.
//!
//! In the file layer nested objects merge, `null` leaves the default alone,
//! and any other value replaces it.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::GatewaySettings;

/// Resolve the default settings file (`~/.relaygate/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relaygate").join("settings.json")
}

/// Load settings from `path` (or the default path) with env var overrides.
pub fn load_settings(path: Option<&Path>) -> Result<GatewaySettings> {
    match path {
        Some(p) => load_settings_from_path(p),
        None => load_settings_from_path(&settings_path()),
    }
}

/// Like [`load_settings`] with an explicit file.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let mut settings = read_layers(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_layers(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "reading settings file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "no settings file, defaults apply");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Merge `source` over `target`.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides read through `lookup` (the process environment in production).
///
/// Invalid values are ignored with a warning and fall back to file/default.
pub fn apply_overrides(settings: &mut GatewaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("RELAYGATE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("RELAYGATE_PORT").or_else(|| read("PORT")) {
        match parse_u64_range(&v, 1, 65_535) {
            Some(port) => settings.server.port = port as u16,
            None => warn_invalid("RELAYGATE_PORT", &v),
        }
    }

    // ── Backend ─────────────────────────────────────────────────────
    if let Some(v) = read("RELAYGATE_BACKEND_URL") {
        settings.backend.url = Some(v);
    }
    if let Some(v) = read("RELAYGATE_WEBHOOK_TOKEN") {
        settings.backend.webhook_token = Some(v);
    }
    if let Some(v) = read("RELAYGATE_WEBHOOK_TIMEOUT_MS") {
        match parse_u64_range(&v, 100, 600_000) {
            Some(ms) => settings.backend.timeout_ms = ms,
            None => warn_invalid("RELAYGATE_WEBHOOK_TIMEOUT_MS", &v),
        }
    }

    // ── Sessions ────────────────────────────────────────────────────
    if let Some(v) = read("RELAYGATE_RECONNECT_ATTEMPTS") {
        match parse_u64_range(&v, 0, 100) {
            Some(n) => settings.sessions.reconnect_attempts = n as u32,
            None => warn_invalid("RELAYGATE_RECONNECT_ATTEMPTS", &v),
        }
    }

    // ── Transport ───────────────────────────────────────────────────
    if let Some(v) = read("RELAYGATE_SIDECAR_URL") {
        settings.transport.sidecar_url = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("RELAYGATE_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn_invalid("RELAYGATE_LOG_JSON", &v),
        }
    }
}

/// Lenient boolean for env flags (`1`, `yes`, `on`, `true` and their negatives).
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn warn_invalid(key: &str, value: &str) {
    tracing::warn!(key, value, "invalid env var, ignoring");
}
