pub mod metrics;

use std::str::FromStr;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Logging and metrics switches, resolved from settings and CLI flags.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Base level; `RUST_LOG` wins when set.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "relaygate_sessions" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Install the global Prometheus recorder.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from textual levels. Unparseable levels fall back to INFO for the
    /// default and are skipped for module overrides.
    pub fn from_levels<'a>(
        level: &str,
        module_levels: impl IntoIterator<Item = (&'a String, &'a String)>,
        json: bool,
    ) -> Self {
        let module_levels = module_levels
            .into_iter()
            .filter_map(|(module, lvl)| Level::from_str(lvl).ok().map(|l| (module.clone(), l)))
            .collect();
        Self {
            log_level: Level::from_str(level).unwrap_or(Level::INFO),
            module_levels,
            json,
            metrics_enabled: true,
        }
    }

    /// The `EnvFilter` directive string implied by this config.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Keeps the metrics handle alive for the process lifetime.
pub struct TelemetryGuard {
    prometheus: Option<PrometheusHandle>,
}

impl TelemetryGuard {
    pub fn prometheus(&self) -> Option<PrometheusHandle> {
        self.prometheus.clone()
    }
}

/// Initialize logging and metrics. Call once at startup; later calls keep the
/// first subscriber.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }

    let prometheus = if config.metrics_enabled {
        self::metrics::install_recorder()
    } else {
        None
    };

    TelemetryGuard { prometheus }
}
