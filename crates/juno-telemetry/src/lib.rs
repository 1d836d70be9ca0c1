use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "juno_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Filter directive built from the configured levels.
    pub fn filter_directive(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Initialize the tracing subscriber. Call once at startup.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).try_init().is_ok()
}

/// Parse a level name, falling back to INFO.
pub fn parse_level(name: &str) -> Level {
    name.parse().unwrap_or(Level::INFO)
}
