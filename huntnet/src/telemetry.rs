//! Log output for HuntNet nodes.
//!
//! # Example
//!
//! ```rust,ignore
//! use huntnet::telemetry::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::new("hunt-1").with_level("huntnet=debug"));
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::NodeConfig;

/// Tracing configuration.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Node name attached to the startup line.
    pub service_name: String,
    /// Filter directives (e.g. "info", "huntnet=debug,redis=warn").
    /// `RUST_LOG` takes precedence when set.
    pub log_level: String,
    /// Output logs as JSON.
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "huntnet".into(),
            log_level: "info".into(),
            json_output: false,
        }
    }
}

impl TracingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

impl From<&NodeConfig> for TracingConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            service_name: config.name.clone(),
            log_level: config.log_level.clone(),
            json_output: config.json_logs,
        }
    }
}

fn env_filter(config: &TracingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Install the global subscriber. Call once at startup.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: TracingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter(&config));

    let installed = if config.json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        registry.with(fmt_layer).try_init().is_ok()
    } else {
        let fmt_layer = fmt::layer().with_target(true).compact();
        registry.with(fmt_layer).try_init().is_ok()
    };

    if installed {
        tracing::info!(
            service = %config.service_name,
            json = config.json_output,
            "tracing initialized"
        );
    }
    installed
}
