//! Logging initialization, mirroring the init-once pattern used throughout
//! the rest of this workspace.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub default_level: Option<String>,
    pub log_directives: Vec<String>,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into(), default_level: None, log_directives: Vec::new() }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = Some(level.into());
        self
    }

    pub fn with_log_directive(mut self, directive: impl Into<String>) -> Self {
        self.log_directives.push(directive.into());
        self
    }

    /// `LOG_LEVEL` (default "info") plus whatever `RUST_LOG` overrides.
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let default_level = std::env::var("LOG_LEVEL").ok();
        Self { service_name: service_name.into(), default_level, log_directives: Vec::new() }
    }
}

/// Initialize the process-wide tracing subscriber. Safe to call more than
/// once; only the first call takes effect.
pub fn init(config: TelemetryConfig) {
    INIT.call_once(|| {
        let mut filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(config.default_level.as_deref().unwrap_or("info")))
            .expect("failed to build log filter");

        for directive in &config.log_directives {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true);

        tracing_subscriber::registry().with(filter).with(fmt_layer).init();

        tracing::info!(service.name = %config.service_name, "telemetry initialized");
    });
}

/// Initialize with just a service name and defaults from the environment.
pub fn init_default(service_name: &str) {
    init(TelemetryConfig::from_env(service_name));
}
