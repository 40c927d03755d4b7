//! Tracing setup for processes that embed the pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose targets can be tuned through [`LogConfig::components`].
pub const PIPELINE_CRATES: [&str; 3] = ["blockwatch-core", "blockwatch-storage", "blockwatch-ingest"];

/// Log level, per-crate overrides, and output format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Fallback level for every target: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Crate name → level. Dashes are accepted and mapped to tracing targets.
    pub components: BTreeMap<String, String>,
    /// One JSON object per event instead of human-readable lines.
    pub json: bool,
    /// Let `RUST_LOG` replace the directives built from this config.
    pub respect_env: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: BTreeMap::new(),
            json: false,
            respect_env: true,
        }
    }
}

impl LogConfig {
    /// `level` everywhere except the pipeline crates, which log at
    /// `pipeline_level`.
    pub fn pipeline(level: &str, pipeline_level: &str) -> Self {
        Self {
            level: level.into(),
            components: PIPELINE_CRATES
                .iter()
                .map(|c| (c.to_string(), pipeline_level.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    /// The `EnvFilter` directive string, e.g. `"warn,blockwatch_ingest=debug"`.
    pub fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.components
                    .iter()
                    .map(|(component, level)| format!("{}={}", component.replace('-', "_"), level)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn filter(&self) -> EnvFilter {
        if self.respect_env {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return filter;
            }
        }
        EnvFilter::try_new(self.directives()).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_tracing(config: &LogConfig) -> bool {
    let registry = tracing_subscriber::registry().with(config.filter());
    let installed = if config.json {
        registry.with(fmt::layer().json().with_current_span(false)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.is_ok()
}
