//! Structured logging setup for hosts embedding the engine
//!
//! The engine itself only emits `tracing` events; a host binary calls
//! [`init`] once to install a subscriber.

use crate::error::{MitigationError, MitigationResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging configuration.
///
/// `service_name` must be non-empty and contain only alphanumeric
/// characters, hyphens and underscores. `log_level` is the default filter when
/// `RUST_LOG` is not set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub service_name: String,
    pub log_level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "risk-mitigation".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl TracingConfig {
    pub fn validate(&self) -> MitigationResult<()> {
        if self.service_name.is_empty() {
            return Err(MitigationError::Configuration {
                message: "logging.service_name cannot be empty".to_string(),
            });
        }

        if !self
            .service_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(MitigationError::Configuration {
                message: "logging.service_name must contain only alphanumeric characters, hyphens, and underscores".to_string(),
            });
        }

        if !VALID_LEVELS.contains(&self.log_level.as_str()) {
            return Err(MitigationError::Configuration {
                message: format!(
                    "invalid log level '{}', must be one of: {}",
                    self.log_level,
                    VALID_LEVELS.join(", ")
                ),
            });
        }

        Ok(())
    }
}

/// Install the global subscriber.
///
/// Succeeds once per process; later calls return
/// [`MitigationError::Configuration`].
pub fn init(config: &TracingConfig) -> MitigationResult<()> {
    config.validate()?;

    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(MitigationError::Configuration {
            message: "tracing has already been initialized".to_string(),
        });
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| MitigationError::Configuration {
            message: format!("failed to initialize tracing: {e}"),
        })?;

    tracing::info!(service = %config.service_name, "tracing initialized");
    Ok(())
}
