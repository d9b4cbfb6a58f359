//! Engine configuration
//!
//! Loaded from TOML or JSON (picked by file extension), then optionally
//! overridden from `RISK_MITIGATION_*` environment variables.

use crate::error::{MitigationError, MitigationResult};
use crate::telemetry::TracingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding [`GatewayConfig::endpoint`]
pub const ENV_SCORER_ENDPOINT: &str = "RISK_MITIGATION_SCORER_ENDPOINT";
/// Environment variable overriding [`PlannerConfig::max_rounds`]
pub const ENV_MAX_ROUNDS: &str = "RISK_MITIGATION_MAX_ROUNDS";
/// Environment variable overriding [`GatewayConfig::debounce_ms`]
pub const ENV_DEBOUNCE_MS: &str = "RISK_MITIGATION_DEBOUNCE_MS";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Round planning
    pub planner: PlannerConfig,
    /// External scorer access
    pub gateway: GatewayConfig,
    /// Log output
    pub logging: TracingConfig,
}

/// Round planner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum number of rounds; levers beyond it are deferred
    pub max_rounds: usize,
    /// Levers one family may contribute to a single round
    pub per_family_limit: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            per_family_limit: 1,
        }
    }
}

/// Scoring gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the external scorer
    pub endpoint: String,
    /// Per-request timeout
    pub request_timeout_ms: u64,
    /// Quiet period before a debounced request is sent
    pub debounce_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            request_timeout_ms: 10_000,
            debounce_ms: 300,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl EngineConfig {
    /// Load configuration from a `.toml` or `.json` file
    pub fn load_from(path: impl AsRef<Path>) -> MitigationResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| MitigationError::Configuration {
                message: format!("failed to parse {}: {e}", path.display()),
            })?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(MitigationError::Configuration {
                    message: format!("unsupported config format: {other:?}"),
                })
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply `RISK_MITIGATION_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> MitigationResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> MitigationResult<()> {
        if let Some(endpoint) = lookup(ENV_SCORER_ENDPOINT) {
            self.gateway.endpoint = endpoint;
        }
        if let Some(raw) = lookup(ENV_MAX_ROUNDS) {
            self.planner.max_rounds = parse_override(ENV_MAX_ROUNDS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DEBOUNCE_MS) {
            self.gateway.debounce_ms = parse_override(ENV_DEBOUNCE_MS, &raw)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> MitigationResult<()> {
        if self.planner.max_rounds == 0 {
            return Err(MitigationError::Configuration {
                message: "planner.max_rounds must be at least 1".to_string(),
            });
        }
        if self.planner.per_family_limit == 0 {
            return Err(MitigationError::Configuration {
                message: "planner.per_family_limit must be at least 1".to_string(),
            });
        }
        if self.gateway.endpoint.trim().is_empty() {
            return Err(MitigationError::Configuration {
                message: "gateway.endpoint cannot be empty".to_string(),
            });
        }
        if self.gateway.request_timeout_ms == 0 {
            return Err(MitigationError::Configuration {
                message: "gateway.request_timeout_ms must be positive".to_string(),
            });
        }
        self.logging.validate()
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> MitigationResult<T> {
    raw.trim().parse().map_err(|_| MitigationError::Configuration {
        message: format!("{key}: cannot parse '{raw}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.planner.max_rounds, 5);
        assert_eq!(config.planner.per_family_limit, 1);
        assert_eq!(config.gateway.debounce(), Duration::from_millis(300));
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.toml");
        fs::write(
            &path,
            r#"
[planner]
max_rounds = 3
per_family_limit = 2

[gateway]
endpoint = "http://scorer:8000"
debounce_ms = 150
"#,
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.planner.max_rounds, 3);
        assert_eq!(config.planner.per_family_limit, 2);
        assert_eq!(config.gateway.endpoint, "http://scorer:8000");
        assert_eq!(config.gateway.debounce_ms, 150);
        // Unspecified fields keep their defaults
        assert_eq!(config.gateway.request_timeout_ms, 10_000);
        assert_eq!(config.logging, TracingConfig::default());
    }

    #[test]
    fn test_load_from_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.json");
        fs::write(
            &path,
            r#"{"planner": {"max_rounds": 4}, "logging": {"log_level": "debug"}}"#,
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.planner.max_rounds, 4);
        assert_eq!(config.logging.log_level, "debug");
    }

    #[test]
    fn test_rejects_invalid_file_contents() {
        let temp_dir = TempDir::new().unwrap();

        let zero_rounds = temp_dir.path().join("zero.toml");
        fs::write(&zero_rounds, "[planner]\nmax_rounds = 0\n").unwrap();
        assert!(matches!(
            EngineConfig::load_from(&zero_rounds),
            Err(MitigationError::Configuration { .. })
        ));

        let yaml = temp_dir.path().join("engine.yaml");
        fs::write(&yaml, "planner: {}\n").unwrap();
        assert!(EngineConfig::load_from(&yaml).is_err());

        assert!(matches!(
            EngineConfig::load_from(temp_dir.path().join("missing.toml")),
            Err(MitigationError::Io { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_SCORER_ENDPOINT, "http://override:9000"),
            (ENV_MAX_ROUNDS, "2"),
            (ENV_DEBOUNCE_MS, "0"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.gateway.endpoint, "http://override:9000");
        assert_eq!(config.planner.max_rounds, 2);
        assert_eq!(config.gateway.debounce_ms, 0);

        let mut config = EngineConfig::default();
        let result = config.apply_overrides(|key| {
            (key == ENV_MAX_ROUNDS).then(|| "many".to_string())
        });
        assert!(matches!(result, Err(MitigationError::Configuration { .. })));
    }
}
