//! `NancyConfig`: the single startup configuration document (§6).
//!
//! Loaded from TOML (matching the teacher's `toml` dependency), with
//! environment-variable overrides for the handful of values operators most
//! often need to flip without editing a file on disk — named env-var
//! constants, mirroring `dashflow::core::config_loader::env_vars`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{NancyError, Result};
use crate::mode::Mode;

/// `NANCY_MODE` overrides `nancy_core.mode` at startup.
pub const ENV_MODE: &str = "NANCY_MODE";
/// `NANCY_CONFIG_PATH` points at the TOML document to load.
pub const ENV_CONFIG_PATH: &str = "NANCY_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NancyCoreSection {
    pub version: String,
    #[serde(default)]
    pub mode: Mode,
}

impl Default for NancyCoreSection {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            mode: Mode::default(),
        }
    }
}

fn default_strategy() -> String {
    "hybrid".to_string()
}
fn default_per_brain_timeout_ms() -> u64 {
    10_000
}
fn default_total_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationSection {
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
    #[serde(default = "default_per_brain_timeout_ms")]
    pub per_brain_timeout_ms: u64,
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            default_strategy: default_strategy(),
            per_brain_timeout_ms: default_per_brain_timeout_ms(),
            total_timeout_ms: default_total_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrainBackendConfig {
    pub backend: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub distance_metric: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrainsSection {
    #[serde(default)]
    pub vector: BrainBackendConfig,
    #[serde(default)]
    pub analytical: BrainBackendConfig,
    #[serde(default)]
    pub graph: BrainBackendConfig,
    #[serde(default)]
    pub llm: BrainBackendConfig,
}

/// One entry in `mcp_servers.enabled_servers` (§4.4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub content_types: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_max_missed")]
    pub max_missed: u32,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default = "default_graceful_ms")]
    pub graceful_ms: u64,
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_max_missed() -> u32 {
    3
}
fn default_max_restart_attempts() -> u32 {
    5
}
fn default_graceful_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServersSection {
    #[serde(default)]
    pub enabled_servers: Vec<McpServerConfig>,
}

fn default_ingest_in_flight() -> usize {
    64
}
fn default_query_in_flight() -> usize {
    64
}
fn default_per_brain_in_flight() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_ingest_in_flight")]
    pub ingest_in_flight: usize,
    #[serde(default = "default_query_in_flight")]
    pub query_in_flight: usize,
    #[serde(default = "default_per_brain_in_flight")]
    pub per_brain_in_flight: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            ingest_in_flight: default_ingest_in_flight(),
            query_in_flight: default_query_in_flight(),
            per_brain_in_flight: default_per_brain_in_flight(),
        }
    }
}

fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    100
}
fn default_retry_cap_ms() -> u64 {
    2_000
}
fn default_retry_jitter() -> f64 {
    0.2
}

/// Retry/backoff policy for brain dispatches (§4.3 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_ms: default_retry_base_ms(),
            cap_ms: default_retry_cap_ms(),
            jitter: default_retry_jitter(),
        }
    }
}

/// The stable-key configuration document of §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NancyConfig {
    #[serde(default)]
    pub nancy_core: NancyCoreSection,
    #[serde(default)]
    pub orchestration: OrchestrationSection,
    #[serde(default)]
    pub brains: BrainsSection,
    #[serde(default)]
    pub mcp_servers: McpServersSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for NancyConfig {
    fn default() -> Self {
        Self {
            nancy_core: NancyCoreSection::default(),
            orchestration: OrchestrationSection::default(),
            brains: BrainsSection::default(),
            mcp_servers: McpServersSection::default(),
            limits: LimitsSection::default(),
            retry: RetrySection::default(),
        }
    }
}

impl NancyConfig {
    /// Parse a TOML document into a config, applying `NANCY_MODE` as an
    /// override when set (§6 "environment-variable overrides").
    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: NancyConfig =
            toml::from_str(raw).map_err(|e| NancyError::Config(e.to_string()))?;
        if let Ok(mode_str) = std::env::var(ENV_MODE) {
            config.nancy_core.mode = mode_str
                .parse()
                .map_err(|_| NancyError::Config(format!("invalid {ENV_MODE} value: {mode_str}")))?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from the path named by `NANCY_CONFIG_PATH`, or return defaults
    /// if unset. Exit code 2 ("configuration invalid", §6) is the caller's
    /// responsibility to map from a returned `NancyError::Config`.
    pub fn load() -> Result<Self> {
        match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| NancyError::Config(format!("reading {path}: {e}")))?;
                Self::from_toml(&raw)
            }
            Err(_) => {
                let mut config = NancyConfig::default();
                if let Ok(mode_str) = std::env::var(ENV_MODE) {
                    config.nancy_core.mode = mode_str.parse().map_err(|_| {
                        NancyError::Config(format!("invalid {ENV_MODE} value: {mode_str}"))
                    })?;
                }
                Ok(config)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.limits.ingest_in_flight == 0 {
            return Err(NancyError::Config(
                "limits.ingest_in_flight must be > 0".to_string(),
            ));
        }
        if self.limits.per_brain_in_flight == 0 {
            return Err(NancyError::Config(
                "limits.per_brain_in_flight must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_numeric_defaults_named_in_the_spec() {
        let config = NancyConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_ms, 100);
        assert_eq!(config.retry.cap_ms, 2_000);
        assert_eq!(config.orchestration.per_brain_timeout_ms, 10_000);
        assert_eq!(config.orchestration.total_timeout_ms, 30_000);
        assert_eq!(config.limits.ingest_in_flight, 64);
        assert_eq!(config.limits.per_brain_in_flight, 16);
    }

    #[test]
    fn parses_a_minimal_toml_document() {
        let toml = r#"
            [nancy_core]
            version = "1.0.0"
            mode = "hybrid"
        "#;
        let config = NancyConfig::from_toml(toml).unwrap();
        assert_eq!(config.nancy_core.mode, Mode::Hybrid);
    }

    #[test]
    fn rejects_a_zero_ingest_in_flight_limit() {
        let toml = r#"
            [limits]
            ingest_in_flight = 0
        "#;
        assert!(NancyConfig::from_toml(toml).is_err());
    }
}
