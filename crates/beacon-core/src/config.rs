use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BeaconError, Result};

/// Top-level configuration for Beacon.
///
/// Loaded from `~/.beacon/config.toml` by default. Missing sections and
/// keys fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl BeaconConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BeaconConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.max_attempts == 0 {
            return Err(BeaconError::Config(
                "engine.max_attempts must be at least 1".to_string(),
            ));
        }
        if engine.default_timeout_secs == 0 || engine.webhook_timeout_secs == 0 {
            return Err(BeaconError::Config(
                "engine timeouts must be greater than zero".to_string(),
            ));
        }
        if engine.backoff_max_ms < engine.backoff_base_ms {
            return Err(BeaconError::Config(
                "engine.backoff_max_ms must not be below engine.backoff_base_ms".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(BeaconError::Config("server.port must not be 0".to_string()));
        }
        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.beacon/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Control API listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7820,
        }
    }
}

/// Rule evaluation and dispatch tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Write a `skipped` record when the governor rejects a matched rule.
    pub log_skipped: bool,
    /// Per-attempt timeout for executors without their own default.
    pub default_timeout_secs: u64,
    /// Per-attempt timeout for webhook calls.
    pub webhook_timeout_secs: u64,
    /// Dispatch attempts per admission, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// How long shutdown waits for in-flight executions.
    pub shutdown_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_skipped: true,
            default_timeout_secs: 10,
            webhook_timeout_secs: 15,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            shutdown_grace_secs: 30,
        }
    }
}
