//! Configuration module
//!
//! Loads the engine configuration from TOML, with optional `.env` and
//! environment variable overrides for deployment-specific values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::rpc_manager::{RpcEndpointConfig, RpcError};

/// Environment variable overriding `rpc.url`
pub const ENV_RPC_URL: &str = "NONCE_FLIGHT_RPC_URL";
/// Environment variable overriding `nonce.directory` (and selecting the file backend)
pub const ENV_NONCE_DIR: &str = "NONCE_FLIGHT_NONCE_DIR";
/// Environment variable overriding `submission.chain_id`
pub const ENV_CHAIN_ID: &str = "NONCE_FLIGHT_CHAIN_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub rpc: RpcEndpointConfig,

    #[serde(default)]
    pub nonce: NonceConfig,

    #[serde(default)]
    pub submission: SubmissionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonceBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonceConfig {
    #[serde(default)]
    pub backend: NonceBackend,

    /// Marker directory for the file backend
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Grace window for repeated submission failures
    #[serde(default = "default_retry_window_secs")]
    pub retry_window_secs: u64,

    /// Seed allocation from `eth_getTransactionCount(pending)`
    #[serde(default = "default_true")]
    pub seed_from_chain: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Outer wall-clock deadline per operation
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Sleep before retrying the same nonce
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// How long to wait for a receipt; 0 = fire and forget
    #[serde(default = "default_receipt_wait_secs")]
    pub receipt_wait_secs: u64,

    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_retry_window_secs() -> u64 { 10 }
fn default_true() -> bool { true }
fn default_deadline_secs() -> u64 { 60 }
fn default_backoff_secs() -> u64 { 3 }
fn default_receipt_wait_secs() -> u64 { 60 }
fn default_receipt_poll_ms() -> u64 { 1000 }
fn default_chain_id() -> u64 { 1 }
fn default_log_level() -> String { "info".to_string() }

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            backend: NonceBackend::default(),
            directory: None,
            retry_window_secs: default_retry_window_secs(),
            seed_from_chain: default_true(),
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            backoff_secs: default_backoff_secs(),
            receipt_wait_secs: default_receipt_wait_secs(),
            receipt_poll_ms: default_receipt_poll_ms(),
            chain_id: default_chain_id(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl NonceConfig {
    pub fn retry_window(&self) -> Duration {
        Duration::from_secs(self.retry_window_secs)
    }
}

impl SubmissionConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn receipt_wait(&self) -> Duration {
        Duration::from_secs(self.receipt_wait_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (usually the process environment)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc.url = url;
        }
        if let Some(dir) = lookup(ENV_NONCE_DIR) {
            self.nonce.backend = NonceBackend::File;
            self.nonce.directory = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup(ENV_CHAIN_ID) {
            self.submission.chain_id = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: ENV_CHAIN_ID,
                message: format!("'{raw}' is not a chain id"),
            })?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc.validate()?;

        if self.nonce.backend == NonceBackend::File && self.nonce.directory.is_none() {
            return Err(ConfigError::Invalid {
                field: "nonce.directory",
                message: "required for the file backend".to_string(),
            });
        }
        if self.submission.deadline_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "submission.deadline_secs",
                message: "must be positive".to_string(),
            });
        }
        if self.submission.receipt_wait_secs > 0 && self.submission.receipt_poll_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "submission.receipt_poll_ms",
                message: "must be positive when waiting for receipts".to_string(),
            });
        }
        Ok(())
    }
}
