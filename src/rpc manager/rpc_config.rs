use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::rpc_caller::CallPolicy;
use super::rpc_errors::RpcError;
use super::rpc_transport::HttpTransport;

/// Configuration for the JSON-RPC endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEndpointConfig {
    /// The RPC endpoint URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Total attempts for protocol faults (1 = never retry)
    #[serde(default = "default_max_transport_attempts")]
    pub max_transport_attempts: u32,

    /// Base delay between transport retries in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Relative jitter on the retry delay
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
}

fn default_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_attempt_timeout_secs() -> u64 {
    90
}

fn default_max_transport_attempts() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_retry_jitter() -> f64 {
    0.1
}

impl Default for RpcEndpointConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            max_transport_attempts: default_max_transport_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_jitter: default_retry_jitter(),
        }
    }
}

impl RpcEndpointConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RpcError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(RpcError::Configuration(format!(
                "RPC url must be http(s), got '{}'",
                self.url
            )));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(RpcError::Configuration(
                "attempt_timeout_secs must be positive".to_string(),
            ));
        }
        if self.max_transport_attempts == 0 {
            return Err(RpcError::Configuration(
                "max_transport_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(RpcError::Configuration(
                "retry_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_call_policy(&self) -> CallPolicy {
        CallPolicy::default()
            .with_max_attempts(self.max_transport_attempts)
            .with_attempt_timeout(Duration::from_secs(self.attempt_timeout_secs))
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_jitter(self.retry_jitter)
    }

    pub fn build_transport(&self) -> Result<HttpTransport, RpcError> {
        self.validate()?;
        HttpTransport::new(self.url.clone()).map_err(|e| RpcError::Configuration(e.message))
    }
}
