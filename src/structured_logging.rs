//! Structured logging setup and per-operation logger

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigError, LoggingConfig};
use crate::observability::CorrelationId;
use crate::types::{FailureKind, Nonce};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    result.map_err(|e| ConfigError::Logging(e.to_string()))
}

/// Structured logger for one once-operation
#[derive(Debug, Clone)]
pub struct SubmissionLogger {
    correlation_id: CorrelationId,
    operation: String,
}

impl SubmissionLogger {
    pub fn new(operation: &str) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            operation: operation.to_string(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn log_state(&self, state: &str, nonce: Option<Nonce>) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            operation = %self.operation,
            state,
            nonce = ?nonce,
            "Operation state"
        );
    }

    pub fn log_attempt(&self, nonce: Nonce, attempt: u32) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            operation = %self.operation,
            nonce,
            attempt,
            "Submitting"
        );
    }

    pub fn log_nonce_advanced(&self, from: Nonce, to: Nonce) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            operation = %self.operation,
            from,
            to,
            "Nonce too low, advanced"
        );
    }

    pub fn log_retry(&self, nonce: Nonce, kind: FailureKind, response: &str, error: &str) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            operation = %self.operation,
            nonce,
            kind = %kind,
            response,
            error,
            "Submission failed, retrying same nonce after backoff"
        );
    }

    pub fn log_success(&self, nonce: Nonce, attempts: u32, latency_ms: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            operation = %self.operation,
            nonce,
            attempts,
            latency_ms,
            "Submission succeeded"
        );
    }

    pub fn log_failure(&self, nonce: Option<Nonce>, error: &str, latency_ms: u64) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            operation = %self.operation,
            nonce = ?nonce,
            error,
            latency_ms,
            "Submission failed"
        );
    }
}
