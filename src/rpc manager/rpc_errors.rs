use serde_json::Value;
use thiserror::Error;

use super::rpc_classifier::{classify_provider, ProviderErrorKind};

/// Protocol caller error types
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The round-trip could not complete (connect, reset, TLS, ...)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Non-2xx HTTP status
    #[error("HTTP status {status} (endpoint: {endpoint})")]
    HttpStatus { endpoint: String, status: u16 },

    /// Success status but no body
    #[error("Empty response body (endpoint: {endpoint})")]
    EmptyBody { endpoint: String },

    /// Body was not a JSON-RPC response
    #[error("Failed to deserialize response: {message}")]
    Deserialization { message: String },

    /// The response answered some other request
    #[error("Response id mismatch: expected {expected}, got {actual:?}")]
    IdMismatch { expected: u64, actual: Option<u64> },

    /// Per-attempt timeout expired
    #[error("Attempt timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    /// The retry predicate declined a protocol fault
    #[error("Request {method} failed after {attempts} attempt(s)")]
    RequestFailed {
        method: String,
        attempts: u32,
        #[source]
        last: Box<RpcError>,
    },

    /// The remote party executed the request and returned an error object
    #[error("Provider error {code} from {method}: {message}")]
    Provider {
        method: String,
        request_id: u64,
        code: i64,
        message: String,
        data: Option<Value>,
        kind: ProviderErrorKind,
    },

    /// Outer cancellation fired
    #[error("Request {method} cancelled")]
    Cancelled { method: String },

    /// Request could not be serialized
    #[error("Failed to encode request: {0}")]
    Encode(String),

    /// Well-formed response whose result has the wrong shape
    #[error("Unexpected result for {method}: {message}")]
    UnexpectedResult { method: String, message: String },

    /// Invalid endpoint configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RpcError {
    /// Build a provider error, classifying it on the way
    pub fn provider(
        method: impl Into<String>,
        request_id: u64,
        code: i64,
        message: String,
        data: Option<Value>,
    ) -> Self {
        let kind = classify_provider(code, &message);
        RpcError::Provider {
            method: method.into(),
            request_id,
            code,
            message,
            data,
            kind,
        }
    }

    /// Provider classification, looking through `RequestFailed`
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            RpcError::Provider { kind, .. } => Some(*kind),
            RpcError::RequestFailed { last, .. } => last.provider_kind(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            RpcError::TimedOut { .. } => true,
            RpcError::RequestFailed { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    /// Short label for metrics and logs
    pub fn fault_reason(&self) -> &'static str {
        match self {
            RpcError::Transport { .. } => "transport",
            RpcError::HttpStatus { .. } => "http_status",
            RpcError::EmptyBody { .. } => "empty_body",
            RpcError::Deserialization { .. } => "deserialization",
            RpcError::IdMismatch { .. } => "id_mismatch",
            RpcError::TimedOut { .. } => "timeout",
            RpcError::RequestFailed { .. } => "request_failed",
            RpcError::Provider { .. } => "provider",
            RpcError::Cancelled { .. } => "cancelled",
            RpcError::Encode(_) => "encode",
            RpcError::UnexpectedResult { .. } => "unexpected_result",
            RpcError::Configuration(_) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_manager::rpc_classifier::NonceFault;

    #[test]
    fn test_provider_constructor_classifies() {
        let err = RpcError::provider("eth_sendRawTransaction", 4, -32000, "nonce too low".into(), None);
        assert_eq!(
            err.provider_kind(),
            Some(ProviderErrorKind::InvalidNonce(NonceFault::TooLow))
        );
        assert_eq!(
            err.to_string(),
            "Provider error -32000 from eth_sendRawTransaction: nonce too low"
        );
    }

    #[test]
    fn test_request_failed_exposes_last_fault() {
        let err = RpcError::RequestFailed {
            method: "eth_call".to_string(),
            attempts: 2,
            last: Box::new(RpcError::TimedOut { timeout_ms: 500 }),
        };
        assert!(err.is_timeout());
        assert_eq!(err.provider_kind(), None);
        assert_eq!(err.fault_reason(), "request_failed");
        assert!(std::error::Error::source(&err).is_some());
    }
}
