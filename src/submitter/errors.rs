use std::time::Duration;
use thiserror::Error;

use crate::nonce_manager::{NonceStoreError, RollbackResponse};
use crate::types::{FailureKind, Nonce};

/// Boxed cause carried by terminal submission errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal outcome of a once-operation.
///
/// Every variant produced from a rollback response carries the response and
/// whether removal left a gap, so the caller can decide to submit a filler.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The outer deadline elapsed before a submission could complete
    #[error(
        "{operation}: failed to submit nonce {nonce} within {deadline:?}, nonce store may be malfunctioning"
    )]
    DeadlineExceeded {
        operation: String,
        nonce: Nonce,
        deadline: Duration,
    },

    #[error("{operation}: nonce {nonce} ran out of gas ({response}, gap created: {gap_created})")]
    OutOfGas {
        operation: String,
        nonce: Nonce,
        response: RollbackResponse,
        gap_created: bool,
        #[source]
        source: BoxError,
    },

    #[error("{operation}: nonce {nonce} reverted ({response}, gap created: {gap_created})")]
    Reverted {
        operation: String,
        nonce: Nonce,
        response: RollbackResponse,
        gap_created: bool,
        #[source]
        source: BoxError,
    },

    /// Never retried automatically; needs a funded account
    #[error(
        "{operation}: insufficient funds for nonce {nonce} ({response}, gap created: {gap_created})"
    )]
    InsufficientFunds {
        operation: String,
        nonce: Nonce,
        response: RollbackResponse,
        gap_created: bool,
        #[source]
        source: BoxError,
    },

    /// Broadcast, but no receipt was observed; the nonce stays consumed
    #[error("{operation}: no receipt observed for nonce {nonce}")]
    ReceiptTimeout {
        operation: String,
        nonce: Nonce,
        #[source]
        source: BoxError,
    },

    /// Any other failure the nonce store did not answer with should-retry
    #[error(
        "{operation}: nonce {nonce} failed as {kind} ({response}, gap created: {gap_created})"
    )]
    Rejected {
        operation: String,
        nonce: Nonce,
        kind: FailureKind,
        response: RollbackResponse,
        gap_created: bool,
        #[source]
        source: BoxError,
    },

    #[error("{operation}: nonce store error")]
    NonceStore {
        operation: String,
        #[source]
        source: NonceStoreError,
    },

    /// Outer cancellation; a nonce in flight stays reserved
    #[error("{operation}: cancelled")]
    Cancelled {
        operation: String,
        nonce: Option<Nonce>,
    },
}

impl SubmissionError {
    pub fn operation(&self) -> &str {
        match self {
            SubmissionError::DeadlineExceeded { operation, .. }
            | SubmissionError::OutOfGas { operation, .. }
            | SubmissionError::Reverted { operation, .. }
            | SubmissionError::InsufficientFunds { operation, .. }
            | SubmissionError::ReceiptTimeout { operation, .. }
            | SubmissionError::Rejected { operation, .. }
            | SubmissionError::NonceStore { operation, .. }
            | SubmissionError::Cancelled { operation, .. } => operation,
        }
    }

    /// The nonce the failure concerns, when one was allocated
    pub fn nonce(&self) -> Option<Nonce> {
        match self {
            SubmissionError::DeadlineExceeded { nonce, .. }
            | SubmissionError::OutOfGas { nonce, .. }
            | SubmissionError::Reverted { nonce, .. }
            | SubmissionError::InsufficientFunds { nonce, .. }
            | SubmissionError::ReceiptTimeout { nonce, .. }
            | SubmissionError::Rejected { nonce, .. } => Some(*nonce),
            SubmissionError::Cancelled { nonce, .. } => *nonce,
            SubmissionError::NonceStore { .. } => None,
        }
    }

    pub fn rollback_response(&self) -> Option<RollbackResponse> {
        match self {
            SubmissionError::OutOfGas { response, .. }
            | SubmissionError::Reverted { response, .. }
            | SubmissionError::InsufficientFunds { response, .. }
            | SubmissionError::Rejected { response, .. } => Some(*response),
            _ => None,
        }
    }

    /// Whether releasing the nonce left a hole below a reserved nonce
    pub fn gap_created(&self) -> bool {
        match self {
            SubmissionError::OutOfGas { gap_created, .. }
            | SubmissionError::Reverted { gap_created, .. }
            | SubmissionError::InsufficientFunds { gap_created, .. }
            | SubmissionError::Rejected { gap_created, .. } => *gap_created,
            _ => false,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SubmissionError::OutOfGas { .. } => Some(FailureKind::OutOfGas),
            SubmissionError::Reverted { .. } => Some(FailureKind::Reverted),
            SubmissionError::InsufficientFunds { .. } => Some(FailureKind::InsufficientFunds),
            SubmissionError::ReceiptTimeout { .. } => Some(FailureKind::ReceiptNotFound),
            SubmissionError::Rejected { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether submitting the same request again is reasonable without
    /// human intervention
    pub fn is_retryable_by_caller(&self) -> bool {
        match self {
            SubmissionError::Rejected { response, .. } => response.was_removed(),
            SubmissionError::NonceStore { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Short label for metrics
    pub fn outcome_label(&self) -> &'static str {
        match self {
            SubmissionError::DeadlineExceeded { .. } => "deadline_exceeded",
            SubmissionError::OutOfGas { .. } => "out_of_gas",
            SubmissionError::Reverted { .. } => "reverted",
            SubmissionError::InsufficientFunds { .. } => "insufficient_funds",
            SubmissionError::ReceiptTimeout { .. } => "receipt_timeout",
            SubmissionError::Rejected { .. } => "rejected",
            SubmissionError::NonceStore { .. } => "nonce_store_error",
            SubmissionError::Cancelled { .. } => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cause() -> BoxError {
        Box::new(std::io::Error::other("execution reverted"))
    }

    #[test]
    fn test_gap_flag_and_response() {
        let err = SubmissionError::Rejected {
            operation: "transfer".to_string(),
            nonce: 5,
            kind: FailureKind::Other,
            response: RollbackResponse::RemovedGapDetected,
            gap_created: true,
            source: cause(),
        };
        assert!(err.gap_created());
        assert_eq!(err.nonce(), Some(5));
        assert_eq!(
            err.rollback_response(),
            Some(RollbackResponse::RemovedGapDetected)
        );
        assert!(err.is_retryable_by_caller());
        assert_eq!(
            err.to_string(),
            "transfer: nonce 5 failed as other (removed_gap_detected, gap created: true)"
        );
    }

    #[test]
    fn test_deadline_message() {
        let err = SubmissionError::DeadlineExceeded {
            operation: "mint".to_string(),
            nonce: 9,
            deadline: Duration::from_secs(60),
        };
        assert!(err.to_string().contains("nonce store may be malfunctioning"));
        assert!(!err.gap_created());
        assert!(!err.is_retryable_by_caller());
        assert_eq!(err.failure_kind(), None);
    }

    #[test]
    fn test_reverted_is_terminal_for_caller() {
        let err = SubmissionError::Reverted {
            operation: "mint".to_string(),
            nonce: 2,
            response: RollbackResponse::NotRemovedGasSpent,
            gap_created: false,
            source: cause(),
        };
        assert_eq!(err.failure_kind(), Some(FailureKind::Reverted));
        assert!(!err.is_retryable_by_caller());
        assert!(std::error::Error::source(&err).is_some());
    }
}
