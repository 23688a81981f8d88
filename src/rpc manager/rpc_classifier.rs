//! Provider error classification
//!
//! Two tiers: well-known JSON-RPC codes map directly, everything else falls
//! back to case-insensitive substring matching, because nodes disagree about
//! which code carries which condition.

use serde::{Deserialize, Serialize};
use std::error::Error;

use super::rpc_errors::RpcError;
use crate::types::FailureKind;

/// Which side of the expected nonce the node complained about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NonceFault {
    TooLow,
    TooHigh,
}

/// Narrowed provider error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderErrorKind {
    OutOfGas,
    Reverted,
    InvalidNonce(NonceFault),
    InsufficientFunds,
    GasPriceTooLow,
    LimitExceeded,
    ResourceUnavailable,
    Unclassified,
}

impl ProviderErrorKind {
    pub fn is_nonce_fault(&self) -> bool {
        matches!(self, ProviderErrorKind::InvalidNonce(_))
    }
}

/// Geth-style revert with return data
pub const CODE_EXECUTION_REVERTED: i64 = 3;
/// EIP-1474 "Resource unavailable"
pub const CODE_RESOURCE_UNAVAILABLE: i64 = -32002;
/// EIP-1474 "Limit exceeded"
pub const CODE_LIMIT_EXCEEDED: i64 = -32005;

/// Classify a provider error object by code, then by message
pub fn classify_provider(code: i64, message: &str) -> ProviderErrorKind {
    match code {
        CODE_EXECUTION_REVERTED => ProviderErrorKind::Reverted,
        CODE_RESOURCE_UNAVAILABLE => ProviderErrorKind::ResourceUnavailable,
        CODE_LIMIT_EXCEEDED => ProviderErrorKind::LimitExceeded,
        // -32000 (generic server error), -32003 (rejected), -32010, -32015 and
        // friends are used for everything by somebody.
        _ => classify_message(message),
    }
}

/// Case-insensitive substring fallback
pub fn classify_message(message: &str) -> ProviderErrorKind {
    let msg = message.to_lowercase();

    // Order matters: "insufficient funds for gas * price" mentions gas.
    if msg.contains("nonce too low") || msg.contains("nonce is too low") {
        ProviderErrorKind::InvalidNonce(NonceFault::TooLow)
    } else if msg.contains("nonce too high") || msg.contains("nonce is too high") {
        ProviderErrorKind::InvalidNonce(NonceFault::TooHigh)
    } else if msg.contains("insufficient funds") {
        ProviderErrorKind::InsufficientFunds
    } else if msg.contains("out of gas") || msg.contains("gas required exceeds allowance") {
        ProviderErrorKind::OutOfGas
    } else if msg.contains("underpriced")
        || msg.contains("gas price too low")
        || msg.contains("max fee per gas less than block base fee")
    {
        ProviderErrorKind::GasPriceTooLow
    } else if msg.contains("reverted") {
        ProviderErrorKind::Reverted
    } else if msg.contains("rate limit") || msg.contains("too many requests") {
        ProviderErrorKind::LimitExceeded
    } else {
        ProviderErrorKind::Unclassified
    }
}

/// Collapse a provider kind onto the orchestrator's failure set
pub fn failure_kind(kind: ProviderErrorKind) -> FailureKind {
    match kind {
        ProviderErrorKind::OutOfGas => FailureKind::OutOfGas,
        ProviderErrorKind::Reverted => FailureKind::Reverted,
        ProviderErrorKind::InvalidNonce(NonceFault::TooLow) => FailureKind::NonceTooLow,
        ProviderErrorKind::InvalidNonce(NonceFault::TooHigh) => FailureKind::NonceTooHigh,
        ProviderErrorKind::InsufficientFunds => FailureKind::InsufficientFunds,
        ProviderErrorKind::GasPriceTooLow
        | ProviderErrorKind::LimitExceeded
        | ProviderErrorKind::ResourceUnavailable
        | ProviderErrorKind::Unclassified => FailureKind::Other,
    }
}

/// Classify an arbitrary error by walking its cause chain.
///
/// The first provider error with a specific kind wins. Otherwise the
/// messages of the whole chain are joined and matched as text.
pub fn classify_error_chain(err: &(dyn Error + 'static)) -> FailureKind {
    let mut messages = Vec::new();
    let mut current = Some(err);

    while let Some(e) = current {
        if let Some(RpcError::Provider { kind, .. }) = e.downcast_ref::<RpcError>() {
            if *kind != ProviderErrorKind::Unclassified {
                return failure_kind(*kind);
            }
        }
        messages.push(e.to_string());
        current = e.source();
    }

    failure_kind(classify_message(&messages.join(": ")))
}
