//! Nonce Flight - exactly-once transaction submission
//!
//! Client-side engine for submitting state-changing transactions to an
//! Ethereum-style JSON-RPC node: a nonce store that hands out and reclaims
//! sequence numbers, a single-flight orchestrator that retries on the same
//! or an advanced nonce, and a protocol caller with id correlation, retry
//! predicate and per-attempt timeout.

pub mod client;
pub mod config;
pub mod metrics;
pub mod observability;
pub mod structured_logging;
pub mod types;

// Nonce allocation and rollback
#[path = "nonce manager/mod.rs"]
pub mod nonce_manager;

// JSON-RPC plumbing
#[path = "rpc manager/mod.rs"]
pub mod rpc_manager;

pub mod submitter;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

// Re-export commonly used types
pub use client::{ClientError, SubmissionClient};
pub use config::{ConfigError, EngineConfig};
pub use nonce_manager::{
    FileNonceStore, InMemoryNonceStore, NonceStore, NonceStoreError, RollbackResponse,
};
pub use rpc_manager::{CallPolicy, HttpTransport, ProtocolCaller, RpcError, RpcTransport};
pub use submitter::{
    CallEncoder, ContractCall, OnceOperation, OnceSettings, Runner, RunnerError,
    SubmissionError, TransactionSigner,
};
pub use types::{Address, FailureKind, Nonce, SubmitOutcome, TxHash, TxOptions};
