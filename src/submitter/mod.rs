//! Submission Module
//!
//! The once-operation orchestrator and the runners that specialize it for
//! contract calls and value transfers.

// Submodules
pub mod collaborators;
pub mod contract;
pub mod errors;
pub mod once;
pub mod receipt;
pub mod runner;
pub mod transfer;

// Re-exports for convenience
pub use collaborators::{
    default_fee_mapping, CallEncoder, CodecError, FeeMapping, SignerError, TransactionSigner,
};
pub use contract::{ContractCall, ContractCallRunner};
pub use errors::{BoxError, SubmissionError};
pub use once::{OnceOperation, OnceSettings, OperationState};
pub use receipt::ReceiptWaiter;
pub use runner::{classify_runner_error, run, Runner, RunnerError};
pub use transfer::{TransferRequest, TransferRunner, TRANSFER_GAS_LIMIT};
