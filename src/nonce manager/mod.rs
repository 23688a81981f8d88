//! Nonce Manager Module
//!
//! Sequence-number allocation for a single signing identity, with an
//! in-memory and a directory-backed implementation of the same contract.

// Submodules
pub mod nonce_errors;
pub mod nonce_file;
pub mod nonce_memory;
pub mod nonce_store;

// Re-exports for convenience
pub use nonce_errors::{NonceResult, NonceStoreError};
pub use nonce_file::FileNonceStore;
pub use nonce_memory::InMemoryNonceStore;
pub use nonce_store::{NonceSource, NonceStore, RollbackResponse, DEFAULT_RETRY_WINDOW};
