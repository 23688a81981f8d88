//! RPC Manager Module
//!
//! JSON-RPC round-trips against a single endpoint: wire types, transport,
//! the protocol caller with its retry predicate, and provider error
//! classification.

// Submodules
pub mod rpc_caller;
pub mod rpc_classifier;
pub mod rpc_config;
pub mod rpc_errors;
pub mod rpc_nonce_source;
pub mod rpc_transport;
pub mod rpc_types;

// Re-exports for convenience
pub use rpc_caller::{
    never_retry, retry_up_to, CallPolicy, MethodFaultInfo, ProtocolCaller, RetryPredicate,
};
pub use rpc_classifier::{
    classify_error_chain, classify_message, classify_provider, failure_kind, NonceFault,
    ProviderErrorKind,
};
pub use rpc_config::RpcEndpointConfig;
pub use rpc_errors::RpcError;
pub use rpc_nonce_source::RpcNonceSource;
pub use rpc_transport::{HttpTransport, RpcTransport, TransportError, TransportResponse};
pub use rpc_types::{quantity, JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse};
