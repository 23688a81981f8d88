//! Narrow interfaces to the value encoder, the signer and the fee policy
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{Address, FeeEstimate, FeeFields, UnsignedTransaction};

/// Encoder/decoder failure
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("Failed to encode call to {method}: {message}")]
    Encode { method: String, message: String },

    #[error("Failed to decode output of {method}: {message}")]
    Decode { method: String, message: String },
}

/// Signer failure
#[derive(Debug, Clone, Error)]
#[error("Signing failed: {0}")]
pub struct SignerError(pub String);

/// Turns typed call arguments into calldata and return data into values
pub trait CallEncoder: Send + Sync + fmt::Debug {
    type Args: Send + Sync;
    type Output: Send;

    fn encode_call(&self, method: &str, args: &Self::Args) -> Result<Vec<u8>, CodecError>;

    fn decode_output(&self, method: &str, data: &[u8]) -> Result<Self::Output, CodecError>;
}

/// Produces raw signed transaction bytes; never exposes key material
#[async_trait]
pub trait TransactionSigner: Send + Sync + fmt::Debug {
    fn address(&self) -> Address;

    async fn sign(&self, tx: &UnsignedTransaction) -> Result<Vec<u8>, SignerError>;
}

/// Maps the node's fee estimate onto transaction fee fields
pub type FeeMapping = Arc<dyn Fn(&FeeEstimate) -> FeeFields + Send + Sync>;

/// Provider mapping: legacy pricing at the reported gas price
pub fn default_fee_mapping() -> FeeMapping {
    Arc::new(|estimate| FeeFields::Legacy {
        gas_price: estimate.gas_price,
    })
}
