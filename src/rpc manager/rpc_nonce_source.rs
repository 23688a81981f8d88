use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::rpc_caller::ProtocolCaller;
use super::rpc_types::quantity;
use crate::nonce_manager::{NonceResult, NonceSource, NonceStoreError};
use crate::types::{Address, Nonce};

/// Seeds nonce allocation from the node's pending transaction count.
///
/// `pending` rather than `latest` so transactions still in the mempool
/// after a restart are counted.
#[derive(Debug)]
pub struct RpcNonceSource {
    caller: Arc<ProtocolCaller>,
    address: Address,
}

impl RpcNonceSource {
    pub fn new(caller: Arc<ProtocolCaller>, address: Address) -> Self {
        Self { caller, address }
    }
}

// The query gets its own token; callers abort it by dropping the allocation.
#[async_trait]
impl NonceSource for RpcNonceSource {
    async fn confirmed_count(&self) -> NonceResult<Nonce> {
        let raw: String = self
            .caller
            .request(
                "eth_getTransactionCount",
                vec![
                    Value::String(self.address.to_string()),
                    Value::String("pending".to_string()),
                ],
                &CancellationToken::new(),
            )
            .await
            .map_err(|e| NonceStoreError::Source {
                message: e.to_string(),
            })?;

        let count = quantity::parse_u64(&raw).ok_or_else(|| NonceStoreError::Source {
            message: format!("invalid transaction count '{raw}'"),
        })?;
        debug!(address = %self.address, count, "Fetched pending transaction count");

        Nonce::try_from(count).map_err(|_| NonceStoreError::Exhausted(Nonce::MAX))
    }
}
