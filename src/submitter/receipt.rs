use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::runner::RunnerError;
use crate::rpc_manager::{quantity, ProtocolCaller, RpcError};
use crate::types::{TransactionReceipt, TxHash};

/// Receipt as returned by `eth_getTransactionReceipt`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    block_number: Option<String>,
    gas_used: String,
    /// Absent on pre-Byzantium chains
    #[serde(default)]
    status: Option<String>,
}

impl RpcReceipt {
    fn into_receipt(self) -> Result<Option<TransactionReceipt>, String> {
        // Some nodes return a receipt shell for pending transactions.
        let Some(block_number) = self.block_number else {
            return Ok(None);
        };
        let block_number = quantity::parse_u64(&block_number)
            .ok_or_else(|| format!("invalid blockNumber '{block_number}'"))?;
        let gas_used = quantity::parse_u64(&self.gas_used)
            .ok_or_else(|| format!("invalid gasUsed '{}'", self.gas_used))?;
        let status = match self.status.as_deref() {
            None => true,
            Some(raw) => quantity::parse_u64(raw).ok_or_else(|| format!("invalid status '{raw}'"))? == 1,
        };
        Ok(Some(TransactionReceipt {
            transaction_hash: self.transaction_hash,
            block_number,
            gas_used,
            status,
        }))
    }
}

/// Polls for a transaction receipt until found or the wait elapses
#[derive(Debug, Clone)]
pub struct ReceiptWaiter {
    caller: Arc<ProtocolCaller>,
    wait: Duration,
    poll_interval: Duration,
}

impl ReceiptWaiter {
    pub fn new(caller: Arc<ProtocolCaller>, wait: Duration, poll_interval: Duration) -> Self {
        Self {
            caller,
            wait,
            poll_interval,
        }
    }

    /// Zero means fire and forget
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// One `eth_getTransactionReceipt` round-trip
    pub async fn fetch(
        &self,
        hash: TxHash,
        cancel: &CancellationToken,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        let raw: Option<RpcReceipt> = self
            .caller
            .request(
                "eth_getTransactionReceipt",
                vec![Value::String(hash.to_string())],
                cancel,
            )
            .await?;
        match raw {
            Some(receipt) => receipt
                .into_receipt()
                .map_err(|message| RpcError::UnexpectedResult {
                    method: "eth_getTransactionReceipt".to_string(),
                    message,
                }),
            None => Ok(None),
        }
    }

    /// Poll until a mined receipt appears.
    ///
    /// Transient poll errors are logged and polling continues; running out
    /// of time yields [`RunnerError::ReceiptNotFound`].
    pub async fn wait_for(
        &self,
        hash: TxHash,
        cancel: &CancellationToken,
    ) -> Result<TransactionReceipt, RunnerError> {
        let started = Instant::now();
        let deadline = started + self.wait;

        loop {
            match self.fetch(hash, cancel).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(source) if source.is_cancelled() => {
                    return Err(RunnerError::ReceiptPoll { hash, source });
                }
                Err(e) => debug!(%hash, error = %e, "Receipt poll failed, will retry"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RunnerError::ReceiptNotFound {
                    hash,
                    waited_ms: (now - started).as_millis() as u64,
                });
            }

            let wake_at = (now + self.poll_interval).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RunnerError::ReceiptPoll {
                        hash,
                        source: RpcError::Cancelled {
                            method: "eth_getTransactionReceipt".to_string(),
                        },
                    });
                }
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }
}
