//! Runner seam and the transaction pipeline shared by every runner
//!
//! A runner knows how to turn a request into a signed, broadcast
//! transaction for a given nonce, and which of its errors mean what. All
//! retry and nonce decisions stay in [`OnceOperation`].

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::collaborators::{CodecError, FeeMapping, SignerError, TransactionSigner};
use super::errors::SubmissionError;
use super::once::OnceOperation;
use super::receipt::ReceiptWaiter;
use crate::rpc_manager::{classify_error_chain, quantity, ProtocolCaller, RpcError};
use crate::types::{
    Address, FailureKind, FeeEstimate, FeeFields, Nonce, SubmitOutcome, TxHash, TxOptions,
    UnsignedTransaction,
};

/// Errors raised by a single runner submission
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Fee estimation failed")]
    FeeEstimate(#[source] RpcError),

    #[error("Gas estimation failed")]
    GasEstimate(#[source] RpcError),

    #[error(transparent)]
    Signing(#[from] SignerError),

    #[error("Broadcast failed")]
    Broadcast(#[source] RpcError),

    #[error("Receipt for {hash} not found after {waited_ms}ms")]
    ReceiptNotFound { hash: TxHash, waited_ms: u64 },

    #[error("Failed to read receipt for {hash}")]
    ReceiptPoll {
        hash: TxHash,
        #[source]
        source: RpcError,
    },

    #[error("Transaction {hash} failed on-chain (gas used {gas_used} of {gas_limit})")]
    ExecutionFailed {
        hash: TxHash,
        gas_used: u64,
        gas_limit: u64,
    },

    #[error("Read-only call failed")]
    Call(#[source] RpcError),
}

/// Default runner classification.
///
/// Anything that failed before broadcast is `Other`: the nonce never reached
/// the node, whatever the message says.
pub fn classify_runner_error(error: &RunnerError) -> FailureKind {
    match error {
        RunnerError::Codec(_)
        | RunnerError::FeeEstimate(_)
        | RunnerError::GasEstimate(_)
        | RunnerError::Signing(_)
        | RunnerError::Call(_) => FailureKind::Other,
        RunnerError::Broadcast(_) => classify_error_chain(error),
        RunnerError::ReceiptNotFound { .. } | RunnerError::ReceiptPoll { .. } => {
            FailureKind::ReceiptNotFound
        }
        RunnerError::ExecutionFailed {
            gas_used,
            gas_limit,
            ..
        } => {
            if gas_used >= gas_limit {
                FailureKind::OutOfGas
            } else {
                FailureKind::Reverted
            }
        }
    }
}

/// A submission specialization driven by [`OnceOperation`]
#[async_trait]
pub trait Runner: Send + Sync {
    type Request: Send + Sync;

    /// Operation name used in logs and errors
    fn operation_name(&self, request: &Self::Request) -> String;

    /// Assemble, sign and broadcast `request` at `nonce`
    async fn submit(
        &self,
        nonce: Nonce,
        options: &TxOptions,
        request: &Self::Request,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome, RunnerError>;

    fn classify(&self, error: &RunnerError) -> FailureKind {
        classify_runner_error(error)
    }
}

/// Run `request` through `once` using the runner's submit and classify
pub async fn run<R>(
    once: &OnceOperation,
    runner: &R,
    options: &TxOptions,
    request: &R::Request,
    cancel: &CancellationToken,
) -> Result<SubmitOutcome, SubmissionError>
where
    R: Runner + ?Sized,
{
    let name = runner.operation_name(request);
    once.run_operation(
        &name,
        once.settings().deadline,
        |nonce| runner.submit(nonce, options, request, cancel),
        |error| runner.classify(error),
        cancel,
    )
    .await
}

/// Transaction fields a runner contributes
#[derive(Debug, Clone)]
pub(crate) struct TxDraft {
    pub to: Option<Address>,
    pub value: u128,
    pub data: Vec<u8>,
    /// Fixed gas limit, overriding the caller's options
    pub gas_limit: Option<u64>,
}

/// Fee/gas resolution, signing, broadcast and receipt handling
#[derive(Clone)]
pub(crate) struct RunnerCore {
    pub caller: Arc<ProtocolCaller>,
    pub signer: Arc<dyn TransactionSigner>,
    pub chain_id: u64,
    pub fee_mapping: FeeMapping,
    pub receipts: ReceiptWaiter,
}

impl std::fmt::Debug for RunnerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerCore")
            .field("signer", &self.signer.address())
            .field("chain_id", &self.chain_id)
            .field("receipts", &self.receipts)
            .finish_non_exhaustive()
    }
}

impl RunnerCore {
    pub async fn estimate_fees(&self, cancel: &CancellationToken) -> Result<FeeEstimate, RunnerError> {
        let gas_price = self
            .quantity("eth_gasPrice", vec![], cancel)
            .await
            .map_err(RunnerError::FeeEstimate)?;

        // Optional: legacy nodes do not implement it.
        let max_priority_fee_per_gas = match self
            .quantity("eth_maxPriorityFeePerGas", vec![], cancel)
            .await
        {
            Ok(fee) => Some(fee),
            Err(e) if e.is_cancelled() => return Err(RunnerError::FeeEstimate(e)),
            Err(e) => {
                debug!(error = %e, "Priority fee unavailable");
                None
            }
        };

        Ok(FeeEstimate {
            gas_price,
            max_priority_fee_per_gas,
        })
    }

    pub async fn estimate_gas(
        &self,
        draft: &TxDraft,
        cancel: &CancellationToken,
    ) -> Result<u64, RunnerError> {
        let mut call = json!({
            "from": self.signer.address().to_string(),
            "value": quantity::encode(draft.value),
            "data": format!("0x{}", hex::encode(&draft.data)),
        });
        if let Some(to) = draft.to {
            call["to"] = Value::String(to.to_string());
        }

        let estimate = self
            .quantity("eth_estimateGas", vec![call], cancel)
            .await
            .map_err(RunnerError::GasEstimate)?;
        u64::try_from(estimate).map_err(|_| {
            RunnerError::GasEstimate(RpcError::UnexpectedResult {
                method: "eth_estimateGas".to_string(),
                message: format!("gas estimate {estimate} out of range"),
            })
        })
    }

    /// Build, sign, broadcast and (optionally) await the receipt
    pub async fn execute(
        &self,
        nonce: Nonce,
        options: &TxOptions,
        draft: TxDraft,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome, RunnerError> {
        let fees: FeeFields = match options.fees {
            Some(fees) => fees,
            None => (self.fee_mapping)(&self.estimate_fees(cancel).await?),
        };
        let gas_limit = match draft.gas_limit.or(options.gas_limit) {
            Some(limit) => limit,
            None => self.estimate_gas(&draft, cancel).await?,
        };

        let tx = UnsignedTransaction {
            chain_id: self.chain_id,
            nonce,
            from: self.signer.address(),
            to: draft.to,
            value: draft.value,
            data: draft.data,
            gas_limit,
            fees,
        };
        let raw = self.signer.sign(&tx).await?;

        let hash: TxHash = self
            .caller
            .request(
                "eth_sendRawTransaction",
                vec![Value::String(format!("0x{}", hex::encode(raw)))],
                cancel,
            )
            .await
            .map_err(RunnerError::Broadcast)?;
        debug!(%hash, nonce, gas_limit, "Transaction broadcast");

        if self.receipts.wait().is_zero() {
            return Ok(SubmitOutcome::Unconfirmed { nonce, hash });
        }

        let receipt = self.receipts.wait_for(hash, cancel).await?;
        if !receipt.status {
            return Err(RunnerError::ExecutionFailed {
                hash,
                gas_used: receipt.gas_used,
                gas_limit,
            });
        }
        Ok(SubmitOutcome::Confirmed { nonce, receipt })
    }

    async fn quantity(
        &self,
        method: &str,
        params: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<u128, RpcError> {
        let raw: String = self.caller.request(method, params, cancel).await?;
        quantity::parse_u128(&raw).ok_or_else(|| RpcError::UnexpectedResult {
            method: method.to_string(),
            message: format!("invalid quantity '{raw}'"),
        })
    }
}
