use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::runner::{Runner, RunnerCore, RunnerError, TxDraft};
use crate::types::{Address, Nonce, SubmitOutcome, TxOptions};

/// Intrinsic gas of a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Plain value transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub to: Address,
    pub amount: u128,
}

/// Runner for value transfers; no calldata and no gas estimation
#[derive(Debug)]
pub struct TransferRunner {
    core: RunnerCore,
}

impl TransferRunner {
    pub(crate) fn new(core: RunnerCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Runner for TransferRunner {
    type Request = TransferRequest;

    fn operation_name(&self, request: &Self::Request) -> String {
        format!("transfer {} to {}", request.amount, request.to)
    }

    async fn submit(
        &self,
        nonce: Nonce,
        options: &TxOptions,
        request: &Self::Request,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome, RunnerError> {
        let draft = TxDraft {
            to: Some(request.to),
            value: request.amount,
            data: Vec::new(),
            gas_limit: Some(options.gas_limit.unwrap_or(TRANSFER_GAS_LIMIT)),
        };
        self.core.execute(nonce, options, draft, cancel).await
    }
}
