//! Submission client
//!
//! Wires configuration into a protocol caller, a nonce store, the
//! once-operation orchestrator and the runners. One client serves one
//! signing identity.

use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ConfigError, EngineConfig, NonceBackend, NonceConfig};
use crate::metrics::EngineMetrics;
use crate::nonce_manager::{
    FileNonceStore, InMemoryNonceStore, NonceSource, NonceStore, NonceStoreError,
};
use crate::rpc_manager::{ProtocolCaller, RpcError, RpcNonceSource, RpcTransport};
use crate::submitter::runner::RunnerCore;
use crate::submitter::{
    default_fee_mapping, run, CallEncoder, ContractCall, ContractCallRunner, FeeMapping,
    OnceOperation, OnceSettings, ReceiptWaiter, Runner, RunnerError, SubmissionError,
    TransactionSigner, TransferRequest, TransferRunner,
};
use crate::types::{Address, SubmitOutcome, TxOptions};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    NonceStore(#[from] NonceStoreError),

    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// High-level entry point for exactly-once submissions
pub struct SubmissionClient {
    config: EngineConfig,
    caller: Arc<ProtocolCaller>,
    signer: Arc<dyn TransactionSigner>,
    once: OnceOperation,
    metrics: Arc<EngineMetrics>,
    fee_mapping: FeeMapping,
}

impl SubmissionClient {
    /// Build a client talking HTTP to `config.rpc.url`
    pub fn from_config(
        config: EngineConfig,
        signer: Arc<dyn TransactionSigner>,
    ) -> Result<Self, ClientError> {
        let transport = config.rpc.build_transport()?;
        Self::with_transport(config, Arc::new(transport), signer)
    }

    /// Build a client over an arbitrary transport
    pub fn with_transport(
        config: EngineConfig,
        transport: Arc<dyn RpcTransport>,
        signer: Arc<dyn TransactionSigner>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new()?);
        let caller = Arc::new(
            ProtocolCaller::new(transport, config.rpc.to_call_policy())
                .with_metrics(metrics.clone()),
        );
        let store = build_store(&config.nonce, &caller, signer.address())?;
        let once = OnceOperation::new(store, settings_from(&config)).with_metrics(metrics.clone());

        info!(
            endpoint = caller.endpoint(),
            address = %signer.address(),
            chain_id = config.submission.chain_id,
            backend = ?config.nonce.backend,
            "Submission client ready"
        );

        Ok(Self {
            config,
            caller,
            signer,
            once,
            metrics,
            fee_mapping: default_fee_mapping(),
        })
    }

    /// Replace the nonce store (e.g. one shared with other components)
    pub fn with_nonce_store(mut self, store: Arc<dyn NonceStore>) -> Self {
        self.once = OnceOperation::new(store, settings_from(&self.config))
            .with_metrics(self.metrics.clone());
        self
    }

    pub fn with_fee_mapping(mut self, mapping: FeeMapping) -> Self {
        self.fee_mapping = mapping;
        self
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn caller(&self) -> &Arc<ProtocolCaller> {
        &self.caller
    }

    pub fn nonce_store(&self) -> &Arc<dyn NonceStore> {
        self.once.store()
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn contract_runner<E: CallEncoder>(&self, encoder: Arc<E>) -> ContractCallRunner<E> {
        ContractCallRunner::new(self.core(), encoder)
    }

    pub fn transfer_runner(&self) -> TransferRunner {
        TransferRunner::new(self.core())
    }

    /// Drive `request` through any runner
    pub async fn submit<R: Runner + ?Sized>(
        &self,
        runner: &R,
        options: &TxOptions,
        request: &R::Request,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome, SubmissionError> {
        run(&self.once, runner, options, request, cancel).await
    }

    pub async fn call_contract<E: CallEncoder>(
        &self,
        encoder: Arc<E>,
        call: &ContractCall<E::Args>,
        options: &TxOptions,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome, SubmissionError> {
        let runner = self.contract_runner(encoder);
        self.submit(&runner, options, call, cancel).await
    }

    pub async fn transfer(
        &self,
        to: Address,
        amount: u128,
        options: &TxOptions,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome, SubmissionError> {
        let runner = self.transfer_runner();
        self.submit(&runner, options, &TransferRequest { to, amount }, cancel)
            .await
    }

    /// Read-only contract call; no nonce involved
    pub async fn call_view<E: CallEncoder>(
        &self,
        encoder: Arc<E>,
        call: &ContractCall<E::Args>,
        cancel: &CancellationToken,
    ) -> Result<E::Output, RunnerError> {
        self.contract_runner(encoder).call_view(call, cancel).await
    }

    fn core(&self) -> RunnerCore {
        RunnerCore {
            caller: self.caller.clone(),
            signer: self.signer.clone(),
            chain_id: self.config.submission.chain_id,
            fee_mapping: self.fee_mapping.clone(),
            receipts: ReceiptWaiter::new(
                self.caller.clone(),
                self.config.submission.receipt_wait(),
                self.config.submission.receipt_poll_interval(),
            ),
        }
    }
}

impl std::fmt::Debug for SubmissionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionClient")
            .field("address", &self.signer.address())
            .field("caller", &self.caller)
            .field("once", &self.once)
            .finish_non_exhaustive()
    }
}

fn settings_from(config: &EngineConfig) -> OnceSettings {
    OnceSettings {
        deadline: config.submission.deadline(),
        backoff: config.submission.backoff(),
    }
}

fn build_store(
    config: &NonceConfig,
    caller: &Arc<ProtocolCaller>,
    address: Address,
) -> Result<Arc<dyn NonceStore>, ClientError> {
    let source: Option<Arc<dyn NonceSource>> = if config.seed_from_chain {
        Some(Arc::new(RpcNonceSource::new(caller.clone(), address)))
    } else {
        None
    };

    let store: Arc<dyn NonceStore> = match config.backend {
        NonceBackend::Memory => {
            let mut store = InMemoryNonceStore::new().with_retry_window(config.retry_window());
            if let Some(source) = source {
                store = store.with_source(source);
            }
            Arc::new(store)
        }
        NonceBackend::File => {
            let dir = config.directory.clone().ok_or(ConfigError::Invalid {
                field: "nonce.directory",
                message: "required for the file backend".to_string(),
            })?;
            let mut store = FileNonceStore::open(dir)?.with_retry_window(config.retry_window());
            if let Some(source) = source {
                store = store.with_source(source);
            }
            Arc::new(store)
        }
    };
    Ok(store)
}
