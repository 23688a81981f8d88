use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::collaborators::{CallEncoder, CodecError};
use super::runner::{Runner, RunnerCore, RunnerError, TxDraft};
use crate::types::{Address, Nonce, SubmitOutcome, TxOptions};

/// Contract method invocation
#[derive(Debug, Clone)]
pub struct ContractCall<A> {
    pub to: Address,
    pub method: String,
    pub args: A,
}

impl<A> ContractCall<A> {
    pub fn new(to: Address, method: impl Into<String>, args: A) -> Self {
        Self {
            to,
            method: method.into(),
            args,
        }
    }
}

/// Runner for state-changing contract calls
#[derive(Debug)]
pub struct ContractCallRunner<E: CallEncoder> {
    core: RunnerCore,
    encoder: Arc<E>,
}

impl<E: CallEncoder> ContractCallRunner<E> {
    pub(crate) fn new(core: RunnerCore, encoder: Arc<E>) -> Self {
        Self { core, encoder }
    }

    /// `eth_call` at the latest block; never touches the nonce store
    pub async fn call_view(
        &self,
        call: &ContractCall<E::Args>,
        cancel: &CancellationToken,
    ) -> Result<E::Output, RunnerError> {
        let data = self.encoder.encode_call(&call.method, &call.args)?;
        let request = json!({
            "from": self.core.signer.address().to_string(),
            "to": call.to.to_string(),
            "data": format!("0x{}", hex::encode(&data)),
        });

        let raw: String = self
            .core
            .caller
            .request(
                "eth_call",
                vec![request, Value::String("latest".to_string())],
                cancel,
            )
            .await
            .map_err(RunnerError::Call)?;

        let stripped = raw.strip_prefix("0x").unwrap_or(&raw);
        let output = hex::decode(stripped).map_err(|e| {
            RunnerError::Codec(CodecError::Decode {
                method: call.method.clone(),
                message: e.to_string(),
            })
        })?;
        Ok(self.encoder.decode_output(&call.method, &output)?)
    }
}

#[async_trait]
impl<E: CallEncoder> Runner for ContractCallRunner<E> {
    type Request = ContractCall<E::Args>;

    fn operation_name(&self, request: &Self::Request) -> String {
        format!("call {}.{}", request.to, request.method)
    }

    async fn submit(
        &self,
        nonce: Nonce,
        options: &TxOptions,
        request: &Self::Request,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome, RunnerError> {
        let data = self.encoder.encode_call(&request.method, &request.args)?;
        let draft = TxDraft {
            to: Some(request.to),
            value: options.value,
            data,
            gas_limit: None,
        };
        self.core.execute(nonce, options, draft, cancel).await
    }
}
