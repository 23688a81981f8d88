//! Test Utilities Module
//!
//! Deterministic stand-ins for the node, the signer, the call encoder and
//! the nonce store, so submission flows can be exercised without a network.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::nonce_manager::{InMemoryNonceStore, NonceResult, NonceStore, RollbackResponse};
use crate::rpc_manager::{
    quantity, JsonRpcRequest, RpcTransport, TransportError, TransportResponse,
};
use crate::submitter::{CallEncoder, CodecError, SignerError, TransactionSigner};
use crate::types::{Address, Nonce, TxHash, UnsignedTransaction};

/// JSON-RPC "method not found"
pub const METHOD_NOT_FOUND: i64 = -32601;

/// One scripted answer from the fake node
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with `result`
    Result(Value),
    /// 200 with an error object
    Error { code: i64, message: String },
    /// Non-2xx status
    Status(u16),
    /// 200 with no body
    Empty,
    /// 200 with `result`, but answering a different request id
    WrongId(Value),
    /// 200 with a body that is not JSON
    Garbage,
    /// The round-trip itself fails
    TransportFailure(String),
    /// Wait, then answer with the inner reply
    Delay(Duration, Box<Reply>),
}

impl Reply {
    pub fn result(value: impl Into<Value>) -> Self {
        Reply::Result(value.into())
    }

    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Reply::Error {
            code,
            message: message.into(),
        }
    }

    pub fn quantity(value: u128) -> Self {
        Reply::Result(quantity::encode(value))
    }

    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delay(delay, Box::new(reply))
    }
}

/// Fake node answering per method from scripted queues.
///
/// Queued replies are consumed in order; once a method's queue is empty its
/// sticky reply (if any) answers every further call. Unscripted methods get
/// "method not found".
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    queues: Mutex<HashMap<String, VecDeque<Reply>>>,
    sticky: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<JsonRpcRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a one-shot reply for `method`
    pub fn push(&self, method: &str, reply: Reply) -> &Self {
        self.queues
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Answer every unqueued call to `method` with `reply`
    pub fn always(&self, method: &str, reply: Reply) -> &Self {
        self.sticky.lock().insert(method.to_string(), reply);
        self
    }

    /// Every request received, in order
    pub fn calls(&self) -> Vec<JsonRpcRequest> {
        self.calls.lock().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.method.clone()).collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.method == method).count()
    }

    fn next_reply(&self, method: &str) -> Reply {
        if let Some(reply) = self
            .queues
            .lock()
            .get_mut(method)
            .and_then(|queue| queue.pop_front())
        {
            return reply;
        }
        self.sticky
            .lock()
            .get(method)
            .cloned()
            .unwrap_or_else(|| Reply::error(METHOD_NOT_FOUND, "method not found"))
    }
}

fn ok_body(body: Value) -> TransportResponse {
    TransportResponse {
        status: 200,
        body: Some(body.to_string()),
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    fn endpoint(&self) -> &str {
        "scripted://node"
    }

    async fn post(&self, body: String) -> Result<TransportResponse, TransportError> {
        let request: JsonRpcRequest = serde_json::from_str(&body)
            .map_err(|e| TransportError::new(format!("unparseable request: {e}")))?;
        let mut reply = self.next_reply(&request.method);
        let id = request.id;
        self.calls.lock().push(request);

        while let Reply::Delay(delay, inner) = reply {
            tokio::time::sleep(delay).await;
            reply = *inner;
        }

        render(reply, id)
    }
}

fn render(reply: Reply, id: u64) -> Result<TransportResponse, TransportError> {
    Ok(match reply {
        Reply::Result(result) => ok_body(json!({"jsonrpc": "2.0", "id": id, "result": result})),
        Reply::Error { code, message } => ok_body(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        })),
        Reply::Status(status) => TransportResponse {
            status,
            body: Some("upstream error".to_string()),
        },
        Reply::Empty => TransportResponse {
            status: 200,
            body: None,
        },
        Reply::WrongId(result) => ok_body(json!({
            "jsonrpc": "2.0",
            "id": id + 1000,
            "result": result
        })),
        Reply::Garbage => TransportResponse {
            status: 200,
            body: Some("<html>bad gateway</html>".to_string()),
        },
        Reply::TransportFailure(message) => return Err(TransportError::new(message)),
        // Already waited out by the caller
        Reply::Delay(_, inner) => return render(*inner, id),
    })
}

/// Signer that records what it signs and returns deterministic bytes
#[derive(Debug)]
pub struct FakeSigner {
    address: Address,
    signed: Mutex<Vec<UnsignedTransaction>>,
    failure: Mutex<Option<String>>,
}

impl FakeSigner {
    pub fn new(address: Address) -> Arc<Self> {
        Arc::new(Self {
            address,
            signed: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        })
    }

    /// Make every further `sign` call fail with `message`
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    pub fn signed(&self) -> Vec<UnsignedTransaction> {
        self.signed.lock().clone()
    }

    pub fn nonces(&self) -> Vec<Nonce> {
        self.signed.lock().iter().map(|tx| tx.nonce).collect()
    }
}

#[async_trait]
impl TransactionSigner for FakeSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> Result<Vec<u8>, SignerError> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(SignerError(message));
        }
        self.signed.lock().push(tx.clone());
        let mut raw = vec![0x02];
        raw.extend_from_slice(&tx.nonce.to_be_bytes());
        Ok(raw)
    }
}

/// Encoder whose calldata is the method name's first four bytes plus the
/// raw argument bytes; outputs decode to the raw return bytes.
#[derive(Debug, Default)]
pub struct FakeEncoder;

impl CallEncoder for FakeEncoder {
    type Args = Vec<u8>;
    type Output = Vec<u8>;

    fn encode_call(&self, method: &str, args: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        if method.is_empty() {
            return Err(CodecError::Encode {
                method: method.to_string(),
                message: "empty method name".to_string(),
            });
        }
        let mut data: Vec<u8> = method.bytes().take(4).collect();
        data.extend_from_slice(args);
        Ok(data)
    }

    fn decode_output(&self, _method: &str, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

/// Store interactions, as observed by [`RecordingStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Allocate(Nonce),
    AdvancePast { from: Nonce, to: Nonce },
    OutOfGas(Nonce, RollbackResponse),
    Reverted(Nonce, RollbackResponse),
    SubmitFailed(Nonce, RollbackResponse),
    SubmitSucceeded(Nonce),
}

/// In-memory store that logs every call made to it.
///
/// `force_submit_failed` overrides the answer to `notify_submit_failed`
/// without touching the underlying reservations.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: InMemoryNonceStore,
    events: Mutex<Vec<StoreEvent>>,
    forced: Mutex<Option<RollbackResponse>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn wrapping(inner: InMemoryNonceStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            events: Mutex::new(Vec::new()),
            forced: Mutex::new(None),
        })
    }

    pub fn force_submit_failed(&self, response: RollbackResponse) {
        *self.forced.lock() = Some(response);
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    fn record(&self, event: StoreEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl NonceStore for RecordingStore {
    async fn allocate(&self) -> NonceResult<Nonce> {
        let nonce = self.inner.allocate().await?;
        self.record(StoreEvent::Allocate(nonce));
        Ok(nonce)
    }

    async fn advance_past(&self, nonce: Nonce) -> NonceResult<Nonce> {
        let next = self.inner.advance_past(nonce).await?;
        self.record(StoreEvent::AdvancePast {
            from: nonce,
            to: next,
        });
        Ok(next)
    }

    async fn notify_out_of_gas(&self, nonce: Nonce) -> RollbackResponse {
        let response = self.inner.notify_out_of_gas(nonce).await;
        self.record(StoreEvent::OutOfGas(nonce, response));
        response
    }

    async fn notify_reverted(&self, nonce: Nonce) -> RollbackResponse {
        let response = self.inner.notify_reverted(nonce).await;
        self.record(StoreEvent::Reverted(nonce, response));
        response
    }

    async fn notify_submit_failed(&self, nonce: Nonce) -> RollbackResponse {
        let forced = *self.forced.lock();
        let response = match forced {
            Some(response) => response,
            None => self.inner.notify_submit_failed(nonce).await,
        };
        self.record(StoreEvent::SubmitFailed(nonce, response));
        response
    }

    async fn notify_submit_succeeded(&self, nonce: Nonce) {
        self.inner.notify_submit_succeeded(nonce).await;
        self.record(StoreEvent::SubmitSucceeded(nonce));
    }

    async fn reserved(&self) -> NonceResult<Vec<Nonce>> {
        self.inner.reserved().await
    }
}

pub fn address(byte: u8) -> Address {
    Address::new([byte; 20])
}

pub fn tx_hash(byte: u8) -> TxHash {
    TxHash([byte; 32])
}

/// Mined receipt body for `eth_getTransactionReceipt`
pub fn receipt_json(hash: TxHash, success: bool, gas_used: u64) -> Value {
    json!({
        "transactionHash": hash.to_string(),
        "blockNumber": "0x10",
        "gasUsed": quantity::encode(gas_used as u128),
        "status": if success { "0x1" } else { "0x0" },
        "logs": []
    })
}

/// Engine config for scripted tests: no chain seeding, short receipt polling
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.nonce.seed_from_chain = false;
    config.submission.receipt_wait_secs = 5;
    config.submission.receipt_poll_ms = 100;
    config
}

/// Script the calls every submission makes before broadcast
pub fn script_fees_and_gas(transport: &ScriptedTransport, gas_price: u128, gas: u128) {
    transport
        .always("eth_gasPrice", Reply::quantity(gas_price))
        .always("eth_maxPriorityFeePerGas", Reply::quantity(1))
        .always("eth_estimateGas", Reply::quantity(gas));
}
