//! End-to-end submissions over HTTP against a mock JSON-RPC node

use async_trait::async_trait;
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use nonce_flight::submitter::{SignerError, TransactionSigner};
use nonce_flight::types::UnsignedTransaction;
use nonce_flight::{Address, EngineConfig, SubmissionClient, SubmissionError, TxOptions};

#[derive(Debug)]
struct StaticSigner(Address);

#[async_trait]
impl TransactionSigner for StaticSigner {
    fn address(&self) -> Address {
        self.0
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> Result<Vec<u8>, SignerError> {
        Ok(vec![0x02, tx.nonce as u8])
    }
}

const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

/// Mock answering `method` exactly `hits` times, echoing the request id
/// around `reply(call_index)`
async fn rpc_mock<F>(server: &mut ServerGuard, method: &str, hits: usize, reply: F) -> Mock
where
    F: Fn(usize) -> Value + Send + Sync + 'static,
{
    let calls = AtomicUsize::new(0);
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({ "method": method })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .expect(hits)
        .with_body_from_request(move |request| {
            let body: Value = request
                .body()
                .ok()
                .and_then(|raw| serde_json::from_slice(raw).ok())
                .unwrap_or(Value::Null);
            let mut response = reply(calls.fetch_add(1, Ordering::SeqCst));
            response["jsonrpc"] = json!("2.0");
            response["id"] = body["id"].clone();
            response.to_string().into_bytes()
        })
        .create_async()
        .await
}

fn config(server: &ServerGuard) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.rpc.url = server.url();
    config.rpc.attempt_timeout_secs = 5;
    config.submission.receipt_wait_secs = 5;
    config.submission.receipt_poll_ms = 50;
    config
}

fn signer() -> Arc<StaticSigner> {
    Arc::new(StaticSigner(Address::new([0xab; 20])))
}

/// Fee estimation mocks for `attempts` submission attempts
async fn fee_mocks(server: &mut ServerGuard, attempts: usize) -> Vec<Mock> {
    vec![
        rpc_mock(server, "eth_gasPrice", attempts, |_| {
            json!({ "result": "0x3b9aca00" })
        })
        .await,
        rpc_mock(server, "eth_maxPriorityFeePerGas", attempts, |_| {
            json!({ "result": "0x1" })
        })
        .await,
    ]
}

async fn assert_all(mocks: &[Mock]) {
    for mock in mocks {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn test_transfer_over_http() {
    let mut server = Server::new_async().await;
    let count = rpc_mock(&mut server, "eth_getTransactionCount", 1, |_| {
        json!({ "result": "0x3" })
    })
    .await;
    let fees = fee_mocks(&mut server, 1).await;
    let send = rpc_mock(&mut server, "eth_sendRawTransaction", 1, |_| {
        json!({ "result": HASH })
    })
    .await;
    let receipt = rpc_mock(&mut server, "eth_getTransactionReceipt", 2, |call| {
        if call == 0 {
            json!({ "result": null })
        } else {
            json!({ "result": {
                "transactionHash": HASH,
                "blockNumber": "0x20",
                "gasUsed": "0x5208",
                "status": "0x1"
            }})
        }
    })
    .await;

    let client = SubmissionClient::from_config(config(&server), signer()).unwrap();
    let outcome = client
        .transfer(
            Address::new([0xcd; 20]),
            1_000,
            &TxOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.nonce(), 3);
    assert!(outcome.is_confirmed());
    assert_eq!(outcome.hash().to_string(), HASH);
    count.assert_async().await;
    send.assert_async().await;
    receipt.assert_async().await;
    assert_all(&fees).await;
}

#[tokio::test]
async fn test_nonce_too_low_over_http() {
    let mut server = Server::new_async().await;
    // Seeded once for the first nonce and again while advancing
    let count = rpc_mock(&mut server, "eth_getTransactionCount", 2, |_| {
        json!({ "result": "0x0" })
    })
    .await;
    let fees = fee_mocks(&mut server, 2).await;
    let send = rpc_mock(&mut server, "eth_sendRawTransaction", 2, |call| {
        if call == 0 {
            json!({ "error": { "code": -32000, "message": "nonce too low" } })
        } else {
            json!({ "result": HASH })
        }
    })
    .await;

    let mut config = config(&server);
    config.submission.receipt_wait_secs = 0;
    let client = SubmissionClient::from_config(config, signer()).unwrap();

    let outcome = client
        .transfer(
            Address::new([0xcd; 20]),
            1,
            &TxOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.nonce(), 1);
    assert!(!outcome.is_confirmed());
    count.assert_async().await;
    send.assert_async().await;
    assert_all(&fees).await;
}

#[tokio::test]
async fn test_insufficient_funds_over_http() {
    let mut server = Server::new_async().await;
    let _count = rpc_mock(&mut server, "eth_getTransactionCount", 1, |_| {
        json!({ "result": "0x0" })
    })
    .await;
    let _fees = fee_mocks(&mut server, 1).await;
    let send = rpc_mock(&mut server, "eth_sendRawTransaction", 1, |_| {
        json!({ "error": {
            "code": -32000,
            "message": "insufficient funds for gas * price + value"
        }})
    })
    .await;

    let client = SubmissionClient::from_config(config(&server), signer()).unwrap();
    let err = client
        .transfer(
            Address::new([0xcd; 20]),
            u128::MAX,
            &TxOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SubmissionError::InsufficientFunds { nonce: 0, .. }));
    assert!(!err.is_retryable_by_caller());
    send.assert_async().await;
}
