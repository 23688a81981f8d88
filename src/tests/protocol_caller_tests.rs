//! Protocol caller tests against a scripted node

#[cfg(test)]
mod protocol_caller_tests {
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    use crate::metrics::EngineMetrics;
    use crate::rpc_manager::{
        retry_up_to, CallPolicy, MethodFaultInfo, NonceFault, ProtocolCaller, ProviderErrorKind,
        RetryPredicate, RpcError,
    };
    use crate::test_utils::{Reply, ScriptedTransport};

    fn fast_policy() -> CallPolicy {
        CallPolicy::never_retry()
            .with_attempt_timeout(Duration::from_secs(1))
            .with_retry_delay(Duration::from_millis(10))
            .with_jitter(0.0)
    }

    /// Predicate that records every fault and allows `max_attempts`
    fn recording(max_attempts: u32) -> (RetryPredicate, Arc<Mutex<Vec<MethodFaultInfo>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let predicate: RetryPredicate = Arc::new(move |fault: &MethodFaultInfo| {
            log.lock().push(fault.clone());
            fault.attempt < max_attempts
        });
        (predicate, seen)
    }

    #[tokio::test]
    async fn test_result_and_request_ids() {
        let transport = ScriptedTransport::new();
        transport
            .push("eth_blockNumber", Reply::result("0x10"))
            .push("eth_blockNumber", Reply::result("0x11"));
        let caller = ProtocolCaller::new(transport.clone(), fast_policy());
        let cancel = CancellationToken::new();

        let first: String = caller.request("eth_blockNumber", vec![], &cancel).await.unwrap();
        let second: String = caller.request("eth_blockNumber", vec![], &cancel).await.unwrap();

        assert_eq!(first, "0x10");
        assert_eq!(second, "0x11");
        let ids: Vec<u64> = transport.calls().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(transport.calls().iter().all(|c| c.jsonrpc == "2.0"));
    }

    #[tokio::test]
    async fn test_null_result() {
        let transport = ScriptedTransport::new();
        transport.push("eth_getTransactionReceipt", Reply::result(json!(null)));
        let caller = ProtocolCaller::new(transport.clone(), fast_policy());

        let receipt: Option<String> = caller
            .request(
                "eth_getTransactionReceipt",
                vec![json!("0x00")],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(receipt, None);
    }

    #[tokio::test]
    async fn test_id_mismatch_without_retry() {
        let transport = ScriptedTransport::new();
        transport.push("eth_chainId", Reply::WrongId(json!("0x1")));
        let caller = ProtocolCaller::new(transport.clone(), fast_policy());

        let err = caller
            .request::<String>("eth_chainId", vec![], &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            RpcError::RequestFailed {
                method,
                attempts,
                last,
            } => {
                assert_eq!(method, "eth_chainId");
                assert_eq!(attempts, 1);
                assert!(matches!(
                    *last,
                    RpcError::IdMismatch {
                        expected: 1,
                        actual: Some(1001)
                    }
                ));
            }
            other => panic!("expected RequestFailed, got {other:?}"),
        }
        assert_eq!(transport.count("eth_chainId"), 1);
    }

    #[tokio::test]
    async fn test_predicate_sees_each_fault_and_retry_succeeds() {
        let transport = ScriptedTransport::new();
        transport
            .push("eth_chainId", Reply::WrongId(json!("0x1")))
            .push("eth_chainId", Reply::Garbage)
            .push("eth_chainId", Reply::result("0x1"));
        let (predicate, seen) = recording(3);
        let caller = ProtocolCaller::new(transport.clone(), fast_policy().with_retry(predicate));

        let chain: String = caller
            .request("eth_chainId", vec![], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(chain, "0x1");
        assert_eq!(transport.count("eth_chainId"), 3);
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].attempt, 1);
        assert_eq!(seen[0].request_id, 1);
        assert_eq!(seen[0].status, Some(200));
        assert!(matches!(seen[0].error, RpcError::IdMismatch { .. }));
        assert_eq!(seen[1].attempt, 2);
        assert!(matches!(seen[1].error, RpcError::Deserialization { .. }));
    }

    #[tokio::test]
    async fn test_retry_reuses_request_id() {
        let transport = ScriptedTransport::new();
        transport
            .push("eth_chainId", Reply::Status(502))
            .push("eth_chainId", Reply::result("0x1"));
        let caller =
            ProtocolCaller::new(transport.clone(), fast_policy().with_retry(retry_up_to(2)));

        let _: String = caller
            .request("eth_chainId", vec![], &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<u64> = transport.calls().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_offered_to_predicate() {
        let transport = ScriptedTransport::new();
        transport
            .push(
                "eth_gasPrice",
                Reply::delayed(Duration::from_secs(5), Reply::result("0x1")),
            )
            .push("eth_gasPrice", Reply::result("0x2"));
        let (predicate, seen) = recording(2);
        let caller = ProtocolCaller::new(transport.clone(), fast_policy().with_retry(predicate));

        let price: String = caller
            .request("eth_gasPrice", vec![], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(price, "0x2");
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].error.is_timeout());
        assert_eq!(seen[0].status, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_retry() {
        let transport = ScriptedTransport::new();
        transport.push(
            "eth_gasPrice",
            Reply::delayed(Duration::from_secs(5), Reply::result("0x1")),
        );
        let caller = ProtocolCaller::new(transport.clone(), fast_policy());

        let err = caller
            .request::<String>("eth_gasPrice", vec![], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        match err {
            RpcError::RequestFailed { last, .. } => {
                assert!(matches!(*last, RpcError::TimedOut { timeout_ms: 1000 }))
            }
            other => panic!("expected RequestFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_skips_predicate() {
        let transport = ScriptedTransport::new();
        transport.always(
            "eth_call",
            Reply::delayed(Duration::from_secs(30), Reply::result("0x")),
        );
        let (predicate, seen) = recording(10);
        let policy = fast_policy()
            .with_attempt_timeout(Duration::from_secs(60))
            .with_retry(predicate);
        let caller = ProtocolCaller::new(transport.clone(), policy);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = caller
            .request::<String>("eth_call", vec![], &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(seen.lock().is_empty());
        assert_eq!(transport.count("eth_call"), 1);
    }

    #[tokio::test]
    async fn test_nonce_fault_bypasses_predicate() {
        let transport = ScriptedTransport::new();
        transport.always(
            "eth_sendRawTransaction",
            Reply::error(-32000, "nonce too low: next nonce 7, tx nonce 5"),
        );
        let (predicate, seen) = recording(5);
        let caller = ProtocolCaller::new(transport.clone(), fast_policy().with_retry(predicate));

        let err = caller
            .request::<String>(
                "eth_sendRawTransaction",
                vec![json!("0x02")],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.provider_kind(),
            Some(ProviderErrorKind::InvalidNonce(NonceFault::TooLow))
        );
        assert!(seen.lock().is_empty());
        assert_eq!(transport.count("eth_sendRawTransaction"), 1);
    }

    #[tokio::test]
    async fn test_declined_provider_error_is_returned_as_is() {
        let transport = ScriptedTransport::new();
        transport.push("eth_estimateGas", Reply::error(3, "execution reverted"));
        let caller = ProtocolCaller::new(transport.clone(), fast_policy());

        let err = caller
            .request::<String>("eth_estimateGas", vec![], &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            RpcError::Provider {
                method,
                request_id,
                code,
                kind,
                ..
            } => {
                assert_eq!(method, "eth_estimateGas");
                assert_eq!(request_id, 1);
                assert_eq!(code, 3);
                assert_eq!(kind, ProviderErrorKind::Reverted);
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_provider_error_is_offered_to_predicate() {
        let transport = ScriptedTransport::new();
        transport
            .push("eth_gasPrice", Reply::error(-32005, "rate limit exceeded"))
            .push("eth_gasPrice", Reply::result("0x5"));
        let (predicate, seen) = recording(2);
        let caller = ProtocolCaller::new(transport.clone(), fast_policy().with_retry(predicate));

        let price: String = caller
            .request("eth_gasPrice", vec![], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(price, "0x5");
        assert_eq!(
            seen.lock()[0].error.provider_kind(),
            Some(ProviderErrorKind::LimitExceeded)
        );
    }

    #[tokio::test]
    async fn test_http_status_empty_body_and_transport_faults() {
        let transport = ScriptedTransport::new();
        transport
            .push("a", Reply::Status(503))
            .push("b", Reply::Empty)
            .push("c", Reply::TransportFailure("connection reset".to_string()));
        let caller = ProtocolCaller::new(transport.clone(), fast_policy());
        let cancel = CancellationToken::new();

        let last = |err: RpcError| match err {
            RpcError::RequestFailed { last, .. } => *last,
            other => panic!("expected RequestFailed, got {other:?}"),
        };

        let err = caller.request::<String>("a", vec![], &cancel).await.unwrap_err();
        assert!(matches!(last(err), RpcError::HttpStatus { status: 503, .. }));

        let err = caller.request::<String>("b", vec![], &cancel).await.unwrap_err();
        assert!(matches!(last(err), RpcError::EmptyBody { .. }));

        let err = caller.request::<String>("c", vec![], &cancel).await.unwrap_err();
        match last(err) {
            RpcError::Transport { endpoint, message } => {
                assert_eq!(endpoint, "scripted://node");
                assert_eq!(message, "connection reset");
            }
            other => panic!("expected transport fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_result_shape() {
        let transport = ScriptedTransport::new();
        transport.push("eth_chainId", Reply::result(json!({"unexpected": true})));
        let caller = ProtocolCaller::new(transport.clone(), fast_policy());

        let err = caller
            .request::<String>("eth_chainId", vec![], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::UnexpectedResult { .. }));
    }

    #[tokio::test]
    async fn test_metrics_count_requests_and_faults() {
        let transport = ScriptedTransport::new();
        transport
            .push("eth_chainId", Reply::Garbage)
            .push("eth_chainId", Reply::result("0x1"));
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let caller = ProtocolCaller::new(transport.clone(), fast_policy().with_retry(retry_up_to(2)))
            .with_metrics(metrics.clone());

        let _: String = caller
            .request("eth_chainId", vec![], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(metrics.rpc_requests.get(), 2);
        assert_eq!(
            metrics
                .rpc_faults
                .with_label_values(&["deserialization"])
                .get(),
            1
        );
        assert_eq!(metrics.rpc_latency.get_sample_count(), 2);
    }
}
