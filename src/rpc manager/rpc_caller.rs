//! Protocol caller: one JSON-RPC request, driven to a response or a
//! classified error.
//!
//! Each attempt is bounded by the policy's attempt timeout. Protocol faults
//! (timeout, transport, HTTP status, empty or malformed body, id mismatch)
//! and non-nonce provider errors are offered to the retry predicate. Nonce
//! faults skip the predicate because the orchestrator owns them. Outer
//! cancellation is propagated immediately.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::rpc_errors::RpcError;
use super::rpc_transport::{RpcTransport, TransportResponse};
use super::rpc_types::{JsonRpcRequest, JsonRpcResponse};
use crate::metrics::{EngineMetrics, Timer};

/// Immutable snapshot handed to the retry predicate
#[derive(Debug, Clone)]
pub struct MethodFaultInfo {
    pub method: String,
    pub request_id: u64,
    /// 1-based attempt that produced the fault
    pub attempt: u32,
    pub error: RpcError,
    /// HTTP status, when a response arrived
    pub status: Option<u16>,
}

/// Caller-supplied "keep retrying?" decision
pub type RetryPredicate = Arc<dyn Fn(&MethodFaultInfo) -> bool + Send + Sync>;

/// Predicate that declines every fault
pub fn never_retry() -> RetryPredicate {
    Arc::new(|_| false)
}

/// Predicate that allows up to `max_attempts` attempts in total
pub fn retry_up_to(max_attempts: u32) -> RetryPredicate {
    Arc::new(move |fault| fault.attempt < max_attempts)
}

/// Per-call retry, timeout and pacing policy
#[derive(Clone)]
pub struct CallPolicy {
    pub retry: RetryPredicate,
    pub attempt_timeout: Duration,
    pub retry_delay: Duration,
    /// Relative jitter applied to `retry_delay`, e.g. 0.1 = ±10%
    pub jitter: f64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            retry: never_retry(),
            attempt_timeout: Duration::from_secs(90),
            retry_delay: Duration::from_millis(250),
            jitter: 0.1,
        }
    }
}

impl CallPolicy {
    pub fn never_retry() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry = if max_attempts <= 1 {
            never_retry()
        } else {
            retry_up_to(max_attempts)
        };
        self
    }

    pub fn with_retry(mut self, retry: RetryPredicate) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Retry delay with jitter to prevent thundering herd
    pub fn jittered_delay(&self) -> Duration {
        if self.jitter <= 0.0 {
            return self.retry_delay;
        }
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * self.jitter;
        let delay_ms = (self.retry_delay.as_millis() as f64 * (1.0 + jitter)).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}

impl fmt::Debug for CallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPolicy")
            .field("attempt_timeout", &self.attempt_timeout)
            .field("retry_delay", &self.retry_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

/// Issues JSON-RPC requests over a transport.
///
/// Request ids come from a counter owned by this instance.
#[derive(Debug)]
pub struct ProtocolCaller {
    transport: Arc<dyn RpcTransport>,
    next_id: AtomicU64,
    policy: CallPolicy,
    metrics: Option<Arc<EngineMetrics>>,
}

impl ProtocolCaller {
    pub fn new(transport: Arc<dyn RpcTransport>, policy: CallPolicy) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    /// Build a request with a fresh id
    pub fn next_request(&self, method: &str, params: Vec<Value>) -> JsonRpcRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        JsonRpcRequest::new(id, method, params)
    }

    /// Call `method` and deserialize its result
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<T, RpcError> {
        let request = self.next_request(method, params);
        let value = self.call(&request, cancel).await?;
        serde_json::from_value(value).map_err(|e| RpcError::UnexpectedResult {
            method: method.to_string(),
            message: e.to_string(),
        })
    }

    /// Run `request` under this caller's default policy
    pub async fn call(
        &self,
        request: &JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        self.call_with(request, &self.policy, cancel).await
    }

    /// Run `request` under an explicit policy.
    ///
    /// Returns the raw `result` (`Value::Null` when absent).
    pub async fn call_with(
        &self,
        request: &JsonRpcRequest,
        policy: &CallPolicy,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        let body = serde_json::to_string(request).map_err(|e| RpcError::Encode(e.to_string()))?;
        let cancelled = || RpcError::Cancelled {
            method: request.method.clone(),
        };
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if let Some(metrics) = &self.metrics {
                metrics.rpc_requests.inc();
            }

            let timer = Timer::start();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                res = tokio::time::timeout(policy.attempt_timeout, self.transport.post(body.clone())) => res,
            };
            if let Some(metrics) = &self.metrics {
                timer.observe_duration(&metrics.rpc_latency);
            }

            let (error, status) = match outcome {
                Err(_) => (
                    RpcError::TimedOut {
                        timeout_ms: policy.attempt_timeout.as_millis() as u64,
                    },
                    None,
                ),
                Ok(Err(e)) => (
                    RpcError::Transport {
                        endpoint: self.endpoint().to_string(),
                        message: e.message,
                    },
                    None,
                ),
                Ok(Ok(response)) => {
                    let status = response.status;
                    match self.interpret(request, response) {
                        Ok(value) => return Ok(value),
                        Err(error) => (error, Some(status)),
                    }
                }
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_rpc_fault(error.fault_reason());
            }

            if let RpcError::Provider { kind, .. } = &error {
                if kind.is_nonce_fault() {
                    debug!(
                        method = %request.method,
                        request_id = request.id,
                        error = %error,
                        "Nonce fault, not consulting retry predicate"
                    );
                    return Err(error);
                }
            }

            let fault = MethodFaultInfo {
                method: request.method.clone(),
                request_id: request.id,
                attempt,
                error,
                status,
            };

            if !(policy.retry)(&fault) {
                warn!(
                    method = %fault.method,
                    request_id = fault.request_id,
                    attempt,
                    error = %fault.error,
                    "RPC request failed"
                );
                return Err(match fault.error {
                    provider @ RpcError::Provider { .. } => provider,
                    last => RpcError::RequestFailed {
                        method: fault.method,
                        attempts: attempt,
                        last: Box::new(last),
                    },
                });
            }

            let delay = policy.jittered_delay();
            debug!(
                method = %fault.method,
                request_id = fault.request_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %fault.error,
                "Retrying RPC request"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Turn a raw response into a result value or a fault
    fn interpret(
        &self,
        request: &JsonRpcRequest,
        response: TransportResponse,
    ) -> Result<Value, RpcError> {
        if !response.is_success() {
            return Err(RpcError::HttpStatus {
                endpoint: self.endpoint().to_string(),
                status: response.status,
            });
        }

        let body = response.body.ok_or_else(|| RpcError::EmptyBody {
            endpoint: self.endpoint().to_string(),
        })?;

        let parsed: JsonRpcResponse =
            serde_json::from_str(&body).map_err(|e| RpcError::Deserialization {
                message: e.to_string(),
            })?;

        if parsed.id != Some(request.id) {
            return Err(RpcError::IdMismatch {
                expected: request.id,
                actual: parsed.id,
            });
        }

        if let Some(err) = parsed.error {
            return Err(RpcError::provider(
                request.method.clone(),
                request.id,
                err.code,
                err.message,
                err.data,
            ));
        }

        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_max_attempts() {
        let fault = |attempt| MethodFaultInfo {
            method: "eth_call".to_string(),
            request_id: 1,
            attempt,
            error: RpcError::TimedOut { timeout_ms: 10 },
            status: None,
        };

        let policy = CallPolicy::never_retry().with_max_attempts(3);
        assert!((policy.retry)(&fault(1)));
        assert!((policy.retry)(&fault(2)));
        assert!(!(policy.retry)(&fault(3)));

        let policy = CallPolicy::never_retry().with_max_attempts(1);
        assert!(!(policy.retry)(&fault(1)));
    }

    #[test]
    fn test_jittered_delay_stays_in_band() {
        let policy = CallPolicy::default()
            .with_retry_delay(Duration::from_millis(1000))
            .with_jitter(0.1);
        for _ in 0..100 {
            let delay = policy.jittered_delay();
            assert!(delay >= Duration::from_millis(900), "{delay:?}");
            assert!(delay <= Duration::from_millis(1100), "{delay:?}");
        }
        assert_eq!(
            policy.with_jitter(0.0).jittered_delay(),
            Duration::from_millis(1000)
        );
    }
}
