//! Single-flight orchestrator
//!
//! Drives one nonce-parameterized submission to a terminal outcome. The
//! branching is a value switch over [`FailureKind`]; the nonce store's
//! [`RollbackResponse`] decides between a same-nonce retry and a terminal
//! error.
//!
//! The admission gate allows one in-flight submission per instance. It is a
//! single-process mitigation only: another process (or another instance)
//! using the same signing identity is not excluded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::errors::SubmissionError;
use crate::metrics::EngineMetrics;
use crate::nonce_manager::{NonceStore, RollbackResponse};
use crate::structured_logging::SubmissionLogger;
use crate::types::{FailureKind, Nonce};

/// Orchestrator timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnceSettings {
    /// Outer wall-clock deadline for one operation
    pub deadline: Duration,
    /// Sleep before retrying the same nonce
    pub backoff: Duration,
}

impl Default for OnceSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60),
            backoff: Duration::from_secs(3),
        }
    }
}

/// Orchestrator states, as logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Allocating,
    Submitting,
    RetryingSameNonce,
    RetryingAdvancedNonce,
    Succeeded,
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Allocating => "allocating",
            OperationState::Submitting => "submitting",
            OperationState::RetryingSameNonce => "retrying_same_nonce",
            OperationState::RetryingAdvancedNonce => "retrying_advanced_nonce",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        }
    }
}

/// The "once operation" runner shared by every submission of one identity
#[derive(Debug)]
pub struct OnceOperation {
    store: Arc<dyn NonceStore>,
    gate: Semaphore,
    settings: OnceSettings,
    metrics: Option<Arc<EngineMetrics>>,
}

impl OnceOperation {
    pub fn new(store: Arc<dyn NonceStore>, settings: OnceSettings) -> Self {
        Self {
            store,
            gate: Semaphore::new(1),
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<dyn NonceStore> {
        &self.store
    }

    pub fn settings(&self) -> OnceSettings {
        self.settings
    }

    /// Run `submit` until it succeeds or fails terminally.
    ///
    /// `classify` maps each submit error onto a [`FailureKind`]. `deadline`
    /// bounds the whole loop: it is checked before every attempt and also
    /// bounds the wait for the admission gate, every nonce advance and every
    /// backoff. An attempt already admitted runs to completion.
    pub async fn run_operation<T, E, F, Fut, C>(
        &self,
        name: &str,
        deadline: Duration,
        mut submit: F,
        classify: C,
        cancel: &CancellationToken,
    ) -> Result<T, SubmissionError>
    where
        F: FnMut(Nonce) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> FailureKind,
        E: std::error::Error + Send + Sync + 'static,
    {
        let logger = SubmissionLogger::new(name);
        let started = Instant::now();

        let result = self
            .drive(name, deadline, &mut submit, &classify, cancel, &logger)
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok((_, nonce, attempts)) => {
                logger.log_success(*nonce, *attempts, latency_ms);
                self.record_outcome("succeeded");
            }
            Err(e) => {
                logger.log_state(OperationState::Failed.as_str(), e.nonce());
                logger.log_failure(e.nonce(), &e.to_string(), latency_ms);
                self.record_outcome(e.outcome_label());
            }
        }
        result.map(|(value, _, _)| value)
    }

    async fn drive<T, E, F, Fut, C>(
        &self,
        name: &str,
        deadline: Duration,
        submit: &mut F,
        classify: &C,
        cancel: &CancellationToken,
        logger: &SubmissionLogger,
    ) -> Result<(T, Nonce, u32), SubmissionError>
    where
        F: FnMut(Nonce) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> FailureKind,
        E: std::error::Error + Send + Sync + 'static,
    {
        let operation = || name.to_string();
        let cancelled = |nonce: Option<Nonce>| SubmissionError::Cancelled {
            operation: operation(),
            nonce,
        };
        let deadline_exceeded = |nonce: Nonce| SubmissionError::DeadlineExceeded {
            operation: operation(),
            nonce,
            deadline,
        };
        let deadline_at = Instant::now() + deadline;

        logger.log_state(OperationState::Allocating.as_str(), None);
        let mut nonce = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(None)),
            allocated = self.store.allocate() => allocated.map_err(|source| SubmissionError::NonceStore {
                operation: operation(),
                source,
            })?,
        };
        self.count_allocation();
        let mut attempts: u32 = 0;

        loop {
            if Instant::now() >= deadline_at {
                return Err(deadline_exceeded(nonce));
            }

            attempts += 1;
            logger.log_state(OperationState::Submitting.as_str(), Some(nonce));
            logger.log_attempt(nonce, attempts);
            if let Some(metrics) = &self.metrics {
                metrics.submission_attempts.inc();
            }

            let outcome = {
                // Released when this block ends, on every path.
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(Some(nonce))),
                    permit = self.gate.acquire() => permit.map_err(|_| cancelled(Some(nonce)))?,
                    _ = tokio::time::sleep_until(deadline_at) => return Err(deadline_exceeded(nonce)),
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(Some(nonce))),
                    result = submit(nonce) => result,
                }
            };

            let error = match outcome {
                Ok(value) => {
                    self.store.notify_submit_succeeded(nonce).await;
                    logger.log_state(OperationState::Succeeded.as_str(), Some(nonce));
                    return Ok((value, nonce, attempts));
                }
                Err(error) => error,
            };

            let kind = classify(&error);
            match kind {
                FailureKind::NonceTooLow => {
                    // Seeding may hit the network; dropping the advance is safe.
                    let advanced = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(cancelled(Some(nonce))),
                        advanced = self.store.advance_past(nonce) => advanced,
                        _ = tokio::time::sleep_until(deadline_at) => return Err(deadline_exceeded(nonce)),
                    };
                    let next = advanced.map_err(|source| SubmissionError::NonceStore {
                        operation: operation(),
                        source,
                    })?;
                    self.count_allocation();
                    logger.log_nonce_advanced(nonce, next);
                    logger.log_state(OperationState::RetryingAdvancedNonce.as_str(), Some(next));
                    nonce = next;
                }
                FailureKind::OutOfGas => {
                    let response = self.store.notify_out_of_gas(nonce).await;
                    self.record_rollback(response);
                    return Err(SubmissionError::OutOfGas {
                        operation: operation(),
                        nonce,
                        response,
                        gap_created: response.gap_detected(),
                        source: Box::new(error),
                    });
                }
                FailureKind::Reverted => {
                    let response = self.store.notify_reverted(nonce).await;
                    self.record_rollback(response);
                    return Err(SubmissionError::Reverted {
                        operation: operation(),
                        nonce,
                        response,
                        gap_created: response.gap_detected(),
                        source: Box::new(error),
                    });
                }
                FailureKind::ReceiptNotFound => {
                    // May have been mined; the nonce is spent either way.
                    self.store.notify_submit_succeeded(nonce).await;
                    return Err(SubmissionError::ReceiptTimeout {
                        operation: operation(),
                        nonce,
                        source: Box::new(error),
                    });
                }
                FailureKind::InsufficientFunds => {
                    let response = self.store.notify_submit_failed(nonce).await;
                    self.record_rollback(response);
                    return Err(SubmissionError::InsufficientFunds {
                        operation: operation(),
                        nonce,
                        response,
                        gap_created: response.gap_detected(),
                        source: Box::new(error),
                    });
                }
                FailureKind::Other | FailureKind::NonceTooHigh => {
                    let response = self.store.notify_submit_failed(nonce).await;
                    self.record_rollback(response);
                    if response != RollbackResponse::NotRemovedShouldRetry {
                        return Err(SubmissionError::Rejected {
                            operation: operation(),
                            nonce,
                            kind,
                            response,
                            gap_created: response.gap_detected(),
                            source: Box::new(error),
                        });
                    }

                    logger.log_retry(nonce, kind, response.as_str(), &error.to_string());
                    logger.log_state(OperationState::RetryingSameNonce.as_str(), Some(nonce));
                    if let Some(metrics) = &self.metrics {
                        metrics.submission_backoffs.inc();
                    }

                    let wake_at = (Instant::now() + self.settings.backoff).min(deadline_at);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(cancelled(Some(nonce))),
                        _ = tokio::time::sleep_until(wake_at) => {}
                    }
                }
            }
        }
    }

    fn count_allocation(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.nonces_allocated.inc();
        }
    }

    fn record_rollback(&self, response: RollbackResponse) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rollback(response);
        }
    }

    fn record_outcome(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_outcome(outcome);
        }
    }
}
