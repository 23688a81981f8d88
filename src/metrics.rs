//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::fmt;
use std::time::Instant;

use crate::nonce_manager::RollbackResponse;

/// Engine metrics, registered in a registry owned by this instance
pub struct EngineMetrics {
    registry: Registry,

    // Nonce store
    pub nonces_allocated: IntCounter,
    pub nonce_rollbacks: IntCounterVec,

    // Orchestrator
    pub submission_attempts: IntCounter,
    pub submission_backoffs: IntCounter,
    pub submission_outcomes: IntCounterVec,

    // Protocol caller
    pub rpc_requests: IntCounter,
    pub rpc_faults: IntCounterVec,
    pub rpc_latency: Histogram,
}

impl EngineMetrics {
    /// Create new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let nonces_allocated = IntCounter::with_opts(Opts::new(
            "nonces_allocated_total",
            "Nonces reserved by the orchestrator (initial and advanced)",
        ))?;

        let nonce_rollbacks = IntCounterVec::new(
            Opts::new(
                "nonce_rollbacks_total",
                "Failure notifications answered by the nonce store, by response",
            ),
            &["response"],
        )?;

        let submission_attempts = IntCounter::with_opts(Opts::new(
            "submission_attempts_total",
            "Submit function invocations",
        ))?;

        let submission_backoffs = IntCounter::with_opts(Opts::new(
            "submission_backoffs_total",
            "Backoff sleeps before retrying the same nonce",
        ))?;

        let submission_outcomes = IntCounterVec::new(
            Opts::new(
                "submission_outcomes_total",
                "Terminal outcomes of once-operations",
            ),
            &["outcome"],
        )?;

        let rpc_requests = IntCounter::with_opts(Opts::new(
            "rpc_requests_total",
            "JSON-RPC attempts issued",
        ))?;

        let rpc_faults = IntCounterVec::new(
            Opts::new("rpc_faults_total", "JSON-RPC attempt faults, by reason"),
            &["reason"],
        )?;

        let rpc_latency = Histogram::with_opts(
            HistogramOpts::new("rpc_latency_seconds", "JSON-RPC attempt latency")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(nonces_allocated.clone()))?;
        registry.register(Box::new(nonce_rollbacks.clone()))?;
        registry.register(Box::new(submission_attempts.clone()))?;
        registry.register(Box::new(submission_backoffs.clone()))?;
        registry.register(Box::new(submission_outcomes.clone()))?;
        registry.register(Box::new(rpc_requests.clone()))?;
        registry.register(Box::new(rpc_faults.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;

        Ok(Self {
            registry,
            nonces_allocated,
            nonce_rollbacks,
            submission_attempts,
            submission_backoffs,
            submission_outcomes,
            rpc_requests,
            rpc_faults,
            rpc_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_rollback(&self, response: RollbackResponse) {
        self.nonce_rollbacks
            .with_label_values(&[response.as_str()])
            .inc();
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.submission_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_rpc_fault(&self, reason: &str) {
        self.rpc_faults.with_label_values(&[reason]).inc();
    }

    /// Prometheus text exposition of every registered metric
    pub fn gather(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("nonces_allocated", &self.nonces_allocated.get())
            .field("submission_attempts", &self.submission_attempts.get())
            .field("rpc_requests", &self.rpc_requests.get())
            .finish_non_exhaustive()
    }
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
