//! Process-lifetime nonce store backed by a guarded ordered map
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::nonce_errors::NonceResult;
use super::nonce_store::{
    decide_failure, next_candidate, removal_response, seed_from, FailureDecision, NonceSource,
    NonceStore, RollbackResponse, DEFAULT_RETRY_WINDOW,
};
use crate::types::Nonce;

/// In-memory nonce store.
///
/// Each reserved nonce maps to the time its current failure streak
/// started, if any. All read-modify-write sequences run under one lock.
#[derive(Debug)]
pub struct InMemoryNonceStore {
    reserved: Mutex<BTreeMap<Nonce, Option<DateTime<Utc>>>>,
    source: Option<Arc<dyn NonceSource>>,
    retry_window: Duration,
}

impl InMemoryNonceStore {
    /// Store seeded from zero
    pub fn new() -> Self {
        Self {
            reserved: Mutex::new(BTreeMap::new()),
            source: None,
            retry_window: DEFAULT_RETRY_WINDOW,
        }
    }

    /// Seed every allocation from `source` (e.g. the node's pending count)
    pub fn with_source(mut self, source: Arc<dyn NonceSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    pub fn retry_window(&self) -> Duration {
        self.retry_window
    }

    fn consume(&self, nonce: Nonce, reason: &'static str) -> RollbackResponse {
        let mut reserved = self.reserved.lock();
        match reserved.get_mut(&nonce) {
            Some(first_failure) => {
                *first_failure = None;
                debug!(nonce, reason, "Nonce consumed on-chain, keeping reservation");
            }
            None => {
                warn!(nonce, reason, "Gas-spent notification for unreserved nonce");
            }
        }
        RollbackResponse::NotRemovedGasSpent
    }
}

impl Default for InMemoryNonceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn allocate(&self) -> NonceResult<Nonce> {
        // Query the seed outside the lock; the claim below is atomic.
        let seed = seed_from(self.source.as_deref()).await?;

        let mut reserved = self.reserved.lock();
        let mut candidate = seed;
        while reserved.contains_key(&candidate) {
            candidate = next_candidate(candidate)?;
        }
        reserved.insert(candidate, None);

        debug!(nonce = candidate, seed, "Allocated nonce");
        Ok(candidate)
    }

    async fn notify_out_of_gas(&self, nonce: Nonce) -> RollbackResponse {
        self.consume(nonce, "out_of_gas")
    }

    async fn notify_reverted(&self, nonce: Nonce) -> RollbackResponse {
        self.consume(nonce, "reverted")
    }

    async fn notify_submit_failed(&self, nonce: Nonce) -> RollbackResponse {
        let now = Utc::now();
        let mut reserved = self.reserved.lock();

        let Some(first_failure) = reserved.get(&nonce).copied() else {
            warn!(nonce, "Submit-failed notification for unreserved nonce");
            return RollbackResponse::NonceNotFound;
        };

        match decide_failure(first_failure, now, self.retry_window) {
            FailureDecision::RecordFirst => {
                reserved.insert(nonce, Some(now));
                debug!(nonce, "Recorded first submit failure");
                RollbackResponse::NotRemovedShouldRetry
            }
            FailureDecision::RetryInWindow => {
                debug!(nonce, "Submit failed again inside grace window");
                RollbackResponse::NotRemovedShouldRetry
            }
            FailureDecision::Remove => {
                reserved.remove(&nonce);
                let response = removal_response(reserved.keys().copied(), nonce);
                info!(nonce, response = %response, "Released nonce after persistent failure");
                response
            }
        }
    }

    async fn notify_submit_succeeded(&self, nonce: Nonce) {
        let mut reserved = self.reserved.lock();
        match reserved.get_mut(&nonce) {
            Some(first_failure) => *first_failure = None,
            None => {
                // The ledger accepted it, so the number is spent regardless.
                reserved.insert(nonce, None);
                warn!(nonce, "Success reported for unreserved nonce, reserving it");
            }
        }
    }

    async fn reserved(&self) -> NonceResult<Vec<Nonce>> {
        Ok(self.reserved.lock().keys().copied().collect())
    }
}
