//! Nonce store contract
//!
//! A nonce store hands out per-account sequence numbers and decides what
//! happens to a reserved number once the outcome of its submission is known.
//! Every implementation answers each failure notification with exactly one
//! [`RollbackResponse`]; the orchestrator branches on nothing else.
//!
//! Reservation lifecycle:
//! - `allocate` reserves the lowest free candidate at or above the seed
//! - `notify_submit_succeeded` keeps the reservation and clears failure state
//! - `notify_out_of_gas` / `notify_reverted` keep the reservation (gas spent)
//! - `notify_submit_failed` debounces within a grace window measured from
//!   the first failure of a streak, then removes with gap detection

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::nonce_errors::{NonceResult, NonceStoreError};
use crate::types::Nonce;

/// Default grace window for repeated submission failures
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(10);

/// Outcome of a failure notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RollbackResponse {
    /// Mined and failed; the nonce is permanently consumed
    NotRemovedGasSpent,
    /// Transient failure; retry the same nonce after a backoff
    NotRemovedShouldRetry,
    /// Freed; nothing higher is reserved
    RemovedOkay,
    /// Freed, but a higher nonce is reserved so a hole now exists
    RemovedGapDetected,
    /// The nonce was never reserved (or already removed)
    NonceNotFound,
    /// The store failed while deciding; the nonce stays reserved
    NotRemovedInternalError,
}

impl RollbackResponse {
    /// Whether the reservation was dropped
    pub fn was_removed(&self) -> bool {
        matches!(
            self,
            RollbackResponse::RemovedOkay | RollbackResponse::RemovedGapDetected
        )
    }

    /// Whether removal left a hole below a reserved nonce
    pub fn gap_detected(&self) -> bool {
        matches!(self, RollbackResponse::RemovedGapDetected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RollbackResponse::NotRemovedGasSpent => "not_removed_gas_spent",
            RollbackResponse::NotRemovedShouldRetry => "not_removed_should_retry",
            RollbackResponse::RemovedOkay => "removed_okay",
            RollbackResponse::RemovedGapDetected => "removed_gap_detected",
            RollbackResponse::NonceNotFound => "nonce_not_found",
            RollbackResponse::NotRemovedInternalError => "not_removed_internal_error",
        }
    }
}

impl fmt::Display for RollbackResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supplies the ledger's current transaction count for the signing identity
#[async_trait]
pub trait NonceSource: Send + Sync + fmt::Debug {
    async fn confirmed_count(&self) -> NonceResult<Nonce>;
}

/// Sequence-number allocator for a single signing identity
#[async_trait]
pub trait NonceStore: Send + Sync + fmt::Debug {
    /// Reserve the lowest free nonce at or above the seed.
    ///
    /// Concurrent callers never receive the same value.
    async fn allocate(&self) -> NonceResult<Nonce>;

    /// Allocate repeatedly until a value strictly greater than `nonce` is
    /// reserved.
    ///
    /// Values at or below `nonce` picked up on the way stay reserved: the
    /// node has reported them as already used. Cancel safe: a dropped
    /// advance never leaves a value above `nonce` reserved.
    async fn advance_past(&self, nonce: Nonce) -> NonceResult<Nonce> {
        loop {
            let candidate = self.allocate().await?;
            if candidate > nonce {
                return Ok(candidate);
            }
            tracing::debug!(
                skipped = candidate,
                floor = nonce,
                "Reserved nonce at or below floor while advancing"
            );
        }
    }

    /// The transaction was mined and ran out of gas.
    async fn notify_out_of_gas(&self, nonce: Nonce) -> RollbackResponse;

    /// The transaction was mined and reverted.
    async fn notify_reverted(&self, nonce: Nonce) -> RollbackResponse;

    /// Submission failed before the ledger accepted the transaction.
    async fn notify_submit_failed(&self, nonce: Nonce) -> RollbackResponse;

    /// Submission succeeded (or may have; the nonce is consumed either way).
    async fn notify_submit_succeeded(&self, nonce: Nonce);

    /// Sorted snapshot of reserved nonces
    async fn reserved(&self) -> NonceResult<Vec<Nonce>>;
}

/// What to do with a submission failure given the streak's first one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureDecision {
    /// First failure of a streak: record `now`, answer should-retry
    RecordFirst,
    /// Inside the grace window: answer should-retry, keep the record
    RetryInWindow,
    /// Window elapsed: drop the reservation
    Remove,
}

/// Debounce policy shared by every store implementation.
///
/// The window is measured from the first failure of the current streak, so
/// a nonce that keeps failing is released once the window has elapsed no
/// matter how often it is retried. A success ends the streak.
pub(crate) fn decide_failure(
    first_failure: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> FailureDecision {
    let Some(first) = first_failure else {
        return FailureDecision::RecordFirst;
    };
    // A clock that moved backwards counts as "inside the window".
    let elapsed = (now - first).to_std().unwrap_or(Duration::ZERO);
    if elapsed < window {
        FailureDecision::RetryInWindow
    } else {
        FailureDecision::Remove
    }
}

/// Removal response given the reservations left after removing `nonce`
pub(crate) fn removal_response<I>(remaining: I, nonce: Nonce) -> RollbackResponse
where
    I: IntoIterator<Item = Nonce>,
{
    if remaining.into_iter().any(|n| n > nonce) {
        RollbackResponse::RemovedGapDetected
    } else {
        RollbackResponse::RemovedOkay
    }
}

/// Resolve the allocation seed from an optional source
pub(crate) async fn seed_from(source: Option<&dyn NonceSource>) -> NonceResult<Nonce> {
    match source {
        Some(source) => source.confirmed_count().await,
        None => Ok(0),
    }
}

/// Next candidate above `nonce`, or exhaustion
pub(crate) fn next_candidate(nonce: Nonce) -> NonceResult<Nonce> {
    nonce
        .checked_add(1)
        .ok_or(NonceStoreError::Exhausted(nonce))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_response_helpers() {
        assert!(RollbackResponse::RemovedOkay.was_removed());
        assert!(RollbackResponse::RemovedGapDetected.was_removed());
        assert!(RollbackResponse::RemovedGapDetected.gap_detected());
        assert!(!RollbackResponse::RemovedOkay.gap_detected());
        assert!(!RollbackResponse::NotRemovedGasSpent.was_removed());
        assert!(!RollbackResponse::NotRemovedShouldRetry.was_removed());
        assert!(!RollbackResponse::NonceNotFound.was_removed());
        assert!(!RollbackResponse::NotRemovedInternalError.was_removed());
        assert_eq!(
            RollbackResponse::RemovedGapDetected.to_string(),
            "removed_gap_detected"
        );
    }

    #[test]
    fn test_first_failure_is_recorded() {
        let now = Utc::now();
        assert_eq!(
            decide_failure(None, now, DEFAULT_RETRY_WINDOW),
            FailureDecision::RecordFirst
        );
    }

    #[test]
    fn test_failure_inside_window_retries() {
        let now = Utc::now();
        let first = now - chrono::Duration::seconds(3);
        assert_eq!(
            decide_failure(Some(first), now, DEFAULT_RETRY_WINDOW),
            FailureDecision::RetryInWindow
        );
    }

    #[test]
    fn test_failure_after_window_removes() {
        let now = Utc::now();
        let first = now - chrono::Duration::seconds(11);
        assert_eq!(
            decide_failure(Some(first), now, DEFAULT_RETRY_WINDOW),
            FailureDecision::Remove
        );
    }

    #[test]
    fn test_clock_skew_counts_as_inside_window() {
        let now = Utc::now();
        let future = now + chrono::Duration::seconds(30);
        assert_eq!(
            decide_failure(Some(future), now, DEFAULT_RETRY_WINDOW),
            FailureDecision::RetryInWindow
        );
    }

    #[test]
    fn test_removal_response_gap_detection() {
        assert_eq!(removal_response([7], 5), RollbackResponse::RemovedGapDetected);
        assert_eq!(removal_response([5], 7), RollbackResponse::RemovedOkay);
        assert_eq!(removal_response(Vec::new(), 7), RollbackResponse::RemovedOkay);
    }

    #[test]
    fn test_next_candidate_exhaustion() {
        assert_eq!(next_candidate(4).unwrap(), 5);
        assert!(matches!(
            next_candidate(u32::MAX),
            Err(NonceStoreError::Exhausted(u32::MAX))
        ));
    }
}
