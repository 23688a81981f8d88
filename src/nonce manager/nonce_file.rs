//! Directory-backed nonce store
//!
//! Persisted state is nothing but marker files inside one directory:
//! - `{n}.nonce`: empty, present while `n` is reserved
//! - `{n}.failed`: RFC 3339 UTC timestamp starting the current failure streak
//!
//! Reservation uses atomic create-if-absent, so two writers can never claim
//! the same number. Directory scans and failure bookkeeping additionally run
//! under an in-process lock, and the whole directory is held with an
//! exclusive advisory lock for the lifetime of the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::nonce_errors::{NonceResult, NonceStoreError};
use super::nonce_store::{
    decide_failure, next_candidate, removal_response, seed_from, FailureDecision, NonceSource,
    NonceStore, RollbackResponse, DEFAULT_RETRY_WINDOW,
};
use crate::types::Nonce;

const RESERVED_SUFFIX: &str = "nonce";
const FAILED_SUFFIX: &str = "failed";
const LOCK_FILE: &str = ".lock";

/// File-backed nonce store for crash-recoverable local runs.
///
/// Filesystem work runs on the blocking pool, never on a runtime worker.
#[derive(Debug)]
pub struct FileNonceStore {
    markers: Arc<MarkerDir>,
    // Owned here rather than in `markers`: the lock ends with the store.
    _lock_file: File,
    source: Option<Arc<dyn NonceSource>>,
    retry_window: Duration,
}

/// The locked directory and every synchronous operation on it
#[derive(Debug)]
struct MarkerDir {
    dir: PathBuf,
    scan_lock: Mutex<()>,
}

impl FileNonceStore {
    /// Open (creating if needed) `dir` and take its exclusive lock.
    ///
    /// Fails with [`NonceStoreError::DirectoryLocked`] if another store,
    /// in this process or another, already holds the directory.
    pub fn open(dir: impl Into<PathBuf>) -> NonceResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| NonceStoreError::io(&dir, e))?;

        let lock_path = dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| NonceStoreError::io(&lock_path, e))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| NonceStoreError::DirectoryLocked(dir.clone()))?;

        info!(dir = %dir.display(), "Opened file-backed nonce store");

        Ok(Self {
            markers: Arc::new(MarkerDir {
                dir,
                scan_lock: Mutex::new(()),
            }),
            _lock_file: lock_file,
            source: None,
            retry_window: DEFAULT_RETRY_WINDOW,
        })
    }

    pub fn with_source(mut self, source: Arc<dyn NonceSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.markers.dir
    }

    /// Run `op` against the directory on the blocking pool
    async fn blocking<R, F>(&self, op: F) -> NonceResult<R>
    where
        F: FnOnce(&MarkerDir) -> NonceResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let markers = self.markers.clone();
        tokio::task::spawn_blocking(move || op(&markers))
            .await
            .map_err(|e| NonceStoreError::io(&self.markers.dir, io::Error::other(e)))?
    }
}

impl MarkerDir {
    fn reserved_path(&self, nonce: Nonce) -> PathBuf {
        self.dir.join(format!("{nonce}.{RESERVED_SUFFIX}"))
    }

    fn failed_path(&self, nonce: Nonce) -> PathBuf {
        self.dir.join(format!("{nonce}.{FAILED_SUFFIX}"))
    }

    /// Atomically create the reservation marker; `Ok(false)` if taken
    fn try_claim(&self, nonce: Nonce) -> NonceResult<bool> {
        let path = self.reserved_path(nonce);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(NonceStoreError::io(path, e)),
        }
    }

    /// Claim the lowest free nonce at or above `seed`
    fn claim_from(&self, seed: Nonce) -> NonceResult<Nonce> {
        let _guard = self.scan_lock.lock();
        let mut candidate = seed;
        while !self.try_claim(candidate)? {
            candidate = next_candidate(candidate)?;
        }
        debug!(nonce = candidate, seed, dir = %self.dir.display(), "Allocated nonce");
        Ok(candidate)
    }

    /// Undo a claim whose caller went away before receiving it
    fn release_unclaimed(&self, nonce: Nonce) {
        let _guard = self.scan_lock.lock();
        match self.remove(nonce) {
            Ok(()) => debug!(nonce, "Released nonce abandoned during allocation"),
            Err(e) => error!(nonce, error = %e, "Failed to release abandoned nonce"),
        }
    }

    fn is_reserved(&self, nonce: Nonce) -> bool {
        self.reserved_path(nonce).exists()
    }

    fn read_failure(&self, nonce: Nonce) -> NonceResult<Option<DateTime<Utc>>> {
        let path = self.failed_path(nonce);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(NonceStoreError::io(path, e)),
        };
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| NonceStoreError::CorruptMarker {
                path,
                reason: e.to_string(),
            })
    }

    fn write_failure(&self, nonce: Nonce, at: DateTime<Utc>) -> NonceResult<()> {
        let path = self.failed_path(nonce);
        let mut file = File::create(&path).map_err(|e| NonceStoreError::io(&path, e))?;
        file.write_all(at.to_rfc3339().as_bytes())
            .map_err(|e| NonceStoreError::io(&path, e))
    }

    fn clear_failure(&self, nonce: Nonce) -> NonceResult<()> {
        remove_if_present(&self.failed_path(nonce))
    }

    fn remove(&self, nonce: Nonce) -> NonceResult<()> {
        self.clear_failure(nonce)?;
        remove_if_present(&self.reserved_path(nonce))
    }

    fn scan(&self) -> NonceResult<Vec<Nonce>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| NonceStoreError::io(&self.dir, e))?;
        let mut nonces = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| NonceStoreError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RESERVED_SUFFIX) {
                continue;
            }
            match path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<Nonce>().ok())
            {
                Some(nonce) => nonces.push(nonce),
                None => warn!(path = %path.display(), "Ignoring unrecognized marker file"),
            }
        }
        nonces.sort_unstable();
        Ok(nonces)
    }

    fn reserved(&self) -> NonceResult<Vec<Nonce>> {
        let _guard = self.scan_lock.lock();
        self.scan()
    }

    fn submit_failed(&self, nonce: Nonce, window: Duration) -> NonceResult<RollbackResponse> {
        let _guard = self.scan_lock.lock();
        if !self.is_reserved(nonce) {
            warn!(nonce, "Submit-failed notification for unreserved nonce");
            return Ok(RollbackResponse::NonceNotFound);
        }

        let now = Utc::now();
        let first_failure = self.read_failure(nonce)?;
        match decide_failure(first_failure, now, window) {
            FailureDecision::RecordFirst => {
                self.write_failure(nonce, now)?;
                debug!(nonce, "Recorded first submit failure");
                Ok(RollbackResponse::NotRemovedShouldRetry)
            }
            FailureDecision::RetryInWindow => {
                debug!(nonce, "Submit failed again inside grace window");
                Ok(RollbackResponse::NotRemovedShouldRetry)
            }
            FailureDecision::Remove => {
                self.remove(nonce)?;
                let response = removal_response(self.scan()?, nonce);
                info!(nonce, response = %response, "Released nonce after persistent failure");
                Ok(response)
            }
        }
    }

    fn submit_succeeded(&self, nonce: Nonce) {
        let _guard = self.scan_lock.lock();
        match self.try_claim(nonce) {
            Ok(true) => warn!(nonce, "Success reported for unreserved nonce, reserving it"),
            Ok(false) => {}
            Err(e) => error!(nonce, error = %e, "Failed to persist reservation"),
        }
        if let Err(e) = self.clear_failure(nonce) {
            warn!(nonce, error = %e, "Failed to clear failure marker");
        }
    }

    fn consume(&self, nonce: Nonce, reason: &'static str) {
        let _guard = self.scan_lock.lock();
        if !self.is_reserved(nonce) {
            warn!(nonce, reason, "Gas-spent notification for unreserved nonce");
        }
        if let Err(e) = self.clear_failure(nonce) {
            // The nonce is spent either way; a stale failure marker is harmless.
            warn!(nonce, error = %e, "Failed to clear failure marker");
        }
    }
}

fn remove_if_present(path: &Path) -> NonceResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(NonceStoreError::io(path, e)),
    }
}

/// Receiving end of a claim running on the blocking pool.
///
/// Dropping it before the nonce is handed over releases the claim, so an
/// abandoned allocation never leaves a reservation nobody owns.
struct PendingClaim {
    rx: oneshot::Receiver<NonceResult<Nonce>>,
    markers: Arc<MarkerDir>,
}

impl Drop for PendingClaim {
    fn drop(&mut self) {
        // After `close` the claim task either fails to send (and releases
        // itself) or has already sent, in which case the value is here.
        self.rx.close();
        if let Ok(Ok(nonce)) = self.rx.try_recv() {
            self.markers.release_unclaimed(nonce);
        }
    }
}

impl FileNonceStore {
    async fn settle(&self, nonce: Nonce, reason: &'static str) -> RollbackResponse {
        let consumed = self
            .blocking(move |markers| {
                markers.consume(nonce, reason);
                Ok(())
            })
            .await;
        if let Err(e) = consumed {
            warn!(nonce, reason, error = %e, "Gas-spent bookkeeping did not run");
        }
        RollbackResponse::NotRemovedGasSpent
    }
}

#[async_trait]
impl NonceStore for FileNonceStore {
    async fn allocate(&self) -> NonceResult<Nonce> {
        let seed = seed_from(self.source.as_deref()).await?;

        let (tx, rx) = oneshot::channel();
        let mut pending = PendingClaim {
            rx,
            markers: self.markers.clone(),
        };
        let markers = self.markers.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(Ok(nonce)) = tx.send(markers.claim_from(seed)) {
                markers.release_unclaimed(nonce);
            }
        });

        match (&mut pending.rx).await {
            Ok(claimed) => claimed,
            Err(_) => Err(NonceStoreError::io(
                &self.markers.dir,
                io::Error::other("allocation task ended without a result"),
            )),
        }
    }

    async fn notify_out_of_gas(&self, nonce: Nonce) -> RollbackResponse {
        self.settle(nonce, "out_of_gas").await
    }

    async fn notify_reverted(&self, nonce: Nonce) -> RollbackResponse {
        self.settle(nonce, "reverted").await
    }

    async fn notify_submit_failed(&self, nonce: Nonce) -> RollbackResponse {
        let window = self.retry_window;
        match self
            .blocking(move |markers| markers.submit_failed(nonce, window))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(nonce, error = %e, "Nonce store failed while handling submit failure");
                RollbackResponse::NotRemovedInternalError
            }
        }
    }

    async fn notify_submit_succeeded(&self, nonce: Nonce) {
        let recorded = self
            .blocking(move |markers| {
                markers.submit_succeeded(nonce);
                Ok(())
            })
            .await;
        if let Err(e) = recorded {
            error!(nonce, error = %e, "Failed to record submit success");
        }
    }

    async fn reserved(&self) -> NonceResult<Vec<Nonce>> {
        self.blocking(MarkerDir::reserved).await
    }
}
