//! Directory-backed store under concurrency and behind the orchestrator

#[cfg(test)]
mod file_store_tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    use crate::nonce_manager::{FileNonceStore, NonceStore, NonceStoreError};
    use crate::submitter::{OnceOperation, OnceSettings, SubmissionError};
    use crate::types::{FailureKind, Nonce};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Failed(FailureKind);

    /// Test: concurrent allocations from many tasks never collide
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_allocations_are_unique() {
        const TASKS: usize = 64;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileNonceStore::open(dir.path()).unwrap());

        let mut handles = Vec::with_capacity(TASKS);
        for _ in 0..TASKS {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.allocate().await.unwrap() }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()), "duplicate nonce");
        }
        let expected: HashSet<Nonce> = (0..TASKS as Nonce).collect();
        assert_eq!(seen, expected);
    }

    /// Test: allocations dropped mid-flight leave no orphaned reservation
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_allocations_are_released() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileNonceStore::open(dir.path()).unwrap();

        let mut received = Vec::new();
        for _ in 0..200 {
            tokio::select! {
                nonce = store.allocate() => received.push(nonce.unwrap()),
                _ = tokio::task::yield_now() => {}
            }
        }
        // Let claims still running on the blocking pool settle.
        tokio::time::sleep(Duration::from_millis(200)).await;

        received.sort_unstable();
        assert_eq!(store.reserved().await.unwrap(), received);
    }

    #[tokio::test]
    async fn test_second_open_is_refused_until_drop() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileNonceStore::open(dir.path()).unwrap();

        let err = FileNonceStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, NonceStoreError::DirectoryLocked(_)));

        drop(first);
        assert!(FileNonceStore::open(dir.path()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_orchestrator_advances_over_persisted_markers() {
        let dir = tempfile::tempdir().unwrap();
        {
            // A previous run reserved 0 and 1
            let store = FileNonceStore::open(dir.path()).unwrap();
            store.allocate().await.unwrap();
            store.allocate().await.unwrap();
        }

        let store = Arc::new(FileNonceStore::open(dir.path()).unwrap());
        let once = OnceOperation::new(store.clone(), OnceSettings::default());
        let mut attempts = Vec::new();

        let nonce = once
            .run_operation(
                "resume",
                Duration::from_secs(60),
                |nonce| {
                    attempts.push(nonce);
                    let outcome = if nonce < 4 {
                        Err(Failed(FailureKind::NonceTooLow))
                    } else {
                        Ok(nonce)
                    };
                    std::future::ready(outcome)
                },
                |e: &Failed| e.0,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(nonce, 4);
        assert_eq!(attempts, vec![2, 3, 4]);
        assert_eq!(store.reserved().await.unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(dir.path().join("4.nonce").exists());
        assert!(!dir.path().join("4.failed").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_orchestrator_releases_after_window_with_gap() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            FileNonceStore::open(dir.path())
                .unwrap()
                .with_retry_window(Duration::ZERO),
        );
        // Someone else holds a higher nonce
        store.allocate().await.unwrap();
        store.allocate().await.unwrap();
        store.notify_submit_failed(0).await;
        store.notify_submit_failed(0).await;

        let once = OnceOperation::new(store.clone(), OnceSettings::default());
        let err = once
            .run_operation(
                "doomed",
                Duration::from_secs(60),
                |_| std::future::ready(Err::<(), _>(Failed(FailureKind::Other))),
                |e: &Failed| e.0,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        // Nonce 0 was released above, so the operation reuses it; the
        // first failure records, the second releases with 1 still held.
        match err {
            SubmissionError::Rejected {
                nonce,
                gap_created,
                ..
            } => {
                assert_eq!(nonce, 0);
                assert!(gap_created);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(store.reserved().await.unwrap(), vec![1]);
        assert!(!dir.path().join("0.nonce").exists());
        assert!(!dir.path().join("0.failed").exists());
    }
}
