use std::path::PathBuf;
use thiserror::Error;

use crate::types::Nonce;

/// Nonce store specific errors
#[derive(Debug, Error)]
pub enum NonceStoreError {
    /// The confirmed-count source (usually a live node query) failed
    #[error("Nonce source error: {message}")]
    Source { message: String },

    /// No free nonce remains at or above the candidate
    #[error("Nonce space exhausted at or above {0}")]
    Exhausted(Nonce),

    /// Filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another process holds the directory lock
    #[error("Nonce directory {0} is locked by another process")]
    DirectoryLocked(PathBuf),

    /// A failure marker holds something other than an RFC 3339 timestamp
    #[error("Corrupt failure marker {path}: {reason}")]
    CorruptMarker { path: PathBuf, reason: String },
}

impl NonceStoreError {
    /// Check if this error is transient and retryable
    pub fn is_transient(&self) -> bool {
        match self {
            NonceStoreError::Source { .. } => true,
            NonceStoreError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),

            NonceStoreError::Exhausted(_) => false,
            NonceStoreError::DirectoryLocked(_) => false,
            NonceStoreError::CorruptMarker { .. } => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NonceStoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for nonce store operations
pub type NonceResult<T> = Result<T, NonceStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_store_error_display() {
        let err = NonceStoreError::Exhausted(u32::MAX);
        assert_eq!(err.to_string(), "Nonce space exhausted at or above 4294967295");

        let err = NonceStoreError::DirectoryLocked(PathBuf::from("/tmp/nonces"));
        assert_eq!(
            err.to_string(),
            "Nonce directory /tmp/nonces is locked by another process"
        );
    }

    #[test]
    fn test_nonce_store_error_transient_classification() {
        assert!(NonceStoreError::Source {
            message: "connection refused".to_string()
        }
        .is_transient());
        assert!(NonceStoreError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr")
        )
        .is_transient());

        assert!(!NonceStoreError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")
        )
        .is_transient());
        assert!(!NonceStoreError::Exhausted(7).is_transient());
        assert!(!NonceStoreError::CorruptMarker {
            path: PathBuf::from("/tmp/0.failed"),
            reason: "not a timestamp".to_string()
        }
        .is_transient());
    }
}
