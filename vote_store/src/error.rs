use std::fmt;

use blob_store::BlobError;

pub type Result<T> = std::result::Result<T, VoteStoreError>;

#[derive(Debug)]
pub enum VoteStoreError {
    /// The object store failed or did not answer in time.
    BackendUnavailable { source: BlobError },

    /// No image is stored under the key.
    RecordNotFound { key: String },

    /// A caller supplied value was rejected before reaching the backend.
    InvalidInput { reason: String },

    /// Conditional writes kept losing to concurrent writers.
    WriteConflict { key: String, attempts: u32 },
}

impl VoteStoreError {
    pub fn invalid_input(err: impl fmt::Display) -> Self {
        VoteStoreError::InvalidInput {
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for VoteStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteStoreError::BackendUnavailable { source } => {
                write!(f, "Storage backend unavailable: {}", source)
            }
            VoteStoreError::RecordNotFound { key } => write!(f, "Image not found: {}", key),
            VoteStoreError::InvalidInput { reason } => write!(f, "Invalid input: {}", reason),
            VoteStoreError::WriteConflict { key, attempts } => write!(
                f,
                "Image {} was modified concurrently, gave up after {} attempts",
                key, attempts
            ),
        }
    }
}

impl std::error::Error for VoteStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VoteStoreError::BackendUnavailable { source } => Some(source),
            _ => None,
        }
    }
}

impl From<BlobError> for VoteStoreError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound { key } => VoteStoreError::RecordNotFound { key },
            other => VoteStoreError::BackendUnavailable { source: other },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_errors_convert() {
        let err = VoteStoreError::from(BlobError::NotFound {
            key: "CA-1.png".to_string(),
        });
        assert!(matches!(err, VoteStoreError::RecordNotFound { ref key } if key == "CA-1.png"));

        let err = VoteStoreError::from(BlobError::Timeout { op: "get" });
        assert!(matches!(err, VoteStoreError::BackendUnavailable { .. }));
        assert_eq!(
            err.to_string(),
            "Storage backend unavailable: Blob storage get timed out"
        );
    }
}
