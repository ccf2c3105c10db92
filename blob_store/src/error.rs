//! Error types for blob backend operations.

use std::fmt;

/// Result type for blob backend operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during blob backend operations.
#[derive(Debug)]
pub enum BlobError {
    /// No object stored under the key.
    NotFound { key: String },

    /// A conditional write observed a different object version.
    PreconditionFailed { key: String },

    /// The backend could not be built from its configuration.
    InvalidConfig { reason: String },

    /// Network or service error (S3 or object_store).
    NetworkError { source: anyhow::Error },

    /// The backend call did not finish in time.
    Timeout { op: &'static str },

    /// Presigned URL generation error.
    PresignError { reason: String },

    /// Generic error.
    Other { source: anyhow::Error },
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, BlobError::PreconditionFailed { .. })
    }
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::NotFound { key } => write!(f, "Object not found: {}", key),
            BlobError::PreconditionFailed { key } => {
                write!(f, "Object {} was modified concurrently", key)
            }
            BlobError::InvalidConfig { reason } => {
                write!(f, "Invalid blob storage configuration: {}", reason)
            }
            BlobError::NetworkError { source } => write!(f, "Network error: {}", source),
            BlobError::Timeout { op } => write!(f, "Blob storage {} timed out", op),
            BlobError::PresignError { reason } => {
                write!(f, "Presigned URL generation error: {}", reason)
            }
            BlobError::Other { source } => write!(f, "Blob store error: {}", source),
        }
    }
}

impl std::error::Error for BlobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlobError::NetworkError { source } => Some(source.as_ref()),
            BlobError::Other { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for BlobError {
    fn from(err: anyhow::Error) -> Self {
        BlobError::Other { source: err }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound { key: path },
            object_store::Error::Precondition { path, .. } => {
                BlobError::PreconditionFailed { key: path }
            }
            _ => BlobError::NetworkError {
                source: anyhow::Error::from(err),
            },
        }
    }
}
