use resilink_common::error::{CommonError, ErrorSeverity};
use resilink_common::{impl_error_classification, impl_error_conversion};
use thiserror::Error;

/// Offline queue persistence faults
///
/// Logged by [`OfflineQueue`](super::OfflineQueue), which keeps working from
/// memory; never surfaced through the pipeline.
#[derive(Debug, Error)]
pub enum QueueError {
    // Serialization and storage faults handled by CommonError
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("Persisted queue snapshot is unreadable: {0}")]
    CorruptSnapshot(String),

    #[error("Invalid queued request {id}: {message}")]
    InvalidRecord { id: String, message: String },
}

// Auto-convert std types via CommonError
impl_error_conversion!(QueueError, Common);

impl_error_classification!(QueueError, Common,
    Self::CorruptSnapshot(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::InvalidRecord { .. } => {
        retryable: false,
        severity: ErrorSeverity::Warning,
        critical: false,
    }
);

impl From<QueueError> for CommonError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Common(e) => e,
            QueueError::CorruptSnapshot(msg) => {
                Self::serialization_format("JSON", format!("offline queue snapshot: {msg}"))
            }
            QueueError::InvalidRecord { id, message } => {
                Self::validation_with_value("queued_request", message, id)
            }
        }
    }
}

/// Queue operation result type
pub type QueueResult<T> = Result<T, QueueError>;
