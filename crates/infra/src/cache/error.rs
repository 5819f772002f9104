use resilink_common::error::{CommonError, ErrorSeverity};
use resilink_common::{impl_error_classification, impl_error_conversion};
use thiserror::Error;

/// Cache operation faults
///
/// These never reach a caller of the pipeline: [`ResponseCache`] logs them
/// and carries on as if the entry were absent.
///
/// [`ResponseCache`]: super::ResponseCache
#[derive(Debug, Error)]
pub enum CacheError {
    // Serialization and storage faults handled by CommonError
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("Corrupt cache record '{key}': {message}")]
    Corrupt { key: String, message: String },
}

// Auto-convert std types via CommonError
impl_error_conversion!(CacheError, Common);

impl_error_classification!(CacheError, Common,
    Self::Corrupt { .. } => {
        retryable: false,
        severity: ErrorSeverity::Warning,
        critical: false,
    }
);

pub type CacheResult<T> = Result<T, CacheError>;
