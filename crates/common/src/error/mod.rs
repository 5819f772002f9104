//! Shared error foundation
//!
//! [`CommonError`] covers the faults every layer can hit while loading
//! configuration or touching persisted state. Layer errors embed it as a
//! transparent variant and add their own cases:
//!
//! ```rust,ignore
//! #[derive(Debug, Error)]
//! pub enum CacheError {
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//!
//!     #[error("Corrupt cache record '{key}': {message}")]
//!     Corrupt { key: String, message: String },
//! }
//!
//! impl_error_conversion!(CacheError, Common);
//! impl_error_classification!(CacheError, Common,
//!     Self::Corrupt { .. } => {
//!         retryable: false,
//!         severity: ErrorSeverity::Warning,
//!         critical: false,
//!     }
//! );
//! ```
//!
//! [`ErrorClassification`] is the uniform view used to pick retry behaviour
//! and log levels.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type CommonResult<T> = Result<T, CommonError>;

#[derive(Debug, Clone, Error)]
pub enum CommonError {
    /// Missing, malformed or out-of-range configuration
    #[error("Configuration error{}: {message}", field_suffix(.field.as_deref()))]
    Config { message: String, field: Option<String> },

    /// A JSON or TOML document could not be encoded or decoded
    #[error("Serialization error{}: {message}", format_suffix(.format.as_deref()))]
    Serialization { message: String, format: Option<String> },

    /// A key-value store or file operation failed
    #[error("Persistence error{}: {message}", operation_suffix(.operation.as_deref()))]
    Persistence { message: String, operation: Option<String> },

    /// A persisted or supplied value failed a structural check
    #[error("Invalid {field} '{value}': {message}")]
    Validation { field: String, message: String, value: String },
}

fn field_suffix(field: Option<&str>) -> String {
    field.map(|f| format!(" in field '{f}'")).unwrap_or_default()
}

fn format_suffix(format: Option<&str>) -> String {
    format.map(|f| format!(" ({f})")).unwrap_or_default()
}

fn operation_suffix(operation: Option<&str>) -> String {
    operation.map(|op| format!(" during '{op}'")).unwrap_or_default()
}

impl CommonError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Configuration error naming the offending key or variable
    pub fn config_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    pub fn serialization_format(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into(), operation: None }
    }

    /// Persistence error naming the failed operation (`read`, `write`, ...)
    pub fn persistence_op(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into(), operation: Some(operation.into()) }
    }

    pub fn validation_with_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation { field: field.into(), message: message.into(), value: value.into() }
    }
}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Serialization { .. } => ErrorSeverity::Warning,
            Self::Config { .. } | Self::Persistence { .. } | Self::Validation { .. } => {
                ErrorSeverity::Error
            }
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Uniform classification implemented by every error type in the workspace
pub trait ErrorClassification {
    /// Transient faults that may succeed on another attempt
    fn is_retryable(&self) -> bool;

    fn severity(&self) -> ErrorSeverity;

    /// The service cannot continue without intervention
    fn is_critical(&self) -> bool;

    /// Server-suggested wait before the next attempt, e.g. from `Retry-After`
    fn retry_after(&self) -> Option<Duration>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        })
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization_format("TOML", err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

/// Route `serde_json` and `std::io` errors into a layer error through its
/// `CommonError` variant
///
/// ```rust,ignore
/// impl_error_conversion!(QueueError, Common);
/// ```
#[macro_export]
macro_rules! impl_error_conversion {
    ($error_type:ty, $variant:ident) => {
        impl From<serde_json::Error> for $error_type {
            fn from(err: serde_json::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }

        impl From<std::io::Error> for $error_type {
            fn from(err: std::io::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }
    };
}

/// Implement [`ErrorClassification`] for a layer error, delegating its
/// `CommonError` variant and spelling out the rest
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty,
        $common_variant:ident
        $(,
            $variant:pat => {
                retryable: $retryable:expr,
                severity: $severity:expr,
                critical: $critical:expr
                $(, retry_after: $retry_after:expr)?
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            fn is_retryable(&self) -> bool {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::is_retryable(e),
                    $($variant => $retryable,)*
                }
            }

            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::severity(e),
                    $($variant => $severity,)*
                }
            }

            fn is_critical(&self) -> bool {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::is_critical(e),
                    $($variant => $critical,)*
                }
            }

            fn retry_after(&self) -> Option<std::time::Duration> {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::retry_after(e),
                    $($($variant => $retry_after,)?)*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(
            CommonError::config_field("retry.max_attempts", "must be at least 1").to_string(),
            "Configuration error in field 'retry.max_attempts': must be at least 1"
        );
        assert_eq!(CommonError::config("no file").to_string(), "Configuration error: no file");
        assert_eq!(
            CommonError::persistence_op("write", "disk full").to_string(),
            "Persistence error during 'write': disk full"
        );
        assert_eq!(
            CommonError::validation_with_value("queued_request", "bad method", "abc").to_string(),
            "Invalid queued_request 'abc': bad method"
        );
    }

    #[test]
    fn test_classification() {
        assert!(CommonError::persistence("locked").is_retryable());
        assert!(!CommonError::config("bad").is_retryable());
        assert!(CommonError::config("bad").is_critical());
        assert_eq!(
            CommonError::serialization_format("JSON", "eof").severity(),
            ErrorSeverity::Warning
        );
        assert!(ErrorSeverity::Critical > ErrorSeverity::Warning);
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
    }

    #[test]
    fn test_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CommonError = json_err.into();
        assert!(matches!(
            err,
            CommonError::Serialization { format: Some(ref f), .. } if f == "JSON"
        ));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CommonError = io_err.into();
        assert!(matches!(err, CommonError::Persistence { operation: None, .. }));
    }
}
