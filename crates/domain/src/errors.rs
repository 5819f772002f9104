//! Error types surfaced to callers of the request pipeline

use std::time::Duration;

use resilink_common::error::{CommonError, ErrorClassification, ErrorSeverity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::http::ApiResponse;

/// Transport phase that ran out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutPhase {
    Connect,
    Send,
    Receive,
}

crate::impl_domain_enum_conversions!(TimeoutPhase {
    Connect => "connect",
    Send => "send",
    Receive => "receive",
});

/// Transport failure kinds the retry policy can be configured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    ConnectTimeout,
    SendTimeout,
    ReceiveTimeout,
    /// Refused, reset, unreachable host, DNS failure
    Connection,
    /// Certificate or handshake failure
    Tls,
    Other,
}

crate::impl_domain_enum_conversions!(TransportErrorKind {
    ConnectTimeout => "connect_timeout",
    SendTimeout => "send_timeout",
    ReceiveTimeout => "receive_timeout",
    Connection => "connection",
    Tls => "tls",
    Other => "other",
});

impl From<TimeoutPhase> for TransportErrorKind {
    fn from(phase: TimeoutPhase) -> Self {
        match phase {
            TimeoutPhase::Connect => Self::ConnectTimeout,
            TimeoutPhase::Send => Self::SendTimeout,
            TimeoutPhase::Receive => Self::ReceiveTimeout,
        }
    }
}

/// Error returned by the request pipeline
///
/// HTTP error variants carry the final response exactly as received.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{phase} timeout: {message}")]
    Timeout { phase: TimeoutPhase, message: String },

    #[error("connectivity failure ({kind}): {message}")]
    Connectivity { kind: TransportErrorKind, message: String },

    #[error("server error: HTTP {status}")]
    Server { status: u16, response: Box<ApiResponse> },

    #[error("client error: HTTP {status}")]
    Client { status: u16, response: Box<ApiResponse> },

    #[error("request cancelled")]
    Cancelled,

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for pipeline operations
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// Map a final HTTP response with status >= 400 to its error variant
    ///
    /// Responses below 400 are returned unchanged in `Ok`.
    pub fn from_response(response: ApiResponse) -> Result<ApiResponse, Self> {
        let status = response.status;
        match status {
            500.. => Err(Self::Server { status, response: Box::new(response) }),
            400..=499 => Err(Self::Client { status, response: Box::new(response) }),
            _ => Ok(response),
        }
    }

    /// Transport kind for timeouts and connectivity failures
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Timeout { phase, .. } => Some((*phase).into()),
            Self::Connectivity { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// HTTP status for server and client errors
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            Self::Server { response, .. } | Self::Client { response, .. } => {
                Some(response.as_ref())
            }
            _ => None,
        }
    }

    /// Timeout or connectivity failure, the errors that qualify for the
    /// offline queue
    pub const fn is_network_failure(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connectivity { .. })
    }

    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Client { status: 429, .. })
    }

    /// Short label for metrics histograms
    pub fn kind_label(&self) -> String {
        match self {
            Self::Timeout { phase, .. } => TransportErrorKind::from(*phase).to_string(),
            Self::Connectivity { kind, .. } => kind.to_string(),
            Self::Server { status, .. } => format!("server_{status}"),
            Self::Client { status: 429, .. } => "rate_limited".to_string(),
            Self::Client { status, .. } => format!("client_{status}"),
            Self::Cancelled => "cancelled".to_string(),
            Self::Auth(_) => "auth".to_string(),
            Self::InvalidRequest(_) => "invalid_request".to_string(),
            Self::Decode(_) => "decode".to_string(),
            Self::Config(_) => "config".to_string(),
            Self::Internal(_) => "internal".to_string(),
        }
    }
}

impl ErrorClassification for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Connectivity { kind, .. } => matches!(kind, TransportErrorKind::Connection),
            Self::Server { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            Self::Client { status, .. } => matches!(status, 408 | 429),
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Timeout { .. } | Self::Connectivity { .. } => ErrorSeverity::Warning,
            Self::Client { .. } | Self::Cancelled => ErrorSeverity::Info,
            Self::Server { .. } | Self::Auth(_) | Self::InvalidRequest(_) | Self::Decode(_) => {
                ErrorSeverity::Error
            }
            Self::Config(_) | Self::Internal(_) => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Delta-seconds form of `Retry-After` on the carried response
    fn retry_after(&self) -> Option<Duration> {
        self.response()?
            .headers
            .get("retry-after")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

impl From<CommonError> for ApiError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Config { .. } | CommonError::Validation { .. } => {
                Self::Config(err.to_string())
            }
            CommonError::Serialization { .. } => Self::Decode(err.to_string()),
            CommonError::Persistence { .. } => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::http::Headers;

    fn response(status: u16) -> ApiResponse {
        ApiResponse::new(status, Headers::new(), Vec::new())
    }

    #[test]
    fn test_from_response_partitions_by_status() {
        assert!(ApiError::from_response(response(204)).is_ok());
        assert!(ApiError::from_response(response(304)).is_ok());
        assert!(matches!(
            ApiError::from_response(response(404)),
            Err(ApiError::Client { status: 404, .. })
        ));
        assert!(matches!(
            ApiError::from_response(response(503)),
            Err(ApiError::Server { status: 503, .. })
        ));
    }

    #[test]
    fn test_classification() {
        let timeout = ApiError::Timeout { phase: TimeoutPhase::Receive, message: "slow".into() };
        assert!(timeout.is_retryable());
        assert!(timeout.is_network_failure());
        assert_eq!(timeout.transport_kind(), Some(TransportErrorKind::ReceiveTimeout));

        let tls = ApiError::Connectivity { kind: TransportErrorKind::Tls, message: "cert".into() };
        assert!(!tls.is_retryable());
        assert!(tls.is_network_failure());

        let rate_limited = ApiError::from_response(response(429)).unwrap_err();
        assert!(rate_limited.is_rate_limited());
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.kind_label(), "rate_limited");

        let not_found = ApiError::from_response(response(404)).unwrap_err();
        assert!(!not_found.is_retryable());
        assert_eq!(not_found.severity(), ErrorSeverity::Info);
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = Headers::new();
        headers.insert("Retry-After", "7");
        let err = ApiError::from_response(ApiResponse::new(503, headers, Vec::new())).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(ApiError::Cancelled.retry_after(), None);
    }

    #[test]
    fn test_transport_kind_wire_names() {
        assert_eq!(TransportErrorKind::ConnectTimeout.to_string(), "connect_timeout");
        assert_eq!(
            serde_json::to_string(&TransportErrorKind::ReceiveTimeout).unwrap(),
            "\"receive_timeout\""
        );
        assert_eq!("TLS".parse::<TransportErrorKind>().unwrap(), TransportErrorKind::Tls);
    }
}
