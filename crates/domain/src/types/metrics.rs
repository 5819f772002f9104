//! Per-request metric records and aggregated performance statistics

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use resilink_common::duration_millis;
use serde::{Deserialize, Serialize};

use super::http::HttpMethod;

/// Best-effort phase breakdown; unset when the transport cannot report it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_millis")]
    pub dns: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_millis")]
    pub connect: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_millis")]
    pub tls: Option<Duration>,
    /// Time from request sent to response headers
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_millis")]
    pub server: Option<Duration>,
}

/// Metric record for one request lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub id: String,
    pub method: HttpMethod,
    pub url: String,
    /// `METHOD /path`, query stripped
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_millis")]
    pub duration: Option<Duration>,
    pub status: Option<u16>,
    pub bytes: u64,
    #[serde(default)]
    pub phases: PhaseTimings,
    pub from_cache: bool,
    pub retry_count: u32,
    pub error_kind: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RequestMetrics {
    /// Completed with a 2xx or 3xx status
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(200..=399))
    }

    /// Completed with status >= 400 or a transport error
    pub fn is_error(&self) -> bool {
        matches!(self.status, Some(400..)) || self.error_kind.is_some()
    }

    pub const fn is_complete(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Mean latency for one endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub count: usize,
    #[serde(with = "duration_millis")]
    pub avg_latency: Duration,
}

/// Statistics aggregated on demand over the rolling window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_requests: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    #[serde(with = "duration_millis")]
    pub avg_latency: Duration,
    #[serde(with = "duration_millis")]
    pub median_latency: Duration,
    #[serde(with = "duration_millis")]
    pub p95_latency: Duration,
    #[serde(with = "duration_millis")]
    pub p99_latency: Duration,
    #[serde(with = "duration_millis")]
    pub min_latency: Duration,
    #[serde(with = "duration_millis")]
    pub max_latency: Duration,
    pub avg_retries: f64,
    pub total_bytes: u64,
    pub status_codes: BTreeMap<u16, usize>,
    pub error_kinds: BTreeMap<String, usize>,
    pub endpoints: BTreeMap<String, EndpointStats>,
}

mod option_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => resilink_common::duration_millis::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
