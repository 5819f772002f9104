//! Configuration structures
//!
//! Every section carries `#[serde(default)]`, so a config file only needs the
//! settings it changes. Durations are written in milliseconds.

use std::time::Duration;

use resilink_common::duration_millis;
use resilink_common::error::{CommonError, CommonResult};
use serde::{Deserialize, Serialize};

use crate::errors::TransportErrorKind;
use crate::types::http::HttpMethod;
use crate::types::pool::ConnectionPoolConfig;

/// Complete configuration for a request pipeline and its services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilinkConfig {
    /// Prepended to request paths that are not absolute
    pub base_url: String,
    pub pool: ConnectionPoolConfig,
    pub cache: CacheSettings,
    pub retry: RetryConfig,
    pub offline: OfflineSettings,
    pub monitor: MonitorSettings,
    pub features: FeatureToggles,
}

impl ResilinkConfig {
    /// Check cross-field constraints across all sections
    pub fn validate(&self) -> CommonResult<()> {
        if self.pool.max_connections == 0 {
            return Err(CommonError::config_field("pool.max_connections", "must be at least 1"));
        }
        if self.pool.max_connections_per_host == 0 {
            return Err(CommonError::config_field(
                "pool.max_connections_per_host",
                "must be at least 1",
            ));
        }
        if self.pool.max_connections_per_host > self.pool.max_connections {
            return Err(CommonError::config_field(
                "pool.max_connections_per_host",
                "cannot exceed pool.max_connections",
            ));
        }
        if self.cache.max_memory_entries == 0 {
            return Err(CommonError::config_field("cache.max_memory_entries", "must be at least 1"));
        }
        if self.offline.max_queue_size == 0 {
            return Err(CommonError::config_field("offline.max_queue_size", "must be at least 1"));
        }
        if self.monitor.max_records == 0 {
            return Err(CommonError::config_field("monitor.max_records", "must be at least 1"));
        }
        self.retry.validate()
    }
}

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Staleness window for responses without explicit expiry
    #[serde(with = "duration_millis")]
    pub default_ttl: Duration,
    pub max_memory_entries: usize,
    pub max_disk_entries: usize,
    pub max_disk_bytes: usize,
    pub cacheable_methods: Vec<HttpMethod>,
    /// How long an expired entry with validators is kept for revalidation
    #[serde(with = "duration_millis")]
    pub validator_retention: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            max_memory_entries: 100,
            max_disk_entries: 500,
            max_disk_bytes: 10 * 1024 * 1024,
            cacheable_methods: vec![HttpMethod::Get, HttpMethod::Head],
            validator_retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Retry policy parameters; immutable once attached to a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub retryable_status_codes: Vec<u16>,
    pub retryable_error_kinds: Vec<TransportErrorKind>,
    /// Methods the pipeline retries without an explicit opt-in
    pub retry_methods: Vec<HttpMethod>,
    pub respect_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            retryable_error_kinds: vec![
                TransportErrorKind::ConnectTimeout,
                TransportErrorKind::SendTimeout,
                TransportErrorKind::ReceiveTimeout,
                TransportErrorKind::Connection,
            ],
            retry_methods: vec![HttpMethod::Get, HttpMethod::Head],
            respect_retry_after: true,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> CommonResult<()> {
        if self.max_attempts == 0 {
            return Err(CommonError::config_field("retry.max_attempts", "must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(CommonError::validation_with_value(
                "retry.multiplier",
                "must be a finite number >= 1.0",
                self.multiplier.to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(CommonError::config_field(
                "retry.base_delay",
                "cannot exceed retry.max_delay",
            ));
        }
        Ok(())
    }
}

/// Offline queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineSettings {
    pub default_priority: i32,
    pub queueable_methods: Vec<HttpMethod>,
    pub max_queue_size: usize,
    /// Entries older than this are dropped on load and on replay failure
    #[serde(with = "duration_millis")]
    pub retention: Duration,
    /// Key under which the queue is persisted
    pub storage_key: String,
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            default_priority: 0,
            queueable_methods: vec![
                HttpMethod::Post,
                HttpMethod::Put,
                HttpMethod::Patch,
                HttpMethod::Delete,
            ],
            max_queue_size: 100,
            retention: Duration::from_secs(7 * 24 * 3600),
            storage_key: "resilink.offline_queue".to_string(),
        }
    }
}

/// Performance monitor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub max_records: usize,
    #[serde(with = "duration_millis")]
    pub max_age: Duration,
    #[serde(with = "duration_millis")]
    pub slow_request_threshold: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_records: 1000,
            max_age: Duration::from_secs(3600),
            slow_request_threshold: Duration::from_secs(3),
        }
    }
}

/// Which middlewares the pipeline installs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    pub cache: bool,
    pub retry: bool,
    pub offline: bool,
    pub monitor: bool,
    pub auth: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self { cache: true, retry: true, offline: true, monitor: true, auth: true }
    }
}
