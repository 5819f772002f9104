//! Cached responses and cache statistics

use std::time::Duration;

use chrono::{DateTime, Utc};
use resilink_common::base64_bytes;
use serde::{Deserialize, Serialize};

use super::http::{ApiResponse, Headers, ResponseSource};

/// A stored response keyed by request fingerprint
///
/// Entries are never mutated; a 304 refresh writes a replacement.
/// Serialized form is the durable cache record
/// `{key, headers, data, createdAt, expiresAt?, etag?, lastModified?}`
/// plus the `status` and `url` needed to rebuild and invalidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(rename = "key")]
    pub fingerprint: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_status")]
    pub status: u16,
    pub headers: Headers,
    #[serde(rename = "data", with = "base64_bytes")]
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

const fn default_status() -> u16 {
    200
}

impl CacheEntry {
    /// Expiry, or `created_at + default_ttl` when none was given
    pub fn effective_expiry(&self, default_ttl: Duration) -> DateTime<Utc> {
        self.expires_at.unwrap_or_else(|| {
            let ttl = chrono::Duration::from_std(default_ttl).unwrap_or(chrono::Duration::MAX);
            self.created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// True iff `now` is past the effective expiry
    ///
    /// Monotonic in `now`: once expired, every later instant is expired too.
    pub fn is_expired(&self, now: DateTime<Utc>, default_ttl: Duration) -> bool {
        now > self.effective_expiry(default_ttl)
    }

    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Rebuild the response this entry was created from
    pub fn to_response(&self, source: ResponseSource) -> ApiResponse {
        ApiResponse::new(self.status, self.headers.clone(), self.body.clone()).with_source(source)
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_count: usize,
    pub disk_count: usize,
    pub expired_count: usize,
    pub disk_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub revalidations: u64,
    pub stores: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hits over lookups, zero before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses + self.revalidations;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
