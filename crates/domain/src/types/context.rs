//! Typed per-request context carried through the middleware chain

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Offline queue options for one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfflineOptions {
    /// Allow the request to be queued on connectivity loss
    pub enabled: bool,
    /// Replay priority; `None` uses the configured default
    pub priority: Option<i32>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Cache options for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    pub enabled: bool,
    /// Skip the lookup but still store the fresh response
    pub force_refresh: bool,
    /// Overrides the freshness lifetime derived from response headers
    pub ttl_override: Option<Duration>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { enabled: true, force_refresh: false, ttl_override: None }
    }
}

/// State that travels with a request through every middleware
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Retries performed so far; zero on the first attempt
    pub retry_attempt: u32,
    pub offline: OfflineOptions,
    pub cache: CacheOptions,
    /// Let the retry middleware resend POST/PATCH and other unsafe methods
    pub allow_non_idempotent_retry: bool,
    pub cancellation: CancellationToken,
    /// Set once the single credential refresh for this request has run
    pub auth_refreshed: bool,
    /// Set by the cache middleware when the response came from the cache
    pub served_from_cache: bool,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7().to_string(),
            retry_attempt: 0,
            offline: OfflineOptions { enabled: true, ..OfflineOptions::default() },
            cache: CacheOptions::default(),
            allow_non_idempotent_retry: false,
            cancellation: CancellationToken::new(),
            auth_refreshed: false,
            served_from_cache: false,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.offline.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.offline.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn without_offline(mut self) -> Self {
        self.offline.enabled = false;
        self
    }

    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache.enabled = false;
        self
    }

    #[must_use]
    pub fn force_refresh(mut self) -> Self {
        self.cache.force_refresh = true;
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl_override = Some(ttl);
        self
    }

    #[must_use]
    pub fn allow_non_idempotent_retry(mut self) -> Self {
        self.allow_non_idempotent_retry = true;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.retry_attempt, 0);
        assert!(ctx.offline.enabled);
        assert!(ctx.cache.enabled);
        assert!(!ctx.allow_non_idempotent_retry);
        assert!(!ctx.auth_refreshed);
        assert!(!ctx.is_cancelled());
        assert_ne!(ctx.request_id, RequestContext::new().request_id);
    }

    #[test]
    fn test_builders() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new()
            .with_priority(5)
            .with_metadata("origin", serde_json::json!("editor"))
            .with_cache_ttl(Duration::from_secs(10))
            .force_refresh()
            .with_cancellation(token.clone());
        assert_eq!(ctx.offline.priority, Some(5));
        assert_eq!(ctx.offline.metadata["origin"], "editor");
        assert_eq!(ctx.cache.ttl_override, Some(Duration::from_secs(10)));
        assert!(ctx.cache.force_refresh);

        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
