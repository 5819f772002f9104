use std::sync::Arc;

use async_trait::async_trait;
use resilink_core::cache::control::apply_conditional_headers;
use resilink_core::{Middleware, Next};
use resilink_domain::{ApiRequest, ApiResponse, ApiResult, RequestContext, ResponseSource};
use tracing::debug;

use crate::cache::{CacheLookup, ResponseCache};

/// Serves fresh hits, revalidates stale entries and stores cacheable
/// responses
///
/// A successful unsafe request drops every cached entry under its URL.
/// A write that was only queued leaves the cache alone.
pub struct CacheMiddleware {
    cache: Arc<ResponseCache>,
}

impl CacheMiddleware {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }

    async fn invalidating(
        &self,
        request: ApiRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> ApiResult<ApiResponse> {
        let prefix = request.display_url();
        let unsafe_method = !request.method.is_safe();
        let result = next.run(request, ctx).await;

        if unsafe_method {
            if let Ok(response) = &result {
                if response.is_success() && !response.is_queued() {
                    let removed = self.cache.invalidate_prefix(&prefix).await;
                    if removed > 0 {
                        debug!(removed, url = %prefix, "cache invalidated after write");
                    }
                }
            }
        }
        result
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn handle(
        &self,
        request: ApiRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> ApiResult<ApiResponse> {
        if !self.cache.is_cacheable_method(request.method) {
            return self.invalidating(request, ctx, next).await;
        }
        if !ctx.cache.enabled {
            return next.run(request, ctx).await;
        }

        let ttl = ctx.cache.ttl_override;
        match self.cache.lookup(&request, &ctx.cache).await {
            CacheLookup::Fresh(entry) => {
                debug!(fingerprint = %entry.fingerprint, "cache hit");
                ctx.served_from_cache = true;
                Ok(entry.to_response(ResponseSource::Cache))
            }
            CacheLookup::Revalidate(entry) => {
                debug!(fingerprint = %entry.fingerprint, "revalidating cache entry");
                let mut conditional = request.clone();
                apply_conditional_headers(&mut conditional, &entry);
                let response = next.run(conditional, ctx).await?;

                if response.status == 304 {
                    let refreshed = self.cache.refresh_entry(&entry, &response, ttl).await;
                    return Ok(refreshed.to_response(ResponseSource::Revalidated));
                }
                self.cache.put(&request, &response, ttl).await;
                Ok(response)
            }
            CacheLookup::Miss => {
                let response = next.run(request.clone(), ctx).await?;
                self.cache.put(&request, &response, ttl).await;
                Ok(response)
            }
        }
    }
}
