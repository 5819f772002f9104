use std::sync::Arc;

use async_trait::async_trait;
use resilink_core::{Middleware, Next};
use resilink_domain::{ApiError, ApiRequest, ApiResponse, ApiResult, RequestContext};

use crate::monitor::{MetricsHandle, PerformanceMonitor};

/// Opens a metrics record per logical request and closes it with the outcome
///
/// Cancelled requests, including ones whose future is dropped, are discarded
/// rather than recorded.
pub struct PerformanceMiddleware {
    monitor: Arc<PerformanceMonitor>,
}

impl PerformanceMiddleware {
    pub fn new(monitor: Arc<PerformanceMonitor>) -> Self {
        Self { monitor }
    }
}

/// Cancels the record unless it was handed back
struct OpenRecord<'a> {
    monitor: &'a PerformanceMonitor,
    handle: Option<MetricsHandle>,
}

impl OpenRecord<'_> {
    fn take(mut self) -> Option<MetricsHandle> {
        self.handle.take()
    }
}

impl Drop for OpenRecord<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.monitor.cancel_request(&handle);
        }
    }
}

#[async_trait]
impl Middleware for PerformanceMiddleware {
    fn name(&self) -> &'static str {
        "performance"
    }

    async fn handle(
        &self,
        request: ApiRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> ApiResult<ApiResponse> {
        if !self.monitor.is_enabled() {
            return next.run(request, ctx).await;
        }

        let handle = self.monitor.start_request(&request);
        self.monitor.annotate(&handle, "request_id", ctx.request_id.clone());
        let record = OpenRecord { monitor: &self.monitor, handle: Some(handle) };

        let result = next.run(request, ctx).await;

        let Some(handle) = record.take() else { return result };
        if ctx.retry_attempt > 0 {
            self.monitor.record_retries(&handle, ctx.retry_attempt);
        }
        if ctx.served_from_cache {
            self.monitor.record_cache_hit(&handle);
        }
        match &result {
            Ok(response) => self.monitor.complete_request(&handle, response),
            Err(ApiError::Cancelled) => self.monitor.cancel_request(&handle),
            Err(err) => self.monitor.complete_request_with_error(&handle, err),
        }
        result
    }
}
