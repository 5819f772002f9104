use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use resilink_common::error::ErrorClassification;
use resilink_common::time::{Clock, SystemClock};
use resilink_core::cache::http_date::parse_retry_after;
use resilink_core::{Middleware, Next, RetryPolicy, RetryTrigger};
use resilink_domain::{ApiError, ApiRequest, ApiResponse, ApiResult, RequestContext};
use tracing::debug;

/// Resends failed attempts according to a [`RetryPolicy`]
///
/// Methods outside the policy's retry set get a single attempt unless the
/// context opts in. The backoff sleep ends early with
/// [`ApiError::Cancelled`] when the request is cancelled. Once attempts run
/// out the last outcome is returned unchanged.
pub struct RetryMiddleware {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, clock: Arc::new(SystemClock) }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Backoff before the next attempt, or `None` when `result` is final
    fn next_delay(&self, attempt: u32, result: &ApiResult<ApiResponse>) -> Option<Duration> {
        match result {
            Ok(response) => {
                if !self.policy.should_retry(attempt, RetryTrigger::Status(response.status)) {
                    return None;
                }
                let hint = response
                    .headers
                    .get("retry-after")
                    .and_then(|value| parse_retry_after(value, self.clock.utc_now()));
                Some(self.policy.delay_after(attempt, hint))
            }
            Err(err) => {
                if !self.policy.should_retry_error(attempt, err) {
                    return None;
                }
                Some(self.policy.delay_after(attempt, err.retry_after()))
            }
        }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn handle(
        &self,
        request: ApiRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> ApiResult<ApiResponse> {
        let allowed =
            self.policy.retries_method(request.method) || ctx.allow_non_idempotent_retry;
        if !allowed {
            return next.run(request, ctx).await;
        }

        let mut attempt = 0_u32;
        loop {
            if ctx.is_cancelled() {
                return Err(ApiError::Cancelled);
            }
            attempt += 1;
            let result = next.run(request.clone(), ctx).await;

            let Some(delay) = self.next_delay(attempt, &result) else {
                return result;
            };
            debug!(
                request_id = %ctx.request_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retry scheduled"
            );
            ctx.retry_attempt = attempt;

            tokio::select! {
                () = ctx.cancellation.cancelled() => {
                    debug!(request_id = %ctx.request_id, "retry sleep cancelled");
                    return Err(ApiError::Cancelled);
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
