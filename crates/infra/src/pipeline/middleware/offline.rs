use std::sync::Arc;

use async_trait::async_trait;
use resilink_core::{Middleware, Next};
use resilink_domain::{ApiRequest, ApiResponse, ApiResult, RequestContext};
use tracing::info;

use crate::queue::OfflineQueue;

/// Gateway statuses that mean "the server is unreachable" while offline
const UNREACHABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Diverts failed writes into the offline queue
///
/// A queueable request is queued when the chain ends in a timeout or
/// connectivity failure, or in a 5xx gateway status while the device is
/// offline. The caller receives a synthetic `202` instead of an error.
pub struct OfflineMiddleware {
    queue: Arc<OfflineQueue>,
}

impl OfflineMiddleware {
    pub fn new(queue: Arc<OfflineQueue>) -> Self {
        Self { queue }
    }

    fn should_queue(&self, result: &ApiResult<ApiResponse>) -> bool {
        match result {
            Err(err) => err.is_network_failure(),
            Ok(response) => {
                UNREACHABLE_STATUSES.contains(&response.status) && !self.queue.is_online()
            }
        }
    }
}

#[async_trait]
impl Middleware for OfflineMiddleware {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn handle(
        &self,
        request: ApiRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> ApiResult<ApiResponse> {
        let queueable = ctx.offline.enabled
            && self.queue.settings().queueable_methods.contains(&request.method);
        if !queueable {
            return next.run(request, ctx).await;
        }

        let result = next.run(request.clone(), ctx).await;
        if !self.should_queue(&result) {
            return result;
        }

        let entry =
            self.queue.enqueue(request, ctx.offline.priority, ctx.offline.metadata.clone()).await;
        info!(
            request_id = %ctx.request_id,
            queue_id = %entry.id,
            "request deferred to offline queue"
        );
        Ok(ApiResponse::queued(&entry.id))
    }
}
