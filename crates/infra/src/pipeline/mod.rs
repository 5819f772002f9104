//! Request pipeline
//!
//! An ordered middleware chain in front of a transport. Chain order,
//! outermost first:
//!
//! ```text
//! performance -> cache -> offline -> retry -> auth -> [extras] -> transport
//! ```
//!
//! Every middleware sees HTTP error statuses as ordinary responses. The
//! pipeline converts the final outcome: a status >= 400 becomes
//! [`ApiError::Server`] or [`ApiError::Client`] carrying the response
//! unchanged, and a request accepted by the offline queue resolves to a
//! `202` with [`ResponseSource::Queued`](resilink_domain::ResponseSource).

mod builder;
pub mod middleware;

use std::sync::Arc;

use resilink_core::{Middleware, Next, Transport};
use resilink_domain::{ApiError, ApiRequest, ApiResponse, ApiResult, RequestContext, ResilinkConfig};
use serde::Serialize;
use tracing::{info, instrument};

pub use self::builder::RequestPipelineBuilder;
use crate::cache::ResponseCache;
use crate::http::ConnectionPool;
use crate::monitor::PerformanceMonitor;
use crate::queue::OfflineQueue;

pub struct RequestPipeline {
    config: ResilinkConfig,
    transport: Arc<dyn Transport>,
    middlewares: Vec<Arc<dyn Middleware>>,
    pool: Arc<ConnectionPool>,
    cache: Arc<ResponseCache>,
    queue: Arc<OfflineQueue>,
    monitor: Arc<PerformanceMonitor>,
}

impl RequestPipeline {
    pub fn builder(config: ResilinkConfig) -> RequestPipelineBuilder {
        RequestPipelineBuilder::new(config)
    }

    /// Initialize the pool, load the offline queue and start its
    /// connectivity watcher
    pub async fn initialize(&self) -> ApiResult<()> {
        if !self.pool.is_initialized() {
            self.pool.initialize(self.config.pool.clone())?;
        }
        if self.config.features.offline {
            let pending = self.queue.initialize().await;
            self.queue.start();
            info!(pending, "request pipeline initialized");
        } else {
            info!("request pipeline initialized");
        }
        Ok(())
    }

    /// Dispose every service; [`initialize`](Self::initialize) may be called
    /// again afterwards
    pub async fn dispose(&self) {
        self.queue.dispose().await;
        self.cache.dispose();
        self.monitor.reset();
        self.pool.dispose();
        info!("request pipeline disposed");
    }

    pub async fn execute(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        self.execute_with(request, RequestContext::new()).await
    }

    /// Run `request` through the chain with an explicit context
    #[instrument(
        skip_all,
        fields(request_id = %ctx.request_id, method = %request.method, path = %request.path)
    )]
    pub async fn execute_with(
        &self,
        mut request: ApiRequest,
        mut ctx: RequestContext,
    ) -> ApiResult<ApiResponse> {
        if request.base_url.is_empty() {
            request.base_url.clone_from(&self.config.base_url);
        }

        let cancellation = ctx.cancellation.clone();
        let next = Next::new(&self.middlewares, self.transport.as_ref());
        let result = tokio::select! {
            biased;
            () = cancellation.cancelled() => Err(ApiError::Cancelled),
            result = next.run(request, &mut ctx) => result,
        };
        result.and_then(ApiError::from_response)
    }

    pub async fn get(&self, path: &str) -> ApiResult<ApiResponse> {
        self.execute(ApiRequest::get(path)).await
    }

    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> ApiResult<ApiResponse> {
        self.execute(ApiRequest::post(path).with_json(body)?).await
    }

    pub async fn put<T: Serialize>(&self, path: &str, body: &T) -> ApiResult<ApiResponse> {
        self.execute(ApiRequest::put(path).with_json(body)?).await
    }

    pub async fn patch<T: Serialize>(&self, path: &str, body: &T) -> ApiResult<ApiResponse> {
        self.execute(ApiRequest::patch(path).with_json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> ApiResult<ApiResponse> {
        self.execute(ApiRequest::delete(path)).await
    }

    pub fn config(&self) -> &ResilinkConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Installed middlewares, outermost first
    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("base_url", &self.config.base_url)
            .field("middlewares", &self.middleware_names())
            .finish_non_exhaustive()
    }
}
