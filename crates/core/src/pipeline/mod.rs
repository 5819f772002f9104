//! Middleware chain abstraction
//!
//! A pipeline is an ordered slice of [`Middleware`] in front of a
//! [`Transport`]. Each middleware receives the request, the typed
//! [`RequestContext`] and a [`Next`] handle for the rest of the chain; order
//! is data, not code structure.
//!
//! ```rust,ignore
//! struct Tag;
//!
//! #[async_trait]
//! impl Middleware for Tag {
//!     fn name(&self) -> &'static str { "tag" }
//!
//!     async fn handle(&self, mut request: ApiRequest, ctx: &mut RequestContext, next: Next<'_>)
//!         -> ApiResult<ApiResponse>
//!     {
//!         request.headers.insert("X-Tag", "1");
//!         next.run(request, ctx).await
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use resilink_domain::{ApiRequest, ApiResponse, ApiResult, RequestContext};

use crate::ports::Transport;

/// One stage of the request pipeline
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable name for logs
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        request: ApiRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> ApiResult<ApiResponse>;
}

/// The remainder of a middleware chain
///
/// `Copy`, so a middleware may run the rest of the chain more than once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Transport) -> Self {
        Self { chain, endpoint }
    }

    /// Hand the request to the next middleware, or to the transport when
    /// none remain
    pub async fn run(
        self,
        request: ApiRequest,
        ctx: &mut RequestContext,
    ) -> ApiResult<ApiResponse> {
        match self.chain.split_first() {
            Some((head, tail)) => {
                head.handle(request, ctx, Next { chain: tail, endpoint: self.endpoint }).await
            }
            None => self.endpoint.send(&request).await,
        }
    }

    /// Middlewares still ahead of the transport
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.chain.iter().map(|m| m.name()).collect();
        f.debug_struct("Next").field("chain", &names).finish_non_exhaustive()
    }
}
