//! Domain types and models

pub mod cache;
pub mod context;
pub mod http;
pub mod metrics;
pub mod pool;
pub mod queue;

pub use cache::{CacheEntry, CacheStats};
pub use context::{CacheOptions, OfflineOptions, RequestContext};
pub use http::{ApiRequest, ApiResponse, Headers, HttpMethod, ResponseSource, QUEUED_ID_HEADER};
pub use metrics::{EndpointStats, PerformanceStats, PhaseTimings, RequestMetrics};
pub use pool::{ConnectionPoolConfig, ConnectionPoolStats};
pub use queue::{FlushReport, QueueStats, QueuedRequest, QueuedRequestRecord};
