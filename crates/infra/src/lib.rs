//! # Resilink Infrastructure
//!
//! Concrete services behind the ports defined in `resilink-core`.
//!
//! This crate contains:
//! - The connection pool and its reqwest-backed transport
//! - The two-tier response cache and the persistent offline queue
//! - The performance monitor
//! - The request pipeline with its middlewares
//! - Key-value stores (memory, file), connectivity adapters, credential
//!   storage for tests and embedding, and the configuration loader
//!
//! ## Architecture
//! - Implements traits defined in `resilink-core`
//! - Every service is constructed explicitly and injected into the
//!   pipeline; nothing is looked up globally
//! - Contains all "impure" code (network, filesystem, background tasks)

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod credentials;
pub mod http;
pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod storage;

// Re-export commonly used items
pub use cache::{CacheError, CacheLookup, ResponseCache};
pub use connectivity::{ConnectivityProbe, ManualConnectivity};
pub use credentials::InMemoryCredentials;
pub use http::{ConnectionPool, PooledTransport};
pub use monitor::{MetricsHandle, PerformanceMonitor};
pub use pipeline::{RequestPipeline, RequestPipelineBuilder};
pub use queue::{OfflineQueue, QueueError};
pub use storage::{FileStore, MemoryStore};
