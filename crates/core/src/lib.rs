//! # Resilink Core
//!
//! Pure resilience logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for transport, storage, credentials and
//!   connectivity
//! - The middleware chain abstraction used by the request pipeline
//! - The retry policy, cache fingerprinting and freshness rules, and
//!   metrics aggregation
//!
//! ## Architecture Principles
//! - Only depends on `resilink-common` and `resilink-domain`
//! - No HTTP client, filesystem or platform code
//! - All external dependencies via traits

pub mod cache;
pub mod metrics;
pub mod pipeline;
pub mod ports;
pub mod retry;

// Re-export specific items to avoid ambiguity
pub use cache::control::{CacheControl, Freshness};
pub use cache::fingerprint::{fingerprint, normalize_url};
pub use metrics::{aggregate, percentile};
pub use pipeline::{Middleware, Next};
pub use ports::{
    ConnectivitySignal, CredentialProvider, KeyValueStore, TokenRefresher, Transport,
};
pub use retry::{RetryPolicy, RetryTrigger};
