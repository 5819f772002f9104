//! Built-in middlewares, listed outermost first as the pipeline installs them

pub mod auth;
pub mod cache;
pub mod offline;
pub mod performance;
pub mod retry;

pub use self::auth::{AuthMiddleware, AuthenticatedTransport, DEFAULT_CREDENTIAL_KEY};
pub use self::cache::CacheMiddleware;
pub use self::offline::OfflineMiddleware;
pub use self::performance::PerformanceMiddleware;
pub use self::retry::RetryMiddleware;
