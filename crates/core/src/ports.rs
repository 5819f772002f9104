//! Port interfaces for the collaborators the resilience layer sits between

use async_trait::async_trait;
use resilink_common::error::CommonResult;
use resilink_domain::{ApiRequest, ApiResponse, ApiResult};
use tokio::sync::watch;

/// Executes a request over the network
///
/// Any HTTP status is a successful send; only transport failures are `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> ApiResult<ApiResponse>;
}

/// Durable string storage used by the cache and the offline queue
///
/// Values are JSON-encoded records.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_string(&self, key: &str) -> CommonResult<Option<String>>;

    async fn set_string(&self, key: &str, value: &str) -> CommonResult<()>;

    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> CommonResult<()>;

    async fn keys(&self) -> CommonResult<Vec<String>>;
}

/// External credential storage; this layer never owns token persistence
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn read(&self, key: &str) -> ApiResult<Option<String>>;

    async fn write(&self, key: &str, token: &str) -> ApiResult<()>;

    async fn delete(&self, key: &str) -> ApiResult<()>;
}

/// Obtains a new access token after a 401
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Returns `None` when the session cannot be refreshed
    async fn refresh(&self, current: Option<&str>) -> ApiResult<Option<String>>;
}

/// Online/offline snapshot plus a change stream
pub trait ConnectivitySignal: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every transition
    fn subscribe(&self) -> watch::Receiver<bool>;
}
