//! Shared fixtures for the pipeline integration tests

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use resilink_core::{ConnectivitySignal, KeyValueStore, Transport};
use resilink_domain::{
    ApiError, ApiRequest, ApiResponse, ApiResult, ResilinkConfig, RetryConfig, TransportErrorKind,
};
use resilink_infra::{ConnectionPool, ManualConnectivity, RequestPipeline, RequestPipelineBuilder};

/// Route pipeline logs to the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration pointed at `base_url` with millisecond retry backoff
pub fn test_config(base_url: &str) -> ResilinkConfig {
    ResilinkConfig {
        base_url: base_url.to_string(),
        retry: RetryConfig {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            jitter: false,
            ..RetryConfig::default()
        },
        ..ResilinkConfig::default()
    }
}

/// Real pooled transport that can be cut off to simulate a lost network
pub struct Switchable {
    pool: Arc<ConnectionPool>,
    down: AtomicBool,
}

impl Switchable {
    pub fn new(pool: Arc<ConnectionPool>, down: bool) -> Arc<Self> {
        Arc::new(Self { pool, down: AtomicBool::new(down) })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for Switchable {
    async fn send(&self, request: &ApiRequest) -> ApiResult<ApiResponse> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ApiError::Connectivity {
                kind: TransportErrorKind::Connection,
                message: "network is unreachable".into(),
            });
        }
        self.pool.send(request).await
    }
}

/// Pipeline wired to a switchable transport, a manual connectivity signal
/// and the given store
pub struct OfflineRig {
    pub pipeline: RequestPipeline,
    pub transport: Arc<Switchable>,
    pub connectivity: Arc<ManualConnectivity>,
}

impl OfflineRig {
    pub fn new(config: ResilinkConfig, store: Arc<dyn KeyValueStore>, online: bool) -> Self {
        Self::with(RequestPipeline::builder(config), store, online)
    }

    pub fn with(
        builder: RequestPipelineBuilder,
        store: Arc<dyn KeyValueStore>,
        online: bool,
    ) -> Self {
        let pool = Arc::new(ConnectionPool::default());
        let transport = Switchable::new(Arc::clone(&pool), !online);
        let connectivity = Arc::new(ManualConnectivity::new(online));
        let pipeline = builder
            .pool(pool)
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .connectivity(Arc::clone(&connectivity) as Arc<dyn ConnectivitySignal>)
            .store(store)
            .build()
            .expect("pipeline should build");
        Self { pipeline, transport, connectivity }
    }

    /// Restore the network and announce it
    pub fn go_online(&self) {
        self.transport.set_down(false);
        self.connectivity.set_online(true);
    }
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
