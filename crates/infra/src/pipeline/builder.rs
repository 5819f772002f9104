use std::sync::Arc;

use resilink_common::error::{CommonError, CommonResult};
use resilink_common::time::{Clock, SystemClock};
use resilink_core::{
    ConnectivitySignal, CredentialProvider, KeyValueStore, Middleware, RetryPolicy,
    TokenRefresher, Transport,
};
use resilink_domain::ResilinkConfig;
use tracing::info;

use super::middleware::{
    AuthMiddleware, AuthenticatedTransport, CacheMiddleware, OfflineMiddleware,
    PerformanceMiddleware, RetryMiddleware, DEFAULT_CREDENTIAL_KEY,
};
use super::RequestPipeline;
use crate::cache::ResponseCache;
use crate::connectivity::ManualConnectivity;
use crate::http::ConnectionPool;
use crate::monitor::PerformanceMonitor;
use crate::queue::OfflineQueue;
use crate::storage::MemoryStore;

/// Assembles a [`RequestPipeline`] from explicitly constructed services
///
/// Services not supplied are created from the configuration. Defaults: a
/// [`MemoryStore`] for persistence, an always-online
/// [`ManualConnectivity`], and the [`ConnectionPool`] as transport.
#[derive(Default)]
pub struct RequestPipelineBuilder {
    config: ResilinkConfig,
    transport: Option<Arc<dyn Transport>>,
    pool: Option<Arc<ConnectionPool>>,
    cache: Option<Arc<ResponseCache>>,
    queue: Option<Arc<OfflineQueue>>,
    monitor: Option<Arc<PerformanceMonitor>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    token_refresher: Option<Arc<dyn TokenRefresher>>,
    credential_key: Option<String>,
    store: Option<Arc<dyn KeyValueStore>>,
    connectivity: Option<Arc<dyn ConnectivitySignal>>,
    clock: Option<Arc<dyn Clock>>,
    extra: Vec<Arc<dyn Middleware>>,
}

impl RequestPipelineBuilder {
    pub fn new(config: ResilinkConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Replace the pooled transport, e.g. with a test double
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn queue(mut self, queue: Arc<OfflineQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    #[must_use]
    pub fn monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.token_refresher = Some(refresher);
        self
    }

    #[must_use]
    pub fn credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = Some(key.into());
        self
    }

    /// Durable storage for the cache and queue created by the builder
    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn connectivity(mut self, connectivity: Arc<dyn ConnectivitySignal>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Append a caller middleware; extras run innermost, just before the
    /// transport
    #[must_use]
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.extra.push(middleware);
        self
    }

    pub fn build(self) -> CommonResult<RequestPipeline> {
        let config = self.config;
        config.validate()?;
        if !config.base_url.is_empty() {
            url::Url::parse(&config.base_url).map_err(|e| {
                CommonError::config_field("base_url", format!("not an absolute URL: {e}"))
            })?;
        }

        let features = config.features;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let connectivity =
            self.connectivity.unwrap_or_else(|| Arc::new(ManualConnectivity::new(true)));
        let pool = self.pool.unwrap_or_else(|| Arc::new(ConnectionPool::new(config.pool.clone())));
        let transport = self.transport.unwrap_or_else(|| Arc::clone(&pool) as Arc<dyn Transport>);
        let credential_key =
            self.credential_key.unwrap_or_else(|| DEFAULT_CREDENTIAL_KEY.to_string());
        let credentials = self.credentials.filter(|_| features.auth);

        // Replay goes straight to the transport, one attempt per flush
        let replay: Arc<dyn Transport> = match &credentials {
            Some(credentials) => Arc::new(AuthenticatedTransport::new(
                Arc::clone(&transport),
                Arc::clone(credentials),
                credential_key.clone(),
            )),
            None => Arc::clone(&transport),
        };

        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(
                ResponseCache::with_store(config.cache.clone(), Arc::clone(&store))
                    .with_clock(Arc::clone(&clock)),
            )
        });
        let queue = self.queue.unwrap_or_else(|| {
            Arc::new(
                OfflineQueue::new(config.offline.clone(), Arc::clone(&store), connectivity, replay)
                    .with_clock(Arc::clone(&clock)),
            )
        });
        let monitor = self.monitor.unwrap_or_else(|| {
            Arc::new(PerformanceMonitor::new(config.monitor.clone()).with_clock(Arc::clone(&clock)))
        });

        let mut middlewares: Vec<Arc<dyn Middleware>> = Vec::new();
        if features.monitor {
            middlewares.push(Arc::new(PerformanceMiddleware::new(Arc::clone(&monitor))));
        }
        if features.cache {
            middlewares.push(Arc::new(CacheMiddleware::new(Arc::clone(&cache))));
        }
        if features.offline {
            middlewares.push(Arc::new(OfflineMiddleware::new(Arc::clone(&queue))));
        }
        if features.retry {
            let policy = RetryPolicy::from_config(config.retry.clone())?;
            middlewares
                .push(Arc::new(RetryMiddleware::new(policy).with_clock(Arc::clone(&clock))));
        }
        if let Some(credentials) = &credentials {
            let mut auth = AuthMiddleware::new(Arc::clone(credentials)).with_key(credential_key);
            if let Some(refresher) = self.token_refresher {
                auth = auth.with_refresher(refresher);
            }
            middlewares.push(Arc::new(auth));
        }
        middlewares.extend(self.extra);

        let names: Vec<&str> = middlewares.iter().map(|m| m.name()).collect();
        info!(middlewares = ?names, base_url = %config.base_url, "request pipeline built");

        Ok(RequestPipeline { config, transport, middlewares, pool, cache, queue, monitor })
    }
}
