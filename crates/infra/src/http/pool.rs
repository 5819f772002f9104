//! Connection pool lifecycle and limits
//!
//! reqwest keeps its own connection pool and does not expose live
//! connection counts, so the pool enforces its ceilings with semaphores
//! around each send and derives [`ConnectionPoolStats`] from the permits in
//! use. Those numbers are an estimate of in-flight requests, not a precise
//! socket gauge.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use reqwest::Client as ReqwestClient;
use resilink_core::Transport;
use resilink_domain::{
    ApiError, ApiRequest, ApiResponse, ApiResult, ConnectionPoolConfig, ConnectionPoolStats,
};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::transport::PooledTransport;

/// State owned by one initialization of the pool
pub(crate) struct PoolShared {
    pub(crate) config: ConnectionPoolConfig,
    pub(crate) client: ReqwestClient,
    global: Arc<Semaphore>,
    hosts: DashMap<String, Arc<Semaphore>>,
    total_requests: AtomicU64,
}

/// Permits held for the duration of one send
pub(crate) struct SendPermits {
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
}

impl PoolShared {
    fn build(config: ConnectionPoolConfig) -> ApiResult<Self> {
        let mut builder = ReqwestClient::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.idle_timeout)
            .no_proxy();

        builder = if config.keep_alive {
            builder
                .pool_max_idle_per_host(config.max_connections_per_host)
                .tcp_keepalive(config.keep_alive_interval)
        } else {
            builder.pool_max_idle_per_host(0)
        };

        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        let client = builder
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            global: Arc::new(Semaphore::new(config.max_connections.max(1))),
            hosts: DashMap::new(),
            total_requests: AtomicU64::new(0),
            client,
            config,
        })
    }

    pub(crate) async fn acquire(&self, host: &str) -> ApiResult<SendPermits> {
        let closed =
            |_: AcquireError| ApiError::Internal("connection pool has been disposed".into());

        let host_limit = Arc::clone(
            self.hosts
                .entry(host.to_owned())
                .or_insert_with(|| {
                    Arc::new(Semaphore::new(self.config.max_connections_per_host.max(1)))
                })
                .value(),
        );
        let host_permit = host_limit.acquire_owned().await.map_err(closed)?;
        let global = Arc::clone(&self.global).acquire_owned().await.map_err(closed)?;

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        Ok(SendPermits { _global: global, _host: host_permit })
    }

    fn close(&self) {
        self.global.close();
        for entry in &self.hosts {
            entry.value().close();
        }
    }

    fn stats(&self) -> ConnectionPoolStats {
        let max = self.config.max_connections.max(1);
        let active = max.saturating_sub(self.global.available_permits());
        let per_host = self.config.max_connections_per_host.max(1);

        let mut per_host_active = BTreeMap::new();
        let mut idle_hosts = 0;
        for entry in &self.hosts {
            let in_use = per_host.saturating_sub(entry.value().available_permits());
            if in_use == 0 {
                idle_hosts += 1;
            } else {
                per_host_active.insert(entry.key().clone(), in_use);
            }
        }

        ConnectionPoolStats {
            initialized: true,
            active_connections: active,
            // one kept-alive connection per quiet host
            idle_connections: if self.config.keep_alive { idle_hosts } else { 0 },
            max_connections: max,
            utilization: active as f64 / max as f64,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            per_host_active,
        }
    }
}

/// Owner of the shared HTTP client and its connection limits
///
/// `initialize` is idempotent; `transport` initializes lazily with the
/// configuration given to [`ConnectionPool::new`]. After `dispose` the pool
/// can be initialized again.
pub struct ConnectionPool {
    defaults: ConnectionPoolConfig,
    state: RwLock<Option<Arc<PoolShared>>>,
}

impl ConnectionPool {
    /// Create an uninitialized pool; `defaults` is used for lazy
    /// initialization
    pub fn new(defaults: ConnectionPoolConfig) -> Self {
        Self { defaults, state: RwLock::new(None) }
    }

    /// Build the client with `config`
    ///
    /// A second call is a no-op with a warning; use [`reset`](Self::reset)
    /// to change the configuration.
    pub fn initialize(&self, config: ConnectionPoolConfig) -> ApiResult<()> {
        let mut state = self.state.write();
        if state.is_some() {
            warn!("connection pool already initialized; ignoring new configuration");
            return Ok(());
        }
        let shared = PoolShared::build(config)?;
        info!(
            max_connections = shared.config.max_connections,
            max_connections_per_host = shared.config.max_connections_per_host,
            "connection pool initialized"
        );
        *state = Some(Arc::new(shared));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    /// Active configuration, if initialized
    pub fn config(&self) -> Option<ConnectionPoolConfig> {
        self.state.read().as_ref().map(|shared| shared.config.clone())
    }

    /// Transport for the current initialization, initializing on first use
    pub fn transport(&self) -> ApiResult<PooledTransport> {
        if let Some(shared) = self.state.read().as_ref() {
            return Ok(PooledTransport::new(Arc::clone(shared)));
        }

        let mut state = self.state.write();
        if let Some(shared) = state.as_ref() {
            return Ok(PooledTransport::new(Arc::clone(shared)));
        }
        debug!("initializing connection pool on first use");
        let shared = Arc::new(PoolShared::build(self.defaults.clone())?);
        *state = Some(Arc::clone(&shared));
        Ok(PooledTransport::new(shared))
    }

    /// Best-effort snapshot; see the module docs
    pub fn stats(&self) -> ConnectionPoolStats {
        self.state.read().as_ref().map_or_else(
            || ConnectionPoolStats {
                max_connections: self.defaults.max_connections,
                ..ConnectionPoolStats::default()
            },
            |shared| shared.stats(),
        )
    }

    /// Drop the client; transports handed out earlier fail from now on
    pub fn dispose(&self) {
        if let Some(shared) = self.state.write().take() {
            shared.close();
            info!("connection pool disposed");
        }
    }

    /// Dispose, then initialize with `config`
    pub fn reset(&self, config: ConnectionPoolConfig) -> ApiResult<()> {
        self.dispose();
        self.initialize(config)
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(ConnectionPoolConfig::default())
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("initialized", &self.is_initialized())
            .field("defaults", &self.defaults)
            .finish()
    }
}

/// Sends through whichever initialization is current, so a pool that is
/// reset keeps serving the pipeline without being re-injected
#[async_trait]
impl Transport for ConnectionPool {
    async fn send(&self, request: &ApiRequest) -> ApiResult<ApiResponse> {
        let transport = self.transport()?;
        transport.send(request).await
    }
}
