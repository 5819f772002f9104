//! Connection pool limits and observed counters

use std::collections::BTreeMap;
use std::time::Duration;

use resilink_common::duration_millis;
use serde::{Deserialize, Serialize};

/// Transport-level limits, set once at pool initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    pub max_connections: usize,
    pub max_connections_per_host: usize,
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub receive_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub send_timeout: Duration,
    pub keep_alive: bool,
    #[serde(with = "duration_millis")]
    pub keep_alive_interval: Duration,
    pub user_agent: Option<String>,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_connections_per_host: 10,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(90),
            receive_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            keep_alive: true,
            keep_alive_interval: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

/// Point-in-time pool snapshot
///
/// Active and idle counts are derived from permit usage, not read from the
/// socket layer, and should be treated as estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPoolStats {
    pub initialized: bool,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub max_connections: usize,
    /// `active / max`, 0.0 to 1.0
    pub utilization: f64,
    pub total_requests: u64,
    pub per_host_active: BTreeMap<String, usize>,
}
