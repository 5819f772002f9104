//! Connectivity signals
//!
//! [`ManualConnectivity`] is a settable online flag for hosts that learn
//! about reachability from the platform. [`ConnectivityProbe`] derives the
//! flag by polling a health URL.

use std::time::Duration;

use resilink_common::error::{CommonError, CommonResult};
use resilink_core::ConnectivitySignal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Online flag driven by the host application
#[derive(Debug)]
pub struct ManualConnectivity {
    state: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    /// Publish a new state; subscribers only see actual transitions
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivitySignal for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Polls `url` and reports online when it answers with any HTTP status
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl ConnectivityProbe {
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> CommonResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CommonError::config(format!("connectivity probe client: {e}")))?;
        Ok(Self { client, url: url.into(), interval })
    }

    /// One reachability check
    pub async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                debug!(status = response.status().as_u16(), "connectivity probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "connectivity probe failed");
                false
            }
        }
    }

    /// Poll until `cancel` fires, publishing each result to `signal`
    pub fn spawn(
        self,
        signal: std::sync::Arc<ManualConnectivity>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let online = self.check().await;
                        signal.set_online(online);
                    }
                }
            }
            debug!("connectivity probe stopped");
        })
    }
}
