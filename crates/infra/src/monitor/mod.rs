//! Rolling-window request performance monitor
//!
//! Records one [`RequestMetrics`] per request lifecycle. Completed records
//! are pruned by count and by age whenever a new record lands; aggregates
//! are computed on demand.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use resilink_common::error::CommonResult;
use resilink_common::time::{Clock, SystemClock};
use resilink_core::aggregate;
use resilink_domain::{
    ApiError, ApiRequest, ApiResponse, MonitorSettings, PerformanceStats, PhaseTimings,
    RequestMetrics, ResponseSource,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Ticket for an in-flight record
///
/// Returned by [`PerformanceMonitor::start_request`]; the record is
/// finalized by passing it back to one of the completion methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricsHandle {
    id: String,
}

impl MetricsHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    in_flight: HashMap<String, (RequestMetrics, Instant)>,
    completed: VecDeque<RequestMetrics>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsExport<'a> {
    exported_at: chrono::DateTime<chrono::Utc>,
    stats: PerformanceStats,
    records: &'a [RequestMetrics],
}

pub struct PerformanceMonitor {
    settings: MonitorSettings,
    enabled: AtomicBool,
    sequence: AtomicU64,
    clock: Arc<dyn Clock>,
    state: Mutex<MonitorState>,
}

impl PerformanceMonitor {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            enabled: AtomicBool::new(true),
            sequence: AtomicU64::new(0),
            clock: Arc::new(SystemClock),
            state: Mutex::new(MonitorState::default()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Disabling drops every record, in flight or completed
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.reset();
        }
        info!(enabled, "performance monitoring toggled");
    }

    /// Open a record for `request`
    pub fn start_request(&self, request: &ApiRequest) -> MetricsHandle {
        let id = format!(
            "{}-{}",
            self.clock.millis_since_epoch(),
            self.sequence.fetch_add(1, Ordering::Relaxed)
        );
        let handle = MetricsHandle { id: id.clone() };
        if !self.is_enabled() {
            return handle;
        }

        let record = RequestMetrics {
            id: id.clone(),
            method: request.method,
            url: request.display_url(),
            endpoint: request.endpoint(),
            started_at: self.clock.utc_now(),
            ended_at: None,
            duration: None,
            status: None,
            bytes: 0,
            phases: PhaseTimings::default(),
            from_cache: false,
            retry_count: 0,
            error_kind: None,
            metadata: BTreeMap::new(),
        };

        let now = self.clock.now();
        let mut state = self.state.lock();
        self.prune_stale_in_flight(&mut state, now);
        state.in_flight.insert(id, (record, now));
        handle
    }

    pub fn record_retry(&self, handle: &MetricsHandle) {
        self.record_retries(handle, 1);
    }

    pub fn record_retries(&self, handle: &MetricsHandle, count: u32) {
        if let Some((record, _)) = self.state.lock().in_flight.get_mut(&handle.id) {
            record.retry_count = record.retry_count.saturating_add(count);
        }
    }

    pub fn record_cache_hit(&self, handle: &MetricsHandle) {
        if let Some((record, _)) = self.state.lock().in_flight.get_mut(&handle.id) {
            record.from_cache = true;
        }
    }

    /// Attach free-form metadata to an in-flight record
    pub fn annotate(
        &self,
        handle: &MetricsHandle,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        if let Some((record, _)) = self.state.lock().in_flight.get_mut(&handle.id) {
            record.metadata.insert(key.into(), value.into());
        }
    }

    pub fn complete_request(&self, handle: &MetricsHandle, response: &ApiResponse) {
        self.finish(handle, |record| {
            record.status = Some(response.status);
            record.bytes = response.body.len() as u64;
            if response.source == ResponseSource::Cache {
                record.from_cache = true;
            }
        });
    }

    pub fn complete_request_with_error(&self, handle: &MetricsHandle, error: &ApiError) {
        self.finish(handle, |record| {
            record.status = error.status();
            record.bytes = error.response().map_or(0, |response| response.body.len() as u64);
            record.error_kind = Some(error.kind_label());
        });
    }

    /// Discard an in-flight record without completing it
    pub fn cancel_request(&self, handle: &MetricsHandle) {
        if self.state.lock().in_flight.remove(&handle.id).is_some() {
            debug!(metrics_id = %handle.id, "metrics record cancelled");
        }
    }

    fn finish(&self, handle: &MetricsHandle, apply: impl FnOnce(&mut RequestMetrics)) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let Some((mut record, started)) = state.in_flight.remove(&handle.id) else {
            return;
        };

        let elapsed = now.saturating_duration_since(started);
        record.ended_at = Some(self.clock.utc_now());
        record.duration = Some(elapsed);
        apply(&mut record);

        if elapsed >= self.settings.slow_request_threshold {
            warn!(
                endpoint = %record.endpoint,
                duration_ms = saturating_millis(elapsed),
                status = ?record.status,
                "slow request"
            );
        }

        state.completed.push_back(record);
        self.prune_completed(&mut state);
    }

    fn prune_completed(&self, state: &mut MonitorState) {
        while state.completed.len() > self.settings.max_records {
            state.completed.pop_front();
        }

        let max_age =
            chrono::Duration::from_std(self.settings.max_age).unwrap_or(chrono::Duration::MAX);
        let Some(horizon) = self.clock.utc_now().checked_sub_signed(max_age) else {
            return;
        };
        // Completion order is not start order
        state.completed.retain(|record| record.started_at >= horizon);
    }

    /// In-flight records older than the retention window were abandoned
    fn prune_stale_in_flight(&self, state: &mut MonitorState, now: Instant) {
        let max_age = self.settings.max_age;
        let before = state.in_flight.len();
        state
            .in_flight
            .retain(|_, (_, started)| now.saturating_duration_since(*started) <= max_age);
        let pruned = before - state.in_flight.len();
        if pruned > 0 {
            debug!(pruned, "dropped abandoned in-flight metrics");
        }
    }

    pub fn stats(&self) -> PerformanceStats {
        let mut state = self.state.lock();
        self.prune_completed(&mut state);
        aggregate(state.completed.iter())
    }

    /// Completed records, oldest first
    pub fn records(&self) -> Vec<RequestMetrics> {
        self.state.lock().completed.iter().cloned().collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.in_flight.clear();
        state.completed.clear();
    }

    /// Aggregates plus raw records as pretty-printed JSON
    pub fn export_json(&self) -> CommonResult<String> {
        let records = self.records();
        let export = MetricsExport {
            exported_at: self.clock.utc_now(),
            stats: aggregate(records.iter()),
            records: &records,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    pub fn log_summary(&self) {
        let stats = self.stats();
        info!(
            total = stats.total_requests,
            success_rate = stats.success_rate,
            cache_hit_rate = stats.cache_hit_rate,
            avg_ms = saturating_millis(stats.avg_latency),
            p95_ms = saturating_millis(stats.p95_latency),
            p99_ms = saturating_millis(stats.p99_latency),
            avg_retries = stats.avg_retries,
            "request performance summary"
        );
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorSettings::default())
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("settings", &self.settings)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Whole milliseconds, clamped to `u64::MAX`
const fn saturating_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}
