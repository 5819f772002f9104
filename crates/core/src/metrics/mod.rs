//! Percentiles and on-demand aggregation over metric records
//!
//! Percentile convention: sort ascending, take index `floor(n * p)` clamped
//! to `[0, n - 1]`. The same rule is used for the median (`p = 0.5`).

use std::collections::BTreeMap;
use std::time::Duration;

use resilink_domain::{EndpointStats, PerformanceStats, RequestMetrics};

/// Value at percentile `p` (0.0 to 1.0) of an ascending-sorted slice
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let n = sorted.len();
    let raw = (n as f64 * p.clamp(0.0, 1.0)).floor() as usize;
    sorted[raw.min(n - 1)]
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn mean(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    let total: Duration = durations.iter().sum();
    total / u32::try_from(durations.len()).unwrap_or(u32::MAX)
}

/// Aggregate completed records into [`PerformanceStats`]
///
/// Records without an end time are ignored.
pub fn aggregate<'a, I>(records: I) -> PerformanceStats
where
    I: IntoIterator<Item = &'a RequestMetrics>,
{
    let completed: Vec<&RequestMetrics> =
        records.into_iter().filter(|record| record.is_complete()).collect();
    let total = completed.len();
    if total == 0 {
        return PerformanceStats::default();
    }

    let mut latencies: Vec<Duration> =
        completed.iter().map(|record| record.duration.unwrap_or_default()).collect();
    latencies.sort_unstable();

    let mut status_codes = BTreeMap::new();
    let mut error_kinds = BTreeMap::new();
    let mut by_endpoint: BTreeMap<String, Vec<Duration>> = BTreeMap::new();
    let mut success_count = 0;
    let mut error_count = 0;
    let mut cache_hits = 0;
    let mut retries = 0_u64;
    let mut total_bytes = 0_u64;

    for record in &completed {
        if record.is_success() {
            success_count += 1;
        }
        if record.is_error() {
            error_count += 1;
        }
        if record.from_cache {
            cache_hits += 1;
        }
        if let Some(status) = record.status {
            *status_codes.entry(status).or_insert(0) += 1;
        }
        if let Some(kind) = &record.error_kind {
            *error_kinds.entry(kind.clone()).or_insert(0) += 1;
        }
        retries += u64::from(record.retry_count);
        total_bytes += record.bytes;
        by_endpoint
            .entry(record.endpoint.clone())
            .or_default()
            .push(record.duration.unwrap_or_default());
    }

    let endpoints = by_endpoint
        .into_iter()
        .map(|(endpoint, durations)| {
            (endpoint, EndpointStats { count: durations.len(), avg_latency: mean(&durations) })
        })
        .collect();

    PerformanceStats {
        total_requests: total,
        success_count,
        error_count,
        success_rate: ratio(success_count, total),
        error_rate: ratio(error_count, total),
        cache_hit_rate: ratio(cache_hits, total),
        avg_latency: mean(&latencies),
        median_latency: percentile(&latencies, 0.5),
        p95_latency: percentile(&latencies, 0.95),
        p99_latency: percentile(&latencies, 0.99),
        min_latency: latencies.first().copied().unwrap_or_default(),
        max_latency: latencies.last().copied().unwrap_or_default(),
        avg_retries: retries as f64 / total as f64,
        total_bytes,
        status_codes,
        error_kinds,
        endpoints,
    }
}
