//! Injectable clocks
//!
//! Cache freshness, queue retention and the metrics window read time through
//! a [`Clock`], so tests drive them with a [`MockClock`] instead of sleeping.
//!
//! ```
//! use std::time::Duration;
//!
//! use resilink_common::time::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Monotonic instant, for measuring durations
    fn now(&self) -> Instant;

    /// Wall clock, for timestamps that are persisted or compared across runs
    fn system_time(&self) -> SystemTime;

    fn millis_since_epoch(&self) -> u64 {
        let since = self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(since.as_millis()).unwrap_or(u64::MAX)
    }

    #[cfg(feature = "foundation")]
    fn utc_now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::<chrono::Utc>::from(self.system_time())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock frozen at its creation time until [`advance`](MockClock::advance)
/// is called
///
/// Both the monotonic and the wall clock move together. Clones share one
/// offset, so a clone handed to a service follows the test's clock.
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    wall_origin: SystemTime,
    offset_nanos: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: SystemTime::now(),
            offset_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Total time advanced since creation
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.wall_origin + self.elapsed()
    }
}
