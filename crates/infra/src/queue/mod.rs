//! Persistent offline request queue
//!
//! Write requests that could not reach the server are admitted here and
//! replayed once connectivity returns.
//!
//! ## Entry lifecycle
//! `pending -> processing -> removed on 2xx/3xx | removed on 4xx |
//! requeued on 5xx or transport failure | removed past retention`
//!
//! ## Ordering
//! Replay order is priority descending, then creation time ascending.
//!
//! ## Persistence
//! The whole queue is written to the key-value store after every enqueue
//! and removal. Entries past retention are dropped when loading. A write
//! failure is logged and the queue keeps working from memory.

mod error;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use resilink_common::time::{Clock, SystemClock};
use resilink_core::{ConnectivitySignal, KeyValueStore, Transport};
use resilink_domain::{
    ApiRequest, FlushReport, OfflineSettings, QueueStats, QueuedRequest, QueuedRequestRecord,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use self::error::{QueueError, QueueResult};

#[derive(Debug, Default)]
struct QueueState {
    /// Insertion order; replay order is computed on demand
    entries: Vec<QueuedRequest>,
    in_flight: HashSet<String>,
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    replayed: AtomicU64,
    dropped: AtomicU64,
}

struct Watcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Clears the flush-in-progress flag however the flush ends
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Resolution {
    Delivered,
    Rejected(u16),
    Expired,
    Retry,
}

pub struct OfflineQueue {
    settings: OfflineSettings,
    store: Arc<dyn KeyValueStore>,
    connectivity: Arc<dyn ConnectivitySignal>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    persist_lock: tokio::sync::Mutex<()>,
    flushing: AtomicBool,
    sequence: AtomicU64,
    counters: QueueCounters,
    watcher: Mutex<Option<Watcher>>,
}

impl OfflineQueue {
    /// `transport` replays entries; it is called once per entry per flush
    pub fn new(
        settings: OfflineSettings,
        store: Arc<dyn KeyValueStore>,
        connectivity: Arc<dyn ConnectivitySignal>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            settings,
            store,
            connectivity,
            transport,
            clock: Arc::new(SystemClock),
            state: Mutex::new(QueueState::default()),
            persist_lock: tokio::sync::Mutex::new(()),
            flushing: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            counters: QueueCounters::default(),
            watcher: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &OfflineSettings {
        &self.settings
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.utc_now()
    }

    /// Load persisted entries, dropping those past retention
    ///
    /// Entries already in memory are kept; returns the number pending.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> usize {
        let records = match self.read_records().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "queue fault while loading; starting empty");
                Vec::new()
            }
        };

        let now = self.now();
        let mut loaded = Vec::with_capacity(records.len());
        let mut expired = 0_u64;
        for record in records {
            let id = record.id.clone();
            match QueuedRequest::try_from(record) {
                Ok(entry) if entry.is_past_retention(now, self.settings.retention) => expired += 1,
                Ok(entry) => loaded.push(entry),
                Err(message) => {
                    let fault = QueueError::InvalidRecord { id, message };
                    warn!(error = %fault, "skipping unreadable queued request");
                }
            }
        }

        let (pending, overflow) = {
            let mut state = self.state.lock();
            let known: HashSet<String> = loaded.iter().map(|entry| entry.id.clone()).collect();
            let mut merged = loaded;
            merged.extend(state.entries.drain(..).filter(|entry| !known.contains(&entry.id)));
            state.entries = merged;
            state.in_flight.clear();
            let overflow = self.enforce_capacity(&mut state);
            (state.entries.len(), overflow.len())
        };

        let dropped = expired + overflow as u64;
        if dropped > 0 {
            self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
            self.persist().await;
        }
        info!(pending, expired, overflow, "offline queue loaded");
        pending
    }

    /// Spawn the connectivity watcher
    ///
    /// Every offline-to-online transition triggers a flush; a flush also runs
    /// right away when the queue starts online with pending entries.
    pub fn start(self: &Arc<Self>) {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            warn!("offline queue watcher already running");
            return;
        }

        let token = CancellationToken::new();
        let mut changes = self.connectivity.subscribe();
        let queue: Weak<Self> = Arc::downgrade(self);
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut was_online = *changes.borrow_and_update();
            if was_online {
                if let Some(queue) = queue.upgrade() {
                    if !queue.is_empty() {
                        queue.flush().await;
                    }
                }
            }

            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *changes.borrow_and_update();
                        if online && !was_online {
                            let Some(queue) = queue.upgrade() else { break };
                            info!("connectivity restored; flushing offline queue");
                            queue.flush().await;
                        }
                        was_online = online;
                    }
                }
            }
            debug!("offline queue watcher stopped");
        });

        *watcher = Some(Watcher { token, handle });
        info!("offline queue watcher started");
    }

    /// Stop the watcher and drop in-memory state; persisted entries stay
    pub async fn dispose(&self) {
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.token.cancel();
            if let Err(e) = watcher.handle.await {
                warn!(error = %e, "offline queue watcher ended abnormally");
            }
        }

        let mut state = self.state.lock();
        state.entries.clear();
        state.in_flight.clear();
        drop(state);

        self.counters.enqueued.store(0, Ordering::Relaxed);
        self.counters.replayed.store(0, Ordering::Relaxed);
        self.counters.dropped.store(0, Ordering::Relaxed);
        info!("offline queue disposed");
    }

    /// Admit `request`; the `Authorization` header is never stored
    ///
    /// When the queue is full the oldest entries are dropped.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn enqueue(
        &self,
        mut request: ApiRequest,
        priority: Option<i32>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> QueuedRequest {
        request.headers.remove("authorization");
        let now = self.now();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let entry = QueuedRequest {
            id: queue_id(&request, now, sequence),
            priority: priority.unwrap_or(self.settings.default_priority),
            request,
            created_at: now,
            metadata,
        };

        let dropped = {
            let mut state = self.state.lock();
            state.entries.push(entry.clone());
            self.enforce_capacity(&mut state)
        };
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        if !dropped.is_empty() {
            self.counters.dropped.fetch_add(dropped.len() as u64, Ordering::Relaxed);
        }

        self.persist().await;
        info!(queue_id = %entry.id, priority = entry.priority, "request queued for replay");
        entry
    }

    /// Replay eligible entries when online
    #[instrument(skip(self))]
    pub async fn flush(&self) -> FlushReport {
        if !self.is_online() {
            debug!("offline; flush skipped");
            return FlushReport::default();
        }
        self.run_flush().await
    }

    /// Replay regardless of the connectivity snapshot
    pub async fn force_flush(&self) -> FlushReport {
        self.run_flush().await
    }

    async fn run_flush(&self) -> FlushReport {
        if self.flushing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err()
        {
            debug!("flush already in progress");
            return FlushReport::default();
        }
        let _guard = FlushGuard(&self.flushing);

        let (batch, already_in_flight) = self.claim_batch();
        let mut report = FlushReport { skipped: already_in_flight, ..FlushReport::default() };
        let mut remaining = batch.into_iter();

        while let Some(entry) = remaining.next() {
            report.attempted += 1;
            let outcome = self.transport.send(&entry.request).await;

            let resolution = match &outcome {
                Ok(response) if response.status < 400 => Resolution::Delivered,
                Ok(response) if response.status < 500 => Resolution::Rejected(response.status),
                _ if entry.is_past_retention(self.now(), self.settings.retention) => {
                    Resolution::Expired
                }
                _ => Resolution::Retry,
            };

            match resolution {
                Resolution::Delivered => {
                    report.succeeded += 1;
                    self.counters.replayed.fetch_add(1, Ordering::Relaxed);
                    debug!(queue_id = %entry.id, "queued request delivered");
                    self.remove_entry(&entry.id).await;
                }
                Resolution::Rejected(status) => {
                    report.dropped_terminal += 1;
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(queue_id = %entry.id, status, "queued request rejected; dropping");
                    self.remove_entry(&entry.id).await;
                }
                Resolution::Expired => {
                    report.dropped_expired += 1;
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(queue_id = %entry.id, "queued request past retention; dropping");
                    self.remove_entry(&entry.id).await;
                }
                Resolution::Retry => {
                    report.requeued += 1;
                    self.state.lock().in_flight.remove(&entry.id);
                    debug!(queue_id = %entry.id, "queued request kept for the next flush");
                }
            }

            if let Err(err) = &outcome {
                if err.is_network_failure() {
                    debug!(error = %err, "connectivity lost during flush; stopping");
                    break;
                }
            }
        }

        let unreached: Vec<String> = remaining.map(|entry| entry.id).collect();
        if !unreached.is_empty() {
            report.skipped += unreached.len();
            let mut state = self.state.lock();
            for id in &unreached {
                state.in_flight.remove(id);
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                dropped_terminal = report.dropped_terminal,
                dropped_expired = report.dropped_expired,
                requeued = report.requeued,
                skipped = report.skipped,
                "offline queue flushed"
            );
        }
        report
    }

    /// Mark every entry that is not already processing as in flight and
    /// return them in replay order
    fn claim_batch(&self) -> (Vec<QueuedRequest>, usize) {
        let mut state = self.state.lock();
        let already = state.in_flight.len();
        let mut batch: Vec<QueuedRequest> = state
            .entries
            .iter()
            .filter(|entry| !state.in_flight.contains(&entry.id))
            .cloned()
            .collect();
        sort_for_replay(&mut batch);
        for entry in &batch {
            state.in_flight.insert(entry.id.clone());
        }
        (batch, already)
    }

    /// Remove the entry with `id`; returns whether it existed
    pub async fn remove(&self, id: &str) -> bool {
        self.remove_entry(id).await.is_some()
    }

    async fn remove_entry(&self, id: &str) -> Option<QueuedRequest> {
        let removed = {
            let mut state = self.state.lock();
            state.in_flight.remove(id);
            let index = state.entries.iter().position(|entry| entry.id == id)?;
            state.entries.remove(index)
        };
        self.persist().await;
        Some(removed)
    }

    /// Drop every entry; returns how many were removed
    pub async fn clear(&self) -> usize {
        let count = {
            let mut state = self.state.lock();
            let count = state.entries.len();
            state.entries.clear();
            state.in_flight.clear();
            count
        };
        self.persist().await;
        info!(count, "offline queue cleared");
        count
    }

    /// Pending entries in replay order
    pub fn pending(&self) -> Vec<QueuedRequest> {
        let mut entries = self.state.lock().entries.clone();
        sort_for_replay(&mut entries);
        entries
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let now = self.now();
        let state = self.state.lock();
        let mut by_priority = BTreeMap::new();
        for entry in &state.entries {
            *by_priority.entry(entry.priority).or_insert(0) += 1;
        }

        QueueStats {
            pending: state.entries.len(),
            in_flight: state.in_flight.len(),
            oldest_age: state.entries.iter().map(|entry| entry.age(now)).max().unwrap_or_default(),
            by_priority,
            total_enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            total_replayed: self.counters.replayed.load(Ordering::Relaxed),
            total_dropped: self.counters.dropped.load(Ordering::Relaxed),
            is_online: self.is_online(),
            flush_in_progress: self.flushing.load(Ordering::Acquire),
        }
    }

    /// Drop the oldest idle entries until the queue fits its maximum size
    fn enforce_capacity(&self, state: &mut QueueState) -> Vec<QueuedRequest> {
        let mut dropped = Vec::new();
        while state.entries.len() > self.settings.max_queue_size {
            let oldest = state
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| !state.in_flight.contains(&entry.id))
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(index, _)| index);
            let Some(index) = oldest else { break };
            let entry = state.entries.remove(index);
            warn!(queue_id = %entry.id, "offline queue full; dropping oldest entry");
            dropped.push(entry);
        }
        dropped
    }

    async fn read_records(&self) -> QueueResult<Vec<QueuedRequestRecord>> {
        let Some(raw) = self.store.get_string(&self.settings.storage_key).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|e| QueueError::CorruptSnapshot(e.to_string()))
    }

    async fn persist(&self) {
        // serialize writers so an older snapshot never lands last
        let _write = self.persist_lock.lock().await;
        let records: Vec<QueuedRequestRecord> =
            self.state.lock().entries.iter().map(QueuedRequestRecord::from).collect();
        if let Err(e) = self.write_records(&records).await {
            warn!(error = %e, "queue fault while persisting; continuing in memory");
        }
    }

    async fn write_records(&self, records: &[QueuedRequestRecord]) -> QueueResult<()> {
        let raw = serde_json::to_string(records)?;
        self.store.set_string(&self.settings.storage_key, &raw).await?;
        Ok(())
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("settings", &self.settings)
            .field("pending", &self.len())
            .field("flushing", &self.flushing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn sort_for_replay(entries: &mut [QueuedRequest]) {
    entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
}

/// `<unix millis>-<12 hex chars>`, unique per process via `sequence`
fn queue_id(request: &ApiRequest, now: DateTime<Utc>, sequence: u64) -> String {
    let millis = now.timestamp_millis();
    let mut hasher = blake3::Hasher::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(request.display_url().as_bytes());
    if let Some(body) = &request.body {
        hasher.update(body);
    }
    hasher.update(&millis.to_le_bytes());
    hasher.update(&sequence.to_le_bytes());
    let digest = hex::encode(hasher.finalize().as_bytes());
    format!("{millis}-{}", &digest[..12])
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use resilink_common::time::MockClock;
    use resilink_domain::{ApiError, ApiResponse, ApiResult, Headers, TransportErrorKind};

    use super::*;
    use crate::connectivity::ManualConnectivity;
    use crate::storage::MemoryStore;

    /// Answers each request with the status registered for its path
    #[derive(Default)]
    struct ScriptedTransport {
        statuses: Mutex<BTreeMap<String, u16>>,
        sent: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn respond(&self, path: &str, status: u16) {
            self.statuses.lock().insert(path.to_owned(), status);
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &ApiRequest) -> ApiResult<ApiResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().push(request.path.clone());
            match self.statuses.lock().get(&request.path).copied() {
                Some(0) => Err(ApiError::Connectivity {
                    kind: TransportErrorKind::Connection,
                    message: "connection refused".into(),
                }),
                Some(status) => Ok(ApiResponse::new(status, Headers::new(), Vec::new())),
                None => Ok(ApiResponse::new(200, Headers::new(), Vec::new())),
            }
        }
    }

    struct Harness {
        queue: Arc<OfflineQueue>,
        store: Arc<MemoryStore>,
        transport: Arc<ScriptedTransport>,
        connectivity: Arc<ManualConnectivity>,
        clock: MockClock,
    }

    fn harness(settings: OfflineSettings, online: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::default());
        let connectivity = Arc::new(ManualConnectivity::new(online));
        let clock = MockClock::new();
        let queue = Arc::new(
            OfflineQueue::new(
                settings,
                Arc::clone(&store) as Arc<dyn KeyValueStore>,
                Arc::clone(&connectivity) as Arc<dyn ConnectivitySignal>,
                Arc::clone(&transport) as Arc<dyn Transport>,
            )
            .with_clock(Arc::new(clock.clone())),
        );
        Harness { queue, store, transport, connectivity, clock }
    }

    fn post(path: &str) -> ApiRequest {
        ApiRequest::post(path).with_base_url("https://api.example.com").with_body(b"{}".to_vec())
    }

    #[tokio::test]
    async fn test_enqueue_strips_authorization_and_persists() {
        let h = harness(OfflineSettings::default(), false);
        let entry = h
            .queue
            .enqueue(
                post("/notes").with_header("Authorization", "Bearer secret"),
                None,
                BTreeMap::new(),
            )
            .await;

        assert!(entry.request.headers.get("authorization").is_none());
        assert_eq!(entry.priority, 0);
        let raw = h.store.get_string("resilink.offline_queue").await.unwrap().unwrap();
        assert!(!raw.contains("secret"));
        assert!(raw.contains("\"baseUrl\":\"https://api.example.com\""));
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let h = harness(OfflineSettings::default(), false);
        let a = h.queue.enqueue(post("/notes"), None, BTreeMap::new()).await;
        let b = h.queue.enqueue(post("/notes"), None, BTreeMap::new()).await;
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with(&h.clock.utc_now().timestamp_millis().to_string()));
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let h = harness(OfflineSettings { max_queue_size: 2, ..OfflineSettings::default() }, false);
        for path in ["/a", "/b", "/c"] {
            h.queue.enqueue(post(path), Some(5), BTreeMap::new()).await;
            h.clock.advance(Duration::from_secs(1));
        }
        let paths: Vec<String> = h.queue.pending().into_iter().map(|e| e.request.path).collect();
        assert_eq!(paths, vec!["/b".to_string(), "/c".to_string()]);
        assert_eq!(h.queue.stats().total_dropped, 1);
    }

    #[tokio::test]
    async fn test_flush_order_priority_then_fifo() {
        let h = harness(OfflineSettings::default(), true);
        let entries =
            [("/low-1", 0), ("/high-1", 10), ("/low-2", 0), ("/high-2", 10), ("/mid", 5)];
        for (path, priority) in entries {
            h.queue.enqueue(post(path), Some(priority), BTreeMap::new()).await;
            h.clock.advance(Duration::from_millis(10));
        }

        let report = h.queue.flush().await;
        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded, 5);
        assert_eq!(h.transport.sent(), vec!["/high-1", "/high-2", "/mid", "/low-1", "/low-2"]);
        assert!(h.queue.is_empty());
        let persisted = h.store.get_string("resilink.offline_queue").await.unwrap();
        assert_eq!(persisted.as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_replay_failure_policy() {
        let h = harness(OfflineSettings::default(), true);
        h.transport.respond("/gone", 404);
        h.transport.respond("/busy", 500);
        h.queue.enqueue(post("/gone"), None, BTreeMap::new()).await;
        h.queue.enqueue(post("/busy"), None, BTreeMap::new()).await;

        let report = h.queue.flush().await;
        assert_eq!(report.dropped_terminal, 1);
        assert_eq!(report.requeued, 1);
        let pending = h.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request.path, "/busy");
        assert_eq!(h.queue.stats().in_flight, 0);

        h.clock.advance(Duration::from_secs(8 * 24 * 3600));
        let report = h.queue.flush().await;
        assert_eq!(report.dropped_expired, 1);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_flush_stops_on_connectivity_failure() {
        let h = harness(OfflineSettings::default(), true);
        h.transport.respond("/first", 0);
        h.queue.enqueue(post("/first"), Some(1), BTreeMap::new()).await;
        h.queue.enqueue(post("/second"), None, BTreeMap::new()).await;

        let report = h.queue.flush().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.requeued, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(h.queue.len(), 2);
        assert_eq!(h.queue.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_flush_requires_online_unless_forced() {
        let h = harness(OfflineSettings::default(), false);
        h.queue.enqueue(post("/notes"), None, BTreeMap::new()).await;

        assert_eq!(h.queue.flush().await, FlushReport::default());
        assert_eq!(h.transport.calls.load(Ordering::SeqCst), 0);

        let report = h.queue.force_flush().await;
        assert_eq!(report.succeeded, 1);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_restores_and_drops_expired() {
        let h = harness(OfflineSettings::default(), false);
        h.queue.enqueue(post("/old"), None, BTreeMap::new()).await;
        h.clock.advance(Duration::from_secs(6 * 24 * 3600));
        h.queue.enqueue(post("/recent"), Some(3), BTreeMap::new()).await;
        h.clock.advance(Duration::from_secs(2 * 24 * 3600));

        let restarted = OfflineQueue::new(
            OfflineSettings::default(),
            Arc::clone(&h.store) as Arc<dyn KeyValueStore>,
            Arc::clone(&h.connectivity) as Arc<dyn ConnectivitySignal>,
            Arc::clone(&h.transport) as Arc<dyn Transport>,
        )
        .with_clock(Arc::new(h.clock.clone()));

        assert_eq!(restarted.initialize().await, 1);
        let pending = restarted.pending();
        assert_eq!(pending[0].request.path, "/recent");
        assert_eq!(pending[0].priority, 3);
        assert_eq!(pending[0].request.body.as_deref(), Some(&b"{}"[..]));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let h = harness(OfflineSettings::default(), false);
        h.store.set_string("resilink.offline_queue", "not json").await.unwrap();
        assert_eq!(h.queue.initialize().await, 0);
        h.queue.enqueue(post("/notes"), None, BTreeMap::new()).await;
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_clear_and_stats() {
        let h = harness(OfflineSettings::default(), false);
        let a = h.queue.enqueue(post("/a"), Some(1), BTreeMap::new()).await;
        h.queue.enqueue(post("/b"), Some(2), BTreeMap::new()).await;
        h.clock.advance(Duration::from_secs(30));

        let stats = h.queue.stats();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.by_priority[&1], 1);
        assert_eq!(stats.oldest_age, Duration::from_secs(30));
        assert!(!stats.is_online);

        assert!(h.queue.remove(&a.id).await);
        assert!(!h.queue.remove(&a.id).await);
        assert_eq!(h.queue.clear().await, 1);
        assert!(h.queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watcher_flushes_on_reconnect() {
        let h = harness(OfflineSettings::default(), false);
        h.queue.enqueue(post("/notes"), None, BTreeMap::new()).await;
        h.queue.start();

        h.connectivity.set_online(true);
        for _ in 0..50 {
            if h.queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(h.queue.is_empty());
        assert_eq!(h.queue.stats().total_replayed, 1);

        h.queue.dispose().await;
        assert_eq!(h.queue.stats().total_enqueued, 0);
    }
}
