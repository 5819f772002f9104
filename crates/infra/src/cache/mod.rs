//! Two-tier response cache
//!
//! Memory tier: a strict LRU bounded by entry count. Durable tier: one JSON
//! record per entry in a [`KeyValueStore`] under [`CACHE_KEY_PREFIX`],
//! pruned oldest-created first to an entry and byte budget. The durable
//! tier is indexed in memory (bodies excluded) on first use, so budgets,
//! stats and invalidation never re-read the store.
//!
//! Lookups check memory, then durable storage, and promote durable hits into
//! memory. Every storage or serialization fault is logged and treated as a
//! miss; a corrupt durable record is deleted.
//!
//! ## Lookup outcomes
//! | Entry state | Validators | Result |
//! |-------------|-----------|--------|
//! | explicit lifetime, not expired | any | `Fresh` |
//! | no explicit lifetime, inside the staleness window | yes | `Revalidate` |
//! | no explicit lifetime, inside the staleness window | no | `Fresh` |
//! | expired, within `validator_retention` | yes | `Revalidate` |
//! | expired otherwise | - | `Miss` (entry deleted) |

mod error;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use resilink_common::collections::BoundedLru;
use resilink_common::time::{Clock, SystemClock};
use resilink_core::cache::control::{entry_from_response, is_storable, refreshed_entry};
use resilink_core::{fingerprint, CacheControl, Freshness, KeyValueStore};
use resilink_domain::{
    ApiRequest, ApiResponse, CacheEntry, CacheOptions, CacheSettings, CacheStats, HttpMethod,
};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

pub use self::error::{CacheError, CacheResult};

/// Prefix of every durable cache key
pub const CACHE_KEY_PREFIX: &str = "resilink.cache.";

/// Outcome of [`ResponseCache::lookup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Serve without contacting the server
    Fresh(CacheEntry),
    /// Send a conditional request built from the entry's validators
    Revalidate(CacheEntry),
    Miss,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    revalidations: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
}

impl CacheCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        let counters =
            [&self.hits, &self.misses, &self.revalidations, &self.stores, &self.evictions];
        for counter in counters {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Durable record plus its stored size
struct DurableRecord {
    entry: CacheEntry,
    size: usize,
}

impl DurableRecord {
    fn indexed(mut entry: CacheEntry, size: usize) -> Self {
        entry.body = Vec::new();
        Self { entry, size }
    }
}

/// Body-less view of the durable tier, ordered by creation for pruning
#[derive(Default)]
struct DurableIndex {
    records: HashMap<String, DurableRecord>,
    by_age: BTreeSet<(DateTime<Utc>, String)>,
    bytes: usize,
}

impl DurableIndex {
    fn insert(&mut self, record: DurableRecord) {
        let key = record.entry.fingerprint.clone();
        self.remove(&key);
        self.bytes += record.size;
        self.by_age.insert((record.entry.created_at, key.clone()));
        self.records.insert(key, record);
    }

    fn remove(&mut self, key: &str) -> Option<DurableRecord> {
        let record = self.records.remove(key)?;
        self.bytes = self.bytes.saturating_sub(record.size);
        self.by_age.remove(&(record.entry.created_at, key.to_owned()));
        Some(record)
    }

    fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn matching(&self, matches: impl Fn(&CacheEntry) -> bool) -> Vec<String> {
        self.records
            .values()
            .filter(|record| matches(&record.entry))
            .map(|record| record.entry.fingerprint.clone())
            .collect()
    }

    /// Oldest-created keys to drop to get back within budget
    fn over_budget(&self, max_entries: usize, max_bytes: usize) -> Vec<String> {
        let mut count = self.records.len();
        let mut bytes = self.bytes;
        let mut victims = Vec::new();
        for (_, key) in &self.by_age {
            if count <= max_entries && bytes <= max_bytes {
                break;
            }
            count -= 1;
            bytes = bytes.saturating_sub(self.records.get(key).map_or(0, |record| record.size));
            victims.push(key.clone());
        }
        victims
    }
}

pub struct ResponseCache {
    settings: CacheSettings,
    memory: Mutex<BoundedLru<String, CacheEntry>>,
    store: Option<Arc<dyn KeyValueStore>>,
    durable_index: OnceCell<Mutex<DurableIndex>>,
    clock: Arc<dyn Clock>,
    counters: CacheCounters,
}

impl ResponseCache {
    /// Memory-only cache
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            memory: Mutex::new(BoundedLru::with_capacity(settings.max_memory_entries)),
            settings,
            store: None,
            durable_index: OnceCell::new(),
            clock: Arc::new(SystemClock),
            counters: CacheCounters::default(),
        }
    }

    /// Cache with a durable tier in `store`
    pub fn with_store(settings: CacheSettings, store: Arc<dyn KeyValueStore>) -> Self {
        Self { store: Some(store), ..Self::new(settings) }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn is_cacheable_method(&self, method: HttpMethod) -> bool {
        self.settings.cacheable_methods.contains(&method)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.utc_now()
    }

    /// Decide how a request should use its cached entry
    ///
    /// Request-side `no-store` bypasses the cache entirely; request-side
    /// `no-cache`, `max-age=0` or `force_refresh` demand revalidation.
    pub async fn lookup(&self, request: &ApiRequest, options: &CacheOptions) -> CacheLookup {
        if !options.enabled || !self.is_cacheable_method(request.method) {
            return CacheLookup::Miss;
        }
        let control = CacheControl::from_headers(&request.headers);
        if control.no_store {
            return CacheLookup::Miss;
        }

        let key = fingerprint(request);
        let Some(entry) = self.find(&key).await else {
            CacheCounters::bump(&self.counters.misses);
            debug!(fingerprint = %key, "cache miss");
            return CacheLookup::Miss;
        };

        let now = self.now();
        let must_revalidate =
            options.force_refresh || control.no_cache || control.max_age == Some(0);
        let outcome = if must_revalidate {
            if entry.has_validators() {
                CacheLookup::Revalidate(entry)
            } else {
                CacheLookup::Miss
            }
        } else {
            match Freshness::classify(&entry, now, self.settings.default_ttl) {
                Freshness::Fresh => CacheLookup::Fresh(entry),
                Freshness::Stale if entry.has_validators() => CacheLookup::Revalidate(entry),
                Freshness::Stale => CacheLookup::Fresh(entry),
                Freshness::Expired if self.keeps_for_revalidation(&entry, now) => {
                    CacheLookup::Revalidate(entry)
                }
                Freshness::Expired => {
                    self.invalidate(&key).await;
                    CacheLookup::Miss
                }
            }
        };

        match &outcome {
            CacheLookup::Fresh(_) => {
                CacheCounters::bump(&self.counters.hits);
                debug!(fingerprint = %key, "cache hit");
            }
            CacheLookup::Revalidate(_) => {
                CacheCounters::bump(&self.counters.revalidations);
                debug!(fingerprint = %key, "cache entry needs revalidation");
            }
            CacheLookup::Miss => {
                CacheCounters::bump(&self.counters.misses);
                debug!(fingerprint = %key, "cache entry unusable");
            }
        }
        outcome
    }

    /// Fresh entry for `request`, if any
    pub async fn get(&self, request: &ApiRequest) -> Option<CacheEntry> {
        match self.lookup(request, &CacheOptions::default()).await {
            CacheLookup::Fresh(entry) => Some(entry),
            CacheLookup::Revalidate(_) | CacheLookup::Miss => None,
        }
    }

    /// Whether `entry` may answer `request` right now without revalidation
    pub fn is_valid(&self, entry: &CacheEntry, request: &ApiRequest) -> bool {
        let control = CacheControl::from_headers(&request.headers);
        entry.fingerprint == fingerprint(request)
            && !control.forbids_storage()
            && !entry.is_expired(self.now(), self.settings.default_ttl)
    }

    /// Store the response when it is cacheable; returns whether it was stored
    #[instrument(skip_all, fields(method = %request.method, status = response.status))]
    pub async fn put(
        &self,
        request: &ApiRequest,
        response: &ApiResponse,
        ttl_override: Option<Duration>,
    ) -> bool {
        if !is_storable(request, response, &self.settings.cacheable_methods) {
            debug!("response not storable");
            return false;
        }
        let entry =
            entry_from_response(fingerprint(request), request, response, self.now(), ttl_override);
        self.store_entry(entry).await;
        true
    }

    /// Apply a 304 to the entry cached for `request`
    pub async fn refresh(
        &self,
        request: &ApiRequest,
        not_modified: &ApiResponse,
        ttl_override: Option<Duration>,
    ) -> Option<CacheEntry> {
        let entry = self.find(&fingerprint(request)).await?;
        Some(self.refresh_entry(&entry, not_modified, ttl_override).await)
    }

    /// Replace `entry` with a copy whose freshness window starts now
    pub async fn refresh_entry(
        &self,
        entry: &CacheEntry,
        not_modified: &ApiResponse,
        ttl_override: Option<Duration>,
    ) -> CacheEntry {
        let refreshed = refreshed_entry(entry, not_modified, self.now(), ttl_override);
        debug!(fingerprint = %refreshed.fingerprint, "cache entry revalidated");
        self.store_entry(refreshed.clone()).await;
        refreshed
    }

    pub async fn remove(&self, request: &ApiRequest) -> bool {
        self.invalidate(&fingerprint(request)).await
    }

    /// Drop the entry with `key` from both tiers
    pub async fn invalidate(&self, key: &str) -> bool {
        let in_memory = self.memory.lock().remove(key).is_some();
        if self.store.is_none() {
            return in_memory;
        }
        let in_store = self.index().await.lock().contains(key);
        self.durable_remove(key).await;
        in_memory || in_store
    }

    /// Drop every entry at or below `prefix`; returns the number of
    /// distinct entries removed
    ///
    /// Matching stops at path boundaries: `/items/1` covers `/items/1`,
    /// `/items/1/notes` and `/items/1?page=2` but not `/items/10`.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.remove_matching(|entry| is_under(&entry.url, prefix)).await
    }

    /// Delete expired entries that cannot be revalidated any more
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.now();
        let ttl = self.settings.default_ttl;
        let removed = self
            .remove_matching(|entry| {
                entry.is_expired(now, ttl) && !self.keeps_for_revalidation(entry, now)
            })
            .await;
        if removed > 0 {
            debug!(removed, "expired cache entries swept");
        }
        removed
    }

    /// Empty both tiers
    pub async fn clear(&self) {
        self.memory.lock().clear();
        if self.store.is_none() {
            return;
        }
        let mut keys: HashSet<String> = self.index().await.lock().records.keys().cloned().collect();
        match self.durable_keys().await {
            Ok(stored) => keys.extend(stored),
            Err(e) => warn!(error = %e, "cache fault while clearing durable tier"),
        }
        for key in keys {
            self.durable_remove(&key).await;
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let now = self.now();
        let ttl = self.settings.default_ttl;

        let (memory_count, mut expired): (usize, HashSet<String>) = {
            let memory = self.memory.lock();
            let expired = memory
                .iter()
                .filter(|(_, entry)| entry.is_expired(now, ttl))
                .map(|(key, _)| key.clone())
                .collect();
            (memory.len(), expired)
        };

        let (disk_count, disk_bytes) = if self.store.is_some() {
            let index = self.index().await.lock();
            expired.extend(index.matching(|entry| entry.is_expired(now, ttl)));
            (index.len(), index.bytes)
        } else {
            (0, 0)
        };

        CacheStats {
            memory_count,
            disk_count,
            expired_count: expired.len(),
            disk_bytes,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            revalidations: self.counters.revalidations.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Drop the memory tier and counters; the durable tier is kept
    pub fn dispose(&self) {
        self.memory.lock().clear();
        self.counters.reset();
        debug!("response cache disposed");
    }

    fn keeps_for_revalidation(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        if !entry.has_validators() {
            return false;
        }
        let retention = chrono::Duration::from_std(self.settings.validator_retention)
            .unwrap_or(chrono::Duration::MAX);
        entry
            .effective_expiry(self.settings.default_ttl)
            .checked_add_signed(retention)
            .map_or(true, |deadline| now <= deadline)
    }

    async fn find(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.lock().get(key) {
            return Some(entry.clone());
        }
        match self.durable_load(key).await {
            Ok(Some(entry)) => {
                debug!(fingerprint = %key, "durable cache hit promoted to memory");
                self.insert_memory(entry.clone());
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(fingerprint = %key, error = %e, "cache fault on lookup");
                None
            }
        }
    }

    fn insert_memory(&self, entry: CacheEntry) {
        let evicted = self.memory.lock().insert(entry.fingerprint.clone(), entry);
        if let Some(evicted) = evicted {
            CacheCounters::bump(&self.counters.evictions);
            debug!(fingerprint = %evicted.key, "evicted least recently used cache entry");
        }
    }

    async fn store_entry(&self, entry: CacheEntry) {
        CacheCounters::bump(&self.counters.stores);
        self.insert_memory(entry.clone());

        if self.store.is_some() {
            if let Err(e) = self.durable_save(&entry).await {
                warn!(
                    fingerprint = %entry.fingerprint,
                    error = %e,
                    "cache fault while persisting entry"
                );
                return;
            }
            self.prune_durable().await;
        }
    }

    async fn remove_matching<F>(&self, matches: F) -> usize
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let mut removed: HashSet<String> = {
            let mut memory = self.memory.lock();
            let keys: Vec<String> = memory
                .iter()
                .filter(|(_, entry)| matches(entry))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                memory.remove(key);
            }
            keys.into_iter().collect()
        };

        if self.store.is_some() {
            let durable = self.index().await.lock().matching(&matches);
            for key in durable {
                self.durable_remove(&key).await;
                removed.insert(key);
            }
        }
        removed.len()
    }

    /// Keep the durable tier within its entry and byte budget
    async fn prune_durable(&self) {
        let victims = self
            .index()
            .await
            .lock()
            .over_budget(self.settings.max_disk_entries, self.settings.max_disk_bytes);
        for key in victims {
            self.durable_remove(&key).await;
            CacheCounters::bump(&self.counters.evictions);
            debug!(fingerprint = %key, "pruned durable cache entry");
        }
    }

    /// Durable index, scanned from the store on first use
    async fn index(&self) -> &Mutex<DurableIndex> {
        self.durable_index.get_or_init(|| async { Mutex::new(self.scan_durable().await) }).await
    }

    /// Fingerprints of every durable record, prefix stripped
    async fn durable_keys(&self) -> CacheResult<Vec<String>> {
        let Some(store) = &self.store else { return Ok(Vec::new()) };
        Ok(store
            .keys()
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(CACHE_KEY_PREFIX).map(str::to_owned))
            .collect())
    }

    /// Read every durable record into a fresh index; corrupt ones are deleted
    async fn scan_durable(&self) -> DurableIndex {
        let mut index = DurableIndex::default();
        let keys = match self.durable_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "cache fault while listing durable entries");
                return index;
            }
        };

        for key in keys {
            match self.durable_read(&key).await {
                Ok(Some(record)) => index.insert(DurableRecord::indexed(record.entry, record.size)),
                Ok(None) => {}
                Err(fault @ CacheError::Corrupt { .. }) => {
                    warn!(error = %fault, "deleting corrupt cache record");
                    self.store_remove(&key).await;
                }
                Err(e) => warn!(fingerprint = %key, error = %e, "cache fault while reading entry"),
            }
        }
        debug!(entries = index.len(), bytes = index.bytes, "durable cache index built");
        index
    }

    async fn durable_load(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        match self.durable_read(key).await {
            Err(fault @ CacheError::Corrupt { .. }) => {
                warn!(error = %fault, "deleting corrupt cache record");
                self.durable_remove(key).await;
                Ok(None)
            }
            other => Ok(other?.map(|record| record.entry)),
        }
    }

    async fn durable_read(&self, key: &str) -> CacheResult<Option<DurableRecord>> {
        let Some(store) = &self.store else { return Ok(None) };
        let Some(raw) = store.get_string(&storage_key(key)).await? else { return Ok(None) };

        let entry = serde_json::from_str::<CacheEntry>(&raw)
            .map_err(|e| CacheError::Corrupt { key: key.to_owned(), message: e.to_string() })?;
        Ok(Some(DurableRecord { size: raw.len(), entry }))
    }

    async fn durable_save(&self, entry: &CacheEntry) -> CacheResult<()> {
        let Some(store) = &self.store else { return Ok(()) };
        let index = self.index().await;
        let raw = serde_json::to_string(entry)?;
        store.set_string(&storage_key(&entry.fingerprint), &raw).await?;
        index.lock().insert(DurableRecord::indexed(entry.clone(), raw.len()));
        Ok(())
    }

    async fn durable_remove(&self, key: &str) {
        if self.store_remove(key).await {
            self.index().await.lock().remove(key);
        }
    }

    /// Delete from the store only; false when the store refused
    async fn store_remove(&self, key: &str) -> bool {
        let Some(store) = &self.store else { return false };
        match store.remove(&storage_key(key)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(fingerprint = %key, error = %e, "cache fault while deleting entry");
                false
            }
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("settings", &self.settings)
            .field("memory_entries", &self.memory.lock().len())
            .field("durable", &self.store.is_some())
            .finish()
    }
}

fn is_under(url: &str, prefix: &str) -> bool {
    match url.strip_prefix(prefix) {
        Some(rest) => {
            rest.is_empty() || prefix.ends_with('/') || rest.starts_with(['/', '?', '#'])
        }
        None => false,
    }
}

fn storage_key(fingerprint: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{fingerprint}")
}
