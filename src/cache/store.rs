//! The cache store.
//!
//! One LRU-ordered map from [`CacheKey`] to entry state. The store is the only
//! owner of entries; engines read and write them exclusively through the
//! methods below, each of which takes the lock once and releases it before
//! returning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use tessera_types::Category;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::config::CacheConfig;
use super::entry::{
    CacheEntry, CachedQuery, DataUpdate, EntryFlags, FetchFuture, FetchResult, FetchTicket,
    QueryData, SlotState,
};
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use crate::error::DataError;

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "tessera_cache_hit_total";
const METRIC_CACHE_MISS: &str = "tessera_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "tessera_cache_evict_total";
const METRIC_CACHE_GC: &str = "tessera_cache_gc_total";

type Entries = LruCache<CacheKey, CacheEntry>;

/// Interest a subscription registers on its entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Entry takes part in push-driven invalidation.
    pub realtime: bool,
    /// Entry is refetched when the host regains focus.
    pub refetch_on_focus: bool,
    /// Overrides the GC grace window once the entry is unreferenced.
    pub cache_time: Option<Duration>,
    /// Retry budget for background refetches of the entry.
    pub retry: Option<u32>,
}

/// Outcome of an invalidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    /// Marked stale; subscribed, so a background refetch is owed.
    pub refetch: Vec<CacheKey>,
    /// Marked stale; nobody subscribed but a fetch was in flight.
    pub marked_stale: Vec<CacheKey>,
    /// Dropped outright since nothing referenced them.
    pub removed: Vec<CacheKey>,
    /// Already stale and still awaiting their refetch.
    pub already_stale: usize,
}

impl Invalidation {
    /// Number of entries whose state changed.
    pub fn affected(&self) -> usize {
        self.refetch.len() + self.marked_stale.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.affected() == 0
    }

    pub fn merge(&mut self, other: Invalidation) {
        self.refetch.extend(other.refetch);
        self.marked_stale.extend(other.marked_stale);
        self.removed.extend(other.removed);
        self.already_stale += other.already_stale;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub subscribed: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub collected: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    collected: AtomicU64,
}

pub struct CacheStore {
    entries: RwLock<Entries>,
    config: CacheConfig,
    next_fetch_id: AtomicU64,
    counters: Counters,
}

impl CacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            // Capacity is enforced by `evict_overflow`, which skips pinned entries.
            entries: RwLock::new(LruCache::unbounded()),
            config: config.clone(),
            next_fetch_id: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read an entry, refreshing its LRU position.
    ///
    /// An unreferenced entry past its grace window is collected here instead
    /// of being served.
    pub fn get(&self, key: &CacheKey) -> Option<CachedQuery> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let expired = entries
            .peek(key)
            .is_some_and(|entry| entry.is_collectable(now, self.config.gc_grace()));
        if expired {
            entries.pop(key);
            drop(entries);
            self.record_collected(key);
            self.record_miss(key);
            return None;
        }

        let view = entries.get(key).map(|entry| entry.view(now));
        drop(entries);

        match &view {
            Some(view) if view.data.is_some() => self.record_hit(key),
            _ => self.record_miss(key),
        }
        view
    }

    /// Read an entry without touching LRU order or metrics.
    pub fn peek(&self, key: &CacheKey) -> Option<CachedQuery> {
        let now = Instant::now();
        rw_read(&self.entries, SOURCE, "peek")
            .peek(key)
            .map(|entry| entry.view(now))
    }

    /// Store fresh data for `key`, fresh for `stale_time`.
    pub fn set(&self, key: &CacheKey, data: QueryData, stale_time: Duration) {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        let entry = entries.get_or_insert_mut(key.clone(), || CacheEntry::new(now));
        entry.data = Some(data);
        entry.error = None;
        entry.fetched_at = Some(now);
        entry.stale_time = stale_time;
        entry.stale_after = Some(now + stale_time);
        entry.invalidated = false;
        entry.touch();
        self.evict_overflow(&mut entries, key);
    }

    /// Record a failed fetch. Existing data is kept.
    pub fn set_error(&self, key: &CacheKey, error: DataError) {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "set_error");
        let entry = entries.get_or_insert_mut(key.clone(), || CacheEntry::new(now));
        entry.error = Some(error);
        entry.touch();
        self.evict_overflow(&mut entries, key);
    }

    /// Replace the data of `key` without changing its freshness.
    pub fn replace_data(&self, key: &CacheKey, data: Option<QueryData>) {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "replace_data");
        let entry = entries.get_or_insert_mut(key.clone(), || CacheEntry::new(now));
        entry.data = data;
        entry.touch();
        self.evict_overflow(&mut entries, key);
    }

    /// Derive new data for `key` from its current data under one lock.
    ///
    /// Returns the state the entry had before when `update` changed it, where
    /// the inner `None` means the entry did not exist. Returns `None` when
    /// nothing changed.
    pub fn update_data<F>(&self, key: &CacheKey, update: F) -> Option<Option<SlotState>>
    where
        F: FnOnce(Option<&QueryData>) -> DataUpdate,
    {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "update_data");
        let current = entries.peek(key);
        let prior = current.map(CacheEntry::slot_state);
        let data = match update(current.and_then(|entry| entry.data.as_ref())) {
            DataUpdate::Keep => return None,
            DataUpdate::Clear if current.is_none_or(|entry| entry.data.is_none()) => return None,
            DataUpdate::Clear => None,
            DataUpdate::Set(data) => Some(data),
        };

        let entry = entries.get_or_insert_mut(key.clone(), || CacheEntry::new(now));
        entry.data = data;
        entry.touch();
        self.evict_overflow(&mut entries, key);
        Some(prior)
    }

    pub fn invalidate(&self, key: &CacheKey) -> Invalidation {
        self.invalidate_where(|candidate, _| candidate == key)
    }

    /// Invalidate every entry matching `predicate`.
    ///
    /// Matching entries that nothing references are removed. Referenced ones
    /// are marked stale and any fetch they had in flight is detached, so the
    /// next fetch starts over. An entry that is already stale is left alone,
    /// which makes repeated invalidation a no-op.
    pub fn invalidate_where<F>(&self, predicate: F) -> Invalidation
    where
        F: FnMut(&CacheKey, EntryFlags) -> bool,
    {
        self.invalidate_matching(predicate, false)
    }

    /// Invalidate on behalf of a confirmed backend write.
    ///
    /// Same as [`CacheStore::invalidate_where`], except that already stale
    /// entries are invalidated again. A fetch they have in flight may have
    /// read the backend before the write landed, so it is detached and its
    /// result cannot make the entry fresh.
    pub fn invalidate_written<F>(&self, predicate: F) -> Invalidation
    where
        F: FnMut(&CacheKey, EntryFlags) -> bool,
    {
        self.invalidate_matching(predicate, true)
    }

    fn invalidate_matching<F>(&self, mut predicate: F, written: bool) -> Invalidation
    where
        F: FnMut(&CacheKey, EntryFlags) -> bool,
    {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate");
        let matched: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, entry)| predicate(key, entry.flags(now)))
            .map(|(key, _)| key.clone())
            .collect();

        let mut outcome = Invalidation::default();
        for key in matched {
            let Some(entry) = entries.peek_mut(&key) else {
                continue;
            };

            if !entry.is_pinned() {
                entries.pop(&key);
                outcome.removed.push(key);
                continue;
            }

            if entry.invalidated && !written {
                outcome.already_stale += 1;
                continue;
            }

            entry.invalidated = true;
            entry.stale_after = Some(now);
            entry.generation += 1;
            entry.in_flight = None;
            entry.touch();

            if entry.subscribers > 0 {
                outcome.refetch.push(key);
            } else {
                outcome.marked_stale.push(key);
            }
        }

        if !outcome.is_empty() || outcome.already_stale > 0 {
            debug!(
                refetch = outcome.refetch.len(),
                marked_stale = outcome.marked_stale.len(),
                removed = outcome.removed.len(),
                already_stale = outcome.already_stale,
                written,
                "Cache entries invalidated"
            );
        }
        outcome
    }

    /// Register interest in `key`, creating an empty entry if needed.
    ///
    /// The entry cannot be evicted or collected while the returned guard lives.
    pub fn subscribe(self: &Arc<Self>, key: &CacheKey, options: SubscribeOptions) -> Subscription {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "subscribe");
        let entry = entries.get_or_insert_mut(key.clone(), || CacheEntry::new(now));
        entry.subscribers += 1;
        entry.unreferenced_since = None;
        if options.realtime {
            entry.realtime += 1;
        }
        if options.refetch_on_focus {
            entry.refetch_on_focus += 1;
        }
        if options.cache_time.is_some() {
            entry.cache_time = options.cache_time;
        }
        if options.retry.is_some() {
            entry.retry = options.retry;
        }
        let receiver = entry.notify.subscribe();
        self.evict_overflow(&mut entries, key);

        Subscription {
            store: Arc::clone(self),
            key: key.clone(),
            options,
            receiver,
        }
    }

    fn unsubscribe(&self, key: &CacheKey, options: SubscribeOptions) {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "unsubscribe");
        let Some(entry) = entries.peek_mut(key) else {
            return;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if options.realtime {
            entry.realtime = entry.realtime.saturating_sub(1);
        }
        if options.refetch_on_focus {
            entry.refetch_on_focus = entry.refetch_on_focus.saturating_sub(1);
        }
        if entry.subscribers == 0 {
            entry.unreferenced_since = Some(now);
        }
    }

    /// Attach to the fetch in flight for `key`, or start one with `start`.
    ///
    /// Returns the shared fetch and whether this call started it. The check and
    /// the registration happen under one lock acquisition, so concurrent
    /// callers can never start two fetches for the same key.
    pub fn begin_fetch<F>(&self, key: &CacheKey, start: F) -> (FetchFuture, bool)
    where
        F: FnOnce(FetchTicket) -> FetchFuture,
    {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "begin_fetch");
        let entry = entries.get_or_insert_mut(key.clone(), || CacheEntry::new(now));
        if let Some((_, in_flight)) = entry.in_flight.as_ref() {
            return (in_flight.clone(), false);
        }

        let ticket = FetchTicket {
            generation: entry.generation,
            fetch_id: self.next_fetch_id.fetch_add(1, Ordering::Relaxed),
        };
        let fetch = start(ticket);
        entry.in_flight = Some((ticket.fetch_id, fetch.clone()));
        entry.touch();
        self.evict_overflow(&mut entries, key);
        (fetch, true)
    }

    /// The fetch currently in flight for `key`, if any.
    pub fn in_flight(&self, key: &CacheKey) -> Option<FetchFuture> {
        rw_read(&self.entries, SOURCE, "in_flight")
            .peek(key)
            .and_then(|entry| entry.in_flight.as_ref().map(|(_, fetch)| fetch.clone()))
    }

    /// Record the outcome of the fetch identified by `ticket`.
    ///
    /// A fetch started before the entry was last invalidated cannot make it
    /// fresh again: its data is kept only when the entry has none, and its
    /// error is dropped.
    pub fn settle(
        &self,
        key: &CacheKey,
        ticket: FetchTicket,
        result: &FetchResult,
        stale_time: Duration,
    ) {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "settle");
        let entry = entries.get_or_insert_mut(key.clone(), || CacheEntry::new(now));

        if entry
            .in_flight
            .as_ref()
            .is_some_and(|(fetch_id, _)| *fetch_id == ticket.fetch_id)
        {
            entry.in_flight = None;
        }

        let current = ticket.generation == entry.generation;
        match result {
            Ok(data) if current => {
                entry.data = Some(data.clone());
                entry.error = None;
                entry.fetched_at = Some(now);
                entry.stale_time = stale_time;
                entry.stale_after = Some(now + stale_time);
                entry.invalidated = false;
            }
            Ok(data) if entry.data.is_none() => {
                entry.data = Some(data.clone());
                entry.fetched_at = Some(now);
            }
            Err(error) if current => {
                entry.error = Some(error.clone());
            }
            _ => {
                debug!(cache_key = %key, "Superseded fetch result discarded");
                entry.touch();
                return;
            }
        }
        entry.touch();
        if entry.subscribers == 0 && entry.unreferenced_since.is_none() {
            entry.unreferenced_since = Some(now);
        }
        self.evict_overflow(&mut entries, key);
    }

    /// Freshness window last used to store `key`.
    pub fn stale_time_of(&self, key: &CacheKey) -> Option<Duration> {
        rw_read(&self.entries, SOURCE, "stale_time_of")
            .peek(key)
            .and_then(|entry| entry.fetched_at.map(|_| entry.stale_time))
    }

    /// Retry budget the latest subscriber asked for, if any.
    pub fn retry_of(&self, key: &CacheKey) -> Option<u32> {
        rw_read(&self.entries, SOURCE, "retry_of")
            .peek(key)
            .and_then(|entry| entry.retry)
    }

    /// Capture everything needed to restore `key` later. `None` means absent.
    pub fn snapshot_slot(&self, key: &CacheKey) -> Option<SlotState> {
        rw_read(&self.entries, SOURCE, "snapshot_slot")
            .peek(key)
            .map(CacheEntry::slot_state)
    }

    /// Put `key` back into a previously captured state.
    pub fn restore_slot(&self, key: &CacheKey, state: Option<SlotState>) {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "restore_slot");
        match state {
            Some(state) => {
                let entry = entries.get_or_insert_mut(key.clone(), || CacheEntry::new(now));
                entry.restore(state);
                entry.touch();
            }
            None => {
                let Some(entry) = entries.peek_mut(key) else {
                    return;
                };
                if entry.is_pinned() {
                    entry.reset();
                    entry.touch();
                } else {
                    entries.pop(key);
                }
            }
        }
    }

    /// Remove unreferenced entries whose grace window has elapsed.
    pub fn gc(&self) -> usize {
        let now = Instant::now();
        let grace = self.config.gc_grace();
        let mut entries = rw_write(&self.entries, SOURCE, "gc");
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_collectable(now, grace))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        drop(entries);

        for key in &expired {
            self.record_collected(key);
        }
        if !expired.is_empty() {
            debug!(collected = expired.len(), "Cache garbage collection pass");
        }
        expired.len()
    }

    /// Run [`CacheStore::gc`] every `interval` until the returned task is dropped.
    pub fn spawn_gc(self: &Arc<Self>, interval: Duration) -> GcTask {
        let store: Weak<Self> = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.gc();
            }
        });
        GcTask { handle }
    }

    /// Drop every unreferenced entry and empty the referenced ones.
    pub fn clear(&self) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        let keys: Vec<CacheKey> = entries.iter().map(|(key, _)| key.clone()).collect();
        let mut removed = 0;
        for key in keys {
            let Some(entry) = entries.peek_mut(&key) else {
                continue;
            };
            if entry.is_pinned() {
                entry.reset();
                entry.touch();
            } else {
                entries.pop(&key);
                removed += 1;
            }
        }
        removed
    }

    /// All keys, most recently used first.
    pub fn keys(&self) -> Vec<CacheKey> {
        rw_read(&self.entries, SOURCE, "keys")
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys of every cached list query for `category`.
    pub fn list_keys(&self, category: Category) -> Vec<CacheKey> {
        rw_read(&self.entries, SOURCE, "list_keys")
            .iter()
            .filter(|(key, _)| key.category() == category && key.is_list())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys whose entry flags satisfy `predicate`.
    pub fn keys_where<F>(&self, mut predicate: F) -> Vec<CacheKey>
    where
        F: FnMut(&CacheKey, EntryFlags) -> bool,
    {
        let now = Instant::now();
        rw_read(&self.entries, SOURCE, "keys_where")
            .iter()
            .filter(|(key, entry)| predicate(key, entry.flags(now)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = rw_read(&self.entries, SOURCE, "stats");
        let (subscribed, in_flight) =
            entries
                .iter()
                .fold((0, 0), |(subscribed, in_flight), (_, entry)| {
                    (
                        subscribed + usize::from(entry.subscribers > 0),
                        in_flight + usize::from(entry.in_flight.is_some()),
                    )
                });
        CacheStats {
            entries: entries.len(),
            subscribed,
            in_flight,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            collected: self.counters.collected.load(Ordering::Relaxed),
        }
    }

    fn evict_overflow(&self, entries: &mut Entries, keep: &CacheKey) {
        let limit = self.config.max_entries_non_zero().get();
        while entries.len() > limit {
            let candidate = entries
                .iter()
                .rev()
                .find(|(key, entry)| *key != keep && !entry.is_pinned())
                .map(|(key, _)| key.clone());
            let Some(victim) = candidate else {
                debug!(
                    entries = entries.len(),
                    limit, "Cache over capacity but every entry is pinned"
                );
                break;
            };
            entries.pop(&victim);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_EVICT, "category" => victim.category().as_str()).increment(1);
        }
    }

    fn record_hit(&self, key: &CacheKey) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_HIT, "category" => key.category().as_str()).increment(1);
    }

    fn record_miss(&self, key: &CacheKey) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_MISS, "category" => key.category().as_str()).increment(1);
    }

    fn record_collected(&self, key: &CacheKey) {
        self.counters.collected.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_GC, "category" => key.category().as_str()).increment(1);
    }
}

/// Live interest in one entry. Dropping it unsubscribes.
pub struct Subscription {
    store: Arc<CacheStore>,
    key: CacheKey,
    options: SubscribeOptions,
    receiver: watch::Receiver<u64>,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn options(&self) -> SubscribeOptions {
        self.options
    }

    /// Wait until the entry changes. Returns `false` if the entry is gone.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.unsubscribe(&self.key, self.options);
    }
}

/// Background GC sweep; aborted when dropped.
pub struct GcTask {
    handle: JoinHandle<()>,
}

impl Drop for GcTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
