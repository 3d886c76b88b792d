//! Keyed cache of server query results with explicit staleness.

use super::fetcher::QueryFetcher;
use crate::api_client::ApiClientError;
use cadence_core::{KeyPattern, QueryKey, Timestamp};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Upper bound on a mutation's server call.
pub const DEFAULT_MUTATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a cache read, carrying where the value came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    fetched_at: Timestamp,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    fn from_cache(value: T, fetched_at: Timestamp) -> Self {
        Self {
            value,
            fetched_at,
            was_cache_hit: true,
        }
    }

    fn from_fetch(value: T) -> Self {
        Self {
            value,
            fetched_at: Utc::now(),
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the value was last loaded from (or confirmed by) the server.
    pub fn fetched_at(&self) -> Timestamp {
        self.fetched_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            fetched_at: self.fetched_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

/// Cache counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    /// Fetch results dropped because the entry changed while in flight.
    pub discarded_fetches: u64,
    pub invalidations: u64,
    pub rollbacks: u64,
    pub entry_count: u64,
}

impl CacheStats {
    /// Hit rate in `0.0..=1.0`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Metadata of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub fetched_at: Option<Timestamp>,
    pub stale: bool,
    pub in_flight: bool,
    /// Times the entry has been invalidated.
    pub invalidations: u64,
    /// Write epoch; bumped by every change other than a completed fetch.
    pub epoch: u64,
}

#[derive(Debug)]
struct Entry {
    value: Option<Value>,
    fetched_at: Option<Timestamp>,
    loaded_at: Option<Instant>,
    stale: bool,
    in_flight: u32,
    invalidations: u64,
    epoch: u64,
}

impl Entry {
    fn empty(epoch: u64) -> Self {
        Self {
            value: None,
            fetched_at: None,
            loaded_at: None,
            stale: true,
            in_flight: 0,
            invalidations: 0,
            epoch,
        }
    }

    fn is_fresh(&self, stale_after: Duration) -> bool {
        self.value.is_some()
            && !self.stale
            && self
                .loaded_at
                .is_some_and(|loaded| loaded.elapsed() < stale_after)
    }

    fn meta(&self) -> EntryMeta {
        EntryMeta {
            fetched_at: self.fetched_at,
            stale: self.value.is_none() || self.stale,
            in_flight: self.in_flight > 0,
            invalidations: self.invalidations,
            epoch: self.epoch,
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<QueryKey, Entry>,
    next_epoch: u64,
    stats: CacheStats,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }
}

/// Prior value of one key, captured before an optimistic patch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Snapshot {
    pub(crate) key: QueryKey,
    pub(crate) value: Value,
}

/// Synchronized query cache.
///
/// Fresh values are served without I/O; absent, stale or invalidated
/// entries are loaded through the [`QueryFetcher`]. A fetch that completes
/// after the entry was invalidated, patched or replaced hands its value to
/// the caller but leaves the entry untouched, so a newer write is never
/// clobbered by an older response.
///
/// State sits behind a synchronous mutex that is never held across an
/// await point. Cloning shares the same cache.
#[derive(Clone)]
pub struct QueryCache {
    state: Arc<Mutex<CacheState>>,
    fetcher: Arc<dyn QueryFetcher>,
    stale_after: Duration,
    mutation_timeout: Duration,
}

impl QueryCache {
    pub fn new(fetcher: Arc<dyn QueryFetcher>, stale_after: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            fetcher,
            stale_after,
            mutation_timeout: DEFAULT_MUTATION_TIMEOUT,
        }
    }

    pub fn with_mutation_timeout(mut self, timeout: Duration) -> Self {
        self.mutation_timeout = timeout;
        self
    }

    pub fn mutation_timeout(&self) -> Duration {
        self.mutation_timeout
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn read(&self, key: &QueryKey) -> Result<CacheRead<Value>, ApiClientError> {
        let epoch = {
            let mut state = self.lock();
            if let Some(entry) = state.entries.get(key) {
                if entry.is_fresh(self.stale_after) {
                    if let (Some(value), Some(fetched_at)) = (&entry.value, entry.fetched_at) {
                        let read = CacheRead::from_cache(value.clone(), fetched_at);
                        state.stats.hits += 1;
                        trace!(%key, "Cache hit");
                        return Ok(read);
                    }
                }
            }
            state.stats.misses += 1;
            state.stats.fetches += 1;
            let fresh_epoch = state.bump();
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::empty(fresh_epoch));
            entry.in_flight += 1;
            entry.epoch
        };

        debug!(%key, epoch, "Cache miss, fetching");
        let result = self.fetcher.fetch(key).await;

        let mut state = self.lock();
        let mut discarded = false;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            if let Ok(value) = &result {
                if entry.epoch == epoch {
                    entry.value = Some(value.clone());
                    entry.fetched_at = Some(Utc::now());
                    entry.loaded_at = Some(Instant::now());
                    entry.stale = false;
                } else {
                    discarded = true;
                }
            }
        } else if result.is_ok() {
            discarded = true;
        }
        if discarded {
            state.stats.discarded_fetches += 1;
            debug!(%key, epoch, "Entry changed during fetch, keeping it stale");
        }
        drop(state);

        result.map(CacheRead::from_fetch)
    }

    /// Read and decode into `T`.
    pub async fn read_as<T: DeserializeOwned>(
        &self,
        key: &QueryKey,
    ) -> Result<CacheRead<T>, ApiClientError> {
        let read = self.read(key).await?;
        let value = serde_json::from_value(read.value.clone())?;
        Ok(read.map(|_| value))
    }

    /// Cached value without fetching, stale or not.
    pub fn peek(&self, key: &QueryKey) -> Option<Value> {
        self.lock()
            .entries
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    /// Store a value known to match the server.
    pub fn set(&self, key: QueryKey, value: Value) {
        let mut state = self.lock();
        let epoch = state.bump();
        let entry = state
            .entries
            .entry(key)
            .or_insert_with(|| Entry::empty(epoch));
        entry.value = Some(value);
        entry.fetched_at = Some(Utc::now());
        entry.loaded_at = Some(Instant::now());
        entry.stale = false;
        entry.epoch = epoch;
    }

    /// Mark every entry matching `pattern` stale; returns how many matched.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let mut state = self.lock();
        let keys: Vec<QueryKey> = state
            .entries
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        for key in &keys {
            let epoch = state.bump();
            if let Some(entry) = state.entries.get_mut(key) {
                entry.stale = true;
                entry.invalidations += 1;
                entry.epoch = epoch;
            }
        }
        state.stats.invalidations += keys.len() as u64;
        if !keys.is_empty() {
            debug!(%pattern, count = keys.len(), "Invalidated cache entries");
        }
        keys.len()
    }

    pub fn meta(&self, key: &QueryKey) -> Option<EntryMeta> {
        self.lock().entries.get(key).map(Entry::meta)
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.lock()
            .entries
            .get(key)
            .map_or(true, |entry| !entry.is_fresh(self.stale_after))
    }

    pub fn remove(&self, key: &QueryKey) -> Option<Value> {
        self.lock()
            .entries
            .remove(key)
            .and_then(|entry| entry.value)
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entry_count: state.entries.len() as u64,
            ..state.stats
        }
    }

    /// Replace the cached value of `key` with `patch(value)`.
    ///
    /// Returns the pre-patch value, or `None` when nothing was cached.
    pub(crate) fn apply_patch<F>(&self, key: &QueryKey, patch: F) -> Option<Snapshot>
    where
        F: FnOnce(&Value) -> Value,
    {
        let mut state = self.lock();
        let epoch = state.bump();
        let entry = state.entries.get_mut(key)?;
        let previous = entry.value.take()?;
        entry.value = Some(patch(&previous));
        entry.epoch = epoch;
        Some(Snapshot {
            key: key.clone(),
            value: previous,
        })
    }

    /// Put snapshotted values back.
    pub(crate) fn restore(&self, snapshots: &[Snapshot]) {
        let mut state = self.lock();
        for snapshot in snapshots {
            let epoch = state.bump();
            if let Some(entry) = state.entries.get_mut(&snapshot.key) {
                entry.value = Some(snapshot.value.clone());
                entry.epoch = epoch;
            }
        }
        state.stats.rollbacks += 1;
    }
}
