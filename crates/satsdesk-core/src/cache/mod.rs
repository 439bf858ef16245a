//! Bounded, tag-addressable result cache.
//!
//! Entries carry an optional expiry and a set of tags. The primary map is an
//! `IndexMap` kept in recency order (least recently used at the front), so
//! eviction is a pop from the front and a hit is a move to the back. A
//! reverse tag index maps each tag to the keys carrying it and is updated
//! under the same lock as the primary map.
//!
//! Expiry is lazy: `get`, `has` and `get_keys_by_tag` drop expired entries
//! they run into. [`Cache::spawn_sweeper`] adds an optional periodic sweep.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::error::CacheError;

/// Measures how many bytes an entry accounts for against `max_size`.
pub type SizeEstimator = Arc<dyn Fn(&str, &Value) -> anyhow::Result<usize> + Send + Sync>;

/// Default estimator: key length plus compact JSON length of the value.
pub fn json_size_estimator() -> SizeEstimator {
    Arc::new(|key, value| Ok(key.len() + serde_json::to_vec(value)?.len()))
}

/// Per-write options for [`Cache::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Overrides the cache's default TTL.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// 0.0–1.0; 0.0 before the first lookup.
    pub hit_rate: f64,
    pub current_size: usize,
    pub entry_count: usize,
    pub evictions: u64,
}

struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
    tags: HashSet<String>,
    last_accessed: u64,
    size_estimate: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
struct CacheState {
    entries: IndexMap<String, CacheEntry>,
    tag_index: HashMap<String, HashSet<String>>,
    current_size: usize,
    clock: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Drop the tag memberships and size of an entry already taken out of `entries`.
    fn unlink(&mut self, key: &str, entry: &CacheEntry) {
        for tag in &entry.tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        self.current_size = self.current_size.saturating_sub(entry.size_estimate);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.shift_remove(key)?;
        self.unlink(key, &entry);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

/// In-memory cache with TTL, tags and LRU eviction under a byte budget.
pub struct Cache {
    state: Mutex<CacheState>,
    max_size: usize,
    default_ttl: Option<Duration>,
    enable_metrics: bool,
    estimator: SizeEstimator,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Cache {
    /// Create a cache using the default JSON size estimator.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_estimator(config, json_size_estimator())
    }

    pub fn with_estimator(config: &CacheConfig, estimator: SizeEstimator) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_size: config.max_size,
            default_ttl: config.default_ttl(),
            enable_metrics: config.enable_metrics,
            estimator,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_hit(&self) {
        if self.enable_metrics {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_miss(&self) {
        if self.enable_metrics {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Insert or overwrite `key`, then evict least-recently-used entries
    /// while the budget is exceeded and more than one entry remains.
    ///
    /// Fails only when the size estimator fails, in which case the cache
    /// is left untouched.
    pub fn set(&self, key: &str, value: Value, opts: SetOptions) -> Result<(), CacheError> {
        let size_estimate = (self.estimator)(key, &value).map_err(|source| {
            CacheError::SizeEstimation {
                key: key.to_string(),
                source,
            }
        })?;
        // A TTL past the clock's range never expires.
        let expires_at = opts
            .ttl
            .or(self.default_ttl)
            .and_then(|ttl| Instant::now().checked_add(ttl));
        let tags: HashSet<String> = opts.tags.into_iter().collect();

        let mut state = self.state();
        state.remove(key);

        for tag in &tags {
            state
                .tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        let last_accessed = state.tick();
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at,
                tags,
                last_accessed,
                size_estimate,
            },
        );
        state.current_size += size_estimate;

        while state.current_size > self.max_size && state.entries.len() > 1 {
            let Some((evicted, entry)) = state.entries.shift_remove_index(0) else {
                break;
            };
            state.unlink(&evicted, &entry);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(
                key = evicted.as_str(),
                last_accessed = entry.last_accessed,
                size = entry.size_estimate,
                "Evicted cache entry"
            );
        }
        Ok(())
    }

    /// Look up `key`, refreshing its recency on a hit.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut state = self.state();

        let Some(idx) = state.entries.get_index_of(key) else {
            self.record_miss();
            return None;
        };

        let expired = state
            .entries
            .get_index(idx)
            .is_some_and(|(_, e)| e.is_expired(now));
        if expired {
            state.remove(key);
            self.record_miss();
            debug!(key, "Cache entry expired");
            return None;
        }

        let tick = state.tick();
        let value = state.entries.get_index_mut(idx).map(|(_, entry)| {
            entry.last_accessed = tick;
            entry.value.clone()
        });
        let last = state.entries.len() - 1;
        state.entries.move_index(idx, last);
        self.record_hit();
        value
    }

    /// Whether a live entry exists. Does not touch recency or counters.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state();
        match state.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                state.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Remove a single entry. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.state().remove(key).is_some()
    }

    /// Remove every entry carrying at least one of `tags`.
    /// Returns the number of entries removed.
    pub fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let mut state = self.state();
        let doomed: HashSet<String> = tags
            .iter()
            .filter_map(|tag| state.tag_index.get(tag.as_ref()))
            .flat_map(|keys| keys.iter().cloned())
            .collect();
        for key in &doomed {
            state.remove(key);
        }
        debug!(removed = doomed.len(), "Invalidated cache entries by tag");
        doomed.len()
    }

    /// Live keys carrying `tag`, sorted. Expired keys found along the way are dropped.
    pub fn get_keys_by_tag(&self, tag: &str) -> Vec<String> {
        let now = Instant::now();
        let mut state = self.state();
        let Some(keys) = state.tag_index.get(tag).cloned() else {
            return Vec::new();
        };

        let mut live = Vec::with_capacity(keys.len());
        for key in keys {
            let expired = state.entries.get(&key).map_or(true, |e| e.is_expired(now));
            if expired {
                state.remove(&key);
            } else {
                live.push(key);
            }
        }
        live.sort();
        live
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.state().purge_expired(Instant::now())
    }

    pub fn get_metrics(&self) -> CacheMetrics {
        let (current_size, entry_count) = {
            let state = self.state();
            (state.current_size, state.entries.len())
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheMetrics {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            current_size,
            entry_count,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries and tag memberships. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.tag_index.clear();
        state.current_size = 0;
    }

    pub fn shutdown(&self) {
        let entries = self.len();
        self.clear();
        info!(entries, "Cache shut down");
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval` until `cancel` fires.
    ///
    /// The first sweep happens one interval after spawning.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            debug!(interval_secs = interval.as_secs(), "Cache sweeper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Cache sweeper cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(removed, "Cache sweep removed expired entries");
                        }
                    }
                }
            }
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
