// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Result Cache
//!
//! Memoizes result sets by [`CacheKey`] with three freshness rules:
//!
//! ```text
//!   get(key) ──► entry? ──no──► miss
//!                  │
//!                  ▼
//!          entry.version < graph version ? ──yes──► invalidate, miss (stale)
//!                  │
//!                  ▼
//!          TTL expired? (moka) ──yes──► miss
//!                  │
//!                  ▼
//!                 hit
//! ```
//!
//! Capacity is bounded with LRU eviction. [`ResultCache::get_or_compute`]
//! guarantees at most one in-flight computation per key and graph version:
//! the first caller spawns the work on its own task, later callers for the
//! same key subscribe to its outcome as long as the flight was stamped with
//! a version no older than the one they observed. Dropping any caller, including the first, never cancels
//! the computation, which still populates the cache on success. Failures are
//! delivered to every waiter and never cached.

use crate::builder::{BoundQuery, CacheKey};
use crate::store::GraphVersionSource;
use chrono::{DateTime, Utc};
use medadvisor_core::{CacheConfig, EngineError, ResultSet, Result};
use moka::future::Cache;
use moka::ops::compute::Op;
use moka::policy::EvictionPolicy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// One memoized result set; never mutated after insertion
#[derive(Debug)]
pub struct CacheEntry {
    pub result: Arc<ResultSet>,
    pub key: CacheKey,
    pub template_id: String,
    pub created_at: DateTime<Utc>,
    /// Graph version current when the computation started
    pub version: u64,
    hits: AtomicU64,
}

impl CacheEntry {
    fn new(key: CacheKey, result: Arc<ResultSet>, version: u64) -> Self {
        Self {
            template_id: result.template_id.clone(),
            result,
            key,
            created_at: Utc::now(),
            version,
            hits: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Result set plus whether it was served from the cache
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub result: Arc<ResultSet>,
    pub cache_hit: bool,
}

type Outcome = Option<Result<Arc<ResultSet>>>;
type InflightMap = Arc<Mutex<HashMap<CacheKey, Flight>>>;

/// One in-flight computation
struct Flight {
    id: u64,
    /// Graph version read before the computation started; `None` if unknown
    stamp: Option<u64>,
    rx: watch::Receiver<Outcome>,
}

impl Flight {
    /// Whether a caller that observed `current` may take this flight's result
    fn covers(&self, current: Option<u64>) -> bool {
        matches!((self.stamp, current), (Some(stamp), Some(current)) if stamp >= current)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    coalesced: AtomicU64,
    computations: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses caused by a graph version bump
    pub stale: u64,
    /// Callers that joined an in-flight computation
    pub coalesced: u64,
    /// Computations actually started
    pub computations: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
}

/// Version-stamped, single-flight result cache
pub struct ResultCache {
    entries: Cache<CacheKey, Arc<CacheEntry>>,
    inflight: InflightMap,
    next_flight: AtomicU64,
    version: Arc<dyn GraphVersionSource>,
    enabled: bool,
    counters: Arc<Counters>,
}

impl ResultCache {
    pub fn new(config: &CacheConfig, version: Arc<dyn GraphVersionSource>) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(config.max_entries)
            .eviction_policy(EvictionPolicy::lru());
        if let Some(ttl) = config.ttl() {
            builder = builder.time_to_live(ttl);
        }
        let entries: Cache<CacheKey, Arc<CacheEntry>> = builder.build();

        Self {
            entries,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_flight: AtomicU64::new(0),
            version,
            enabled: config.enabled,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fresh entry for `key`, or a miss. Stale entries are evicted.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<ResultSet>> {
        match self.lookup(key).await {
            Lookup::Hit(result) => Some(result),
            Lookup::Miss(_) => None,
        }
    }

    async fn lookup(&self, key: &CacheKey) -> Lookup {
        // Disabled caches still read the version so identical flights coalesce
        let entry = if self.enabled {
            self.entries.get(key).await
        } else {
            None
        };

        let current = match self.version.current_version().await {
            Ok(v) => v,
            Err(e) => {
                // Freshness cannot be proven
                tracing::warn!(error = %e, "Graph version unavailable, treating cache entry as miss");
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::Miss(None);
            }
        };

        let Some(entry) = entry else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Lookup::Miss(Some(current));
        };

        if entry.version < current {
            self.evict_if_same(key, &entry).await;
            self.counters.stale.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                cache_key = %key,
                entry_version = entry.version,
                graph_version = current,
                "Stale cache entry evicted"
            );
            return Lookup::Miss(Some(current));
        }

        entry.hits.fetch_add(1, Ordering::Relaxed);
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Lookup::Hit(entry.result.clone())
    }

    /// Remove `stale` only if it is still the entry stored under `key`
    async fn evict_if_same(&self, key: &CacheKey, stale: &Arc<CacheEntry>) {
        let _ = self
            .entries
            .entry(*key)
            .and_compute_with(|stored| {
                let op = match stored {
                    Some(stored) if Arc::ptr_eq(stored.value(), stale) => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
    }

    /// Store a result stamped with the current graph version
    pub async fn put(&self, key: CacheKey, result: Arc<ResultSet>) {
        if !self.enabled {
            return;
        }
        match self.version.current_version().await {
            Ok(version) => {
                self.entries
                    .insert(key, Arc::new(CacheEntry::new(key, result, version)))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Graph version unavailable, result not cached");
            }
        }
    }

    /// Remove every entry matching `predicate`; returns how many were removed
    pub async fn invalidate<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let doomed: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| *key)
            .collect();

        for key in &doomed {
            self.entries.invalidate(key).await;
        }
        doomed.len()
    }

    pub async fn invalidate_key(&self, key: &CacheKey) {
        self.entries.invalidate(key).await;
    }

    pub async fn invalidate_template(&self, template_id: &str) -> usize {
        self.invalidate(|entry| entry.template_id == template_id).await
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Apply pending evictions and bookkeeping; mostly useful in tests
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            stale: self.counters.stale.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_count: self.entries.entry_count(),
        }
    }

    /// Serve `query` from the cache, or run `compute` at most once per key.
    ///
    /// `compute` runs on a spawned task so that no caller's cancellation
    /// can abort it. The graph version read on the miss is the entry's
    /// stamp; a caller only joins a flight stamped at or above the version
    /// it observed, otherwise it starts a new one.
    pub async fn get_or_compute<F, Fut>(&self, query: &BoundQuery, compute: F) -> Result<CachedResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResultSet>> + Send + 'static,
    {
        let key = query.cache_key;
        let current = match self.lookup(&key).await {
            Lookup::Hit(result) => {
                return Ok(CachedResult {
                    result,
                    cache_hit: true,
                })
            }
            Lookup::Miss(current) => current,
        };

        let (mut rx, leader) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(flight) if flight.covers(current) => (flight.rx.clone(), None),
                _ => {
                    // An older flight keeps running for its own waiters; it
                    // just stops accepting new ones.
                    let (tx, rx) = watch::channel(None);
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    inflight.insert(
                        key,
                        Flight {
                            id,
                            stamp: current,
                            rx: rx.clone(),
                        },
                    );
                    (rx, Some((id, tx)))
                }
            }
        };

        match leader {
            Some((id, tx)) => {
                tracing::debug!(
                    cache_key = %key,
                    template_id = %query.template_id(),
                    graph_version = ?current,
                    "Starting computation"
                );
                self.spawn_computation(key, id, current, tx, compute());
            }
            None => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = %key, "Joining in-flight computation");
            }
        }

        let outcome = rx.wait_for(Option::is_some).await.map(|v| (*v).clone());
        match outcome {
            Ok(Some(result)) => result.map(|result| CachedResult {
                result,
                cache_hit: false,
            }),
            Ok(None) | Err(_) => Err(EngineError::QueryExecution {
                template_id: query.template_id().to_string(),
                message: "in-flight computation ended without a result".into(),
                transient: true,
                attempts: 0,
            }),
        }
    }

    fn spawn_computation<Fut>(
        &self,
        key: CacheKey,
        id: u64,
        stamp: Option<u64>,
        tx: watch::Sender<Outcome>,
        compute: Fut,
    ) where
        Fut: Future<Output = Result<ResultSet>> + Send + 'static,
    {
        let entries = self.entries.clone();
        let counters = self.counters.clone();
        let enabled = self.enabled;
        let guard = InflightGuard {
            map: self.inflight.clone(),
            key,
            id,
        };

        tokio::spawn(async move {
            if stamp.is_none() {
                tracing::warn!(cache_key = %key, "Graph version unavailable, result will not be cached");
            }

            // A caller that missed just before the previous flight finished
            // would otherwise recompute.
            let fresh = match (enabled, stamp) {
                (true, Some(v)) => entries.get(&key).await.filter(|e| e.version >= v),
                _ => None,
            };

            let outcome = match fresh {
                Some(entry) => Ok(entry.result.clone()),
                None => {
                    counters.computations.fetch_add(1, Ordering::Relaxed);
                    let result = compute.await.map(Arc::new);
                    if let (true, Some(v), Ok(result)) = (enabled, stamp, &result) {
                        // Never replace an entry read at a newer version
                        let entry = Arc::new(CacheEntry::new(key, result.clone(), v));
                        let _ = entries
                            .entry(key)
                            .and_compute_with(|stored| {
                                let op = match stored {
                                    Some(stored) if stored.value().version > v => Op::Nop,
                                    _ => Op::Put(entry),
                                };
                                std::future::ready(op)
                            })
                            .await;
                    }
                    result
                }
            };

            drop(guard);
            // No receivers left is fine; the cache is already populated.
            let _ = tx.send(Some(outcome));
        });
    }
}

enum Lookup {
    Hit(Arc<ResultSet>),
    /// Carries the graph version observed, if it could be read
    Miss(Option<u64>),
}

/// Removes the in-flight marker even if the computation panics. A newer
/// flight that replaced this one under the same key is left alone.
struct InflightGuard {
    map: InflightMap,
    key: CacheKey,
    id: u64,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        if map.get(&self.key).is_some_and(|flight| flight.id == self.id) {
            map.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SharedGraphVersion;
    use crate::template::TemplateLibrary;
    use medadvisor_core::{IntentTag, Row};
    use std::time::Duration;

    fn query(medication_id: &str) -> BoundQuery {
        let template = TemplateLibrary::builtin()
            .unwrap()
            .lookup(IntentTag::DrugInfo)
            .unwrap();
        let mut params = crate::store::QueryParams::new();
        params.insert("medication_id".into(), medication_id.into());
        let cache_key = CacheKey::compute(&template, &params);
        BoundQuery {
            template,
            params,
            cache_key,
        }
    }

    fn result_set(name: &str) -> ResultSet {
        ResultSet::new(
            "drug_info_v1",
            vec!["medication".into()],
            vec![Row::new().with("medication", name)],
        )
    }

    fn cache(version: &SharedGraphVersion) -> ResultCache {
        ResultCache::new(&CacheConfig::default(), Arc::new(version.clone()))
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let version = SharedGraphVersion::new(1);
        let cache = cache(&version);
        let key = query("m1").cache_key;

        assert!(cache.get(&key).await.is_none());
        let stored = Arc::new(result_set("Metformin"));
        cache.put(key, stored.clone()).await;

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit, stored);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_version_bump_makes_entry_stale() {
        let version = SharedGraphVersion::new(1);
        let cache = cache(&version);
        let key = query("m1").cache_key;

        cache.put(key, Arc::new(result_set("Metformin"))).await;
        assert!(cache.get(&key).await.is_some());

        version.bump();
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().stale, 1);

        // entry is gone, not merely hidden
        version.set(1);
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_by_predicate_and_template() {
        let version = SharedGraphVersion::new(1);
        let cache = cache(&version);
        let a = query("m1").cache_key;
        let b = query("m2").cache_key;

        cache.put(a, Arc::new(result_set("Metformin"))).await;
        cache.put(b, Arc::new(result_set("Warfarin"))).await;

        let removed = cache
            .invalidate(|entry| entry.result.rows[0].get("medication").and_then(|v| v.as_text()) == Some("Warfarin"))
            .await;
        assert_eq!(removed, 1);
        assert!(cache.get(&a).await.is_some());
        assert!(cache.get(&b).await.is_none());

        assert_eq!(cache.invalidate_template("drug_info_v1").await, 1);
        assert!(cache.get(&a).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_stores_nothing() {
        let version = SharedGraphVersion::new(1);
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = ResultCache::new(&config, Arc::new(version));
        let q = query("m1");

        cache.put(q.cache_key, Arc::new(result_set("Metformin"))).await;
        assert!(cache.get(&q.cache_key).await.is_none());

        let out = cache
            .get_or_compute(&q, || async { Ok(result_set("Metformin")) })
            .await
            .unwrap();
        assert!(!out.cache_hit);
        assert!(cache.get(&q.cache_key).await.is_none());
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let version = SharedGraphVersion::new(1);
        let cache = cache(&version);
        let q = query("m1");

        let err = cache
            .get_or_compute(&q, || async {
                Err(EngineError::QueryExecution {
                    template_id: "drug_info_v1".into(),
                    message: "boom".into(),
                    transient: false,
                    attempts: 1,
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::QueryExecution { .. }));

        let ok = cache
            .get_or_compute(&q, || async { Ok(result_set("Metformin")) })
            .await
            .unwrap();
        assert!(!ok.cache_hit);

        let again = cache
            .get_or_compute(&q, || async { Ok(result_set("ignored")) })
            .await
            .unwrap();
        assert!(again.cache_hit);
        assert_eq!(again.result.rows[0].get("medication").and_then(|v| v.as_text()), Some("Metformin"));
    }

    #[tokio::test]
    async fn test_version_read_before_compute_marks_result_stale() {
        let version = SharedGraphVersion::new(1);
        let cache = cache(&version);
        let q = query("m1");

        let bump = version.clone();
        cache
            .get_or_compute(&q, move || async move {
                // ETL load commits while the query runs
                bump.bump();
                Ok(result_set("Metformin"))
            })
            .await
            .unwrap();

        assert!(cache.get(&q.cache_key).await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let version = SharedGraphVersion::new(1);
        let config = CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        };
        let cache = ResultCache::new(&config, Arc::new(version));

        for id in ["m1", "m2"] {
            cache.put(query(id).cache_key, Arc::new(result_set(id))).await;
            cache.run_pending_tasks().await;
        }

        // m1 becomes most recently used, leaving m2 as the eviction victim
        assert!(cache.get(&query("m1").cache_key).await.is_some());
        cache.run_pending_tasks().await;

        cache.put(query("m3").cache_key, Arc::new(result_set("m3"))).await;
        cache.run_pending_tasks().await;

        assert_eq!(cache.stats().entry_count, 2);
        assert!(cache.get(&query("m1").cache_key).await.is_some());
        assert!(cache.get(&query("m2").cache_key).await.is_none());
        assert!(cache.get(&query("m3").cache_key).await.is_some());
    }

    /// Version source that, once armed, refreshes an entry in the middle of
    /// the version read a `get` performs
    struct RefreshingVersion {
        version: SharedGraphVersion,
        armed: std::sync::atomic::AtomicBool,
        cache: std::sync::OnceLock<std::sync::Weak<ResultCache>>,
        key: CacheKey,
    }

    #[async_trait::async_trait]
    impl GraphVersionSource for RefreshingVersion {
        async fn current_version(&self) -> std::result::Result<u64, crate::store::StoreError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                if let Some(cache) = self.cache.get().and_then(|c| c.upgrade()) {
                    cache.put(self.key, Arc::new(result_set("refreshed"))).await;
                }
            }
            self.version.current_version().await
        }
    }

    #[tokio::test]
    async fn test_stale_eviction_keeps_concurrent_refresh() {
        let key = query("m1").cache_key;
        let source = Arc::new(RefreshingVersion {
            version: SharedGraphVersion::new(1),
            armed: std::sync::atomic::AtomicBool::new(false),
            cache: std::sync::OnceLock::new(),
            key,
        });
        let cache = Arc::new(ResultCache::new(&CacheConfig::default(), source.clone()));
        let _ = source.cache.set(Arc::downgrade(&cache));

        cache.put(key, Arc::new(result_set("old"))).await;
        source.version.set(2);
        source.armed.store(true, Ordering::SeqCst);

        // Sees the v1 entry as stale while a v2 entry lands underneath it
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().stale, 1);

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.rows[0].get("medication").and_then(|v| v.as_text()), Some("refreshed"));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let version = SharedGraphVersion::new(1);
        let config = CacheConfig {
            ttl_secs: Some(1),
            ..CacheConfig::default()
        };
        let cache = ResultCache::new(&config, Arc::new(version));
        let key = query("m1").cache_key;

        cache.put(key, Arc::new(result_set("Metformin"))).await;
        assert!(cache.get(&key).await.is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(cache.get(&key).await.is_none());
    }
}
