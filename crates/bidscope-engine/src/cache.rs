//! Aggregation cache.
//!
//! Memoizes [`MetricResult`]s per query key with a TTL, company-scoped
//! invalidation and single-flight computation:
//!
//! - Entries live in a sharded map; there is no cache-wide lock.
//! - Every scope (one company, or all companies) has a generation counter.
//!   Invalidation bumps it, so results computed from an older snapshot are
//!   handed to their callers but never stored.
//! - Concurrent misses for the same key and generation share one
//!   computation through an in-flight slot. A leader that is dropped
//!   (timeout, cancellation) frees its slot and the waiters retry.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use bidscope_traits::{CompanyId, ProjectType};

use crate::bucketing::Granularity;
use crate::error::{EngineError, EngineResult};
use crate::result::{MetricKind, MetricResult};

// =============================================================================
// KEYS
// =============================================================================

/// Which bids a cached result was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// One company's bids
    Company(CompanyId),
    /// Bids of every company
    AllCompanies,
}

/// Cache key: scope, metric and query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Scope
    pub scope: CacheScope,
    /// Metric
    pub metric: MetricKind,
    /// Window length, for windowed metrics
    pub window_months: Option<u32>,
    /// Bucket width, for windowed metrics
    pub granularity: Option<Granularity>,
    /// Project-type filter
    pub project_type: Option<ProjectType>,
}

impl CacheKey {
    /// Key of a company-scoped metric.
    pub fn company(company_id: CompanyId, metric: MetricKind) -> Self {
        Self {
            scope: CacheScope::Company(company_id),
            metric,
            window_months: None,
            granularity: None,
            project_type: None,
        }
    }

    /// Key of a metric computed across all companies.
    pub fn all_companies(metric: MetricKind) -> Self {
        Self {
            scope: CacheScope::AllCompanies,
            metric,
            window_months: None,
            granularity: None,
            project_type: None,
        }
    }

    /// Set the window.
    pub fn with_window(mut self, months: u32, granularity: Granularity) -> Self {
        self.window_months = Some(months);
        self.granularity = Some(granularity);
        self
    }

    /// Set the project-type filter.
    pub fn with_project_type(mut self, project_type: Option<ProjectType>) -> Self {
        self.project_type = project_type;
        self
    }
}

// =============================================================================
// STATS
// =============================================================================

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    shared_waits: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    stale_discards: AtomicU64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Computations started as a flight leader
    pub computations: u64,
    /// Callers that joined an in-flight computation
    pub shared_waits: u64,
    /// Entries removed for expiry or capacity
    pub evictions: u64,
    /// Invalidation signals received
    pub invalidations: u64,
    /// Results not stored because the scope was invalidated meanwhile
    pub stale_discards: u64,
    /// Live entries
    pub entries: usize,
    /// Computations in flight
    pub in_flight: usize,
}

// =============================================================================
// CACHE
// =============================================================================

struct CachedResult {
    result: Arc<MetricResult>,
    stored_at: Instant,
    expires_at: Instant,
}

type FlightKey = (CacheKey, u64);
type Outcome = EngineResult<Arc<MetricResult>>;

struct Flight {
    tx: watch::Sender<Option<Outcome>>,
}

impl Flight {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }
}

/// Removes the in-flight slot when the leader finishes or is dropped.
struct FlightGuard<'a> {
    in_flight: &'a DashMap<FlightKey, Arc<Flight>>,
    key: FlightKey,
    flight: Arc<Flight>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(&self.key, |_, f| Arc::ptr_eq(f, &self.flight));
    }
}

enum Role {
    Stored(Arc<MetricResult>),
    Leader(Arc<Flight>),
    Follower(watch::Receiver<Option<Outcome>>),
}

/// Concurrent result cache with TTL expiry and single-flight computation.
pub struct AggregationCache {
    entries: DashMap<CacheKey, CachedResult>,
    in_flight: DashMap<FlightKey, Arc<Flight>>,
    generations: DashMap<CacheScope, u64>,
    default_ttl: Duration,
    max_entries: usize,
    counters: CacheCounters,
}

impl AggregationCache {
    /// Create a cache with the given default TTL and capacity.
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            generations: DashMap::new(),
            default_ttl,
            max_entries: max_entries.max(1),
            counters: CacheCounters::default(),
        }
    }

    /// Default TTL applied by [`get_or_compute`](Self::get_or_compute).
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a live entry.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<MetricResult>> {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.result.clone()),
            Some(_) => None,
            None => return self.miss(),
        };
        match hit {
            Some(result) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(result)
            }
            None => {
                if self
                    .entries
                    .remove_if(key, |_, e| e.expires_at <= now)
                    .is_some()
                {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.miss()
            }
        }
    }

    /// Store an entry unconditionally.
    pub fn put(&self, key: CacheKey, result: Arc<MetricResult>, ttl: Duration) {
        self.make_room();
        self.insert(key, result, ttl);
    }

    /// Drop every entry computed from `company_id`'s bids.
    ///
    /// Entries of other companies are untouched; entries spanning all
    /// companies are dropped as well since they include this company.
    pub fn invalidate(&self, company_id: &CompanyId) {
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        let company = CacheScope::Company(company_id.clone());
        self.bump(&company);
        self.bump(&CacheScope::AllCompanies);

        let before = self.entries.len();
        self.entries
            .retain(|k, _| k.scope != company && k.scope != CacheScope::AllCompanies);
        debug!(
            company = %company_id,
            removed = before.saturating_sub(self.entries.len()),
            "invalidated cached aggregations"
        );
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        self.bump(&CacheScope::AllCompanies);
        for mut generation in self.generations.iter_mut() {
            *generation += 1;
        }
        self.entries.clear();
        debug!("invalidated all cached aggregations");
    }

    /// Remove expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        self.counters
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Clear all entries without touching generations.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries (live or not yet purged).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            shared_waits: self.counters.shared_waits.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            stale_discards: self.counters.stale_discards.load(Ordering::Relaxed),
            entries: self.entries.len(),
            in_flight: self.in_flight.len(),
        }
    }

    /// Return the cached result for `key`, or compute it exactly once across
    /// concurrent callers and store it with the default TTL.
    ///
    /// Errors are shared with the callers waiting on the same computation
    /// but are never stored.
    pub async fn get_or_compute<F, Fut>(&self, key: &CacheKey, compute: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<MetricResult>>,
    {
        let mut compute = Some(compute);
        loop {
            if let Some(hit) = self.get(key) {
                return Ok(hit);
            }

            let generation = self.generation(&key.scope);
            let flight_key: FlightKey = (key.clone(), generation);
            match self.claim(key, flight_key.clone()) {
                Role::Stored(hit) => return Ok(hit),
                Role::Follower(mut rx) => {
                    self.counters.shared_waits.fetch_add(1, Ordering::Relaxed);
                    trace!(metric = %key.metric, "joining in-flight computation");
                    let shared = rx.wait_for(Option::is_some).await.map(|v| (*v).clone());
                    match shared {
                        Ok(Some(outcome)) => return outcome,
                        _ => {
                            debug!(metric = %key.metric, "in-flight leader abandoned, retrying");
                            continue;
                        }
                    }
                }
                Role::Leader(flight) => {
                    let _guard = FlightGuard {
                        in_flight: &self.in_flight,
                        key: flight_key,
                        flight: flight.clone(),
                    };
                    let f = compute.take().ok_or_else(|| {
                        EngineError::Internal("cache computation started twice".into())
                    })?;
                    self.counters.computations.fetch_add(1, Ordering::Relaxed);

                    let outcome = f().await.map(Arc::new);
                    if let Ok(ref result) = outcome {
                        self.store_if_current(key, result.clone(), generation);
                    }
                    flight.tx.send_replace(Some(outcome.clone()));
                    return outcome;
                }
            }
        }
    }

    /// Join the in-flight computation for `flight_key` or register as its
    /// leader.
    ///
    /// A new leader re-reads the entries after registering: a previous leader
    /// may have stored its result and released the slot between our cache
    /// miss and the registration.
    fn claim(&self, key: &CacheKey, flight_key: FlightKey) -> Role {
        let flight = match self.in_flight.entry(flight_key.clone()) {
            Entry::Occupied(e) => return Role::Follower(e.get().tx.subscribe()),
            Entry::Vacant(e) => {
                let flight = Arc::new(Flight::new());
                e.insert(flight.clone());
                flight
            }
        };

        match self.peek(key) {
            Some(hit) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                flight.tx.send_replace(Some(Ok(hit.clone())));
                self.in_flight
                    .remove_if(&flight_key, |_, f| Arc::ptr_eq(f, &flight));
                trace!(metric = %key.metric, "stored while registering, not recomputing");
                Role::Stored(hit)
            }
            None => Role::Leader(flight),
        }
    }

    /// Live entry for `key`, without touching the counters.
    fn peek(&self, key: &CacheKey) -> Option<Arc<MetricResult>> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.result.clone())
    }

    fn miss(&self) -> Option<Arc<MetricResult>> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn generation(&self, scope: &CacheScope) -> u64 {
        *self.generations.entry(scope.clone()).or_insert(0)
    }

    fn bump(&self, scope: &CacheScope) {
        *self.generations.entry(scope.clone()).or_insert(0) += 1;
    }

    /// Insert only if no invalidation happened since `generation` was read.
    ///
    /// The generation shard stays read-locked during the insert, so an
    /// invalidation either lands before (and the insert is skipped) or after
    /// (and removes the entry).
    fn store_if_current(&self, key: &CacheKey, result: Arc<MetricResult>, generation: u64) {
        self.make_room();
        let current = match self.generations.get(&key.scope) {
            Some(current) => current,
            None => return,
        };
        if *current != generation {
            self.counters.stale_discards.fetch_add(1, Ordering::Relaxed);
            debug!(metric = %key.metric, "scope invalidated during computation, not caching");
            return;
        }
        self.insert(key.clone(), result, self.default_ttl);
        drop(current);
    }

    fn insert(&self, key: CacheKey, result: Arc<MetricResult>, ttl: Duration) {
        let now = Instant::now();
        self.entries.insert(
            key,
            CachedResult {
                result,
                stored_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Evict expired entries, then the oldest ones, until there is room for one more.
    fn make_room(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        self.purge_expired();
        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.stored_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    if self.entries.remove(&key).is_some() {
                        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }
}

impl Default for AggregationCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(120), 10_000) // 2 minutes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::MetricPayload;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::AtomicUsize;

    fn company(id: &str) -> CompanyId {
        CompanyId::new(id)
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::company(company(id), MetricKind::Volume).with_window(6, Granularity::Month)
    }

    fn result(id: &str, marker: u64) -> MetricResult {
        MetricResult {
            company_id: Some(company(id)),
            metric: MetricKind::Volume,
            window: None,
            granularity: Some(Granularity::Month),
            project_type: None,
            payload: MetricPayload::Volume(vec![crate::result::SeriesPoint {
                bucket: "2024-01".into(),
                start: DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap(),
                value: marker,
            }]),
            computed_at: DateTime::<Utc>::from_timestamp(1_706_000_000, 0).unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = AggregationCache::new(Duration::from_secs(60), 10);
        cache.put(key("C1"), Arc::new(result("C1", 1)), Duration::from_secs(60));
        assert!(cache.get(&key("C1")).is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&key("C1")).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_invalidation_is_company_scoped() {
        let cache = AggregationCache::default();
        let ttl = cache.default_ttl();
        cache.put(key("C1"), Arc::new(result("C1", 1)), ttl);
        cache.put(key("C3"), Arc::new(result("C3", 3)), ttl);
        let global = CacheKey::all_companies(MetricKind::Timelines);
        cache.put(global.clone(), Arc::new(result("C1", 9)), ttl);

        cache.invalidate(&company("C1"));

        assert!(cache.get(&key("C1")).is_none());
        assert!(cache.get(&global).is_none());
        assert!(cache.get(&key("C3")).is_some());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_get_or_compute_memoizes() {
        let cache = AggregationCache::default();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute(&key("C1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(result("C1", 1))
            })
            .await
            .unwrap();
        let second = cache
            .get_or_compute(&key("C1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(result("C1", 2))
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let cache = Arc::new(AggregationCache::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&key("C1"), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(result("C1", 7))
                    })
                    .await
            }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value.volume().unwrap()[0].value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_shared_but_not_cached() {
        let cache = Arc::new(AggregationCache::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&key("C1"), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(EngineError::Unavailable("ledger down".into()))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                Err(EngineError::Unavailable(_))
            ));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_during_computation_is_not_stored() {
        let cache = Arc::new(AggregationCache::default());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&key("C1"), || async move {
                        let _ = started_tx.send(());
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(result("C1", 1))
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        cache.invalidate(&company("C1"));

        // The pre-invalidation snapshot still reaches its own caller.
        let stale = leader.await.unwrap().unwrap();
        assert_eq!(stale.volume().unwrap()[0].value, 1);
        assert!(cache.get(&key("C1")).is_none());
        assert_eq!(cache.stats().stale_discards, 1);

        // A query issued after the invalidation computes afresh.
        let fresh = cache
            .get_or_compute(&key("C1"), || async { Ok(result("C1", 2)) })
            .await
            .unwrap();
        assert_eq!(fresh.volume().unwrap()[0].value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_leader_hands_over() {
        let cache = Arc::new(AggregationCache::default());

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let _ = tokio::time::timeout(
                    Duration::from_millis(10),
                    cache.get_or_compute(&key("C1"), || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(result("C1", 1))
                    }),
                )
                .await;
            })
        };
        tokio::task::yield_now().await;

        let follower = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&key("C1"), || async { Ok(result("C1", 2)) })
                    .await
            })
        };

        leader.await.unwrap();
        let value = follower.await.unwrap().unwrap();
        assert_eq!(value.volume().unwrap()[0].value, 2);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_claim_rechecks_entries_after_registering() {
        let cache = AggregationCache::default();
        assert!(cache.get(&key("C1")).is_none());

        // A leader finishes in the gap between the miss above and our claim.
        let stored = Arc::new(result("C1", 5));
        cache.put(key("C1"), stored.clone(), cache.default_ttl());

        let generation = cache.generation(&key("C1").scope);
        match cache.claim(&key("C1"), (key("C1"), generation)) {
            Role::Stored(hit) => assert!(Arc::ptr_eq(&hit, &stored)),
            _ => panic!("expected the stored entry"),
        }
        let stats = cache.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.computations, 0);
    }

    #[tokio::test]
    async fn test_claim_without_entry_leads() {
        let cache = AggregationCache::default();
        let generation = cache.generation(&key("C1").scope);
        let flight_key = (key("C1"), generation);

        assert!(matches!(
            cache.claim(&key("C1"), flight_key.clone()),
            Role::Leader(_)
        ));
        assert!(matches!(
            cache.claim(&key("C1"), flight_key),
            Role::Follower(_)
        ));
        assert_eq!(cache.stats().in_flight, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = AggregationCache::new(Duration::from_secs(60), 2);
        let ttl = cache.default_ttl();
        cache.put(key("A"), Arc::new(result("A", 1)), ttl);
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.put(key("B"), Arc::new(result("B", 1)), ttl);
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.put(key("C"), Arc::new(result("C", 1)), ttl);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("A")).is_none());
        assert!(cache.get(&key("C")).is_some());
    }
}
