//! Keyed query cache with staleness windows, shared in-flight fetches and eviction

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::clock::Clock;
use super::{CacheKey, CacheMetrics, QueryOptions, QueryResult};
use crate::shared::errors::ApiError;
use crate::shared::tasks::ScheduledTask;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ApiError>>>;

struct InFlight<V> {
    id: u64,
    fetch: SharedFetch<V>,
}

struct Entry<V> {
    /// Distinguishes this entry from one re-created under the same key
    generation: u64,
    value: Option<V>,
    fetched_at: Option<Instant>,
    last_accessed: Instant,
    error: Option<ApiError>,
    stale_after: Duration,
    evict_after: Duration,
    in_flight: Option<InFlight<V>>,
}

impl<V: Clone> Entry<V> {
    fn new(generation: u64, now: Instant, options: &QueryOptions) -> Self {
        Self {
            generation,
            value: None,
            fetched_at: None,
            last_accessed: now,
            error: None,
            stale_after: options.stale_after,
            evict_after: options.evict_after,
            in_flight: None,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        match self.fetched_at {
            Some(at) => now.saturating_duration_since(at) < self.stale_after,
            None => false,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.in_flight.is_none() && now.saturating_duration_since(self.last_accessed) >= self.evict_after
    }

    fn result(&self) -> QueryResult<V> {
        QueryResult {
            data: self.value.clone(),
            is_loading: self.value.is_none() && self.in_flight.is_some(),
            is_fetching: self.in_flight.is_some(),
            error: self.error.clone(),
        }
    }
}

struct CacheState<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    metrics: CacheMetrics,
}

/// Maps a query key to its last good value and at most one outstanding fetch.
///
/// Cloning is cheap; clones share the same entries.
pub struct QueryCache<V> {
    state: Arc<Mutex<CacheState<V>>>,
    clock: Arc<dyn Clock>,
    next_fetch_id: Arc<AtomicU64>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
            next_fetch_id: Arc::clone(&self.next_fetch_id),
        }
    }
}

fn lock<V>(state: &Mutex<CacheState<V>>) -> MutexGuard<'_, CacheState<V>> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                metrics: CacheMetrics::default(),
            })),
            clock,
            next_fetch_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the freshest available value for `key`.
    ///
    /// Fresh entries never invoke `fetch_fn`. Stale entries are returned at once
    /// with a background refresh started. Missing entries are fetched and awaited;
    /// concurrent callers share that fetch.
    pub async fn get<F, Fut>(&self, key: CacheKey, fetch_fn: F, options: &QueryOptions) -> QueryResult<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let pending = {
            let mut state = lock(&self.state);
            let now = self.clock.now();
            Self::sweep_locked(&mut state, now);

            let CacheState { entries, metrics } = &mut *state;
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(self.next_id(), now, options));
            entry.last_accessed = now;
            entry.stale_after = options.stale_after;
            entry.evict_after = options.evict_after;

            if entry.value.is_some() {
                if entry.is_fresh(now) {
                    metrics.hits += 1;
                    trace!("cache hit for {}", key);
                    return entry.result();
                }
                metrics.stale_hits += 1;
                if entry.in_flight.is_none() {
                    debug!("serving stale {} while refreshing", key);
                    self.start_fetch(&key, entry, metrics, fetch_fn, options);
                }
                return entry.result();
            }

            metrics.misses += 1;
            match entry.in_flight.as_ref().map(|f| f.fetch.clone()) {
                Some(joined) => {
                    trace!("joining in-flight fetch for {}", key);
                    joined
                }
                None => self.start_fetch(&key, entry, metrics, fetch_fn, options),
            }
        };

        let outcome = pending.await;
        self.peek(&key).unwrap_or_else(|| QueryResult::from_outcome(outcome))
    }

    /// Starts a fetch for `key` unless it is fresh or already loading, without awaiting it.
    pub fn prefetch<F, Fut>(&self, key: CacheKey, fetch_fn: F, options: &QueryOptions)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let mut state = lock(&self.state);
        let now = self.clock.now();
        let CacheState { entries, metrics } = &mut *state;
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(self.next_id(), now, options));
        entry.last_accessed = now;
        if entry.in_flight.is_none() && !entry.is_fresh(now) {
            self.start_fetch(&key, entry, metrics, fetch_fn, options);
        }
    }

    /// Forces a new fetch even if the entry is fresh, joining one already in flight.
    pub async fn refetch<F, Fut>(&self, key: CacheKey, fetch_fn: F, options: &QueryOptions) -> QueryResult<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let pending = {
            let mut state = lock(&self.state);
            let now = self.clock.now();
            let CacheState { entries, metrics } = &mut *state;
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(self.next_id(), now, options));
            entry.last_accessed = now;
            match entry.in_flight.as_ref().map(|f| f.fetch.clone()) {
                Some(joined) => joined,
                None => self.start_fetch(&key, entry, metrics, fetch_fn, options),
            }
        };
        let outcome = pending.await;
        self.peek(&key).unwrap_or_else(|| QueryResult::from_outcome(outcome))
    }

    /// Current state of `key` without fetching or touching its access time.
    pub fn state(&self, key: &CacheKey) -> QueryResult<V> {
        self.peek(key).unwrap_or_default()
    }

    fn peek(&self, key: &CacheKey) -> Option<QueryResult<V>> {
        lock(&self.state).entries.get(key).map(Entry::result)
    }

    /// Stores `value` as a freshly fetched result (optimistic updates, prefill).
    pub fn set(&self, key: CacheKey, value: V, options: &QueryOptions) {
        let mut state = lock(&self.state);
        let now = self.clock.now();
        let entry = state
            .entries
            .entry(key)
            .or_insert_with(|| Entry::new(self.next_id(), now, options));
        entry.value = Some(value);
        entry.fetched_at = Some(now);
        entry.last_accessed = now;
        entry.error = None;
    }

    /// Drops `key`; a fetch still in flight completes but its result is discarded.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        lock(&self.state).entries.remove(key).is_some()
    }

    /// Drops every key of one entity (e.g. all balances after a swap).
    pub fn invalidate_entity(&self, entity: &str) -> usize {
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state.entries.retain(|key, _| key.entity() != entity);
        before - state.entries.len()
    }

    /// Removes entries unused for longer than their `evict_after`.
    pub fn sweep(&self) -> usize {
        let mut state = lock(&self.state);
        let now = self.clock.now();
        Self::sweep_locked(&mut state, now)
    }

    /// Owned periodic eviction sweep; cancel or drop the handle to stop it.
    pub fn spawn_sweeper(&self, name: &str, period: Duration) -> ScheduledTask {
        let cache = self.clone();
        ScheduledTask::every(format!("{}-sweeper", name), period, move || {
            let cache = cache.clone();
            async move {
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!("evicted {} idle cache entries", evicted);
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        lock(&self.state).metrics.clone()
    }

    fn sweep_locked(state: &mut CacheState<V>, now: Instant) -> usize {
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before - state.entries.len();
        state.metrics.evictions += evicted as u64;
        evicted
    }

    fn next_id(&self) -> u64 {
        self.next_fetch_id.fetch_add(1, Ordering::Relaxed)
    }

    fn start_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        entry: &mut Entry<V>,
        metrics: &mut CacheMetrics,
        fetch_fn: F,
        options: &QueryOptions,
    ) -> SharedFetch<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let id = self.next_id();
        let generation = entry.generation;
        let state = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);
        let retry = options.retry.clone();
        let key = key.clone();
        metrics.fetches += 1;

        let fetch = async move {
            let label = key.to_string();
            let outcome = retry.run(&label, fetch_fn).await;
            Self::complete(&state, clock.now(), &key, (generation, id), &outcome);
            outcome
        }
        .boxed()
        .shared();

        entry.in_flight = Some(InFlight {
            id,
            fetch: fetch.clone(),
        });
        // Drives the fetch to completion even if every caller goes away.
        tokio::spawn(fetch.clone());
        fetch
    }

    /// Applies `outcome` only to the entry the fetch was started for.
    fn complete(
        state: &Mutex<CacheState<V>>,
        now: Instant,
        key: &CacheKey,
        (generation, id): (u64, u64),
        outcome: &Result<V, ApiError>,
    ) {
        let mut state = lock(state);
        let CacheState { entries, metrics } = &mut *state;
        let entry = match entries.get_mut(key) {
            Some(entry) if entry.generation == generation => entry,
            _ => {
                debug!("discarding result for invalidated key {}", key);
                return;
            }
        };
        match outcome {
            Ok(value) => {
                entry.value = Some(value.clone());
                entry.fetched_at = Some(now);
                entry.error = None;
            }
            Err(err) => {
                metrics.failures += 1;
                warn!("fetch for {} failed: {}", key, err);
                entry.error = Some(err.clone());
            }
        }
        if entry.in_flight.as_ref().map(|f| f.id) == Some(id) {
            entry.in_flight = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::clock::TokioClock;
    use crate::domain::cache::retry::RetryPolicy;
    use std::sync::atomic::AtomicUsize;

    fn options(stale_ms: u64, evict_ms: u64) -> QueryOptions {
        QueryOptions {
            stale_after: Duration::from_millis(stale_ms),
            evict_after: Duration::from_millis(evict_ms),
            retry: RetryPolicy::none(),
        }
    }

    fn cache() -> QueryCache<u64> {
        QueryCache::new(Arc::new(TokioClock))
    }

    /// Fetcher that counts calls, sleeps `delay_ms` and returns the call number.
    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        delay_ms: u64,
    ) -> impl Fn() -> BoxFuture<'static, Result<u64, ApiError>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(n as u64)
            }
            .boxed()
        }
    }

    fn failing_fetch(calls: &Arc<AtomicUsize>) -> impl Fn() -> BoxFuture<'static, Result<u64, ApiError>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Upstream { status: 500, message: "boom".into() })
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_gets_share_one_fetch() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = options(1_000, 10_000);
        let key = CacheKey::new("price").param("0.0.1");

        let (a, b) = tokio::join!(
            cache.get(key.clone(), counting_fetch(&calls, 50), &opts),
            cache.get(key.clone(), counting_fetch(&calls, 50), &opts),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.data, Some(1));
        assert_eq!(b.data, Some(1));
        assert!(!a.is_loading && !b.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entries_do_not_refetch() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = options(1_000, 10_000);
        let key = CacheKey::new("tokens");

        cache.get(key.clone(), counting_fetch(&calls, 0), &opts).await;
        tokio::time::advance(Duration::from_millis(999)).await;
        let again = cache.get(key.clone(), counting_fetch(&calls, 0), &opts).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(again.data, Some(1));
        assert!(!again.is_fetching);
        assert_eq!(cache.metrics().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_served_while_refreshing() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = options(100, 10_000);
        let key = CacheKey::new("balances").param("0.0.42");

        cache.get(key.clone(), counting_fetch(&calls, 10), &opts).await;
        tokio::time::advance(Duration::from_millis(150)).await;

        let stale = cache.get(key.clone(), counting_fetch(&calls, 10), &opts).await;
        assert_eq!(stale.data, Some(1));
        assert!(stale.is_fetching);
        assert!(!stale.is_loading);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let refreshed = cache.state(&key);
        assert_eq!(refreshed.data, Some(2));
        assert!(!refreshed.is_fetching);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_last_good_value() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = options(100, 10_000);
        let key = CacheKey::new("price").param("0.0.9");

        cache.get(key.clone(), counting_fetch(&calls, 0), &opts).await;
        tokio::time::advance(Duration::from_millis(200)).await;
        cache.get(key.clone(), failing_fetch(&calls), &opts).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let state = cache.state(&key);
        assert_eq!(state.data, Some(1));
        assert!(matches!(state.error, Some(ApiError::Upstream { status: 500, .. })));
        assert_eq!(cache.metrics().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_fetch_failure_surfaces_error_without_data() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = QueryOptions {
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(10),
                ..RetryPolicy::default()
            },
            ..options(100, 10_000)
        };

        let result = cache.get(CacheKey::new("tokens"), failing_fetch(&calls), &opts).await;
        assert_eq!(result.data, None);
        assert!(result.error.is_some());
        assert!(!result.is_loading);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn state_reports_loading_while_first_fetch_runs() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = options(100, 10_000);
        let key = CacheKey::new("quote").param("a").param("b");

        cache.prefetch(key.clone(), counting_fetch(&calls, 50), &opts);
        let loading = cache.state(&key);
        assert!(loading.is_loading);
        assert_eq!(loading.data, None);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let done = cache.state(&key);
        assert!(!done.is_loading);
        assert_eq!(done.data, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_are_evicted() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = options(100, 1_000);

        cache.get(CacheKey::new("a"), counting_fetch(&calls, 0), &opts).await;
        cache.get(CacheKey::new("b"), counting_fetch(&calls, 0), &opts).await;
        assert_eq!(cache.len(), 2);

        tokio::time::advance(Duration::from_millis(500)).await;
        cache.get(CacheKey::new("b"), counting_fetch(&calls, 0), &opts).await;
        tokio::time::advance(Duration::from_millis(600)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.state(&CacheKey::new("a")).data, None);
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidated_key_discards_late_result() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = options(100, 10_000);
        let key = CacheKey::new("balances").param("0.0.7");

        cache.prefetch(key.clone(), counting_fetch(&calls, 50), &opts);
        assert!(cache.invalidate(&key));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_result_does_not_overwrite_recreated_entry() {
        let cache = cache();
        let slow = Arc::new(AtomicUsize::new(0));
        let fast = Arc::new(AtomicUsize::new(1));
        let opts = options(10_000, 60_000);
        let key = CacheKey::new("balances").param("0.0.7");

        // Pre-swap fetch returns 1 after 100ms.
        cache.prefetch(key.clone(), counting_fetch(&slow, 100), &opts);
        assert!(cache.invalidate(&key));
        // Post-swap fetch returns 2 after 10ms.
        let fresh = cache.get(key.clone(), counting_fetch(&fast, 10), &opts).await;
        assert_eq!(fresh.data, Some(2));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(slow.load(Ordering::SeqCst), 1);

        let current = cache.state(&key);
        assert_eq!(current.data, Some(2));
        assert!(!current.is_fetching);
        let calls_before = fast.load(Ordering::SeqCst);
        cache.get(key, counting_fetch(&fast, 10), &opts).await;
        assert_eq!(fast.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn set_and_invalidate_entity() {
        let cache = cache();
        let opts = options(1_000, 10_000);
        cache.set(CacheKey::new("balances").param("0.0.1"), 10, &opts);
        cache.set(CacheKey::new("balances").param("0.0.2"), 20, &opts);
        cache.set(CacheKey::new("tokens"), 30, &opts);

        let calls = Arc::new(AtomicUsize::new(0));
        let hit = cache
            .get(CacheKey::new("balances").param("0.0.1"), counting_fetch(&calls, 0), &opts)
            .await;
        assert_eq!(hit.data, Some(10));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(cache.invalidate_entity("balances"), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_ignores_freshness() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = options(10_000, 60_000);
        let key = CacheKey::new("tokens");

        cache.get(key.clone(), counting_fetch(&calls, 0), &opts).await;
        let forced = cache.refetch(key.clone(), counting_fetch(&calls, 0), &opts).await;
        assert_eq!(forced.data, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_evicts_in_background() {
        let cache = cache();
        let opts = options(100, 1_000);
        cache.set(CacheKey::new("tokens"), 1, &opts);

        let sweeper = cache.spawn_sweeper("test", Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(1_600)).await;
        assert!(cache.is_empty());
        sweeper.cancel().await;
    }
}
