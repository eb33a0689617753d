//! Coalescing cache for one remote query.
//!
//! Concurrent [`ResultCache::get`] calls share a single in-flight fetch. The
//! fetch observes a token from the active [`CancellationAggregator`], so it
//! is aborted only once every caller waiting on it has given up.

mod backoff;
mod cancellation;
mod error;

pub use backoff::RetryBackoff;
pub use cancellation::{
    CancellationAggregator, EnrollAndWaitForAll, Enrollment, IgnoreCancellation,
};
pub use error::CacheError;

use ctxwire_config::ResultCacheConfig;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheOptions {
    pub max_age: Duration,
    pub initial_retry_delay: Duration,
    pub retry_backoff_factor: f64,
    pub max_retry_delay: Duration,
}

impl CacheOptions {
    /// Keep successful values until [`ResultCache::invalidate`] is called.
    pub fn never_expire(self) -> Self {
        Self {
            max_age: Duration::MAX,
            ..self
        }
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from(&ResultCacheConfig::default())
    }
}

impl From<&ResultCacheConfig> for CacheOptions {
    fn from(config: &ResultCacheConfig) -> Self {
        Self {
            max_age: config.max_age(),
            initial_retry_delay: config.initial_retry_delay(),
            retry_backoff_factor: config.retry_backoff_factor,
            max_retry_delay: config.max_retry_delay(),
        }
    }
}

struct CacheEntry<V: Clone> {
    generation: u64,
    fetch_started_at: Instant,
    value: Option<Result<V, CacheError>>,
    shared_fetch: SharedFetch<V>,
}

struct CacheState<V: Clone> {
    options: CacheOptions,
    entry: Option<CacheEntry<V>>,
    aggregator: Arc<dyn CancellationAggregator>,
    generation: u64,
    backoff: RetryBackoff,
}

enum Lookup<V: Clone> {
    Ready(Result<V, CacheError>),
    Pending(SharedFetch<V>, Enrollment),
    Miss,
}

impl<V: Clone> CacheState<V> {
    fn lookup(&self, now: Instant) -> Lookup<V> {
        let Some(entry) = self.entry.as_ref() else {
            return Lookup::Miss;
        };

        match &entry.value {
            None if !self.aggregator.token().is_cancelled() => {
                Lookup::Pending(entry.shared_fetch.clone(), self.aggregator.enroll())
            }
            None => Lookup::Miss,
            Some(Ok(value))
                if now.saturating_duration_since(entry.fetch_started_at) < self.options.max_age =>
            {
                Lookup::Ready(Ok(value.clone()))
            }
            Some(Ok(_)) => Lookup::Miss,
            Some(Err(error)) if !self.backoff.allows_retry(now) => Lookup::Ready(Err(error.clone())),
            Some(Err(_)) => Lookup::Miss,
        }
    }

    fn settle(&mut self, generation: u64, result: &Result<V, CacheError>, now: Instant) {
        if generation != self.generation {
            return;
        }

        match result {
            Err(CacheError::Cancelled) => {
                self.entry = None;
            }
            Ok(_) => {
                self.backoff.record_success();
                if let Some(entry) = self.entry.as_mut() {
                    entry.value = Some(result.clone());
                }
            }
            Err(error) => {
                let delay = self.backoff.record_failure(now);
                warn!(
                    error = %error,
                    retry_in_ms = delay.as_millis() as u64,
                    failures = self.backoff.consecutive_failures(),
                    "cached fetch failed"
                );
                if let Some(entry) = self.entry.as_mut() {
                    entry.value = Some(result.clone());
                }
            }
        }

        self.aggregator = Arc::new(IgnoreCancellation::default());
    }
}

/// Caches the latest result of one asynchronous query.
///
/// Cloning yields another handle to the same cache.
pub struct ResultCache<V: Clone> {
    state: Arc<Mutex<CacheState<V>>>,
}

impl<V: Clone> Clone for ResultCache<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl<V: Clone + Send + Sync + 'static> ResultCache<V> {
    pub fn new(options: CacheOptions) -> Self {
        let backoff = RetryBackoff::new(
            options.initial_retry_delay,
            options.retry_backoff_factor,
            options.max_retry_delay,
        );
        Self {
            state: Arc::new(Mutex::new(CacheState {
                options,
                entry: None,
                aggregator: Arc::new(IgnoreCancellation::default()),
                generation: 0,
                backoff,
            })),
        }
    }

    pub fn options(&self) -> CacheOptions {
        self.state.lock().options
    }

    /// Return the cached value, join the fetch in flight, or start one.
    ///
    /// `fetch` runs only on a miss and receives the aggregated token. A
    /// caller leaves the shared fetch when `cancel` fires or when the
    /// returned future is dropped.
    pub async fn get<F, Fut>(
        &self,
        cancel: Option<&CancellationToken>,
        fetch: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.get_or_refresh_if(cancel, || false, fetch).await
    }

    /// Like [`get`](Self::get), but a settled result is dropped and fetched
    /// again when `is_stale` returns true.
    ///
    /// `is_stale` runs under the cache lock and only when a settled result
    /// exists, so a fetch already in flight is always joined, never replaced.
    pub async fn get_or_refresh_if<P, F, Fut>(
        &self,
        cancel: Option<&CancellationToken>,
        is_stale: P,
        fetch: F,
    ) -> Result<V, CacheError>
    where
        P: FnOnce() -> bool,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let (shared, enrollment) = {
            let mut state = self.state.lock();
            let mut lookup = state.lookup(Instant::now());
            if matches!(lookup, Lookup::Ready(_)) && is_stale() {
                lookup = Lookup::Miss;
            }
            match lookup {
                Lookup::Ready(result) => return result,
                Lookup::Pending(shared, enrollment) => (shared, enrollment),
                Lookup::Miss => self.start_fetch(&mut state, fetch),
            }
        };

        let result = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        drop(enrollment);
                        return Err(CacheError::Cancelled);
                    }
                    result = shared => result,
                }
            }
            None => shared.await,
        };

        enrollment.complete();
        result
    }

    fn start_fetch<F, Fut>(
        &self,
        state: &mut CacheState<V>,
        fetch: F,
    ) -> (SharedFetch<V>, Enrollment)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        state.generation += 1;
        let generation = state.generation;

        let aggregator: Arc<dyn CancellationAggregator> = Arc::new(EnrollAndWaitForAll::new());
        let enrollment = aggregator.enroll();
        let token = aggregator.token();
        state.aggregator = aggregator;

        let weak: Weak<Mutex<CacheState<V>>> = Arc::downgrade(&self.state);
        let fetch_future = fetch(token.clone());
        let shared_fetch = async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(CacheError::Cancelled),
                result = fetch_future => result.map_err(CacheError::from),
            };

            if let Some(state) = weak.upgrade() {
                state.lock().settle(generation, &result, Instant::now());
            }
            if result.as_ref().is_err_and(CacheError::is_cancelled) {
                debug!(generation, "shared fetch cancelled");
            }
            result
        }
        .boxed()
        .shared();

        state.entry = Some(CacheEntry {
            generation,
            fetch_started_at: Instant::now(),
            value: None,
            shared_fetch: shared_fetch.clone(),
        });

        (shared_fetch, enrollment)
    }

    /// Drop the cached value and cancel any fetch in flight.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entry.take()
            && entry.value.is_none()
        {
            debug!(generation = entry.generation, "aborting in-flight fetch");
        }
        state.aggregator.abort();
        state.aggregator = Arc::new(IgnoreCancellation::default());
        state.generation += 1;
    }

    /// Whether a fetch is in flight and still has callers waiting on it.
    pub fn is_fetching(&self) -> bool {
        let state = self.state.lock();
        state.entry.as_ref().is_some_and(|entry| entry.value.is_none())
            && !state.aggregator.token().is_cancelled()
    }

    /// The settled value, if any, without triggering a fetch.
    pub fn peek(&self) -> Option<Result<V, CacheError>> {
        self.state
            .lock()
            .entry
            .as_ref()
            .and_then(|entry| entry.value.clone())
    }
}
