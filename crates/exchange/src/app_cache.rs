//! API key to [`AuthorizedApp`] cache.
//!
//! # Architecture
//!
//! ```text
//! request → lookup(api_key)
//!         → moka hit? return shared snapshot
//!         → miss: try_get_with coalesces concurrent callers per key
//!                 → one VerificationStore fetch, bounded by fetch_timeout
//!                 → Some(app) cached, NotFound / errors handed to every waiter
//! ```
//!
//! # Cache Strategy
//!
//! - **TTL**: Default 300 seconds (5 minutes)
//! - **Capacity**: Default 10 000 entries
//! - **Refresh**: Optional background task re-fetching keys looked up since the last cycle, so
//!   soft deletions become visible before the TTL runs out
//!
//! Only present apps are cached. A missing app or a failed fetch is retried
//! by the next caller.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use enverify_storage::{AuthorizedApp, VerificationStore};
use fail::fail_point;
use moka::future::Cache;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::LookupError;

/// Default cache TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default maximum cache capacity.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Default bound on a single backend fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Write-through cache of authorized apps keyed by API key.
///
/// Concurrent lookups of the same uncached key share one backend fetch.
/// Lookups of different keys never wait on each other, and hits never wait
/// on fetches. If the caller driving a fetch is dropped, another waiter
/// takes it over.
///
/// Soft-deleted apps are cached like any other snapshot; callers must check
/// [`AuthorizedApp::is_active`].
pub struct AuthorizationCache {
    /// Snapshots with TTL-based expiration.
    cache: Cache<String, Arc<AuthorizedApp>>,
    /// Backing store queried on miss.
    store: Arc<dyn VerificationStore>,
    /// Upper bound on a single backend fetch.
    fetch_timeout: Duration,
    /// Keys looked up since the last background refresh cycle.
    active_keys: Arc<Mutex<HashSet<String>>>,
    /// Whether lookups should feed `active_keys`.
    track_active: AtomicBool,
    /// Cancellation token for stopping the background refresh task.
    cancel_token: CancellationToken,
    /// Handle for the background refresh task, if running.
    refresh_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Number of completed background refresh cycles.
    refresh_count: AtomicU64,
    /// Total number of keys successfully refreshed across all cycles.
    refresh_keys_total: AtomicU64,
    /// Total number of keys evicted by refresh because the app is gone or deleted.
    refresh_evictions_total: AtomicU64,
    /// Total number of per-key refresh errors across all cycles.
    refresh_errors_total: AtomicU64,
    /// Cumulative refresh latency in microseconds across all cycles.
    refresh_latency_us: AtomicU64,
}

impl AuthorizationCache {
    /// Creates a cache with default capacity and fetch timeout.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::{sync::Arc, time::Duration};
    ///
    /// use enverify_exchange::AuthorizationCache;
    /// use enverify_storage::{BackendVerificationStore, MemoryBackend};
    ///
    /// let store = Arc::new(BackendVerificationStore::new(MemoryBackend::new()));
    /// let cache = AuthorizationCache::new(store, Duration::from_secs(300));
    /// assert_eq!(cache.entry_count(), 0);
    /// ```
    #[must_use]
    pub fn new(store: Arc<dyn VerificationStore>, ttl: Duration) -> Self {
        Self::with_capacity(store, ttl, DEFAULT_CACHE_CAPACITY)
    }

    /// Creates a cache with a custom capacity.
    #[must_use]
    pub fn with_capacity(
        store: Arc<dyn VerificationStore>,
        ttl: Duration,
        max_capacity: u64,
    ) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).max_capacity(max_capacity).build(),
            store,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            active_keys: Arc::new(Mutex::new(HashSet::new())),
            track_active: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
            refresh_handle: Mutex::new(None),
            refresh_count: AtomicU64::new(0),
            refresh_keys_total: AtomicU64::new(0),
            refresh_evictions_total: AtomicU64::new(0),
            refresh_errors_total: AtomicU64::new(0),
            refresh_latency_us: AtomicU64::new(0),
        }
    }

    /// Sets the upper bound on a single backend fetch.
    #[must_use]
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Returns the app registered under `api_key`.
    ///
    /// # Errors
    ///
    /// - [`LookupError::NotFound`] if no app is registered under the key
    /// - [`LookupError::Backend`] if the store failed
    /// - [`LookupError::Timeout`] if the fetch exceeded the fetch timeout
    ///
    /// None of these outcomes are cached.
    #[tracing::instrument(skip_all)]
    pub async fn lookup(&self, api_key: &str) -> Result<Arc<AuthorizedApp>, LookupError> {
        if let Some(app) = self.cache.get(api_key).await {
            tracing::debug!(cache = "hit", "authorized app cache hit");
            self.track(api_key);
            return Ok(app);
        }
        tracing::debug!(cache = "miss", "authorized app cache miss");

        let app = self
            .cache
            .try_get_with(api_key.to_owned(), self.fetch(api_key))
            .await
            .map_err(|err| LookupError::clone(&err))?;

        self.track(api_key);
        Ok(app)
    }

    /// Fetches one app from the store, bounded by the fetch timeout.
    async fn fetch(&self, api_key: &str) -> Result<Arc<AuthorizedApp>, LookupError> {
        fail_point!("cache-before-fetch", |_| {
            Err(LookupError::from(enverify_storage::StorageError::internal(
                "injected failure before fetch",
            )))
        });

        let fetch = self.store.find_authorized_app_by_key(api_key);
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(Some(app))) => Ok(Arc::new(app)),
            Ok(Ok(None)) => Err(LookupError::NotFound),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "authorized app fetch failed");
                Err(LookupError::from(err))
            },
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "authorized app fetch timed out"
                );
                Err(LookupError::Timeout)
            },
        }
    }

    fn track(&self, api_key: &str) {
        if self.track_active.load(Ordering::Relaxed) {
            self.active_keys.lock().insert(api_key.to_owned());
        }
    }

    /// Drops the cached snapshot for `api_key`.
    ///
    /// An audit event is emitted at INFO level. The API key itself is not
    /// recorded.
    #[tracing::instrument(skip_all)]
    pub async fn invalidate(&self, api_key: &str) {
        self.cache.invalidate(api_key).await;
        self.active_keys.lock().remove(api_key);
        tracing::info!(
            audit.action = "invalidate_cache",
            audit.resource = "authorized_app",
            audit.result = "success",
            "audit_event"
        );
    }

    /// Drops every cached snapshot.
    #[tracing::instrument(skip(self))]
    pub async fn clear_all(&self) {
        let evicted = self.cache.entry_count();
        self.cache.invalidate_all();
        self.active_keys.lock().clear();
        tracing::info!(
            audit.action = "clear_cache",
            audit.resource = "all_authorized_apps",
            audit.result = "success",
            audit.evicted = evicted,
            "audit_event"
        );
    }

    /// Stops the background refresh task, if running, and clears the cache.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.refresh_handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "background refresh task panicked");
        }
        self.clear_all().await;
    }

    /// Returns the current entry count.
    ///
    /// Eventually consistent; tests call `sync` first.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Enables background refresh of recently used keys at `interval`.
    ///
    /// Each tick re-fetches every key looked up since the previous tick.
    /// Active apps replace their cached snapshot, missing or soft-deleted
    /// apps are evicted, and keys whose fetch failed are retried next tick.
    ///
    /// The task stops on [`shutdown`](Self::shutdown) or when
    /// [`cancel_token`](Self::cancel_token) is cancelled.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    #[must_use]
    pub fn with_refresh_interval(self: Arc<Self>, interval: Duration) -> Arc<Self> {
        let cache = Arc::clone(&self);
        let token = self.cancel_token.clone();
        self.track_active.store(true, Ordering::Relaxed);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("background refresh task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.do_refresh_cycle().await;
                    }
                }
            }
        });

        *self.refresh_handle.lock() = Some(handle);
        self
    }

    /// Runs a single background refresh cycle over the drained active set.
    async fn do_refresh_cycle(&self) {
        let keys: Vec<String> = {
            let mut set = self.active_keys.lock();
            set.drain().collect()
        };

        if keys.is_empty() {
            return;
        }

        let start = Instant::now();
        let mut refreshed: u64 = 0;
        let mut evicted: u64 = 0;
        let mut errors: u64 = 0;

        for api_key in &keys {
            match self.fetch(api_key).await {
                Ok(app) if app.is_active() => {
                    self.cache.insert(api_key.clone(), app).await;
                    refreshed += 1;
                },
                Ok(_) | Err(LookupError::NotFound) => {
                    tracing::debug!("background refresh: app gone or deleted, evicting");
                    self.cache.invalidate(api_key).await;
                    evicted += 1;
                },
                Err(err) => {
                    tracing::warn!(error = %err, "background refresh: fetch failed");
                    errors += 1;
                    self.active_keys.lock().insert(api_key.clone());
                },
            }
        }

        let elapsed = start.elapsed();

        self.refresh_count.fetch_add(1, Ordering::Relaxed);
        self.refresh_keys_total.fetch_add(refreshed, Ordering::Relaxed);
        self.refresh_evictions_total.fetch_add(evicted, Ordering::Relaxed);
        self.refresh_errors_total.fetch_add(errors, Ordering::Relaxed);
        self.refresh_latency_us.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        tracing::info!(
            refreshed,
            evicted,
            errors,
            elapsed_ms = elapsed.as_millis() as u64,
            total_keys = keys.len(),
            "background refresh cycle complete"
        );
    }

    /// Returns the number of keys awaiting the next refresh cycle.
    #[must_use]
    pub fn active_key_count(&self) -> usize {
        self.active_keys.lock().len()
    }

    /// Returns the cancellation token for the background refresh task.
    ///
    /// Callers can use this to integrate with external shutdown signals.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Returns the number of completed background refresh cycles.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }

    /// Returns the total number of keys successfully refreshed.
    #[must_use]
    pub fn refresh_keys_total(&self) -> u64 {
        self.refresh_keys_total.load(Ordering::Relaxed)
    }

    /// Returns the total number of keys evicted by refresh.
    #[must_use]
    pub fn refresh_evictions_total(&self) -> u64 {
        self.refresh_evictions_total.load(Ordering::Relaxed)
    }

    /// Returns the total number of per-key refresh errors.
    #[must_use]
    pub fn refresh_errors_total(&self) -> u64 {
        self.refresh_errors_total.load(Ordering::Relaxed)
    }

    /// Returns the cumulative refresh latency in microseconds.
    #[must_use]
    pub fn refresh_latency_us(&self) -> u64 {
        self.refresh_latency_us.load(Ordering::Relaxed)
    }

    /// Synchronizes pending cache operations.
    #[cfg(any(test, feature = "testutil"))]
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for AuthorizationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCache")
            .field("entry_count", &self.cache.entry_count())
            .field("fetch_timeout", &self.fetch_timeout)
            .field("refresh_count", &self.refresh_count())
            .finish_non_exhaustive()
    }
}
