//! Per-feed-group snapshot cache with TTL freshness and stale fallback.
//!
//! One entry per [`FeedGroup`]. A fresh entry is served without touching the
//! network; an expired one triggers a refresh; a failed refresh falls back to
//! whatever was cached last, however old, marked stale. Only a failure with
//! nothing cached reaches the caller as an error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{FetchError, StaleDataWarning};
use crate::routes::FeedGroup;
use crate::vehicle::FeedSnapshot;

/// The last successful snapshot for a feed group.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub snapshot: Arc<FeedSnapshot>,
    pub cached_at_ms: i64,
}

/// Result of [`FeedCache::get_or_refresh`].
#[derive(Debug, Clone)]
pub struct CacheRead {
    pub snapshot: Arc<FeedSnapshot>,
    pub cached_at_ms: i64,
    /// Served from the cache rather than a fetch made by this call.
    pub cached: bool,
    /// The refresh failed and this snapshot is older than the TTL.
    pub stale: bool,
    pub warning: Option<StaleDataWarning>,
}

impl CacheRead {
    pub fn warning_message(&self) -> Option<String> {
        self.warning.as_ref().map(ToString::to_string)
    }
}

pub struct FeedCache<C = SystemClock> {
    clock: C,
    entries: Mutex<HashMap<FeedGroup, CacheEntry>>,
    refresh_locks: Mutex<HashMap<FeedGroup, Arc<tokio::sync::Mutex<()>>>>,
}

impl FeedCache<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for FeedCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> FeedCache<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Current entry for `group`, regardless of age.
    pub fn peek(&self, group: FeedGroup) -> Option<CacheEntry> {
        self.entries().get(&group).cloned()
    }

    /// Returns the cached snapshot for `group` while it is younger than `ttl`,
    /// otherwise runs `fetch` and caches its result.
    ///
    /// At most one `fetch` runs per feed group at a time. Callers that arrive
    /// while a refresh is in flight wait for it and are then served from the
    /// cache it filled.
    ///
    /// # Errors
    ///
    /// Returns the fetch error only when the refresh fails and no snapshot has
    /// ever been cached for `group`.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        group: FeedGroup,
        ttl: Duration,
        fetch: F,
    ) -> Result<CacheRead, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FeedSnapshot, FetchError>>,
    {
        if let Some(hit) = self.fresh(group, ttl) {
            debug!(feed_group = %group, "Serving cached snapshot");
            return Ok(hit);
        }

        let lock = self.refresh_lock(group);
        let _guard = lock.lock().await;

        if let Some(hit) = self.fresh(group, ttl) {
            debug!(feed_group = %group, "Refreshed by a concurrent caller");
            return Ok(hit);
        }

        match fetch().await {
            Ok(snapshot) => {
                let cached_at_ms = self.clock.now_ms();
                let snapshot = Arc::new(snapshot);
                self.entries().insert(
                    group,
                    CacheEntry {
                        snapshot: Arc::clone(&snapshot),
                        cached_at_ms,
                    },
                );
                info!(
                    feed_group = %group,
                    vehicles = snapshot.vehicles.len(),
                    "Feed refreshed"
                );
                Ok(CacheRead {
                    snapshot,
                    cached_at_ms,
                    cached: false,
                    stale: false,
                    warning: None,
                })
            }
            Err(err) => {
                let fallback = self.peek(group);
                match fallback {
                    Some(entry) => {
                        warn!(
                            feed_group = %group,
                            error = %err,
                            age_ms = self.clock.now_ms() - entry.cached_at_ms,
                            "Refresh failed, serving stale snapshot"
                        );
                        Ok(CacheRead {
                            warning: Some(StaleDataWarning {
                                cached_at_ms: entry.cached_at_ms,
                                cause: err.to_string(),
                            }),
                            snapshot: entry.snapshot,
                            cached_at_ms: entry.cached_at_ms,
                            cached: true,
                            stale: true,
                        })
                    }
                    None => {
                        error!(feed_group = %group, error = %err, "Refresh failed with nothing cached");
                        Err(err)
                    }
                }
            }
        }
    }

    fn fresh(&self, group: FeedGroup, ttl: Duration) -> Option<CacheRead> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let now = self.clock.now_ms();
        self.peek(group)
            .filter(|entry| now - entry.cached_at_ms < ttl_ms)
            .map(|entry| CacheRead {
                snapshot: entry.snapshot,
                cached_at_ms: entry.cached_at_ms,
                cached: true,
                stale: false,
                warning: None,
            })
    }

    fn refresh_lock(&self, group: FeedGroup) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(group).or_default())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<FeedGroup, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
