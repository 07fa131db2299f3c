//! Timer-driven refresh of the selected route's feed.
//!
//! Each selection (route plus the feed group carrying it) gets its own epoch
//! and its own timer task. Selecting something else cancels the previous task
//! and bumps the epoch, so a fetch that completes for an abandoned selection
//! can never overwrite the published state. The cache underneath is keyed by
//! feed group, so such a late result is still useful to the next reader.
//!
//! State is published on a [`watch`] channel:
//!
//! ```text
//! Idle -> Loading -> Cached { stale: false }
//!                  | Cached { stale: true, warning }
//!                  | Error
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, warn};

use crate::cache::{CacheRead, FeedCache};
use crate::clock::{Clock, SystemClock};
use crate::routes::{FeedGroup, feed_group_for};
use crate::source::SnapshotSource;
use crate::vehicle::Vehicle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

/// Timer cadence and the cache TTL each cycle asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub ttl: Duration,
}

impl PollConfig {
    /// `ttl` is capped at `interval`.
    pub fn new(interval: Duration, ttl: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        if ttl > interval {
            warn!(
                ttl_ms = ttl.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "Cache TTL longer than poll interval, clamping"
            );
        }
        Self {
            interval,
            ttl: ttl.min(interval),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_CACHE_TTL)
    }
}

/// What the user is looking at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selection {
    pub route_id: String,
    pub feed_group: FeedGroup,
}

impl Selection {
    pub fn route(route_id: &str) -> Self {
        Self {
            route_id: route_id.to_string(),
            feed_group: feed_group_for(route_id),
        }
    }
}

/// Vehicles of the selected route from one refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteUpdate {
    pub vehicles: Vec<Vehicle>,
    pub fetched_at_ms: i64,
    pub cached: bool,
    pub stale: bool,
    pub warning: Option<String>,
}

impl RouteUpdate {
    fn from_read(read: &CacheRead, route_id: &str) -> Self {
        Self {
            vehicles: read.snapshot.for_route(route_id),
            fetched_at_ms: read.snapshot.fetched_at_ms,
            cached: read.cached,
            stale: read.stale,
            warning: read.warning_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Idle,
    Loading,
    Cached(RouteUpdate),
    /// Nothing could be served. The next tick retries.
    Error(String),
}

/// The published state, tagged with the epoch that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct PollStatus {
    pub epoch: u64,
    pub selection: Option<Selection>,
    pub state: PollState,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollerStats {
    pub timers_started: u64,
    pub timers_cancelled: u64,
}

struct ActiveSelection {
    selection: Selection,
    cancel: oneshot::Sender<()>,
    refresh: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Drives [`FeedCache::get_or_refresh`] on a timer for one selection at a
/// time. Must be used inside a tokio runtime.
pub struct SnapshotPoller<C = SystemClock> {
    cache: Arc<FeedCache<C>>,
    source: Arc<dyn SnapshotSource>,
    config: PollConfig,
    status: Arc<watch::Sender<PollStatus>>,
    active: Option<ActiveSelection>,
    epoch: u64,
    stats: PollerStats,
}

impl<C: Clock + 'static> SnapshotPoller<C> {
    pub fn new(cache: Arc<FeedCache<C>>, source: Arc<dyn SnapshotSource>, config: PollConfig) -> Self {
        let (status, _) = watch::channel(PollStatus {
            epoch: 0,
            selection: None,
            state: PollState::Idle,
        });
        Self {
            cache,
            source,
            config,
            status: Arc::new(status),
            active: None,
            epoch: 0,
            stats: PollerStats::default(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollStatus> {
        self.status.subscribe()
    }

    pub fn stats(&self) -> PollerStats {
        self.stats
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.active.as_ref().map(|a| &a.selection)
    }

    /// Makes `selection` the active one: cancels the previous timer, publishes
    /// `Loading`, refreshes once immediately and then every interval.
    ///
    /// Re-selecting the active selection does nothing and returns `false`.
    pub fn select(&mut self, selection: Selection) -> bool {
        if self.selection() == Some(&selection) {
            debug!(route_id = %selection.route_id, "Selection unchanged");
            return false;
        }

        self.cancel_active();
        self.epoch += 1;
        let epoch = self.epoch;

        self.status.send_replace(PollStatus {
            epoch,
            selection: Some(selection.clone()),
            state: PollState::Loading,
        });

        let (cancel, cancelled) = oneshot::channel();
        let refresh = Arc::new(Notify::new());
        let task = PollTask {
            epoch,
            selection: selection.clone(),
            cache: Arc::clone(&self.cache),
            source: Arc::clone(&self.source),
            config: self.config,
            status: Arc::clone(&self.status),
            refresh: Arc::clone(&refresh),
        };
        let span = tracing::info_span!(
            "poll",
            epoch,
            route_id = %selection.route_id,
            feed_group = %selection.feed_group
        );
        let handle = tokio::spawn(task.run(cancelled).instrument(span));

        info!(
            epoch,
            route_id = %selection.route_id,
            feed_group = %selection.feed_group,
            interval_ms = self.config.interval.as_millis() as u64,
            "Polling started"
        );
        self.stats.timers_started += 1;
        self.active = Some(ActiveSelection {
            selection,
            cancel,
            refresh,
            handle,
        });
        true
    }

    /// Runs a refresh cycle now instead of waiting for the next tick.
    pub fn refresh_now(&self) {
        if let Some(active) = &self.active {
            active.refresh.notify_one();
        }
    }

    /// Stops polling and returns to `Idle`.
    pub fn stop(&mut self) {
        if self.cancel_active() {
            self.epoch += 1;
            self.status.send_replace(PollStatus {
                epoch: self.epoch,
                selection: None,
                state: PollState::Idle,
            });
        }
    }

    fn cancel_active(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        // the task may already have exited; a closed channel is fine
        let _ = active.cancel.send(());
        drop(active.handle);
        self.stats.timers_cancelled += 1;
        debug!(route_id = %active.selection.route_id, "Polling cancelled");
        true
    }
}

impl<C> Drop for SnapshotPoller<C> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.cancel.send(());
        }
    }
}

struct PollTask<C> {
    epoch: u64,
    selection: Selection,
    cache: Arc<FeedCache<C>>,
    source: Arc<dyn SnapshotSource>,
    config: PollConfig,
    status: Arc<watch::Sender<PollStatus>>,
    refresh: Arc<Notify>,
}

impl<C: Clock + 'static> PollTask<C> {
    async fn run(self, mut cancelled: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        // a tick that lands while a fetch is outstanding is dropped, not queued
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => return,
                _ = ticker.tick() => {}
                _ = self.refresh.notified() => {}
            }

            let state = tokio::select! {
                biased;
                _ = &mut cancelled => return,
                state = self.cycle() => state,
            };
            self.publish(state);
        }
    }

    async fn cycle(&self) -> PollState {
        let group = self.selection.feed_group;
        let result = self
            .cache
            .get_or_refresh(group, self.config.ttl, || self.source.fetch_snapshot(group))
            .await;

        match result {
            Ok(read) => {
                let update = RouteUpdate::from_read(&read, &self.selection.route_id);
                debug!(
                    vehicles = update.vehicles.len(),
                    cached = update.cached,
                    stale = update.stale,
                    "Refresh cycle complete"
                );
                PollState::Cached(update)
            }
            Err(e) => PollState::Error(e.to_string()),
        }
    }

    /// Publishes `state` unless a newer selection has taken over.
    fn publish(&self, state: PollState) {
        let published = self.status.send_if_modified(|current| {
            if current.epoch != self.epoch {
                return false;
            }
            current.state = state;
            true
        });
        if !published {
            debug!(epoch = self.epoch, "Discarding result of superseded selection");
        }
    }
}
