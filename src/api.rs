//! JSON envelopes for vehicles, stops and health, independent of any HTTP
//! framework. Handlers return the envelope or an [`ApiError`] that knows its
//! status code.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, instrument};

use crate::cache::FeedCache;
use crate::clock::Clock;
use crate::error::FetchError;
use crate::routes::{FeedGroup, feed_group_for};
use crate::source::SnapshotSource;
use crate::stops::{Stop, StopIndex};
use crate::vehicle::Vehicle;

pub const SERVICE_NAME: &str = "gtfs_rt_tracker";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehiclesResponse {
    pub data: Vec<Vehicle>,
    pub timestamp: i64,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_feeds: Option<Vec<&'static str>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub updated_at: String,
    pub timestamp: i64,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid feed parameter")]
    InvalidFeed(String),
    #[error("A feed or route parameter is required")]
    MissingSelector,
    #[error("Route ID is required")]
    MissingRoute,
    #[error("Stop data not found for route {0}")]
    StopsNotFound(String),
    #[error("Failed to fetch vehicle data")]
    Fetch(#[source] FetchError),
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::InvalidFeed(_) | ApiError::MissingSelector | ApiError::MissingRoute => 400,
            ApiError::StopsNotFound(_) => 404,
            ApiError::Fetch(_) => 500,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let (message, available_feeds) = match self {
            ApiError::InvalidFeed(_) | ApiError::MissingSelector => (None, Some(FeedGroup::ids())),
            ApiError::StopsNotFound(_) => (
                Some("Run the preprocessing step to generate stop data".to_string()),
                None,
            ),
            ApiError::Fetch(e) => (Some(e.to_string()), None),
            ApiError::MissingRoute => (None, None),
        };
        ErrorResponse {
            error: self.to_string(),
            message,
            available_feeds,
        }
    }
}

/// Query parameters of the vehicles endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedQuery {
    pub feed: Option<String>,
    pub route: Option<String>,
}

impl FeedQuery {
    pub fn feed(feed: &str) -> Self {
        Self {
            feed: Some(feed.to_string()),
            route: None,
        }
    }

    pub fn route(route: &str) -> Self {
        Self {
            feed: None,
            route: Some(route.to_string()),
        }
    }

    /// An explicit feed wins; otherwise the route's feed group is used.
    pub fn resolve(&self) -> Result<FeedGroup, ApiError> {
        let feed = self.feed.as_deref().filter(|f| !f.is_empty());
        let route = self.route.as_deref().filter(|r| !r.is_empty());
        match (feed, route) {
            (Some(feed), _) => feed
                .parse()
                .map_err(|_| ApiError::InvalidFeed(feed.to_string())),
            (None, Some(route)) => Ok(feed_group_for(route)),
            (None, None) => Err(ApiError::MissingSelector),
        }
    }
}

/// Serves the vehicles of a feed group (optionally narrowed to one route)
/// through the cache.
#[instrument(skip_all, fields(feed = ?query.feed, route = ?query.route))]
pub async fn vehicles<C, S>(
    query: &FeedQuery,
    cache: &FeedCache<C>,
    source: &S,
    ttl: Duration,
) -> Result<VehiclesResponse, ApiError>
where
    C: Clock,
    S: SnapshotSource + ?Sized,
{
    let group = query.resolve()?;
    let read = cache
        .get_or_refresh(group, ttl, || source.fetch_snapshot(group))
        .await
        .map_err(|e| {
            error!(feed_group = %group, error = %e, "Error fetching GTFS-RT data");
            ApiError::Fetch(e)
        })?;

    let data = match query.route.as_deref().filter(|r| !r.is_empty()) {
        Some(route) => read.snapshot.for_route(route),
        None => read.snapshot.vehicles.clone(),
    };

    Ok(VehiclesResponse {
        data,
        timestamp: read.cached_at_ms,
        cached: read.cached,
        warning: read.warning_message(),
    })
}

pub fn stops(route_id: &str, index: &StopIndex, now_ms: i64) -> Result<DataResponse<Vec<Stop>>, ApiError> {
    if route_id.is_empty() {
        return Err(ApiError::MissingRoute);
    }
    let stops = index
        .for_route(route_id)
        .ok_or_else(|| ApiError::StopsNotFound(route_id.to_string()))?;
    Ok(DataResponse {
        data: stops.to_vec(),
        timestamp: now_ms,
    })
}

pub fn health(now: DateTime<Utc>) -> HealthResponse {
    HealthResponse {
        ok: true,
        updated_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        timestamp: now.timestamp_millis(),
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    }
}

/// Status code and JSON body for a handler result.
pub fn into_json<T: Serialize>(result: Result<T, ApiError>) -> serde_json::Result<(u16, serde_json::Value)> {
    match result {
        Ok(body) => Ok((200, serde_json::to_value(body)?)),
        Err(e) => Ok((e.status(), serde_json::to_value(e.to_response())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::vehicle::{FeedSnapshot, PositionSource, VehicleStatus};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    const T0: i64 = 1_700_000_000_000;
    const TTL: Duration = Duration::from_secs(10);

    fn vehicle(train_id: &str, route_id: &str) -> Vehicle {
        Vehicle {
            train_id: train_id.to_string(),
            route_id: route_id.to_string(),
            lat: 40.7,
            lon: -74.0,
            bearing: Some(90.0),
            timestamp_ms: T0,
            trip_id: Some("t".to_string()),
            status: VehicleStatus::StoppedAt,
            stop_id: Some("A27".to_string()),
            source: PositionSource::Observed,
        }
    }

    struct Source {
        fail: AtomicBool,
    }

    impl Source {
        fn new() -> Self {
            Self {
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for Source {
        async fn fetch_snapshot(&self, group: FeedGroup) -> Result<FeedSnapshot, FetchError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::Status(503));
            }
            Ok(FeedSnapshot::new(group.id(), vec![vehicle("a1", "A"), vehicle("c1", "C")], T0))
        }
    }

    #[test]
    fn test_resolve_feed_and_route() {
        assert_eq!(FeedQuery::feed("ACE").resolve().unwrap(), FeedGroup::Ace);
        assert_eq!(FeedQuery::route("7").resolve().unwrap(), FeedGroup::Irt);
        assert_eq!(FeedQuery::route("W").resolve().unwrap(), FeedGroup::Nqrw);
    }

    #[test]
    fn test_resolve_unknown_or_missing_is_400() {
        let err = FeedQuery::feed("XYZ").resolve().unwrap_err();
        assert_eq!(err.status(), 400);
        let body = err.to_response();
        assert_eq!(body.error, "Invalid feed parameter");
        assert!(body.available_feeds.unwrap().contains(&"123456S"));

        let err = FeedQuery::default().resolve().unwrap_err();
        assert!(matches!(err, ApiError::MissingSelector));
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn test_vehicles_fresh_then_cached() {
        let cache = FeedCache::with_clock(ManualClock::new(T0));
        let source = Source::new();

        let first = vehicles(&FeedQuery::feed("ACE"), &cache, &source, TTL).await.unwrap();
        assert_eq!(first.data.len(), 2);
        assert!(!first.cached);
        assert_eq!(first.timestamp, T0);

        cache.clock().advance(1_000);
        let second = vehicles(&FeedQuery::route("C"), &cache, &source, TTL).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.data.len(), 1);
        assert_eq!(second.data[0].train_id, "c1");
    }

    #[tokio::test]
    async fn test_vehicles_stale_warning_serialized() {
        let cache = FeedCache::with_clock(ManualClock::new(T0));
        let source = Source::new();
        vehicles(&FeedQuery::feed("L"), &cache, &source, TTL).await.unwrap();

        source.fail.store(true, Ordering::SeqCst);
        cache.clock().advance(60_000);
        let stale = vehicles(&FeedQuery::feed("L"), &cache, &source, TTL).await.unwrap();

        let json = serde_json::to_value(&stale).unwrap();
        assert_eq!(json["cached"], true);
        assert_eq!(json["warning"], "Using stale data due to fetch error");
        assert_eq!(json["timestamp"], T0);
        assert_eq!(json["data"][0]["trainId"], "a1");
    }

    #[tokio::test]
    async fn test_vehicles_without_cache_is_500() {
        let cache = FeedCache::with_clock(ManualClock::new(T0));
        let source = Source::new();
        source.fail.store(true, Ordering::SeqCst);

        let result = vehicles(&FeedQuery::feed("G"), &cache, &source, TTL).await;
        let (status, body) = into_json(result).unwrap();
        assert_eq!(status, 500);
        assert_eq!(body["error"], "Failed to fetch vehicle data");
        assert_eq!(body["message"], "HTTP error! status: 503");
    }

    #[test]
    fn test_stops_found_and_missing() {
        let mut index = StopIndex::new();
        index.insert_route(
            "A",
            vec![Stop {
                stop_id: "A27".to_string(),
                name: "42 St-Port Authority Bus Terminal".to_string(),
                lat: 40.757308,
                lon: -73.989735,
                route_ids: None,
            }],
        );

        let found = stops("A", &index, T0).unwrap();
        assert_eq!(found.data.len(), 1);
        assert_eq!(found.timestamp, T0);

        let err = stops("Z", &index, T0).unwrap_err();
        assert_eq!(err.status(), 404);
        assert_eq!(err.to_string(), "Stop data not found for route Z");

        assert!(matches!(stops("", &index, T0), Err(ApiError::MissingRoute)));
    }

    #[test]
    fn test_health_envelope() {
        let now = Utc.timestamp_millis_opt(T0).unwrap();
        let json = serde_json::to_value(health(now)).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["timestamp"], T0);
        assert_eq!(json["updatedAt"], "2023-11-14T22:13:20.000Z");
        assert_eq!(json["service"], SERVICE_NAME);
    }
}
