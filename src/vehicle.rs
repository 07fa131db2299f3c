//! Normalized vehicle records and the snapshots that carry them.

use serde::{Deserialize, Serialize};

use crate::gtfs_rt::vehicle_position::VehicleStopStatus;

/// Where a vehicle sits relative to its current or next stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    IncomingAt,
    StoppedAt,
    #[default]
    InTransitTo,
}

impl From<VehicleStopStatus> for VehicleStatus {
    fn from(status: VehicleStopStatus) -> Self {
        match status {
            VehicleStopStatus::IncomingAt => VehicleStatus::IncomingAt,
            VehicleStopStatus::StoppedAt => VehicleStatus::StoppedAt,
            VehicleStopStatus::InTransitTo => VehicleStatus::InTransitTo,
        }
    }
}

/// How a vehicle's coordinates were obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PositionSource {
    /// Reported by the vehicle itself.
    #[default]
    Observed,
    /// Placed at the next stop named by a trip update. Lower confidence.
    StopProxy,
}

/// One train as reported in a single snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub train_id: String,
    pub route_id: String,
    pub lat: f64,
    pub lon: f64,
    /// Degrees in `[0, 360)`. `None` when the feed gave no heading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<String>,
    #[serde(default)]
    pub status: VehicleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_id: Option<String>,
    #[serde(default)]
    pub source: PositionSource,
}

impl Vehicle {
    /// Heading in degrees, 0 when the feed gave none.
    pub fn heading(&self) -> f64 {
        self.bearing.unwrap_or(0.0)
    }

    pub fn is_proxy(&self) -> bool {
        self.source == PositionSource::StopProxy
    }
}

/// Latitude and longitude are both present and inside WGS84 bounds.
pub fn in_bounds(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Wraps any finite angle into `[0, 360)`.
pub fn normalize_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// One fully decoded, internally consistent set of vehicles for a feed group.
///
/// Snapshots are immutable; a refresh replaces the whole snapshot rather than
/// merging into it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub feed_group_id: String,
    pub vehicles: Vec<Vehicle>,
    pub fetched_at_ms: i64,
}

impl FeedSnapshot {
    pub fn new(feed_group_id: impl Into<String>, vehicles: Vec<Vehicle>, fetched_at_ms: i64) -> Self {
        Self {
            feed_group_id: feed_group_id.into(),
            vehicles,
            fetched_at_ms,
        }
    }

    /// Vehicles serving `route_id`, in snapshot order.
    pub fn for_route(&self, route_id: &str) -> Vec<Vehicle> {
        self.vehicles
            .iter()
            .filter(|v| v.route_id == route_id)
            .cloned()
            .collect()
    }
}
