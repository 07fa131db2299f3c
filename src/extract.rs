//! Maps decoded feed entities to normalized [`Vehicle`] records.
//!
//! Extraction is best effort: an entity that cannot be turned into a vehicle
//! is logged with its [`ValidationError`] and skipped, never failing the
//! whole feed.

use std::collections::HashSet;

use tracing::debug;

use crate::error::ValidationError;
use crate::gtfs_rt::FeedEntity;
use crate::gtfs_rt::vehicle_position::VehicleStopStatus;
use crate::stops::{Stop, StopLookup};
use crate::vehicle::{PositionSource, Vehicle, VehicleStatus, in_bounds, normalize_degrees};

/// Extracts vehicles from `entities` in feed order.
///
/// Entities with a usable vehicle position become observed vehicles. Entities
/// that only carry a trip update become stop proxies placed at the first
/// predicted stop, unless the same train or trip already has a position
/// report anywhere in the feed. `now_ms` stamps records whose feed gave no
/// timestamp.
pub fn extract<S: StopLookup + ?Sized>(
    entities: &[FeedEntity],
    now_ms: i64,
    stops: &S,
) -> Vec<Vehicle> {
    let observed: Vec<Result<Vehicle, ValidationError>> = entities
        .iter()
        .map(|entity| from_position(entity, now_ms))
        .collect();

    let positioned_ids: HashSet<String> = observed
        .iter()
        .flatten()
        .map(|v| v.train_id.clone())
        .collect();
    let positioned_trips: HashSet<String> = observed
        .iter()
        .flatten()
        .filter_map(|v| v.trip_id.clone())
        .collect();

    let mut seen = HashSet::new();
    let mut vehicles = Vec::with_capacity(entities.len());
    let mut dropped = 0usize;

    for (entity, result) in entities.iter().zip(observed) {
        let candidate = result.or_else(|observed_err| {
            if entity.trip_update.is_none() {
                return Err(observed_err);
            }
            from_trip_update(entity, now_ms, stops, &positioned_ids, &positioned_trips)
        });

        let candidate = candidate.and_then(|v| {
            if seen.insert(v.train_id.clone()) {
                Ok(v)
            } else {
                Err(ValidationError::DuplicateTrainId(v.train_id))
            }
        });

        match candidate {
            Ok(v) => vehicles.push(v),
            Err(reason) => {
                dropped += 1;
                debug!(entity_id = %entity.id, %reason, "Dropping feed entity");
            }
        }
    }

    debug!(
        entities = entities.len(),
        vehicles = vehicles.len(),
        dropped,
        "Extracted vehicles"
    );
    vehicles
}

fn from_position(entity: &FeedEntity, now_ms: i64) -> Result<Vehicle, ValidationError> {
    let vp = entity.vehicle.as_ref().ok_or(ValidationError::NoPosition)?;
    let pos = vp.position.as_ref().ok_or(ValidationError::NoPosition)?;
    let trip = vp.trip.as_ref();

    let route_id = trip
        .and_then(|t| non_empty(t.route_id.as_deref()))
        .ok_or(ValidationError::MissingRoute)?;
    let (lat, lon) = coordinates(f64::from(pos.latitude), f64::from(pos.longitude))?;

    let trip_id = trip.and_then(|t| non_empty(t.trip_id.as_deref()));
    let descriptor_id = vp
        .vehicle
        .as_ref()
        .and_then(|d| non_empty(d.id.as_deref()).or_else(|| non_empty(d.label.as_deref())));
    let train_id = train_id(&entity.id, route_id, trip_id.or(descriptor_id))?;

    let status = vp
        .current_status
        .and_then(|s| VehicleStopStatus::try_from(s).ok())
        .map(VehicleStatus::from)
        .unwrap_or_default();

    Ok(Vehicle {
        train_id,
        route_id: route_id.to_string(),
        lat,
        lon,
        bearing: pos
            .bearing
            .map(f64::from)
            .filter(|b| b.is_finite())
            .map(normalize_degrees),
        timestamp_ms: seconds_to_ms(vp.timestamp).unwrap_or(now_ms),
        trip_id: trip_id.map(str::to_string),
        status,
        stop_id: non_empty(vp.stop_id.as_deref()).map(str::to_string),
        source: PositionSource::Observed,
    })
}

fn from_trip_update<S: StopLookup + ?Sized>(
    entity: &FeedEntity,
    now_ms: i64,
    stops: &S,
    positioned_ids: &HashSet<String>,
    positioned_trips: &HashSet<String>,
) -> Result<Vehicle, ValidationError> {
    let tu = entity.trip_update.as_ref().ok_or(ValidationError::NoPosition)?;
    let stop_id = tu
        .stop_time_update
        .first()
        .and_then(|stu| non_empty(stu.stop_id.as_deref()))
        .ok_or(ValidationError::NoPosition)?;
    let route_id = non_empty(tu.trip.route_id.as_deref()).ok_or(ValidationError::MissingRoute)?;
    let trip_id = non_empty(tu.trip.trip_id.as_deref());
    let train_id = train_id(&entity.id, route_id, trip_id.or(Some(stop_id)))?;

    if positioned_ids.contains(&train_id)
        || trip_id.is_some_and(|t| positioned_trips.contains(t))
    {
        return Err(ValidationError::Superseded);
    }

    let stop = resolve_stop(stops, stop_id)
        .ok_or_else(|| ValidationError::UnknownStop(stop_id.to_string()))?;
    let (lat, lon) = coordinates(stop.lat, stop.lon)?;

    Ok(Vehicle {
        train_id,
        route_id: route_id.to_string(),
        lat,
        lon,
        bearing: None,
        timestamp_ms: seconds_to_ms(tu.timestamp).unwrap_or(now_ms),
        trip_id: trip_id.map(str::to_string),
        status: VehicleStatus::IncomingAt,
        stop_id: Some(stop_id.to_string()),
        source: PositionSource::StopProxy,
    })
}

/// Looks up `stop_id`, then its parent station when the id carries a
/// direction suffix (`A27N` → `A27`).
fn resolve_stop<'a, S: StopLookup + ?Sized>(stops: &'a S, stop_id: &str) -> Option<&'a Stop> {
    stops.stop(stop_id).or_else(|| {
        stop_id
            .strip_suffix('N')
            .or_else(|| stop_id.strip_suffix('S'))
            .filter(|parent| !parent.is_empty())
            .and_then(|parent| stops.stop(parent))
    })
}

/// Entity id when present, otherwise a key derived from stable trip data so
/// the same train matches across snapshots.
fn train_id(entity_id: &str, route_id: &str, fallback: Option<&str>) -> Result<String, ValidationError> {
    if !entity_id.is_empty() {
        return Ok(entity_id.to_string());
    }
    fallback
        .map(|key| format!("{route_id}:{key}"))
        .ok_or(ValidationError::MissingId)
}

/// Zero is what an absent proto2 float decodes to, so it counts as missing.
fn coordinates(lat: f64, lon: f64) -> Result<(f64, f64), ValidationError> {
    if !lat.is_finite() || !lon.is_finite() || lat == 0.0 || lon == 0.0 {
        return Err(ValidationError::MissingCoordinate);
    }
    if !in_bounds(lat, lon) {
        return Err(ValidationError::OutOfRange { lat, lon });
    }
    Ok((lat, lon))
}

fn seconds_to_ms(seconds: Option<u64>) -> Option<i64> {
    seconds
        .and_then(|s| i64::try_from(s).ok())
        .map(|s| s.saturating_mul(1000))
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}
