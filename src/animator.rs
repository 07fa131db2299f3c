//! Turns discrete snapshots into continuous marker motion.
//!
//! [`PositionAnimator`] is pull-based: the host delivers each new vehicle
//! list with [`PositionAnimator::deliver`] and then asks for frames with
//! [`PositionAnimator::frame`] from whatever scheduler drives rendering
//! (display refresh, a timer, or a test feeding synthetic time).
//!
//! Vehicles are matched across snapshots by `train_id` only. A train seen for
//! the first time appears at its reported position; a known train glides from
//! where it was drawn last to its new position over the transition window; a
//! train missing from the new snapshot disappears at once.

use std::collections::HashMap;

use tracing::trace;

use crate::geo::{ease_in_out_cubic, initial_bearing, interpolate_bearing, lerp};
use crate::vehicle::{PositionSource, Vehicle};

pub const MIN_TRANSITION_MS: i64 = 1_000;
pub const MAX_TRANSITION_MS: i64 = 5_000;
/// Share of the gap between deliveries spent moving.
pub const TRANSITION_FRACTION: f64 = 0.8;

/// Where a marker was drawn, used as the start of the next transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartPosition {
    pub lat: f64,
    pub lon: f64,
    pub bearing: f64,
}

/// A vehicle from the latest snapshot plus what is needed to animate it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimatedVehicle {
    pub vehicle: Vehicle,
    pub calculated_bearing: f64,
    /// Present only while a transition from a previous position runs.
    pub start_position: Option<StartPosition>,
    pub is_new: bool,
}

impl AnimatedVehicle {
    fn at(&self, eased: f64) -> MarkerPosition {
        let (lat, lon, bearing) = match &self.start_position {
            Some(start) if !self.is_new => (
                lerp(start.lat, self.vehicle.lat, eased),
                lerp(start.lon, self.vehicle.lon, eased),
                interpolate_bearing(start.bearing, self.calculated_bearing, eased),
            ),
            _ => (self.vehicle.lat, self.vehicle.lon, self.calculated_bearing),
        };

        MarkerPosition {
            train_id: self.vehicle.train_id.clone(),
            route_id: self.vehicle.route_id.clone(),
            lat,
            lon,
            bearing,
            source: self.vehicle.source,
        }
    }
}

/// One marker as it should be drawn in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerPosition {
    pub train_id: String,
    pub route_id: String,
    pub lat: f64,
    pub lon: f64,
    pub bearing: f64,
    pub source: PositionSource,
}

/// Every marker to draw at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Linear progress of the transition in `[0, 1]`.
    pub progress: f64,
    pub markers: Vec<MarkerPosition>,
}

impl Frame {
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }

    pub fn marker(&self, train_id: &str) -> Option<&MarkerPosition> {
        self.markers.iter().find(|m| m.train_id == train_id)
    }
}

#[derive(Debug)]
struct Transition {
    started_at_ms: i64,
    duration_ms: i64,
    vehicles: Vec<AnimatedVehicle>,
    committed: bool,
}

impl Transition {
    fn progress(&self, now_ms: i64) -> f64 {
        let elapsed = (now_ms - self.started_at_ms) as f64;
        (elapsed / self.duration_ms as f64).clamp(0.0, 1.0)
    }

    fn sample(&self, now_ms: i64) -> Frame {
        let progress = self.progress(now_ms);
        let eased = ease_in_out_cubic(progress);
        Frame {
            progress,
            markers: self.vehicles.iter().map(|v| v.at(eased)).collect(),
        }
    }
}

/// Transition window for a delivery `gap_ms` after the previous one.
pub fn transition_duration_ms(gap_ms: Option<i64>) -> i64 {
    match gap_ms {
        Some(gap) => ((gap as f64 * TRANSITION_FRACTION) as i64).clamp(MIN_TRANSITION_MS, MAX_TRANSITION_MS),
        None => MIN_TRANSITION_MS,
    }
}

#[derive(Debug, Default)]
pub struct PositionAnimator {
    baseline: HashMap<String, StartPosition>,
    transition: Option<Transition>,
    last_update_ms: Option<i64>,
}

impl PositionAnimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a transition toward `vehicles` and returns its duration in ms.
    ///
    /// If the previous transition is still running, markers start from where
    /// they are drawn right now rather than jumping to that transition's end.
    pub fn deliver(&mut self, vehicles: &[Vehicle], now_ms: i64) -> i64 {
        if let Some(running) = self.transition.as_ref().filter(|t| !t.committed) {
            self.baseline = baseline_of(&running.sample(now_ms));
        }

        let duration_ms = transition_duration_ms(self.last_update_ms.map(|last| now_ms - last));
        self.last_update_ms = Some(now_ms);

        let animated: Vec<AnimatedVehicle> = vehicles
            .iter()
            .map(|vehicle| match self.baseline.get(&vehicle.train_id) {
                None => AnimatedVehicle {
                    calculated_bearing: vehicle.heading(),
                    vehicle: vehicle.clone(),
                    start_position: None,
                    is_new: true,
                },
                Some(previous) => AnimatedVehicle {
                    calculated_bearing: bearing_from(previous, vehicle),
                    vehicle: vehicle.clone(),
                    start_position: Some(*previous),
                    is_new: false,
                },
            })
            .collect();

        trace!(
            vehicles = animated.len(),
            new = animated.iter().filter(|v| v.is_new).count(),
            duration_ms,
            "Transition started"
        );

        self.transition = Some(Transition {
            started_at_ms: now_ms,
            duration_ms,
            vehicles: animated,
            committed: false,
        });
        duration_ms
    }

    /// Markers to draw at `now_ms`.
    ///
    /// The first frame at or past the end of the transition fixes the final
    /// positions as the baseline for the next delivery.
    pub fn frame(&mut self, now_ms: i64) -> Frame {
        let Some(transition) = self.transition.as_mut() else {
            return Frame {
                progress: 1.0,
                markers: Vec::new(),
            };
        };

        let frame = transition.sample(now_ms);
        if frame.is_complete() && !transition.committed {
            transition.committed = true;
            self.baseline = baseline_of(&frame);
        }
        frame
    }

    /// A transition is in progress and frames are still changing.
    pub fn is_animating(&self) -> bool {
        self.transition.as_ref().is_some_and(|t| !t.committed)
    }

    /// The vehicles of the current transition.
    pub fn vehicles(&self) -> &[AnimatedVehicle] {
        self.transition
            .as_ref()
            .map(|t| t.vehicles.as_slice())
            .unwrap_or_default()
    }

    /// Forgets all positions, e.g. when the selected route changes.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The reported heading, else the direction of travel, else the heading the
/// marker already had.
fn bearing_from(previous: &StartPosition, vehicle: &Vehicle) -> f64 {
    if let Some(bearing) = vehicle.bearing {
        return bearing;
    }
    if previous.lat == vehicle.lat && previous.lon == vehicle.lon {
        return previous.bearing;
    }
    initial_bearing(previous.lat, previous.lon, vehicle.lat, vehicle.lon)
}

fn baseline_of(frame: &Frame) -> HashMap<String, StartPosition> {
    frame
        .markers
        .iter()
        .map(|m| {
            (
                m.train_id.clone(),
                StartPosition {
                    lat: m.lat,
                    lon: m.lon,
                    bearing: m.bearing,
                },
            )
        })
        .collect()
}
