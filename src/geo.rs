//! Interpolation math for marker animation.

use crate::vehicle::normalize_degrees;

pub fn lerp(start: f64, end: f64, t: f64) -> f64 {
    start + (end - start) * t
}

/// Cubic ease-in-out over `[0, 1]`.
pub fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        (t - 1.0) * (2.0 * t - 2.0) * (2.0 * t - 2.0) + 1.0
    }
}

/// Interpolates between two headings along the shorter arc.
///
/// Both angles are normalized to `[0, 360)` and their difference wrapped into
/// `(-180, 180]` before scaling by `t`.
pub fn interpolate_bearing(start: f64, end: f64, t: f64) -> f64 {
    let start = normalize_degrees(start);
    let end = normalize_degrees(end);

    let mut diff = end - start;
    if diff > 180.0 {
        diff -= 360.0;
    } else if diff <= -180.0 {
        diff += 360.0;
    }

    normalize_degrees(start + diff * t)
}

/// Initial great-circle bearing from the first point to the second, in
/// degrees `[0, 360)`.
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ease_endpoints_and_midpoint() {
        assert_eq!(ease_in_out_cubic(0.0), 0.0);
        assert_eq!(ease_in_out_cubic(1.0), 1.0);
        assert!(approx(ease_in_out_cubic(0.5), 0.5));
        assert!(approx(ease_in_out_cubic(0.25), 0.0625));
        assert!(approx(ease_in_out_cubic(0.75), 0.9375));
    }

    #[test]
    fn test_ease_is_monotonic() {
        let samples: Vec<f64> = (0..=100).map(|i| ease_in_out_cubic(i as f64 / 100.0)).collect();
        assert!(samples.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_bearing_takes_shorter_arc_across_north() {
        assert!(approx(interpolate_bearing(350.0, 10.0, 0.5), 0.0));
        assert!(approx(interpolate_bearing(10.0, 350.0, 0.5), 0.0));
        assert!(approx(interpolate_bearing(350.0, 10.0, 0.25), 355.0));
    }

    #[test]
    fn test_bearing_plain_interpolation() {
        assert!(approx(interpolate_bearing(90.0, 180.0, 0.5), 135.0));
        assert!(approx(interpolate_bearing(0.0, 90.0, 1.0), 90.0));
        assert!(approx(interpolate_bearing(-90.0, 0.0, 0.0), 270.0));
    }

    #[test]
    fn test_bearing_half_turn_goes_clockwise() {
        assert!(approx(interpolate_bearing(0.0, 180.0, 0.5), 90.0));
        assert!(approx(interpolate_bearing(180.0, 0.0, 0.5), 270.0));
    }

    #[test]
    fn test_initial_bearing_cardinal_directions() {
        assert!(initial_bearing(40.70, -74.00, 40.71, -74.00).abs() < 1e-6);
        assert!((initial_bearing(40.70, -74.00, 40.70, -73.99) - 90.0).abs() < 0.01);
        assert!((initial_bearing(40.71, -74.00, 40.70, -74.00) - 180.0).abs() < 1e-6);
        assert!((initial_bearing(40.70, -73.99, 40.70, -74.00) - 270.0).abs() < 0.01);
    }

    #[test]
    fn test_lerp() {
        assert_eq!(lerp(40.70, 40.71, 0.0), 40.70);
        assert!(approx(lerp(40.70, 40.71, 1.0), 40.71));
        assert!(approx(lerp(-74.0, -74.01, 0.5), -74.005));
    }
}
