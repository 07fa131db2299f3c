//! Output formatting for CLI results.
//!
//! Envelopes are written as JSON; decoded vehicles can also be appended to a
//! CSV log, one row per vehicle.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use csv::WriterBuilder;
use serde::Serialize;
use tracing::debug;

use crate::vehicle::{PositionSource, Vehicle, VehicleStatus};

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty<T: std::fmt::Debug>(value: &T) {
    debug!("{:#?}", value);
}

/// Writes a value as pretty-printed JSON followed by a newline.
pub fn write_json<W: Write, T: Serialize + ?Sized>(mut writer: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    Ok(())
}

/// Writes a value as pretty-printed JSON to stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    write_json(std::io::stdout().lock(), value)
}

/// Flat CSV shape of a [`Vehicle`]; absent fields become empty cells.
#[derive(Debug, Serialize)]
struct VehicleRow<'a> {
    train_id: &'a str,
    route_id: &'a str,
    lat: f64,
    lon: f64,
    bearing: Option<f64>,
    timestamp_ms: i64,
    trip_id: Option<&'a str>,
    status: VehicleStatus,
    stop_id: Option<&'a str>,
    source: PositionSource,
}

impl<'a> From<&'a Vehicle> for VehicleRow<'a> {
    fn from(v: &'a Vehicle) -> Self {
        Self {
            train_id: &v.train_id,
            route_id: &v.route_id,
            lat: v.lat,
            lon: v.lon,
            bearing: v.bearing,
            timestamp_ms: v.timestamp_ms,
            trip_id: v.trip_id.as_deref(),
            status: v.status,
            stop_id: v.stop_id.as_deref(),
            source: v.source,
        }
    }
}

/// Appends one row per vehicle to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_vehicles(path: &str, vehicles: &[Vehicle]) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, rows = vehicles.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for vehicle in vehicles {
        writer.serialize(VehicleRow::from(vehicle))?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn vehicle(train_id: &str, bearing: Option<f64>) -> Vehicle {
        Vehicle {
            train_id: train_id.to_string(),
            route_id: "A".to_string(),
            lat: 40.7,
            lon: -74.0,
            bearing,
            timestamp_ms: 1_700_000_000_000,
            trip_id: None,
            status: VehicleStatus::StoppedAt,
            stop_id: Some("A27".to_string()),
            source: PositionSource::Observed,
        }
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&vehicle("t1", None));
    }

    #[test]
    fn test_write_json() {
        let mut buf = Vec::new();
        write_json(&mut buf, &[vehicle("t1", Some(90.0))]).unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with('\n'));
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json[0]["trainId"], "t1");
        assert_eq!(json[0]["status"], "STOPPED_AT");
    }

    #[test]
    fn test_append_vehicles_writes_header_once() {
        let path = temp_path("gtfs_rt_tracker_test_header.csv");
        let _ = fs::remove_file(&path);

        append_vehicles(&path, &[vehicle("t1", Some(90.0))]).unwrap();
        append_vehicles(&path, &[vehicle("t2", None), vehicle("t3", None)]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        // 1 header + 3 data rows
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("train_id,route_id"));
        assert_eq!(lines.iter().filter(|l| l.contains("train_id")).count(), 1);
        let row: Vec<_> = lines[2].split(',').collect();
        assert_eq!(row[0], "t2");
        // no bearing
        assert_eq!(row[4], "");

        fs::remove_file(&path).unwrap();
    }
}
