//! Static stop reference data used to place trip-update proxies.
//!
//! Two on-disk formats are accepted: the per-route JSON files served by the
//! stops endpoint (`stops.<routeId>.json`, an array of [`Stop`]) and a raw
//! GTFS `stops.txt`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A station or platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub stop_id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_ids: Option<Vec<String>>,
}

/// Resolves a stop id to its coordinates.
pub trait StopLookup: Send + Sync {
    fn stop(&self, stop_id: &str) -> Option<&Stop>;
}

/// Row of a GTFS `stops.txt`.
#[derive(Debug, Deserialize)]
struct GtfsStopRow {
    stop_id: String,
    #[serde(default)]
    stop_name: String,
    stop_lat: f64,
    stop_lon: f64,
}

/// In-memory stop table keyed by stop id, plus the per-route listings.
#[derive(Debug, Default, Clone)]
pub struct StopIndex {
    by_id: HashMap<String, Stop>,
    by_route: HashMap<String, Vec<Stop>>,
}

impl StopIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the stops of one route. Stops already known by id keep their
    /// coordinates and gain the route in `route_ids`.
    pub fn insert_route(&mut self, route_id: &str, stops: Vec<Stop>) {
        for stop in &stops {
            let entry = self
                .by_id
                .entry(stop.stop_id.clone())
                .or_insert_with(|| Stop {
                    route_ids: None,
                    ..stop.clone()
                });
            let routes = entry.route_ids.get_or_insert_with(Vec::new);
            if !routes.iter().any(|r| r == route_id) {
                routes.push(route_id.to_string());
            }
        }
        self.by_route.insert(route_id.to_string(), stops);
    }

    pub fn insert(&mut self, stop: Stop) {
        self.by_id.insert(stop.stop_id.clone(), stop);
    }

    /// Stops listed for `route_id`, in file order.
    pub fn for_route(&self, route_id: &str) -> Option<&[Stop]> {
        self.by_route.get(route_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Loads every `stops.<routeId>.json` in `dir`.
    ///
    /// A missing directory yields an empty index; the proxy fallback then
    /// simply finds nothing.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut index = Self::new();

        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Stop data directory not found");
            return Ok(index);
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(route_id) = file_name
                .strip_prefix("stops.")
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };

            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let stops: Vec<Stop> = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            debug!(route_id, stops = stops.len(), "Loaded route stops");
            index.insert_route(route_id, stops);
        }

        Ok(index)
    }

    /// Loads a GTFS `stops.txt`. Rows with unparseable coordinates are skipped.
    pub fn load_gtfs_stops(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut rdr = csv::Reader::from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let mut index = Self::new();

        for result in rdr.deserialize::<GtfsStopRow>() {
            match result {
                Ok(row) => index.insert(Stop {
                    stop_id: row.stop_id,
                    name: row.stop_name,
                    lat: row.stop_lat,
                    lon: row.stop_lon,
                    route_ids: None,
                }),
                Err(e) => debug!(error = %e, "Skipping stops.txt row"),
            }
        }

        Ok(index)
    }
}

impl StopLookup for StopIndex {
    fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.by_id.get(stop_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn stop(id: &str, lat: f64, lon: f64) -> Stop {
        Stop {
            stop_id: id.to_string(),
            name: format!("Stop {id}"),
            lat,
            lon,
            route_ids: None,
        }
    }

    #[test]
    fn test_insert_route_tracks_shared_stops() {
        let mut index = StopIndex::new();
        index.insert_route("A", vec![stop("A27", 40.75, -73.99)]);
        index.insert_route("C", vec![stop("A27", 40.75, -73.99)]);

        let shared = index.stop("A27").unwrap();
        assert_eq!(shared.route_ids.as_deref(), Some(&["A".to_string(), "C".to_string()][..]));
        assert_eq!(index.for_route("C").unwrap().len(), 1);
        assert!(index.for_route("E").is_none());
    }

    #[test]
    fn test_load_dir_reads_route_files() {
        let dir = temp_dir("gtfs_rt_tracker_test_stops_dir");
        fs::write(
            dir.join("stops.A.json"),
            r#"[{"stopId":"A27","name":"42 St-Port Authority","lat":40.757,"lon":-73.989}]"#,
        )
        .unwrap();
        fs::write(dir.join("shapes.A.json"), "{}").unwrap();

        let index = StopIndex::load_dir(&dir).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.stop("A27").unwrap().name, "42 St-Port Authority");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_dir_missing_is_empty() {
        let index = StopIndex::load_dir("/nonexistent/gtfs_rt_tracker").unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_load_gtfs_stops() {
        let dir = temp_dir("gtfs_rt_tracker_test_stops_txt");
        let path = dir.join("stops.txt");
        fs::write(
            &path,
            "stop_id,stop_name,stop_lat,stop_lon,location_type,parent_station\n\
             101,Van Cortlandt Park-242 St,40.889248,-73.898583,1,\n\
             101N,Van Cortlandt Park-242 St,40.889248,-73.898583,,101\n\
             bad,Broken,,,,\n",
        )
        .unwrap();

        let index = StopIndex::load_gtfs_stops(&path).unwrap();
        assert_eq!(index.len(), 2);
        assert!((index.stop("101N").unwrap().lat - 40.889248).abs() < 1e-9);

        fs::remove_dir_all(&dir).unwrap();
    }
}
