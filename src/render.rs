//! Adapter between animation frames and an opaque map surface.
//!
//! The map itself is a [`MarkerSink`]: it accepts marker placements, removals
//! and a view (pan/zoom). [`MapAdapter`] diffs successive frames against what
//! it has drawn and hands each marker an icon from a bounded memo keyed by
//! route and heading rounded to [`BEARING_BUCKET_DEG`].

use std::borrow::Cow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::animator::{Frame, MarkerPosition};
use crate::routes::{route_color, route_text_color};
use crate::vehicle::{PositionSource, normalize_degrees};

pub const BEARING_BUCKET_DEG: f64 = 10.0;
pub const ICON_SIZE: u32 = 36;
pub const DEFAULT_ICON_CAPACITY: usize = 512;

/// Pan/zoom state of the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    pub center_lat: f64,
    pub center_lon: f64,
    pub zoom: u8,
}

impl Default for MapView {
    /// Midtown Manhattan, whole-city zoom.
    fn default() -> Self {
        Self {
            center_lat: 40.7589,
            center_lon: -73.9851,
            zoom: 11,
        }
    }
}

/// An opaque rendering surface.
pub trait MarkerSink {
    fn place(&mut self, marker: &MarkerPosition, icon: &MarkerIcon);
    fn remove(&mut self, train_id: &str);
    fn set_view(&mut self, view: MapView);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IconKey {
    pub route_id: String,
    /// Heading rounded to the nearest bucket, in `[0, 360)`.
    pub bearing_bucket: u16,
    /// The marker has a heading at all. A zero bearing means none was known.
    pub arrow: bool,
    pub proxy: bool,
}

impl IconKey {
    pub fn new(route_id: &str, bearing: f64, source: PositionSource) -> Self {
        let heading = if bearing.is_finite() { normalize_degrees(bearing) } else { 0.0 };
        let buckets = (360.0 / BEARING_BUCKET_DEG) as u16;
        let bucket = (heading / BEARING_BUCKET_DEG).round() as u16 % buckets;
        Self {
            route_id: route_id.to_string(),
            bearing_bucket: bucket * BEARING_BUCKET_DEG as u16,
            arrow: heading != 0.0,
            proxy: source == PositionSource::StopProxy,
        }
    }
}

/// Escapes text for use inside SVG markup.
fn escape_xml(text: &str) -> Cow<'_, str> {
    if !text.contains(['<', '>', '&', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerIcon {
    pub svg: String,
    pub width: u32,
    pub height: u32,
    /// Pixel offset of the marker's geographic point within the icon.
    pub anchor: (u32, u32),
}

/// Route badge with a heading arrow. Stop proxies are drawn translucent with
/// a dashed outline; a marker without a heading draws no arrow.
pub fn marker_icon(key: &IconKey) -> MarkerIcon {
    let color = route_color(&key.route_id);
    let text_color = route_text_color(&key.route_id);
    let half = ICON_SIZE / 2;

    let (opacity, dash) = if key.proxy {
        ("0.55", r#" stroke-dasharray="4 2""#)
    } else {
        ("1", "")
    };
    let arrow = if !key.arrow {
        String::new()
    } else {
        format!(
            r#"<path d="M{half} 4 L22 12 L14 12 Z" fill="{text_color}" opacity="0.8" transform="rotate({} {half} {half})"/>"#,
            key.bearing_bucket
        )
    };

    let svg = format!(
        r##"<svg width="{ICON_SIZE}" height="{ICON_SIZE}" viewBox="0 0 {ICON_SIZE} {ICON_SIZE}" xmlns="http://www.w3.org/2000/svg"><circle cx="{half}" cy="{half}" r="16" fill="{color}" fill-opacity="{opacity}" stroke="#FFFFFF" stroke-width="2"{dash}/><text x="{half}" y="23" text-anchor="middle" fill="{text_color}" font-family="Arial, sans-serif" font-size="12" font-weight="bold">{}</text>{arrow}</svg>"##,
        escape_xml(&key.route_id)
    );

    MarkerIcon {
        svg,
        width: ICON_SIZE,
        height: ICON_SIZE,
        anchor: (half, half),
    }
}

/// Memo of rendered icons, evicting the oldest entry once full.
#[derive(Debug)]
pub struct IconCache {
    capacity: usize,
    icons: HashMap<IconKey, Arc<MarkerIcon>>,
    order: VecDeque<IconKey>,
}

impl IconCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            icons: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, key: IconKey) -> Arc<MarkerIcon> {
        if let Some(icon) = self.icons.get(&key) {
            return Arc::clone(icon);
        }

        if self.icons.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.icons.remove(&oldest);
            }
        }

        let icon = Arc::new(marker_icon(&key));
        self.order.push_back(key.clone());
        self.icons.insert(key, Arc::clone(&icon));
        icon
    }

    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }
}

impl Default for IconCache {
    fn default() -> Self {
        Self::new(DEFAULT_ICON_CAPACITY)
    }
}

/// Pushes frames to a [`MarkerSink`], removing markers that left the frame.
pub struct MapAdapter<S> {
    sink: S,
    icons: IconCache,
    drawn: HashSet<String>,
}

impl<S: MarkerSink> MapAdapter<S> {
    pub fn new(mut sink: S, view: MapView) -> Self {
        sink.set_view(view);
        Self {
            sink,
            icons: IconCache::default(),
            drawn: HashSet::new(),
        }
    }

    pub fn render(&mut self, frame: &Frame) {
        let current: HashSet<&str> = frame.markers.iter().map(|m| m.train_id.as_str()).collect();

        let gone: Vec<String> = self
            .drawn
            .iter()
            .filter(|id| !current.contains(id.as_str()))
            .cloned()
            .collect();
        for train_id in &gone {
            self.sink.remove(train_id);
            self.drawn.remove(train_id);
        }

        for marker in &frame.markers {
            let icon = self
                .icons
                .get(IconKey::new(&marker.route_id, marker.bearing, marker.source));
            self.sink.place(marker, &icon);
            self.drawn.insert(marker.train_id.clone());
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn icons(&self) -> &IconCache {
        &self.icons
    }
}

/// A sink that only logs, for headless runs.
#[derive(Debug, Default)]
pub struct TracingSink {
    pub placed: usize,
}

impl MarkerSink for TracingSink {
    fn place(&mut self, marker: &MarkerPosition, _icon: &MarkerIcon) {
        self.placed += 1;
        trace!(
            train_id = %marker.train_id,
            route_id = %marker.route_id,
            lat = marker.lat,
            lon = marker.lon,
            bearing = marker.bearing,
            "Marker"
        );
    }

    fn remove(&mut self, train_id: &str) {
        debug!(train_id, "Marker removed");
    }

    fn set_view(&mut self, view: MapView) {
        debug!(lat = view.center_lat, lon = view.center_lon, zoom = view.zoom, "Map view");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        placed: Vec<(String, u16)>,
        removed: Vec<String>,
        view: Option<MapView>,
    }

    impl MarkerSink for RecordingSink {
        fn place(&mut self, marker: &MarkerPosition, icon: &MarkerIcon) {
            let rotated = icon.svg.contains("rotate(");
            self.placed.push((marker.train_id.clone(), u16::from(rotated)));
        }

        fn remove(&mut self, train_id: &str) {
            self.removed.push(train_id.to_string());
        }

        fn set_view(&mut self, view: MapView) {
            self.view = Some(view);
        }
    }

    fn marker(train_id: &str, bearing: f64) -> MarkerPosition {
        MarkerPosition {
            train_id: train_id.to_string(),
            route_id: "A".to_string(),
            lat: 40.7,
            lon: -74.0,
            bearing,
            source: PositionSource::Observed,
        }
    }

    fn frame(markers: Vec<MarkerPosition>) -> Frame {
        Frame {
            progress: 1.0,
            markers,
        }
    }

    #[test]
    fn test_icon_key_rounds_bearing() {
        assert_eq!(IconKey::new("A", 44.0, PositionSource::Observed).bearing_bucket, 40);
        assert_eq!(IconKey::new("A", 45.0, PositionSource::Observed).bearing_bucket, 50);
        assert_eq!(IconKey::new("A", 356.0, PositionSource::Observed).bearing_bucket, 0);
        assert_eq!(IconKey::new("A", -10.0, PositionSource::Observed).bearing_bucket, 350);
    }

    #[test]
    fn test_marker_icon_uses_route_colors() {
        let icon = marker_icon(&IconKey::new("N", 90.0, PositionSource::Observed));
        assert!(icon.svg.contains("#FCCC0A"));
        assert!(icon.svg.contains("#000000"));
        assert!(icon.svg.contains("rotate(90 18 18)"));
        assert_eq!(icon.anchor, (18, 18));
    }

    #[test]
    fn test_proxy_icon_is_dashed_without_arrow_at_zero() {
        let icon = marker_icon(&IconKey::new("A", 0.0, PositionSource::StopProxy));
        assert!(icon.svg.contains("stroke-dasharray"));
        assert!(!icon.svg.contains("rotate("));
    }

    #[test]
    fn test_near_north_heading_keeps_arrow() {
        for bearing in [3.0, 357.0] {
            let key = IconKey::new("A", bearing, PositionSource::Observed);
            assert_eq!(key.bearing_bucket, 0);
            assert!(key.arrow);
            assert!(marker_icon(&key).svg.contains("rotate(0 18 18)"));
        }

        let none = IconKey::new("A", 0.0, PositionSource::Observed);
        assert!(!none.arrow);
        assert_ne!(none, IconKey::new("A", 3.0, PositionSource::Observed));
    }

    #[test]
    fn test_route_label_is_escaped() {
        let icon = marker_icon(&IconKey::new("A<script>&", 90.0, PositionSource::Observed));
        assert!(!icon.svg.contains("<script>"));
        assert!(icon.svg.contains(">A&lt;script&gt;&amp;</text>"));

        assert_eq!(escape_xml("6X"), "6X");
        assert!(matches!(escape_xml("6X"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_icon_cache_memoizes_and_stays_bounded() {
        let mut cache = IconCache::new(2);
        let a = cache.get(IconKey::new("A", 10.0, PositionSource::Observed));
        let again = cache.get(IconKey::new("A", 12.0, PositionSource::Observed));
        assert!(Arc::ptr_eq(&a, &again));

        cache.get(IconKey::new("A", 90.0, PositionSource::Observed));
        cache.get(IconKey::new("C", 90.0, PositionSource::Observed));
        assert_eq!(cache.len(), 2);

        let rebuilt = cache.get(IconKey::new("A", 10.0, PositionSource::Observed));
        assert!(!Arc::ptr_eq(&a, &rebuilt));
    }

    #[test]
    fn test_adapter_sets_view_and_removes_departed_markers() {
        let mut adapter = MapAdapter::new(RecordingSink::default(), MapView::default());
        assert_eq!(adapter.sink().view, Some(MapView::default()));

        adapter.render(&frame(vec![marker("t1", 0.0), marker("t2", 90.0)]));
        adapter.render(&frame(vec![marker("t2", 95.0)]));

        let sink = adapter.sink();
        assert_eq!(sink.removed, ["t1"]);
        assert_eq!(sink.placed.len(), 3);
        assert_eq!(sink.placed[0], ("t1".to_string(), 0));
        assert_eq!(sink.placed[1], ("t2".to_string(), 1));
        // 90 and 95 round to different buckets
        assert_eq!(adapter.icons().len(), 3);
    }
}
