//! Route to feed-group routing and route branding.
//!
//! The provider publishes one GTFS-RT endpoint per trunk-line bundle. Every
//! route id resolves to exactly one bundle; unknown ids fall back to the
//! numbered-line feed rather than failing.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

const FEED_BASE_URL: &str = "https://api-endpoint.mta.info/Dataservice/mtagtfsfeeds/nyct%2F";

/// A provider-side feed bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeedGroup {
    /// Numbered IRT lines plus the 42 St shuttle.
    Irt,
    Ace,
    Bdfm,
    G,
    Jz,
    Nqrw,
    L,
}

impl FeedGroup {
    pub const ALL: [FeedGroup; 7] = [
        FeedGroup::Irt,
        FeedGroup::Ace,
        FeedGroup::Bdfm,
        FeedGroup::G,
        FeedGroup::Jz,
        FeedGroup::Nqrw,
        FeedGroup::L,
    ];

    /// Selector string used in queries and as the cache key.
    pub fn id(self) -> &'static str {
        match self {
            FeedGroup::Irt => "123456S",
            FeedGroup::Ace => "ACE",
            FeedGroup::Bdfm => "BDFM",
            FeedGroup::G => "G",
            FeedGroup::Jz => "JZ",
            FeedGroup::Nqrw => "NQRW",
            FeedGroup::L => "L",
        }
    }

    pub fn url(self) -> String {
        let suffix = match self {
            FeedGroup::Irt => "gtfs",
            FeedGroup::Ace => "gtfs-ace",
            FeedGroup::Bdfm => "gtfs-bdfm",
            FeedGroup::G => "gtfs-g",
            FeedGroup::Jz => "gtfs-jz",
            FeedGroup::Nqrw => "gtfs-nqrw",
            FeedGroup::L => "gtfs-l",
        };
        format!("{FEED_BASE_URL}{suffix}")
    }

    pub fn ids() -> Vec<&'static str> {
        Self::ALL.iter().map(|g| g.id()).collect()
    }
}

impl fmt::Display for FeedGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl Serialize for FeedGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown feed group '{0}'")]
pub struct UnknownFeedGroup(pub String);

impl FromStr for FeedGroup {
    type Err = UnknownFeedGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeedGroup::ALL
            .into_iter()
            .find(|g| g.id() == s)
            .ok_or_else(|| UnknownFeedGroup(s.to_string()))
    }
}

/// Route ids with a dedicated entry; everything else uses the default group.
pub static ROUTE_FEEDS: &[(&str, FeedGroup)] = &[
    ("1", FeedGroup::Irt),
    ("2", FeedGroup::Irt),
    ("3", FeedGroup::Irt),
    ("4", FeedGroup::Irt),
    ("5", FeedGroup::Irt),
    ("6", FeedGroup::Irt),
    ("S", FeedGroup::Irt),
    ("A", FeedGroup::Ace),
    ("C", FeedGroup::Ace),
    ("E", FeedGroup::Ace),
    ("B", FeedGroup::Bdfm),
    ("D", FeedGroup::Bdfm),
    ("F", FeedGroup::Bdfm),
    ("M", FeedGroup::Bdfm),
    ("G", FeedGroup::G),
    ("J", FeedGroup::Jz),
    ("Z", FeedGroup::Jz),
    ("N", FeedGroup::Nqrw),
    ("Q", FeedGroup::Nqrw),
    ("R", FeedGroup::Nqrw),
    ("W", FeedGroup::Nqrw),
    ("L", FeedGroup::L),
];

pub const DEFAULT_FEED_GROUP: FeedGroup = FeedGroup::Irt;

/// Feed group carrying `route_id`. Never fails.
pub fn feed_group_for(route_id: &str) -> FeedGroup {
    ROUTE_FEEDS
        .iter()
        .find(|(r, _)| *r == route_id)
        .map(|(_, g)| *g)
        .unwrap_or(DEFAULT_FEED_GROUP)
}

/// Brand color of a route as `#RRGGBB`.
pub fn route_color(route_id: &str) -> &'static str {
    match route_id {
        "1" | "2" | "3" => "#EE352E",
        "4" | "5" | "6" => "#00933C",
        "7" => "#B933AD",
        "A" | "C" | "E" => "#0039A6",
        "B" | "D" | "F" | "M" => "#FF6319",
        "G" => "#6CBE45",
        "J" | "Z" => "#996633",
        "L" => "#A7A9AC",
        "N" | "Q" | "R" | "W" => "#FCCC0A",
        _ => "#808183",
    }
}

/// Text color that contrasts with [`route_color`].
pub fn route_text_color(route_id: &str) -> &'static str {
    match route_id {
        "N" | "Q" | "R" | "W" => "#000000",
        _ => "#FFFFFF",
    }
}
