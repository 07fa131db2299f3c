//! Producing snapshots: fetch, decode, extract, stamp.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use crate::clock::Clock;
use crate::error::{DecodeError, FetchError};
use crate::extract::extract;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::parser::decode;
use crate::routes::FeedGroup;
use crate::stops::StopLookup;
use crate::vehicle::FeedSnapshot;

/// Something that can produce a fresh snapshot for a feed group. This is the
/// fetch step handed to [`crate::cache::FeedCache::get_or_refresh`].
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, group: FeedGroup) -> Result<FeedSnapshot, FetchError>;
}

/// Runs the decode and extract steps over a raw payload.
pub fn snapshot_from_bytes<S: StopLookup + ?Sized>(
    group: FeedGroup,
    bytes: &[u8],
    now_ms: i64,
    stops: &S,
) -> Result<FeedSnapshot, DecodeError> {
    let entities = decode(bytes)?;
    let vehicles = extract(&entities, now_ms, stops);
    Ok(FeedSnapshot::new(group.id(), vehicles, now_ms))
}

/// Fetches each feed group from the provider over HTTP.
pub struct HttpSnapshotSource<C> {
    client: C,
    stops: Arc<dyn StopLookup>,
    clock: Arc<dyn Clock>,
}

impl<C: HttpClient> HttpSnapshotSource<C> {
    pub fn new(client: C, stops: Arc<dyn StopLookup>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            stops,
            clock,
        }
    }
}

#[async_trait]
impl<C: HttpClient> SnapshotSource for HttpSnapshotSource<C> {
    async fn fetch_snapshot(&self, group: FeedGroup) -> Result<FeedSnapshot, FetchError> {
        let span = tracing::info_span!("fetch_snapshot", feed_group = %group);
        async {
            let bytes = fetch_bytes(&self.client, &group.url()).await?;
            let snapshot =
                snapshot_from_bytes(group, &bytes, self.clock.now_ms(), self.stops.as_ref())?;
            Ok::<_, FetchError>(snapshot)
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<T: SnapshotSource + ?Sized> SnapshotSource for Arc<T> {
    async fn fetch_snapshot(&self, group: FeedGroup) -> Result<FeedSnapshot, FetchError> {
        (**self).fetch_snapshot(group).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{FeedEntity, FeedHeader, FeedMessage, Position, TripDescriptor, VehiclePosition};
    use crate::stops::StopIndex;
    use prost::Message;

    #[test]
    fn test_snapshot_from_bytes() {
        let feed = FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                ..Default::default()
            },
            entity: vec![FeedEntity {
                id: "v1".to_string(),
                vehicle: Some(VehiclePosition {
                    trip: Some(TripDescriptor {
                        route_id: Some("L".to_string()),
                        ..Default::default()
                    }),
                    position: Some(Position {
                        latitude: 40.73,
                        longitude: -73.95,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }],
        };

        let snapshot =
            snapshot_from_bytes(FeedGroup::L, &feed.encode_to_vec(), 42, &StopIndex::new()).unwrap();
        assert_eq!(snapshot.feed_group_id, "L");
        assert_eq!(snapshot.fetched_at_ms, 42);
        assert_eq!(snapshot.vehicles.len(), 1);
    }

    #[test]
    fn test_snapshot_from_garbage_is_decode_error() {
        let result = snapshot_from_bytes(FeedGroup::L, &[0xFF, 0xFE, 0x00, 0x01], 0, &StopIndex::new());
        assert!(result.is_err());
    }
}
