//! Protobuf decoder for GTFS Realtime feeds.

use std::io::Read;

use prost::Message;

use crate::error::DecodeError;
use crate::gtfs_rt::{FeedEntity, FeedMessage};

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// Fields the schema does not declare are skipped, so newer provider feeds
/// still decode.
///
/// # Errors
///
/// Returns [`DecodeError`] if the bytes are malformed or truncated.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, DecodeError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Decodes a feed and returns its entities in wire order.
pub fn decode(bytes: &[u8]) -> Result<Vec<FeedEntity>, DecodeError> {
    parse_feed(bytes).map(|feed| feed.entity)
}

/// Inflates a gzip-compressed capture when the buffer carries the gzip magic
/// bytes, otherwise returns it unchanged.
pub fn maybe_gunzip(bytes: Vec<u8>) -> std::io::Result<Vec<u8>> {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(bytes.as_slice()).read_to_end(&mut out)?;
        Ok(out)
    } else {
        Ok(bytes)
    }
}
