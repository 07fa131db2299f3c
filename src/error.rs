//! Error taxonomy for the feed pipeline.
//!
//! Per-record problems ([`ValidationError`]) are logged and dropped during
//! extraction. Per-cycle problems ([`FetchError`], which wraps
//! [`DecodeError`]) are absorbed by the cache's stale fallback when a prior
//! snapshot exists and only reach the caller when nothing can be served.

use thiserror::Error;

/// The payload was not a valid GTFS-Realtime `FeedMessage`.
#[derive(Debug, Error)]
#[error("malformed feed payload: {0}")]
pub struct DecodeError(#[from] prost::DecodeError);

/// A refresh cycle could not produce a snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid feed url: {0}")]
    Url(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP error! status: {0}")]
    Status(u16),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Why a single entity did not become a vehicle record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("entity carries neither a position nor a stop-time update")]
    NoPosition,
    #[error("no route id on trip reference")]
    MissingRoute,
    #[error("no entity id and no trip or vehicle id to derive one from")]
    MissingId,
    #[error("missing or non-finite coordinate")]
    MissingCoordinate,
    #[error("coordinate out of range: ({lat}, {lon})")]
    OutOfRange { lat: f64, lon: f64 },
    #[error("stop {0} not found in stop lookup")]
    UnknownStop(String),
    #[error("superseded by a position report for the same vehicle")]
    Superseded,
    #[error("duplicate train id {0}")]
    DuplicateTrainId(String),
}

/// Attached to an otherwise successful read that fell back to an expired
/// snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Using stale data due to fetch error")]
pub struct StaleDataWarning {
    pub cached_at_ms: i64,
    pub cause: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_messages() {
        assert_eq!(FetchError::Status(503).to_string(), "HTTP error! status: 503");

        let decode = crate::parser::parse_feed(&[0xFF, 0xFE, 0x00, 0x01]).unwrap_err();
        let err = FetchError::from(decode);
        assert!(matches!(err, FetchError::Decode(_)));
        assert!(err.to_string().starts_with("malformed feed payload"));
    }

    #[test]
    fn test_stale_warning_message_is_fixed() {
        let warning = StaleDataWarning {
            cached_at_ms: 0,
            cause: "HTTP error! status: 502".to_string(),
        };
        assert_eq!(warning.to_string(), "Using stale data due to fetch error");
    }
}
