//! Activity stream cursor.
//!
//! A cursor is the `(timestamp, id)` pair of the last record a consumer has
//! seen. It is round-tripped to the client as two repeated `cursor` query
//! parameters and is never stored server-side.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while parsing a cursor from query parameter values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CursorParseError {
    /// The timestamp component could not be parsed.
    #[error("Invalid cursor timestamp: {0}")]
    InvalidTimestamp(String),

    /// The id component is not a UUID.
    #[error("Invalid cursor id: {0}")]
    InvalidId(String),

    /// A single value was given but it is not a legacy encoded cursor.
    #[error("Invalid legacy cursor: {0}")]
    InvalidLegacy(String),

    /// More than two cursor values were supplied.
    #[error("Expected at most 2 cursor values, got {0}")]
    TooManyValues(usize),
}

/// Position in the `(modified_on, id)` ordering of an activity feed.
///
/// The derived ordering compares `timestamp` first and `id` second, which is
/// the lexicographic order the feed is served in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    pub timestamp: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn new(timestamp: DateTime<Utc>, id: Uuid) -> Self {
        Self { timestamp, id }
    }

    /// Cursor used when a request carries none: the epoch and the nil id.
    pub fn initial() -> Self {
        Self {
            timestamp: DateTime::UNIX_EPOCH,
            id: Uuid::nil(),
        }
    }

    /// Whether the record at `(timestamp, id)` comes strictly after this cursor.
    pub fn precedes(&self, timestamp: DateTime<Utc>, id: Uuid) -> bool {
        (timestamp, id) > (self.timestamp, self.id)
    }

    /// Build a cursor from the repeated `cursor` query parameter values.
    ///
    /// Supports three shapes:
    ///
    /// * no values: the initial cursor (first page)
    /// * one value: a legacy base64 encoded `p=<timestamp>&o=<offset>` pair
    /// * two values: the current plain `<timestamp>`, `<id>` pair
    ///
    /// # Example
    ///
    /// ```
    /// use search_sync_shared::Cursor;
    ///
    /// let cursor = Cursor::from_query_values(&[
    ///     "2024-03-01T10:00:00.000000+00:00".to_string(),
    ///     "6ba7b810-9dad-11d1-80b4-00c04fd430c8".to_string(),
    /// ])
    /// .unwrap();
    /// assert_eq!(cursor.id.to_string(), "6ba7b810-9dad-11d1-80b4-00c04fd430c8");
    /// ```
    pub fn from_query_values(values: &[String]) -> Result<Self, CursorParseError> {
        match values {
            [] => Ok(Self::initial()),
            [legacy] => Self::from_legacy(legacy),
            [timestamp, id] => {
                let timestamp = parse_timestamp(timestamp)?;
                let id = Uuid::parse_str(id.trim())
                    .map_err(|e| CursorParseError::InvalidId(format!("{}: {}", id, e)))?;
                Ok(Self { timestamp, id })
            }
            _ => Err(CursorParseError::TooManyValues(values.len())),
        }
    }

    /// Decode a legacy cursor.
    ///
    /// Legacy cursors carry a position timestamp and an offset. The offset
    /// cannot be mapped onto an id, so the cursor resumes at the nil id for
    /// that timestamp: records sharing the timestamp may be served again but
    /// none are skipped.
    fn from_legacy(encoded: &str) -> Result<Self, CursorParseError> {
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .or_else(|_| general_purpose::URL_SAFE.decode(encoded.trim()))
            .map_err(|e| CursorParseError::InvalidLegacy(e.to_string()))?;

        let position = url::form_urlencoded::parse(&bytes)
            .find(|(key, _)| key == "p")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| CursorParseError::InvalidLegacy("missing position".to_string()))?;

        Ok(Self {
            timestamp: parse_timestamp(&position)?,
            id: Uuid::nil(),
        })
    }

    /// Encode this cursor as the two `cursor` query parameter values.
    pub fn to_query_values(&self) -> [String; 2] {
        [
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
            self.id.to_string(),
        ]
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::initial()
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CursorParseError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    // Naive timestamps are taken as UTC.
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| CursorParseError::InvalidTimestamp(value.to_string()))
}
