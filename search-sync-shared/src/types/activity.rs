//! Activity stream types.
//!
//! Records served to the external polling consumer and the fixed page
//! envelope they are wrapped in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::cursor::Cursor;

/// The JSON-LD context every activity page carries.
pub const ACTIVITY_STREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// The page type every activity page carries.
pub const ORDERED_COLLECTION_PAGE: &str = "OrderedCollectionPage";

/// One record of an activity feed.
///
/// `(modified_on, id)` must be unique per record; `id` breaks ties between
/// records sharing a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub modified_on: DateTime<Utc>,
    /// The serialized activity item as served to consumers.
    pub item: Value,
}

impl ActivityRecord {
    pub fn new(id: Uuid, modified_on: DateTime<Utc>, item: Value) -> Self {
        Self {
            id,
            modified_on,
            item,
        }
    }

    /// The cursor pointing at this record.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.modified_on, self.id)
    }
}

/// Response envelope of the activity stream endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityPage {
    #[serde(rename = "@context")]
    pub context: Value,
    pub summary: String,
    #[serde(rename = "type")]
    pub page_type: String,
    #[serde(rename = "orderedItems")]
    pub ordered_items: Vec<Value>,
    pub next: Option<String>,
}

impl ActivityPage {
    pub fn new(summary: impl Into<String>, ordered_items: Vec<Value>, next: Option<String>) -> Self {
        Self {
            context: Value::String(ACTIVITY_STREAMS_CONTEXT.to_string()),
            summary: summary.into(),
            page_type: ORDERED_COLLECTION_PAGE.to_string(),
            ordered_items,
            next,
        }
    }
}
