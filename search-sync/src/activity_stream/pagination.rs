//! Cursor pagination of activity feeds.
//!
//! Pages are positioned by the `(modified_on, id)` of the last record served
//! instead of an offset. Re-polling the last page is therefore cheap: it
//! returns nothing until a newer record exists.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use search_sync_shared::{ActivityPage, ActivityRecord, Cursor};
use tracing::debug;
use url::Url;

use crate::errors::SyncError;

/// Default number of records per page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Default age a record must reach before it is served.
pub const DEFAULT_VISIBILITY_GRACE: TimeDelta = TimeDelta::seconds(1);

/// An ordered feed of activity records.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Records whose `(modified_on, id)` is strictly greater than `after` and
    /// whose `modified_on` is strictly before `visible_before`, ascending by
    /// `(modified_on, id)`, at most `limit` of them.
    async fn fetch_after(
        &self,
        after: Cursor,
        visible_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, SyncError>;
}

/// Serves one page of a feed for a given cursor.
#[derive(Debug, Clone, Copy)]
pub struct ActivityCursorPagination {
    pub page_size: usize,
    /// Records modified less than this long ago are held back. Their
    /// timestamp may have been assigned before the transaction writing them
    /// committed, so a faster poller could otherwise move past them unseen.
    pub visibility_grace: TimeDelta,
}

impl Default for ActivityCursorPagination {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            visibility_grace: DEFAULT_VISIBILITY_GRACE,
        }
    }
}

impl ActivityCursorPagination {
    pub fn new(page_size: usize, visibility_grace: TimeDelta) -> Self {
        Self {
            page_size: page_size.max(1),
            visibility_grace,
        }
    }

    /// Build the page following `cursor`.
    ///
    /// `next` links to `collection_url` with the cursor of the last record,
    /// and is only set when the page is full.
    ///
    /// # Arguments
    ///
    /// * `source` - The feed
    /// * `cursor` - Position of the last record the consumer has seen
    /// * `now` - Current time, for the visibility grace window
    /// * `summary` - Feed label put in the envelope
    /// * `collection_url` - Public URL of the feed, without query
    pub async fn paginate(
        &self,
        source: &dyn ActivitySource,
        cursor: Cursor,
        now: DateTime<Utc>,
        summary: &str,
        collection_url: &Url,
    ) -> Result<ActivityPage, SyncError> {
        let visible_before = now - self.visibility_grace;
        let mut records = source
            .fetch_after(cursor, visible_before, self.page_size)
            .await?;
        records.truncate(self.page_size);

        let next = match records.last() {
            Some(last) if records.len() == self.page_size => {
                Some(next_url(collection_url, &last.cursor()))
            }
            _ => None,
        };

        debug!(
            count = records.len(),
            has_next = next.is_some(),
            "Serving activity page"
        );
        let items = records.into_iter().map(|record| record.item).collect();
        Ok(ActivityPage::new(summary, items, next))
    }
}

/// `collection_url` with the cursor as two repeated `cursor` parameters.
pub fn next_url(collection_url: &Url, cursor: &Cursor) -> String {
    let mut url = collection_url.clone();
    let [timestamp, id] = cursor.to_query_values();
    url.query_pairs_mut()
        .clear()
        .append_pair("cursor", &timestamp)
        .append_pair("cursor", &id);
    url.to_string()
}
