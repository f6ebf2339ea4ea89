//! Activity feed sources.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use search_sync_repository::{SearchIndexService, SortedRangeQuery};
use search_sync_shared::{ActivityRecord, Cursor};
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::activity_stream::pagination::ActivitySource;
use crate::errors::{StoreError, SyncError};
use crate::store::validate_identifier;

/// Wrap a record as an activity announcing its current state.
pub fn announce(kind: &str, id: Uuid, modified_on: DateTime<Utc>, object: Value) -> Value {
    json!({
        "id": format!("dit:DataHub{}:{}:Announce", kind, id),
        "type": "Announce",
        "published": modified_on.to_rfc3339_opts(SecondsFormat::Micros, false),
        "object": object,
    })
}

/// Feed kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryActivitySource {
    records: RwLock<Vec<ActivityRecord>>,
}

impl InMemoryActivitySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, record: ActivityRecord) {
        self.records.write().await.push(record);
    }
}

#[async_trait]
impl ActivitySource for InMemoryActivitySource {
    async fn fetch_after(
        &self,
        after: Cursor,
        visible_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, SyncError> {
        let mut records: Vec<ActivityRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|record| after.precedes(record.modified_on, record.id))
            .filter(|record| record.modified_on < visible_before)
            .cloned()
            .collect();
        records.sort_by_key(ActivityRecord::cursor);
        records.truncate(limit);
        Ok(records)
    }
}

/// Feed read from a primary-store table.
pub struct PostgresActivitySource {
    pool: PgPool,
    kind: String,
    query: String,
}

impl PostgresActivitySource {
    /// # Arguments
    ///
    /// * `pool` - Connection pool of the primary store
    /// * `kind` - Entity kind used in activity ids, e.g. `Interaction`
    /// * `table` - Table holding the records
    /// * `id_column` - UUID primary key column
    /// * `modified_column` - Timestamp column the feed is ordered by
    pub fn new(
        pool: PgPool,
        kind: impl Into<String>,
        table: &str,
        id_column: &str,
        modified_column: &str,
    ) -> Result<Self, StoreError> {
        let table = validate_identifier(table)?;
        let id = validate_identifier(id_column)?;
        let modified = validate_identifier(modified_column)?;
        let query = format!(
            "SELECT t.{id}, t.{modified}, row_to_json(t)::jsonb FROM {table} t \
             WHERE (t.{modified}, t.{id}) > ($1, $2) AND t.{modified} < $3 \
             ORDER BY t.{modified}, t.{id} LIMIT $4",
        );
        Ok(Self {
            pool,
            kind: kind.into(),
            query,
        })
    }

    pub fn query_sql(&self) -> &str {
        &self.query
    }
}

#[async_trait]
impl ActivitySource for PostgresActivitySource {
    async fn fetch_after(
        &self,
        after: Cursor,
        visible_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, SyncError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(Uuid, DateTime<Utc>, Value)> = sqlx::query_as(&self.query)
            .bind(after.timestamp)
            .bind(after.id)
            .bind(visible_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;

        Ok(rows
            .into_iter()
            .map(|(id, modified_on, object)| {
                ActivityRecord::new(id, modified_on, announce(&self.kind, id, modified_on, object))
            })
            .collect())
    }
}

/// Feed read through a search app's read alias.
///
/// Documents are sorted by a timestamp field and the `id` field; documents
/// missing either are skipped.
pub struct SearchActivitySource {
    index: SearchIndexService,
    alias: String,
    kind: String,
    timestamp_field: String,
}

impl SearchActivitySource {
    pub fn new(
        index: SearchIndexService,
        alias: impl Into<String>,
        kind: impl Into<String>,
        timestamp_field: impl Into<String>,
    ) -> Self {
        Self {
            index,
            alias: alias.into(),
            kind: kind.into(),
            timestamp_field: timestamp_field.into(),
        }
    }

    fn to_record(&self, source: Value) -> Option<ActivityRecord> {
        let id = source
            .get("id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())?;
        let modified_on = source
            .get(&self.timestamp_field)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())?
            .with_timezone(&Utc);
        Some(ActivityRecord::new(
            id,
            modified_on,
            announce(&self.kind, id, modified_on, source),
        ))
    }
}

#[async_trait]
impl ActivitySource for SearchActivitySource {
    async fn fetch_after(
        &self,
        after: Cursor,
        visible_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, SyncError> {
        let mut records: Vec<ActivityRecord> = Vec::with_capacity(limit);
        let mut cursor = after;
        // mid-migration the read alias spans two indices, so a document can
        // come back once per index with the same cursor
        while records.len() < limit {
            let wanted = limit - records.len();
            let query = SortedRangeQuery {
                timestamp_field: self.timestamp_field.clone(),
                id_field: "id".to_string(),
                after: cursor,
                before: visible_before,
                size: wanted,
            };
            let documents = self.index.search_sorted_range(&self.alias, &query).await?;
            let exhausted = documents.len() < wanted;

            for document in documents {
                let id = document.id.clone();
                let Some(record) = self.to_record(Value::Object(document.source)) else {
                    warn!(alias = %self.alias, id = %id, "Skipping unsortable document");
                    continue;
                };
                if records.last().map(ActivityRecord::cursor) == Some(record.cursor()) {
                    continue;
                }
                records.push(record);
            }

            let Some(last) = records.last().map(ActivityRecord::cursor) else {
                break;
            };
            if exhausted || last == cursor {
                break;
            }
            cursor = last;
        }
        Ok(records)
    }
}
