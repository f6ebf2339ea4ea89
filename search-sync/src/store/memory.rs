//! In-memory primary store tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::store::relations::{matches_filter, value_text};
use crate::store::{RelatedFilter, RelatedRows, Row, RowSource};

/// A table of rows of one model held in memory.
///
/// Cloning shares the underlying rows.
#[derive(Clone, Default)]
pub struct MemoryTable {
    model: String,
    rows: Arc<RwLock<BTreeMap<Uuid, Row>>>,
}

impl MemoryTable {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            rows: Arc::default(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Insert or replace a row and return it.
    pub async fn upsert(&self, pk: Uuid, fields: Map<String, Value>) -> Row {
        let row = Row::new(self.model.clone(), pk, fields);
        self.rows.write().await.insert(pk, row.clone());
        row
    }

    /// Remove a row, returning its last state.
    pub async fn remove(&self, pk: Uuid) -> Option<Row> {
        self.rows.write().await.remove(&pk)
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn pks(&self) -> Vec<Uuid> {
        self.rows.read().await.keys().copied().collect()
    }
}

#[async_trait]
impl RowSource for MemoryTable {
    async fn fetch(&self, pk: Uuid) -> Result<Option<Row>, StoreError> {
        Ok(self.rows.read().await.get(&pk).cloned())
    }

    async fn fetch_batch_after(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| after.map_or(true, |after| row.pk > after))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Relation resolved against an in-memory table by a foreign key field.
pub struct MemoryRelation {
    target: MemoryTable,
    foreign_key: String,
}

impl MemoryRelation {
    /// Rows of `target` whose `foreign_key` field holds the source row's primary key.
    pub fn new(target: MemoryTable, foreign_key: impl Into<String>) -> Self {
        Self {
            target,
            foreign_key: foreign_key.into(),
        }
    }
}

#[async_trait]
impl RelatedRows for MemoryRelation {
    async fn related_pks(
        &self,
        source: &Row,
        filter: &RelatedFilter,
    ) -> Result<Vec<Uuid>, StoreError> {
        let source_pk = source.pk.to_string();
        let rows = self.target.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| {
                row.fields
                    .get(&self.foreign_key)
                    .is_some_and(|value| value_text(value) == source_pk)
            })
            .filter(|row| matches_filter(row, filter))
            .map(|row| row.pk)
            .collect())
    }
}
