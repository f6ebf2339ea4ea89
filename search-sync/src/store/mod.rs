//! Primary store seam.
//!
//! Search apps read live rows through `RowSource`, and related rows through
//! the statically declared `RelationTable`. Row sources never fail on a
//! missing row; they return `None` and let the caller decide.

mod memory;
mod postgres;
mod relations;

pub use memory::{MemoryRelation, MemoryTable};
pub use postgres::{validate_identifier, PostgresRelation, PostgresRowSource};
pub use relations::{RelatedFilter, RelatedRows, Relation, RelationTable};

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::StoreError;

/// A live primary-store row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Name of the model (entity type) the row belongs to.
    pub model: String,
    pub pk: Uuid,
    pub fields: Map<String, Value>,
}

impl Row {
    pub fn new(model: impl Into<String>, pk: Uuid, fields: Map<String, Value>) -> Self {
        Self {
            model: model.into(),
            pk,
            fields,
        }
    }

    /// Build a row from a JSON object, reading the primary key from `pk_column`.
    pub fn from_json(model: &str, pk_column: &str, value: Value) -> Result<Self, StoreError> {
        let Value::Object(fields) = value else {
            return Err(StoreError::decode(format!(
                "{} row is not a JSON object",
                model
            )));
        };
        let pk = fields
            .get(pk_column)
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| {
                StoreError::decode(format!("{} row has no UUID in column {}", model, pk_column))
            })?;
        Ok(Self::new(model, pk, fields))
    }

    /// Look up a field by dotted path (e.g. "company.name").
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        parts.try_fold(self.fields.get(first)?, |value, part| value.get(part))
    }
}

/// Fetches live rows of one model.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Fetch a row by primary key; `Ok(None)` when it does not exist.
    async fn fetch(&self, pk: Uuid) -> Result<Option<Row>, StoreError>;

    /// Fetch up to `limit` rows with a primary key greater than `after`, in key order.
    async fn fetch_batch_after(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError>;
}
