//! PostgreSQL implementation of the primary store seam.
//!
//! Rows are read as `row_to_json` objects so that any table can back a
//! search app without a compiled-in schema. Table and column names come from
//! configuration and are validated before they are interpolated into SQL.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::store::relations::value_text;
use crate::store::{RelatedFilter, RelatedRows, Row, RowSource};

/// Maximum identifier length accepted by PostgreSQL.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a (possibly schema-qualified) table or column name.
///
/// Each dot-separated part must start with a letter or underscore and
/// contain only ASCII alphanumerics and underscores.
pub fn validate_identifier(name: &str) -> Result<&str, StoreError> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            !part.is_empty()
                && part.len() <= MAX_IDENTIFIER_LEN
                && part
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(name)
    } else {
        Err(StoreError::invalid_identifier(name))
    }
}

/// PostgreSQL-backed row source for one model.
pub struct PostgresRowSource {
    /// PostgreSQL connection pool
    pool: PgPool,
    model: String,
    table: String,
    pk_column: String,
}

impl PostgresRowSource {
    /// Creates a row source reading `table`, keyed by the UUID column `pk_column`.
    ///
    /// # Returns
    ///
    /// * `Ok(PostgresRowSource)` - Ready-to-use row source
    /// * `Err(StoreError::InvalidIdentifier)` - If a table or column name is not a plain identifier
    pub fn new(
        pool: PgPool,
        model: impl Into<String>,
        table: &str,
        pk_column: &str,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            pool,
            model: model.into(),
            table: validate_identifier(table)?.to_string(),
            pk_column: validate_identifier(pk_column)?.to_string(),
        })
    }
}

#[async_trait]
impl RowSource for PostgresRowSource {
    async fn fetch(&self, pk: Uuid) -> Result<Option<Row>, StoreError> {
        let sql = format!(
            "SELECT row_to_json(t)::jsonb FROM {} t WHERE t.{} = $1",
            self.table, self.pk_column
        );
        let value: Option<Value> = sqlx::query_scalar(&sql)
            .bind(pk)
            .fetch_optional(&self.pool)
            .await?;

        value
            .map(|value| Row::from_json(&self.model, &self.pk_column, value))
            .transpose()
    }

    async fn fetch_batch_after(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Row>, StoreError> {
        let sql = format!(
            "SELECT row_to_json(t)::jsonb FROM {table} t \
             WHERE ($1::uuid IS NULL OR t.{pk} > $1) \
             ORDER BY t.{pk} LIMIT $2",
            table = self.table,
            pk = self.pk_column
        );
        let values: Vec<Value> = sqlx::query_scalar(&sql)
            .bind(after)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        values
            .into_iter()
            .map(|value| Row::from_json(&self.model, &self.pk_column, value))
            .collect()
    }
}

/// PostgreSQL-backed relation: rows of `table` whose `foreign_key` column
/// references the source row's primary key.
pub struct PostgresRelation {
    pool: PgPool,
    table: String,
    foreign_key: String,
    pk_column: String,
}

impl PostgresRelation {
    pub fn new(
        pool: PgPool,
        table: &str,
        foreign_key: &str,
        pk_column: &str,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            pool,
            table: validate_identifier(table)?.to_string(),
            foreign_key: validate_identifier(foreign_key)?.to_string(),
            pk_column: validate_identifier(pk_column)?.to_string(),
        })
    }

    fn query_sql(&self, filter: &RelatedFilter) -> Result<String, StoreError> {
        let mut sql = format!(
            "SELECT t.{} FROM {} t WHERE t.{} = $1",
            self.pk_column, self.table, self.foreign_key
        );
        for (position, column) in filter.keys().enumerate() {
            sql.push_str(&format!(
                " AND t.{}::text = ${}",
                validate_identifier(column)?,
                position + 2
            ));
        }
        sql.push_str(&format!(" ORDER BY t.{}", self.pk_column));
        Ok(sql)
    }
}

#[async_trait]
impl RelatedRows for PostgresRelation {
    async fn related_pks(
        &self,
        source: &Row,
        filter: &RelatedFilter,
    ) -> Result<Vec<Uuid>, StoreError> {
        let sql = self.query_sql(filter)?;
        let mut query = sqlx::query_scalar::<_, Uuid>(&sql).bind(source.pk);
        for value in filter.values() {
            query = query.bind(value_text(value));
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("company").is_ok());
        assert!(validate_identifier("public.company_contact").is_ok());
        assert!(validate_identifier("_internal").is_ok());

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1company").is_err());
        assert!(validate_identifier("company; DROP TABLE x").is_err());
        assert!(validate_identifier("company.").is_err());
        assert!(validate_identifier("\"company\"").is_err());
    }

    #[tokio::test]
    async fn test_relation_sql_binds_filter_values() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/datahub")
            .unwrap();
        let relation = PostgresRelation::new(pool, "interaction", "company_id", "id").unwrap();
        let mut filter = RelatedFilter::new();
        filter.insert("kind".to_string(), json!("meeting"));
        filter.insert("archived".to_string(), json!(false));

        let sql = relation.query_sql(&filter).unwrap();

        assert_eq!(
            sql,
            "SELECT t.id FROM interaction t WHERE t.company_id = $1 \
             AND t.archived::text = $2 AND t.kind::text = $3 ORDER BY t.id"
        );

        filter.insert("kind; --".to_string(), json!("x"));
        assert!(relation.query_sql(&filter).is_err());
    }
}
