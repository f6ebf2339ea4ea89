//! OpenSearch provider implementation.
//!
//! This module provides the concrete implementation of `SearchEngine`
//! using the OpenSearch Rust crate.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::SecondsFormat;
use opensearch::{
    http::request::JsonBody,
    http::response::Response,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts, IndicesGetAliasParts},
    BulkParts, OpenSearch, SearchParts,
};
use search_sync_shared::SearchDocument;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};
use url::Url;

use crate::errors::SearchIndexError;
use crate::interfaces::SearchEngine;
use crate::types::{AliasAction, BulkItemResult, BulkOperation, BulkSummary, SortedRangeQuery};

/// Source field carrying the document type tag.
pub const DOCUMENT_TYPE_FIELD: &str = "_document_type";

/// OpenSearch provider implementation.
///
/// # Example
///
/// ```ignore
/// use search_sync_repository::{OpenSearchProvider, SearchEngine};
///
/// let provider = OpenSearchProvider::new("http://localhost:9200").await?;
/// let indices = provider.get_indices_for_alias("search-company-read").await?;
/// ```
pub struct OpenSearchProvider {
    client: OpenSearch,
}

impl OpenSearchProvider {
    /// Create a new OpenSearch provider connected to the specified URL.
    ///
    /// # Arguments
    ///
    /// * `url` - The OpenSearch server URL (e.g., "http://localhost:9200")
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchProvider)` - A new provider instance
    /// * `Err(SearchIndexError)` - If connection setup fails
    pub async fn new(url: &str) -> Result<Self, SearchIndexError> {
        let parsed_url =
            Url::parse(url).map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(url = %url, "Created OpenSearch provider");

        Ok(Self { client })
    }

    /// Check that the cluster answers.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the cluster responded with a success status
    /// * `Err(SearchIndexError::ConnectionError)` - If it could not be reached or refused
    pub async fn ping(&self) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .ping()
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(SearchIndexError::connection(format!(
                "Ping failed with status {}",
                response.status_code()
            )));
        }
        Ok(())
    }

    /// Map a failed response to an error, treating 5xx as transient.
    async fn error_from_response(
        response: Response,
        context: &str,
        make: fn(String) -> SearchIndexError,
    ) -> SearchIndexError {
        let status = response.status_code();
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "{} request failed", context);
        let message = format!("{} failed with status {}: {}", context, status, body);
        if status.is_server_error() {
            SearchIndexError::transport(message)
        } else {
            make(message)
        }
    }

    /// Build the newline-delimited bulk body for a set of documents.
    fn bulk_body(documents: &[SearchDocument], operation: BulkOperation) -> Vec<JsonBody<Value>> {
        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(documents.len() * 2);
        for doc in documents {
            match operation {
                BulkOperation::Upsert => {
                    body.push(json!({"index": {"_index": doc.index, "_id": doc.id}}).into());
                    body.push(Value::Object(doc.source.clone()).into());
                }
                BulkOperation::Delete => {
                    body.push(json!({"delete": {"_index": doc.index, "_id": doc.id}}).into());
                }
            }
        }
        body
    }

    /// Parse the per-item results of a bulk response.
    fn parse_bulk_response(
        response: &Value,
        documents: &[SearchDocument],
    ) -> Result<BulkSummary, SearchIndexError> {
        let items = response["items"]
            .as_array()
            .ok_or_else(|| SearchIndexError::parse("Bulk response has no items"))?;

        let mut results = Vec::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            let entry = item
                .as_object()
                .and_then(|op| op.values().next())
                .ok_or_else(|| SearchIndexError::parse("Malformed bulk response item"))?;

            let fallback = documents.get(position);
            let id = entry["_id"]
                .as_str()
                .map(str::to_string)
                .or_else(|| fallback.map(|d| d.id.clone()))
                .unwrap_or_default();
            let index = entry["_index"]
                .as_str()
                .map(str::to_string)
                .or_else(|| fallback.map(|d| d.index.clone()))
                .unwrap_or_default();
            let status = entry["status"].as_u64().unwrap_or(0) as u16;

            let result = match entry.get("error") {
                Some(err) if !err.is_null() => {
                    let reason = err["reason"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| err.to_string());
                    BulkItemResult::failed(id, index, status, reason)
                }
                _ if status == 404 => BulkItemResult::failed(id, index, status, "not_found"),
                _ => BulkItemResult::ok(id, index, status),
            };
            results.push(result);
        }

        Ok(BulkSummary::from_results(results))
    }

    async fn send_bulk(
        &self,
        documents: &[SearchDocument],
        operation: BulkOperation,
    ) -> Result<BulkSummary, SearchIndexError> {
        if documents.is_empty() {
            return Ok(BulkSummary::default());
        }

        let response = self
            .client
            .bulk(BulkParts::None)
            .body(Self::bulk_body(documents, operation))
            .send()
            .await
            .map_err(|e| SearchIndexError::transport(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(
                Self::error_from_response(response, "Bulk", SearchIndexError::Unknown).await,
            );
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;
        let summary = Self::parse_bulk_response(&body, documents)?;

        debug!(
            operation = %operation,
            total = summary.total,
            failed = summary.failed,
            "Bulk request completed"
        );
        Ok(summary)
    }

    /// Collect the keys of the response object, or the alias keys nested under them.
    fn parse_alias_response(body: &Value, nested_aliases: bool) -> BTreeSet<String> {
        let Some(entries) = body.as_object() else {
            return BTreeSet::new();
        };
        if !nested_aliases {
            return entries.keys().cloned().collect();
        }
        entries
            .values()
            .filter_map(|entry| entry["aliases"].as_object())
            .flat_map(|aliases| aliases.keys().cloned())
            .collect()
    }

    fn sorted_range_body(query: &SortedRangeQuery) -> Value {
        let after_ts = query
            .after
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, false);
        let before = query.before.to_rfc3339_opts(SecondsFormat::Micros, false);
        let ts = &query.timestamp_field;
        let id = &query.id_field;

        json!({
            "size": query.size,
            "query": {
                "bool": {
                    "filter": [
                        {"range": {ts: {"lt": before}}},
                        {"bool": {
                            "should": [
                                {"range": {ts: {"gt": after_ts}}},
                                {"bool": {"filter": [
                                    {"term": {ts: after_ts}},
                                    {"range": {id: {"gt": query.after.id.to_string()}}}
                                ]}}
                            ],
                            "minimum_should_match": 1
                        }}
                    ]
                }
            },
            "sort": [{ts: "asc"}, {id: "asc"}]
        })
    }
}

#[async_trait]
impl SearchEngine for OpenSearchProvider {
    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| SearchIndexError::transport(e.to_string()))?;

        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(Self::error_from_response(response, "Index exists", SearchIndexError::Unknown).await),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(body.clone())
            .send()
            .await
            .map_err(|e| SearchIndexError::transport(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(Self::error_from_response(
                response,
                "Index creation",
                SearchIndexError::IndexCreationError,
            )
            .await);
        }

        info!(index = %index, "Index created");
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| SearchIndexError::transport(e.to_string()))?;

        let status = response.status_code();
        if status.as_u16() == 404 {
            return Err(SearchIndexError::index_not_found(index));
        }
        if !status.is_success() {
            return Err(Self::error_from_response(
                response,
                "Index deletion",
                SearchIndexError::IndexDeletionError,
            )
            .await);
        }

        info!(index = %index, "Index deleted");
        Ok(())
    }

    async fn get_indices_for_alias(
        &self,
        alias: &str,
    ) -> Result<BTreeSet<String>, SearchIndexError> {
        let response = self
            .client
            .indices()
            .get_alias(IndicesGetAliasParts::Name(&[alias]))
            .send()
            .await
            .map_err(|e| SearchIndexError::transport(e.to_string()))?;

        let status = response.status_code();
        // 404 means the alias does not exist
        if status.as_u16() == 404 {
            return Ok(BTreeSet::new());
        }
        if !status.is_success() {
            return Err(
                Self::error_from_response(response, "Get alias", SearchIndexError::AliasError)
                    .await,
            );
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;
        Ok(Self::parse_alias_response(&body, false))
    }

    async fn get_aliases_for_index(
        &self,
        index: &str,
    ) -> Result<BTreeSet<String>, SearchIndexError> {
        let response = self
            .client
            .indices()
            .get_alias(IndicesGetAliasParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| SearchIndexError::transport(e.to_string()))?;

        let status = response.status_code();
        if status.as_u16() == 404 {
            return Ok(BTreeSet::new());
        }
        if !status.is_success() {
            return Err(
                Self::error_from_response(response, "Get alias", SearchIndexError::AliasError)
                    .await,
            );
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;
        Ok(Self::parse_alias_response(&body, true))
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), SearchIndexError> {
        if actions.is_empty() {
            return Ok(());
        }

        let actions: Vec<Value> = actions
            .iter()
            .map(|action| match action {
                AliasAction::Add { index, alias } => {
                    json!({"add": {"index": index, "alias": alias}})
                }
                AliasAction::Remove { index, alias } => {
                    json!({"remove": {"index": index, "alias": alias}})
                }
            })
            .collect();

        let response = self
            .client
            .indices()
            .update_aliases()
            .body(json!({ "actions": actions }))
            .send()
            .await
            .map_err(|e| SearchIndexError::transport(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(Self::error_from_response(
                response,
                "Alias update",
                SearchIndexError::AliasError,
            )
            .await);
        }

        debug!(action_count = actions.len(), "Aliases updated");
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        documents: &[SearchDocument],
    ) -> Result<BulkSummary, SearchIndexError> {
        self.send_bulk(documents, BulkOperation::Upsert).await
    }

    async fn bulk_delete(
        &self,
        documents: &[SearchDocument],
    ) -> Result<BulkSummary, SearchIndexError> {
        self.send_bulk(documents, BulkOperation::Delete).await
    }

    async fn search_sorted_range(
        &self,
        index: &str,
        query: &SortedRangeQuery,
    ) -> Result<Vec<SearchDocument>, SearchIndexError> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(Self::sorted_range_body(query))
            .send()
            .await
            .map_err(|e| SearchIndexError::transport(e.to_string()))?;

        let status = response.status_code();
        if status.as_u16() == 404 {
            return Err(SearchIndexError::index_not_found(index));
        }
        if !status.is_success() {
            return Err(
                Self::error_from_response(response, "Search", SearchIndexError::Unknown).await,
            );
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;
        let hits = body["hits"]["hits"]
            .as_array()
            .ok_or_else(|| SearchIndexError::parse("Search response has no hits"))?;

        Ok(hits
            .iter()
            .map(|hit| {
                let source: Map<String, Value> =
                    hit["_source"].as_object().cloned().unwrap_or_default();
                let doc_type = source
                    .get(DOCUMENT_TYPE_FIELD)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                SearchDocument::new(
                    hit["_id"].as_str().unwrap_or_default(),
                    hit["_index"].as_str().unwrap_or_default(),
                    doc_type,
                    source,
                )
            })
            .collect())
    }
}
