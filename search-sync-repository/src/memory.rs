//! In-memory search engine.
//!
//! Models concrete indices, aliases and per-item bulk statuses closely enough
//! to exercise alias flips, 404 handling and transient failures without a
//! running OpenSearch cluster. Used by the service crate's integration tests.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use search_sync_shared::{Cursor, SearchDocument};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::SearchIndexError;
use crate::interfaces::SearchEngine;
use crate::opensearch::DOCUMENT_TYPE_FIELD;
use crate::types::{AliasAction, BulkItemResult, BulkSummary, SortedRangeQuery};

#[derive(Debug, Default)]
struct IndexState {
    body: Value,
    documents: BTreeMap<String, Map<String, Value>>,
}

#[derive(Debug, Default)]
struct EngineState {
    indices: BTreeMap<String, IndexState>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    failing_bulk_calls: usize,
    item_failures: BTreeMap<String, (u16, String)>,
    bulk_upsert_calls: usize,
    bulk_delete_calls: usize,
    alias_update_calls: usize,
}

impl EngineState {
    /// Resolve a name to the single concrete index it designates.
    fn resolve_single(&self, name: &str) -> Result<String, (u16, String)> {
        if self.indices.contains_key(name) {
            return Ok(name.to_string());
        }
        match self.aliases.get(name) {
            Some(indices) if indices.len() == 1 => {
                Ok(indices.iter().next().cloned().unwrap_or_default())
            }
            Some(_) => Err((
                400,
                format!("alias [{}] has more than one index associated with it", name),
            )),
            None => Err((404, format!("no such index [{}]", name))),
        }
    }

    /// Resolve a name to every concrete index it designates.
    fn resolve_all(&self, name: &str) -> BTreeSet<String> {
        if self.indices.contains_key(name) {
            return BTreeSet::from([name.to_string()]);
        }
        self.aliases.get(name).cloned().unwrap_or_default()
    }

    fn take_bulk_failure(&mut self) -> Result<(), SearchIndexError> {
        if self.failing_bulk_calls > 0 {
            self.failing_bulk_calls -= 1;
            return Err(SearchIndexError::transport("injected transient failure"));
        }
        Ok(())
    }

    fn injected_item_failure(&self, id: &str, index: &str) -> Option<BulkItemResult> {
        self.item_failures
            .get(id)
            .map(|(status, reason)| BulkItemResult::failed(id, index, *status, reason.clone()))
    }
}

/// Search engine kept entirely in memory.
///
/// # Example
///
/// ```
/// use search_sync_repository::{InMemorySearchEngine, SearchEngine};
/// use serde_json::json;
///
/// # tokio_test_block(async {
/// let engine = InMemorySearchEngine::new();
/// engine.create_index("search-company-abc", &json!({})).await.unwrap();
/// assert!(engine.index_exists("search-company-abc").await.unwrap());
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemorySearchEngine {
    state: Mutex<EngineState>,
}

impl InMemorySearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` bulk calls fail with a transport error.
    pub async fn fail_next_bulk_calls(&self, count: usize) {
        self.state.lock().await.failing_bulk_calls = count;
    }

    /// Make every bulk item with this id fail with the given status.
    pub async fn fail_document(&self, id: &str, status: u16, reason: &str) {
        self.state
            .lock()
            .await
            .item_failures
            .insert(id.to_string(), (status, reason.to_string()));
    }

    pub async fn clear_document_failures(&self) {
        self.state.lock().await.item_failures.clear();
    }

    /// The body stored for `id` in the index designated by `name`.
    ///
    /// `name` may be an alias, in which case every index it points at is searched.
    pub async fn document(&self, name: &str, id: &str) -> Option<Map<String, Value>> {
        let state = self.state.lock().await;
        state
            .resolve_all(name)
            .iter()
            .filter_map(|index| state.indices.get(index))
            .find_map(|index| index.documents.get(id).cloned())
    }

    /// Number of copies of `id` across the indices designated by `name`.
    pub async fn copies_of(&self, name: &str, id: &str) -> usize {
        let state = self.state.lock().await;
        state
            .resolve_all(name)
            .iter()
            .filter_map(|index| state.indices.get(index))
            .filter(|index| index.documents.contains_key(id))
            .count()
    }

    /// Ids stored in a concrete index.
    pub async fn document_ids(&self, index: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .map(|state| state.documents.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of every concrete index.
    pub async fn index_names(&self) -> BTreeSet<String> {
        self.state.lock().await.indices.keys().cloned().collect()
    }

    /// Creation body an index was created with.
    pub async fn index_body(&self, index: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .map(|state| state.body.clone())
    }

    pub async fn bulk_upsert_calls(&self) -> usize {
        self.state.lock().await.bulk_upsert_calls
    }

    pub async fn bulk_delete_calls(&self) -> usize {
        self.state.lock().await.bulk_delete_calls
    }

    pub async fn alias_update_calls(&self) -> usize {
        self.state.lock().await.alias_update_calls
    }
}

fn sort_key(source: &Map<String, Value>, query: &SortedRangeQuery) -> Option<(DateTime<Utc>, Uuid)> {
    let timestamp = source
        .get(&query.timestamp_field)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())?
        .with_timezone(&Utc);
    let id = source
        .get(&query.id_field)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())?;
    Some((timestamp, id))
}

#[async_trait]
impl SearchEngine for InMemorySearchEngine {
    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        Ok(self.state.lock().await.indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), SearchIndexError> {
        let mut state = self.state.lock().await;
        if state.indices.contains_key(index) || state.aliases.contains_key(index) {
            return Err(SearchIndexError::index_creation(format!(
                "resource_already_exists_exception: index [{}] already exists",
                index
            )));
        }
        state.indices.insert(
            index.to_string(),
            IndexState {
                body: body.clone(),
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), SearchIndexError> {
        let mut state = self.state.lock().await;
        if state.indices.remove(index).is_none() {
            return Err(SearchIndexError::index_not_found(index));
        }
        for indices in state.aliases.values_mut() {
            indices.remove(index);
        }
        state.aliases.retain(|_, indices| !indices.is_empty());
        Ok(())
    }

    async fn get_indices_for_alias(
        &self,
        alias: &str,
    ) -> Result<BTreeSet<String>, SearchIndexError> {
        Ok(self
            .state
            .lock()
            .await
            .aliases
            .get(alias)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_aliases_for_index(
        &self,
        index: &str,
    ) -> Result<BTreeSet<String>, SearchIndexError> {
        Ok(self
            .state
            .lock()
            .await
            .aliases
            .iter()
            .filter(|(_, indices)| indices.contains(index))
            .map(|(alias, _)| alias.clone())
            .collect())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), SearchIndexError> {
        let mut state = self.state.lock().await;

        // validate every action before applying any of them
        for action in actions {
            match action {
                AliasAction::Add { index, .. } if !state.indices.contains_key(index) => {
                    return Err(SearchIndexError::alias(format!("no such index [{}]", index)));
                }
                AliasAction::Remove { index, alias }
                    if !state
                        .aliases
                        .get(alias)
                        .is_some_and(|indices| indices.contains(index)) =>
                {
                    return Err(SearchIndexError::alias(format!(
                        "aliases [{}] missing on index [{}]",
                        alias, index
                    )));
                }
                _ => {}
            }
        }

        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    state
                        .aliases
                        .entry(alias.clone())
                        .or_default()
                        .insert(index.clone());
                }
                AliasAction::Remove { index, alias } => {
                    if let Some(indices) = state.aliases.get_mut(alias) {
                        indices.remove(index);
                    }
                }
            }
        }
        state.aliases.retain(|_, indices| !indices.is_empty());
        state.alias_update_calls += 1;
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        documents: &[SearchDocument],
    ) -> Result<BulkSummary, SearchIndexError> {
        let mut state = self.state.lock().await;
        state.take_bulk_failure()?;
        state.bulk_upsert_calls += 1;

        let mut results = Vec::with_capacity(documents.len());
        for doc in documents {
            let index = match state.resolve_single(&doc.index) {
                Ok(index) => index,
                Err((status, reason)) => {
                    results.push(BulkItemResult::failed(&doc.id, &doc.index, status, reason));
                    continue;
                }
            };
            if let Some(failure) = state.injected_item_failure(&doc.id, &index) {
                results.push(failure);
                continue;
            }

            let mut source = doc.source.clone();
            source
                .entry(DOCUMENT_TYPE_FIELD.to_string())
                .or_insert_with(|| Value::String(doc.doc_type.clone()));
            let existed = state
                .indices
                .get_mut(&index)
                .and_then(|target| target.documents.insert(doc.id.clone(), source))
                .is_some();
            results.push(BulkItemResult::ok(
                &doc.id,
                index,
                if existed { 200 } else { 201 },
            ));
        }

        Ok(BulkSummary::from_results(results))
    }

    async fn bulk_delete(
        &self,
        documents: &[SearchDocument],
    ) -> Result<BulkSummary, SearchIndexError> {
        let mut state = self.state.lock().await;
        state.take_bulk_failure()?;
        state.bulk_delete_calls += 1;

        let mut results = Vec::with_capacity(documents.len());
        for doc in documents {
            let index = match state.resolve_single(&doc.index) {
                Ok(index) => index,
                Err((status, reason)) => {
                    results.push(BulkItemResult::failed(&doc.id, &doc.index, status, reason));
                    continue;
                }
            };
            if let Some(failure) = state.injected_item_failure(&doc.id, &index) {
                results.push(failure);
                continue;
            }

            let removed = state
                .indices
                .get_mut(&index)
                .and_then(|target| target.documents.remove(&doc.id))
                .is_some();
            results.push(if removed {
                BulkItemResult::ok(&doc.id, index, 200)
            } else {
                BulkItemResult::failed(&doc.id, index, 404, "not_found")
            });
        }

        Ok(BulkSummary::from_results(results))
    }

    async fn search_sorted_range(
        &self,
        index: &str,
        query: &SortedRangeQuery,
    ) -> Result<Vec<SearchDocument>, SearchIndexError> {
        let state = self.state.lock().await;
        let targets = state.resolve_all(index);
        if targets.is_empty() {
            return Err(SearchIndexError::index_not_found(index));
        }

        let after: Cursor = query.after;
        let mut hits: Vec<((DateTime<Utc>, Uuid), SearchDocument)> = targets
            .iter()
            .filter_map(|name| state.indices.get(name).map(|target| (name, target)))
            .flat_map(|(name, target)| {
                target.documents.iter().filter_map(move |(id, source)| {
                    let key = sort_key(source, query)?;
                    let doc_type = source
                        .get(DOCUMENT_TYPE_FIELD)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Some((key, SearchDocument::new(id, name, doc_type, source.clone())))
                })
            })
            .filter(|((timestamp, id), _)| after.precedes(*timestamp, *id) && *timestamp < query.before)
            .collect();

        hits.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(hits.into_iter().take(query.size).map(|(_, doc)| doc).collect())
    }
}
