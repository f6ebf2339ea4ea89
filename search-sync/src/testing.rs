//! Shared fixtures for unit tests: a company app, a contact app related to
//! it, an in-memory search engine and a manual job queue.

use std::collections::BTreeMap;
use std::sync::Arc;

use search_sync_repository::{
    AliasAction, InMemorySearchEngine, IndexNaming, SearchEngine, SearchIndexService,
};
use serde_json::{json, Map, Value};

use crate::apps::{DeclaredSearchModel, FieldSpec, FieldType, SearchApp, SearchAppRegistry, SearchModel};
use crate::queue::ManualJobQueue;
use crate::store::{MemoryRelation, MemoryTable, RelationTable, RowSource};
use crate::sync::SearchContext;

pub(crate) const PREFIX: &str = "test";

pub(crate) struct Fixture {
    pub engine: Arc<InMemorySearchEngine>,
    pub queue: Arc<ManualJobQueue>,
    pub ctx: SearchContext,
    pub companies: MemoryTable,
    pub contacts: MemoryTable,
}

pub(crate) fn company_model() -> DeclaredSearchModel {
    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), FieldSpec::new(FieldType::Text));
    DeclaredSearchModel::new("company", IndexNaming::new(PREFIX), fields)
}

pub(crate) fn contact_model() -> DeclaredSearchModel {
    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), FieldSpec::new(FieldType::Text));
    fields.insert("company_id".to_string(), FieldSpec::new(FieldType::Keyword));
    DeclaredSearchModel::new("contact", IndexNaming::new(PREFIX), fields)
}

pub(crate) fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub(crate) fn named(name: &str) -> Map<String, Value> {
    fields(&[("name", json!(name))])
}

/// Create the target index of `model` and point both aliases at it.
pub(crate) async fn init_indices(engine: &InMemorySearchEngine, model: &dyn SearchModel) {
    let index = model.target_index_name();
    engine.create_index(&index, &model.index_body()).await.unwrap();
    engine
        .update_aliases(&[
            AliasAction::add(index.as_str(), model.read_alias()),
            AliasAction::add(index.as_str(), model.write_alias()),
        ])
        .await
        .unwrap();
}

/// Apps registered, indices not created.
pub(crate) fn bare_fixture() -> Fixture {
    bare_fixture_with_company_rows(|companies, _| Arc::new(companies.clone()))
}

/// Like `bare_fixture`, with the company app reading rows through `rows`.
pub(crate) fn bare_fixture_with_company_rows(
    rows: impl FnOnce(&MemoryTable, &Arc<InMemorySearchEngine>) -> Arc<dyn RowSource>,
) -> Fixture {
    let engine = Arc::new(InMemorySearchEngine::new());
    let queue = Arc::new(ManualJobQueue::new());
    let companies = MemoryTable::new("company");
    let contacts = MemoryTable::new("contact");

    let mut registry = SearchAppRegistry::new();
    registry
        .register(SearchApp::new(
            "company",
            "company",
            Arc::new(company_model()),
            rows(&companies, &engine),
        ))
        .unwrap();
    registry
        .register(SearchApp::new(
            "contact",
            "contact",
            Arc::new(contact_model()),
            Arc::new(contacts.clone()),
        ))
        .unwrap();

    let mut relations = RelationTable::new();
    relations.register(
        "company",
        "contacts",
        "contact",
        Arc::new(MemoryRelation::new(contacts.clone(), "company_id")),
    );

    let ctx = SearchContext::new(
        Arc::new(registry),
        Arc::new(relations),
        SearchIndexService::new(engine.clone()),
        queue.clone(),
    );

    Fixture {
        engine,
        queue,
        ctx,
        companies,
        contacts,
    }
}

/// Apps registered and their indices initialised.
pub(crate) async fn fixture() -> Fixture {
    let fixture = bare_fixture();
    init_indices(&fixture.engine, &company_model()).await;
    init_indices(&fixture.engine, &contact_model()).await;
    fixture
}
