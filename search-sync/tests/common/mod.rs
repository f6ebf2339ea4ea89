//! Shared setup for the integration tests: a company app, a contact app
//! related to it, an in-memory search engine and a manual job queue.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use search_sync::apps::{
    DeclaredSearchModel, FieldSpec, FieldType, SearchApp, SearchAppRegistry, SearchModel,
};
use search_sync::queue::ManualJobQueue;
use search_sync::store::{MemoryRelation, MemoryTable, RelationTable};
use search_sync::sync::SearchContext;
use search_sync_repository::{
    AliasAction, InMemorySearchEngine, IndexNaming, SearchEngine, SearchIndexService,
};
use serde_json::{json, Map, Value};

pub const PREFIX: &str = "it";

pub struct TestEnv {
    pub engine: Arc<InMemorySearchEngine>,
    pub queue: Arc<ManualJobQueue>,
    pub ctx: SearchContext,
    pub companies: MemoryTable,
    pub contacts: MemoryTable,
}

pub fn company_model(fields: &[(&str, FieldType)]) -> DeclaredSearchModel {
    let fields: BTreeMap<String, FieldSpec> = fields
        .iter()
        .map(|(name, field_type)| (name.to_string(), FieldSpec::new(*field_type)))
        .collect();
    DeclaredSearchModel::new("company", IndexNaming::new(PREFIX), fields)
}

pub fn default_company_model() -> DeclaredSearchModel {
    company_model(&[("name", FieldType::Text)])
}

pub fn contact_model() -> DeclaredSearchModel {
    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), FieldSpec::new(FieldType::Text));
    fields.insert("company_id".to_string(), FieldSpec::new(FieldType::Keyword));
    DeclaredSearchModel::new("contact", IndexNaming::new(PREFIX), fields)
}

pub fn named(name: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("name".to_string(), json!(name));
    fields
}

pub fn contact_of(name: &str, company: uuid::Uuid) -> Map<String, Value> {
    let mut fields = named(name);
    fields.insert("company_id".to_string(), json!(company.to_string()));
    fields
}

/// Create the target index of `model` and point both aliases at it.
pub async fn init_indices(engine: &InMemorySearchEngine, model: &dyn SearchModel) {
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

/// Environment whose company app declares `company`, sharing the engine,
/// tables and queue of `base` when given.
pub fn env_with(company: DeclaredSearchModel, base: Option<&TestEnv>) -> TestEnv {
    let (engine, queue, companies, contacts) = match base {
        Some(base) => (
            base.engine.clone(),
            base.queue.clone(),
            base.companies.clone(),
            base.contacts.clone(),
        ),
        None => (
            Arc::new(InMemorySearchEngine::new()),
            Arc::new(ManualJobQueue::new()),
            MemoryTable::new("company"),
            MemoryTable::new("contact"),
        ),
    };

    let mut registry = SearchAppRegistry::new();
    registry
        .register(SearchApp::new(
            "company",
            "company",
            Arc::new(company),
            Arc::new(companies.clone()),
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

    TestEnv {
        engine,
        queue,
        ctx,
        companies,
        contacts,
    }
}

/// Both apps registered with their indices initialised.
pub async fn env() -> TestEnv {
    let env = env_with(default_company_model(), None);
    init_indices(&env.engine, &default_company_model()).await;
    init_indices(&env.engine, &contact_model()).await;
    env
}
