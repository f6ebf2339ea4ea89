//! Integration tests feeding change notifications through the signal bus.

mod common;

use common::{contact_of, env, named};
use search_sync::changes::{parse_payloads, ChangeIngest};
use search_sync::signals::SignalBus;
use search_sync::sync::{connect_default_receivers, sync_object};
use serde_json::{json, Value};
use uuid::Uuid;

fn payload(op: &str, model: &str, pk: Uuid, txid: i64) -> String {
    json!({"op": op, "model": model, "pk": pk.to_string(), "txid": txid}).to_string()
}

#[tokio::test]
async fn test_committed_transaction_resyncs_contacts_and_drops_company() {
    let env = env().await;
    let bus = SignalBus::new();
    connect_default_receivers(&env.ctx, &bus);
    let ingest = ChangeIngest::new(env.ctx.clone(), bus);
    let company = env.companies.upsert(Uuid::new_v4(), named("Acme")).await;
    sync_object(&env.ctx, "company", company.pk).await.unwrap();
    let mut contacts = Vec::new();
    for name in ["Jane", "John"] {
        let contact = env
            .contacts
            .upsert(Uuid::new_v4(), contact_of(name, company.pk))
            .await;
        sync_object(&env.ctx, "contact", contact.pk).await.unwrap();
        contacts.push(contact);
    }

    // the transaction as committed in the primary store
    let mut payloads = Vec::new();
    for contact in &contacts {
        let mut fields = contact.fields.clone();
        fields.insert("company_id".to_string(), Value::Null);
        env.contacts.upsert(contact.pk, fields).await;
        payloads.push(payload("save", "contact", contact.pk, 42));
    }
    env.companies.remove(company.pk).await;
    payloads.push(payload("delete", "company", company.pk, 42));

    ingest
        .apply(&parse_payloads(payloads.iter().map(String::as_str)))
        .await;

    assert_eq!(env.engine.copies_of("it-company-read", &company.pk.to_string()).await, 0);
    assert_eq!(env.engine.bulk_delete_calls().await, 1);
    env.queue.run_until_idle().await;
    for contact in &contacts {
        let doc = env
            .engine
            .document("it-contact-read", &contact.pk.to_string())
            .await
            .unwrap();
        assert_eq!(doc["company_id"], json!(null));
    }
}

#[tokio::test]
async fn test_company_save_resyncs_related_contacts() {
    let env = env().await;
    let bus = SignalBus::new();
    connect_default_receivers(&env.ctx, &bus);
    let ingest = ChangeIngest::new(env.ctx.clone(), bus);
    let company = env.companies.upsert(Uuid::new_v4(), named("Acme")).await;
    let contact = env
        .contacts
        .upsert(Uuid::new_v4(), contact_of("Jane", company.pk))
        .await;

    let events = parse_payloads([payload("save", "company", company.pk, 7).as_str()]);
    ingest.apply(&events).await;
    env.queue.run_until_idle().await;

    assert_eq!(env.engine.copies_of("it-company-read", &company.pk.to_string()).await, 1);
    assert_eq!(env.engine.copies_of("it-contact-read", &contact.pk.to_string()).await, 1);
}
