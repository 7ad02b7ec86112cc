// src/tests/store_tests.rs
use crate::db::{Dataset, FieldType, Metadata, Query, UpsertOptions};
use crate::errors::StoreError;
use crate::tests::utils::{flaky_store, memory_store};
use serde_json::{json, Value};

fn dataset(value: Value) -> Dataset {
    Dataset::from_value(value).unwrap()
}

fn meta(value: Value) -> Metadata {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn upsert_creates_index_with_inferred_schema() {
    let store = memory_store(1000);
    store
        .upsert(
            "austin_rentals",
            dataset(json!({ "records": [
                { "id": "a", "price": 1200, "baths": 1.5, "address": "1 Main St" },
                { "id": "b", "price": 1350.5, "lastSeen": "2024-03-01T12:00:00Z" }
            ]})),
        )
        .await
        .unwrap();

    let schema = store.schema("austin_rentals").await.unwrap().unwrap();
    assert_eq!(schema["price"], FieldType::Float);
    assert_eq!(schema["baths"], FieldType::Float);
    assert_eq!(schema["address"], FieldType::Text);
    assert_eq!(schema["lastSeen"], FieldType::Date);
}

#[tokio::test]
async fn inference_can_be_disabled() {
    let store = memory_store(1000);
    store
        .upsert_with(
            "registered_indexes",
            dataset(json!({ "records": [{ "id": "x", "region": "austin" }] })),
            UpsertOptions { infer_types: false },
        )
        .await
        .unwrap();
    assert_eq!(store.schema("registered_indexes").await.unwrap(), None);
}

#[tokio::test]
async fn writes_in_batches_and_merges_existing_records() {
    let store = memory_store(2);
    let records: Vec<Value> = (0..5)
        .map(|i| json!({ "id": format!("r{i}"), "price": 1000 + i, "beds": 2 }))
        .collect();
    let result = store
        .upsert("rentals", dataset(json!({ "records": records })))
        .await
        .unwrap();
    assert_eq!(result.batches, 3);
    assert_eq!(result.written, 5);
    assert!(!result.is_partial());

    // A partial update keeps fields it does not mention.
    store
        .upsert("rentals", dataset(json!({ "records": [{ "id": "r0", "price": 999 }] })))
        .await
        .unwrap();
    let found = store
        .get("rentals", &Query::term("id", "r0"), 10)
        .await
        .unwrap()
        .records;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["price"], json!(999));
    assert_eq!(found[0]["beds"], json!(2));
}

#[tokio::test]
async fn records_without_id_get_one() {
    let store = memory_store(1000);
    store
        .upsert("reports", dataset(json!({ "records": [{ "region": "austin" }] })))
        .await
        .unwrap();
    store
        .upsert("reports", dataset(json!({ "records": [{ "region": "austin" }] })))
        .await
        .unwrap();

    let all = store.get("reports", &Query::All, 10).await.unwrap().records;
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|doc| doc["id"].is_string()));
}

#[tokio::test]
async fn empty_records_still_update_meta() {
    let store = memory_store(1000);
    let result = store
        .upsert(
            "austin_rentals_zillow",
            dataset(json!({ "records": [], "meta": { "url": "https://example.com" } })),
        )
        .await
        .unwrap();
    assert_eq!(result.batches, 0);
    assert_eq!(result.written, 0);

    store
        .upsert(
            "austin_rentals_zillow",
            dataset(json!({ "records": [], "meta": { "lastRan": "2024-05-01T07:00:00Z" } })),
        )
        .await
        .unwrap();

    let stored = store.metadata("austin_rentals_zillow").await;
    assert_eq!(stored["url"], json!("https://example.com"));
    assert_eq!(stored["lastRan"], json!("2024-05-01T07:00:00Z"));
}

#[tokio::test]
async fn invalid_dataset_writes_nothing() {
    let store = memory_store(1000);
    let bad = dataset(json!({ "records": [{ "id": "ok" }, { "id": { "nested": 1 } }] }));
    let err = store.upsert("rentals", bad).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidDataset(_)));
    assert!(store.list_indices().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_index_reads() {
    let store = memory_store(1000);
    let err = store.get("nowhere", &Query::All, 10).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.metadata("nowhere").await, Metadata::new());
    assert!(!store.delete_index("nowhere").await.unwrap());
}

#[tokio::test]
async fn delete_removes_documents_and_meta() {
    let store = memory_store(1000);
    store
        .upsert(
            "rentals",
            dataset(json!({ "records": [{ "id": "a" }], "meta": { "region": "austin" } })),
        )
        .await
        .unwrap();
    assert!(store.delete_index("rentals").await.unwrap());
    assert!(!store.delete_index("rentals").await.unwrap());
    assert!(store.get("rentals", &Query::All, 10).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn update_metadata_creates_and_merges() {
    let store = memory_store(1000);
    store
        .update_metadata("austin", meta(json!({ "region": "austin" })))
        .await
        .unwrap();
    store
        .update_metadata("austin", meta(json!({ "lastRan": "2024-05-01T07:00:00Z" })))
        .await
        .unwrap();

    let indices = store.list_indices().await.unwrap();
    assert_eq!(
        indices["austin"],
        meta(json!({ "region": "austin", "lastRan": "2024-05-01T07:00:00Z" }))
    );
}

#[tokio::test]
async fn list_hides_internal_collections() {
    let store = memory_store(1000);
    store.create_index(".internal", None).await.unwrap();
    store.create_index("austin_rentals", None).await.unwrap();
    let names: Vec<String> = store.list_indices().await.unwrap().into_keys().collect();
    assert_eq!(names, vec!["austin_rentals".to_string()]);
}

#[tokio::test]
async fn structured_queries() {
    let store = memory_store(1000);
    store
        .upsert(
            "rentals",
            dataset(json!({ "records": [
                { "id": "a", "price": 900, "beds": 1 },
                { "id": "b", "price": 1500, "beds": 2 },
                { "id": "c", "price": 2100, "beds": 3 }
            ]})),
        )
        .await
        .unwrap();

    let mid = store
        .get(
            "rentals",
            &Query::Range {
                field: "price".into(),
                gte: Some(json!(1000)),
                lte: Some(json!(2000)),
            },
            10,
        )
        .await
        .unwrap()
        .records;
    assert_eq!(mid.len(), 1);
    assert_eq!(mid[0]["id"], json!("b"));

    let three = store.get("rentals", &Query::term("beds", 3), 10).await.unwrap().records;
    assert_eq!(three[0]["id"], json!("c"));

    let limited = store.get("rentals", &Query::All, 2).await.unwrap().records;
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn free_text_query_spans_indices() {
    let store = memory_store(1000);
    store
        .upsert(
            "austin_rentals",
            dataset(json!({ "records": [{ "id": "a", "address": "12 Congress Ave" }] })),
        )
        .await
        .unwrap();
    store
        .upsert(
            "austin_properties",
            dataset(json!({ "records": [
                { "id": "b", "address": "40 congress ave" },
                { "id": "c", "address": "9 Lamar Blvd" }
            ]})),
        )
        .await
        .unwrap();

    let hits = store
        .query(&["austin_rentals", "missing", "austin_properties"], "CONGRESS", 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["_index"], json!("austin_rentals"));
    assert_eq!(hits[1]["_index"], json!("austin_properties"));
}

#[tokio::test]
async fn rejected_documents_are_reported_per_batch() {
    let store = flaky_store(2, None);
    let records: Vec<Value> = (0..5)
        .map(|i| json!({ "id": format!("r{i}"), "price": 1000 + i, "reject": i == 2 }))
        .collect();
    let result = store
        .upsert("rentals", dataset(json!({ "records": records })))
        .await
        .unwrap();

    assert_eq!(result.batches, 3);
    assert_eq!(result.written, 4);
    assert_eq!(result.failures.len(), 1);
    let failure = &result.failures[0];
    assert_eq!(failure.batch, 1);
    assert_eq!(failure.failed, 1);
    assert_eq!(failure.errors[0].id.as_deref(), Some("r2"));
    assert_eq!(failure.errors[0].status, Some(400));

    // Batches after the failing one still land.
    let last = store.get("rentals", &Query::term("id", "r4"), 10).await.unwrap();
    assert_eq!(last.records.len(), 1);
    let missing = store.get("rentals", &Query::term("id", "r2"), 10).await.unwrap();
    assert!(missing.records.is_empty());

    match result.into_result("rentals").unwrap_err() {
        StoreError::PartialBatchFailure { index, failed, batches } => {
            assert_eq!(index, "rentals");
            assert_eq!((failed, batches), (1, 1));
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_bulk_request_counts_the_whole_batch() {
    let store = flaky_store(2, None);
    let records: Vec<Value> = (0..4)
        .map(|i| json!({ "id": format!("r{i}"), "explode": i == 0 }))
        .collect();
    let result = store
        .upsert("rentals", dataset(json!({ "records": records })))
        .await
        .unwrap();

    assert_eq!(result.written, 2);
    assert_eq!(result.failed_count(), 2);
    assert_eq!(result.failures[0].batch, 0);
    assert_eq!(result.failures[0].errors.len(), 1);
    assert_eq!(result.failures[0].errors[0].id, None);
    let rest = store.get("rentals", &Query::All, 10).await.unwrap().records;
    assert_eq!(rest.len(), 2);
}
