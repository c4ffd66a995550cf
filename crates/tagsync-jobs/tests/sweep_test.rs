//! Bulk sweep behaviour against the in-memory store.

use serde_json::{json, Value};
use tagsync_core::{DocumentStore, Error, TagPaths};
use tagsync_jobs::{sync_references, SweepOutcome, SweepRequest};
use tagsync_store::{MemoryStore, StoreOperation};

fn canonical() -> Vec<Value> {
    vec![
        json!({"_id": "c1", "_type": "category", "label": "Rust", "value": "rust"}),
        json!({"_id": "c2", "_type": "category", "label": "Go", "value": "go"}),
    ]
}

/// One post points at a deleted category, two carry stale labels.
fn object_posts() -> MemoryStore {
    MemoryStore::new().with_documents(canonical()).with_documents([
        json!({"_id": "p1", "_type": "post", "tag": {"_id": "gone", "label": "Deleted", "value": "deleted"}}),
        json!({"_id": "p2", "_type": "post", "tag": {"_id": "c1", "label": "Old Rust", "value": "rust"}}),
        json!({"_id": "p3", "_type": "post", "tag": {"_id": "c2", "label": "Old Go", "value": "go"}}),
    ])
}

#[tokio::test]
async fn test_object_field_sweep_patches_all_three() {
    let store = object_posts();
    let request = SweepRequest::new("post", "tag", "category");

    let outcome = sync_references(&store, &request).await.unwrap();

    assert_eq!(outcome, SweepOutcome { patched: 3, examined: 3 });
    assert!(!store.get("p1").unwrap().contains_key("tag"));
    assert_eq!(store.get("p2").unwrap()["tag"]["label"], json!("Rust"));
    assert_eq!(store.get("p3").unwrap()["tag"]["label"], json!("Go"));
    assert_eq!(store.call_count(StoreOperation::Commit), 1);
}

#[tokio::test]
async fn test_reference_field_sweep_patches_only_dangling() {
    let store = MemoryStore::new().with_documents(canonical()).with_documents([
        json!({"_id": "p1", "_type": "post", "tag": {"_ref": "gone", "_type": "reference"}}),
        json!({"_id": "p2", "_type": "post", "tag": {"_ref": "c1", "_type": "reference"}}),
        json!({"_id": "p3", "_type": "post", "tag": {"_ref": "c2", "_type": "reference"}}),
    ]);
    let request = SweepRequest::new("post", "tag", "category").with_reference_field(true);

    let outcome = sync_references(&store, &request).await.unwrap();

    assert_eq!(outcome, SweepOutcome { patched: 1, examined: 3 });
    assert!(!store.get("p1").unwrap().contains_key("tag"));
    assert_eq!(store.get("p2").unwrap()["tag"]["_ref"], json!("c1"));
}

#[tokio::test]
async fn test_array_field_sweep() {
    let store = MemoryStore::new().with_documents(canonical()).with_documents([
        json!({"_id": "p1", "_type": "post", "tags": [
            {"_id": "c1", "label": "Rust", "value": "rust"},
            {"_id": "gone", "label": "Deleted", "value": "deleted"}
        ]}),
        json!({"_id": "p2", "_type": "post", "tags": [
            {"_id": "c2", "label": "Go", "value": "go"}
        ]}),
    ]);
    let request = SweepRequest::new("post", "tags", "category");

    let outcome = sync_references(&store, &request).await.unwrap();

    assert_eq!(outcome, SweepOutcome { patched: 1, examined: 2 });
    assert_eq!(
        store.get("p1").unwrap()["tags"],
        json!([{"_id": "c1", "label": "Rust", "value": "rust"}])
    );
}

#[tokio::test]
async fn test_sweep_stays_within_host_type() {
    let store = object_posts().with_documents([json!({
        "_id": "a1",
        "_type": "article",
        "tag": {"_id": "gone", "label": "Deleted", "value": "deleted"}
    })]);
    let request = SweepRequest::new("post", "tag", "category");

    sync_references(&store, &request).await.unwrap();

    assert!(store.get("a1").unwrap().contains_key("tag"));
}

#[tokio::test]
async fn test_no_candidates_writes_nothing() {
    let store = MemoryStore::new().with_documents(canonical());
    let request = SweepRequest::new("post", "tags", "category");

    let outcome = sync_references(&store, &request).await.unwrap();

    assert_eq!(outcome, SweepOutcome::default());
    assert_eq!(store.call_count(StoreOperation::Commit), 0);
}

#[tokio::test]
async fn test_consistent_documents_write_nothing() {
    let store = MemoryStore::new().with_documents(canonical()).with_documents([json!({
        "_id": "p1",
        "_type": "post",
        "tags": [{"_id": "c1", "label": "Rust", "value": "rust"}]
    })]);
    let request = SweepRequest::new("post", "tags", "category");

    let outcome = sync_references(&store, &request).await.unwrap();

    assert_eq!(outcome, SweepOutcome { patched: 0, examined: 1 });
    assert_eq!(store.call_count(StoreOperation::Commit), 0);
}

#[tokio::test]
async fn test_custom_paths_and_slug_values() {
    let store = MemoryStore::new().with_documents([
        json!({"_id": "c1", "_type": "category", "title": "Rust Lang", "slug": {"current": "rust"}}),
        json!({"_id": "p1", "_type": "post", "tags": [
            {"_id": "c1", "title": "Rust", "slug": {"current": "rust"}}
        ]}),
    ]);
    let request = SweepRequest::new("post", "tags", "category")
        .with_paths(TagPaths::new("title", "slug.current"));

    let outcome = sync_references(&store, &request).await.unwrap();

    assert_eq!(outcome.patched, 1);
    assert_eq!(
        store.get("p1").unwrap()["tags"][0]["title"],
        json!("Rust Lang")
    );
}

#[tokio::test]
async fn test_commit_failure_propagates() {
    let store = object_posts();
    store.fail_on(StoreOperation::Commit);
    let request = SweepRequest::new("post", "tag", "category");

    let err = sync_references(&store, &request).await.unwrap_err();

    assert!(matches!(err, Error::Store(_)));
    // nothing half-applied
    assert_eq!(store.get("p2").unwrap()["tag"]["label"], json!("Old Rust"));
    assert!(store.subscribe().is_some());
}
