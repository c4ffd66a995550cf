//! HttpStore against a mock query/mutate API.

use serde_json::json;
use tagsync_core::{document_id, Document, DocumentQuery, DocumentStore, Error, Patch, Transaction};
use tagsync_store::{HttpStore, HttpStoreConfig};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> HttpStore {
    let config = HttpStoreConfig::new(server.uri()).with_token("secret");
    HttpStore::new(config).expect("Failed to create store")
}

#[tokio::test]
async fn test_fetch_by_ids_sends_query_and_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2021-10-21/data/query/production"))
        .and(header("Authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "query": "*[_id in $ids]",
            "params": {"ids": ["c1", "c2"]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"_id": "c1", "_type": "category"}, 42]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let docs = store
        .fetch(DocumentQuery::ByIds(vec!["c1".into(), "c2".into()]))
        .await
        .unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(document_id(&docs[0]), Some("c1"));
}

#[tokio::test]
async fn test_fetch_single_and_null_results() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2021-10-21/data/query/production"))
        .and(body_partial_json(json!({"params": {"id": "c1"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"_id": "c1", "_type": "category"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2021-10-21/data/query/production"))
        .and(body_partial_json(json!({"params": {"id": "gone"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": null})))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_eq!(
        store.fetch(DocumentQuery::ById("c1".into())).await.unwrap().len(),
        1
    );
    assert!(store
        .fetch(DocumentQuery::ById("gone".into()))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_commit_sends_patch_mutations_and_emits_events() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2021-10-21/data/mutate/production"))
        .and(query_param("returnDocuments", "true"))
        .and(body_partial_json(json!({
            "mutations": [
                {"patch": {"id": "p1", "set": {"tags": []}}},
                {"patch": {"id": "p2", "unset": ["tags"]}}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": "p1", "document": {"_id": "p1", "_type": "post"}},
                {"id": "p2", "document": {"_id": "p2", "_type": "post"}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let mut events = store.subscribe().unwrap();

    let tx = Transaction::new()
        .patch("p1", Patch::set("tags", json!([])))
        .patch("p2", Patch::unset("tags"));
    store.commit(tx).await.unwrap();

    let first = events.recv().await.unwrap();
    assert_eq!(first.event_type(), "document.patched");
    assert_eq!(first.document_id(), "p1");
    assert_eq!(first.document_type(), Some("post"));
}

#[tokio::test]
async fn test_empty_commit_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = store_for(&server);
    store.commit(Transaction::new()).await.unwrap();
}

#[tokio::test]
async fn test_create_returns_stored_document() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2021-10-21/data/mutate/production"))
        .and(body_partial_json(json!({
            "mutations": [{"create": {"_id": "new-1", "_type": "category"}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "id": "new-1",
                "document": {"_id": "new-1", "_type": "category", "_rev": "r1"}
            }]
        })))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let mut doc = Document::new();
    doc.insert("_id".into(), json!("new-1"));
    doc.insert("_type".into(), json!("category"));

    let stored = store.create(doc).await.unwrap();
    assert_eq!(stored["_rev"], json!("r1"));
}

#[tokio::test]
async fn test_error_status_maps_to_store_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store
        .fetch(DocumentQuery::of_type("post"))
        .await
        .unwrap_err();
    match err {
        Error::Store(message) => assert!(message.contains("boom")),
        other => panic!("expected store error, got {other:?}"),
    }
}
