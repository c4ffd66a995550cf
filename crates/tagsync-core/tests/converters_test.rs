//! Converter and creation tests against a small fixture store.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tagsync_core::{
    create_reference_document, prepare_tags, prepare_tags_as_list, prepare_value_as_list,
    revert_tags, CreationHook, Document, DocumentQuery, DocumentStore, Error, PathsHook, RawTag,
    Result, SchemaRegistry, TagPaths, Tags, Transaction,
};

#[derive(Default)]
struct FixtureStore {
    docs: Mutex<Vec<Document>>,
    fail_create: bool,
    queries: Mutex<Vec<DocumentQuery>>,
}

impl FixtureStore {
    fn with_docs(docs: Vec<Value>) -> Self {
        let docs = docs
            .into_iter()
            .filter_map(|d| match d {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        Self {
            docs: Mutex::new(docs),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DocumentStore for FixtureStore {
    async fn fetch(&self, query: DocumentQuery) -> Result<Vec<Document>> {
        self.queries.lock().unwrap().push(query.clone());
        let docs = self.docs.lock().unwrap();
        let id_of = |d: &Document| d.get("_id").and_then(Value::as_str).map(String::from);
        Ok(match query {
            DocumentQuery::ByIds(ids) => docs
                .iter()
                .filter(|d| id_of(d).is_some_and(|id| ids.contains(&id)))
                .cloned()
                .collect(),
            DocumentQuery::ById(id) => docs
                .iter()
                .filter(|d| id_of(d).as_deref() == Some(id.as_str()))
                .take(1)
                .cloned()
                .collect(),
            DocumentQuery::OfType { doc_type, .. } => docs
                .iter()
                .filter(|d| d.get("_type") == Some(&json!(doc_type)))
                .cloned()
                .collect(),
        })
    }

    async fn create(&self, document: Document) -> Result<Document> {
        if self.fail_create {
            return Err(Error::Store("create rejected".to_string()));
        }
        self.docs.lock().unwrap().push(document.clone());
        Ok(document)
    }

    async fn commit(&self, _transaction: Transaction) -> Result<()> {
        Ok(())
    }
}

struct SlugSchema;

impl SchemaRegistry for SlugSchema {
    fn field_type(&self, doc_type: &str, field: &str) -> Option<String> {
        match (doc_type, field) {
            ("category", "slug") => Some("slug".to_string()),
            ("category", "title") => Some("string".to_string()),
            _ => None,
        }
    }
}

struct FailingHook;

#[async_trait]
impl CreationHook for FailingHook {
    async fn propose(&self, _input: &str, _target_type: Option<&str>) -> Result<Document> {
        Err(Error::InvalidInput("rejected".to_string()))
    }
}

fn categories() -> FixtureStore {
    FixtureStore::with_docs(vec![
        json!({"_id": "c1", "_type": "category", "title": "Rust", "slug": {"current": "rust"}}),
        json!({"_id": "c2", "_type": "category", "title": "Go", "slug": {"current": "go"}}),
    ])
}

#[tokio::test]
async fn test_prepare_references_batched_in_order() {
    let store = categories();
    let paths = TagPaths::new("title", "slug");
    let raw = Tags::Many(vec![
        RawTag::reference("c2"),
        RawTag::reference("gone"),
        RawTag::reference("c1"),
    ]);

    let refined = prepare_tags_as_list(&store, Some(raw), &paths).await.unwrap();

    assert_eq!(refined.len(), 2);
    assert_eq!(refined[0].id.as_deref(), Some("c2"));
    assert_eq!(refined[0].value, Some(json!("go")));
    assert_eq!(refined[1].key, "rust");
    // one batched lookup
    assert_eq!(store.queries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_prepare_repeated_references_once() {
    let store = categories();
    let raw = Tags::Many(vec![
        RawTag::reference("c1"),
        RawTag::reference("c2"),
        RawTag::reference("c1"),
    ]);

    let refined = prepare_tags_as_list(&store, Some(raw), &TagPaths::new("title", "slug"))
        .await
        .unwrap();

    let keys: Vec<&str> = refined.iter().map(|tag| tag.key.as_str()).collect();
    assert_eq!(keys, vec!["rust", "go"]);
}

#[tokio::test]
async fn test_prepare_single_missing_reference_is_absent() {
    let store = categories();
    let result = prepare_tags(
        &store,
        Some(Tags::One(RawTag::reference("gone"))),
        &TagPaths::default(),
    )
    .await
    .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_prepare_absent_and_empty() {
    let store = categories();
    let paths = TagPaths::default();
    assert!(prepare_tags(&store, None, &paths).await.unwrap().is_none());
    assert_eq!(
        prepare_tags(&store, Some(Tags::Many(vec![])), &paths)
            .await
            .unwrap(),
        Some(Tags::Many(vec![]))
    );
    assert!(store.queries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_prepare_value_then_revert_round_trip() {
    let store = categories();
    let paths = TagPaths::new("name", "code");
    let stored = json!([
        {"name": "Rust", "code": "rs", "color": "orange"},
        {"name": "Go", "code": 7}
    ]);

    let refined = prepare_value_as_list(&store, Some(stored.clone()), &paths)
        .await
        .unwrap();
    assert_eq!(refined[1].key, "7");

    let reverted = revert_tags(Some(Tags::Many(refined)), &paths, true, false)
        .unwrap()
        .into_value();
    for (back, original) in reverted.as_array().unwrap().iter().zip(stored.as_array().unwrap()) {
        for field in ["name", "code", "color"] {
            assert_eq!(back.get(field), original.get(field));
        }
    }
}

#[tokio::test]
async fn test_create_reference_document_slugifies() {
    let store = FixtureStore::default();
    let paths = TagPaths::new("title", "slug");
    let hook = PathsHook::new(paths.clone());

    let projection =
        create_reference_document(&store, &SlugSchema, &hook, "Hello World!", "category", &paths)
            .await
            .unwrap();

    assert_eq!(projection["_type"], json!("category"));
    assert_eq!(projection["title"], json!("Hello World!"));
    assert_eq!(projection["slug"], json!({"current": "hello-world-"}));

    let docs = store.docs.lock().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["_id"], projection["_id"]);
    assert_eq!(docs[0]["slug"], json!({"current": "hello-world-"}));
}

#[tokio::test]
async fn test_create_reference_document_plain_value() {
    let store = FixtureStore::default();
    let paths = TagPaths::new("title", "title");
    let hook = PathsHook::new(paths.clone());

    let projection =
        create_reference_document(&store, &SlugSchema, &hook, "Hello World!", "category", &paths)
            .await
            .unwrap();
    assert_eq!(projection["title"], json!("Hello World!"));
}

struct FixedIdHook;

#[async_trait]
impl CreationHook for FixedIdHook {
    async fn propose(&self, input: &str, _target_type: Option<&str>) -> Result<Document> {
        match json!({"_id": "category-fixed", "label": input, "value": "fixed"}) {
            Value::Object(map) => Ok(map),
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn test_create_reference_document_keeps_hook_id() {
    let store = FixtureStore::default();
    let paths = TagPaths::default();

    let projection =
        create_reference_document(&store, &SlugSchema, &FixedIdHook, "Fixed", "category", &paths)
            .await
            .unwrap();

    assert_eq!(projection["_id"], json!("category-fixed"));
    assert_eq!(projection["_type"], json!("category"));
    assert_eq!(store.docs.lock().unwrap()[0]["_id"], json!("category-fixed"));
}

#[tokio::test]
async fn test_create_reference_document_failures() {
    let paths = TagPaths::default();

    let store = FixtureStore::default();
    let err = create_reference_document(&store, &SlugSchema, &FailingHook, "x", "category", &paths)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Creation(_)));
    assert!(store.docs.lock().unwrap().is_empty());

    let store = FixtureStore {
        fail_create: true,
        ..FixtureStore::default()
    };
    let hook = PathsHook::new(paths.clone());
    let err = create_reference_document(&store, &SlugSchema, &hook, "x", "category", &paths)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Creation(_)));
}
