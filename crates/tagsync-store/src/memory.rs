//! In-process document store.
//!
//! Used by tests and by applications that embed tagsync without a remote
//! store. Every write publishes a [`StoreEvent`], every call is recorded,
//! and failures can be injected per operation.
//!
//! ```rust,ignore
//! let store = MemoryStore::new()
//!     .with_documents([json!({"_id": "c1", "_type": "category", "title": "Rust"})]);
//! store.fail_on(StoreOperation::Commit);
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use tagsync_core::logging::{component, subsystem};
use tagsync_core::path::{get_in, is_absent, set_path, unset_path};
use tagsync_core::{
    document_id, document_type, Document, DocumentQuery, DocumentStore, Error, EventBus, Result,
    StoreEvent, Transaction,
};

/// Store operation kinds, for the call log and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Fetch,
    Create,
    Commit,
}

/// One recorded store call.
#[derive(Debug, Clone)]
pub struct StoreCall {
    pub operation: StoreOperation,
    pub query: Option<DocumentQuery>,
    pub transaction: Option<Transaction>,
}

struct Inner {
    docs: RwLock<BTreeMap<String, Document>>,
    events: EventBus,
    calls: Mutex<Vec<StoreCall>>,
    failing: Mutex<HashSet<StoreOperation>>,
    latency: Mutex<Duration>,
}

/// In-memory [`DocumentStore`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                docs: RwLock::new(BTreeMap::new()),
                events: EventBus::default(),
                calls: Mutex::new(Vec::new()),
                failing: Mutex::new(HashSet::new()),
                latency: Mutex::new(Duration::ZERO),
            }),
        }
    }

    /// Seed documents. Non-objects and objects without a string `_id` are ignored.
    pub fn with_documents(self, docs: impl IntoIterator<Item = Value>) -> Self {
        for doc in docs {
            if let Value::Object(map) = doc {
                self.insert(map);
            }
        }
        self
    }

    /// Delay every store call by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        if let Ok(mut current) = self.inner.latency.lock() {
            *current = latency;
        }
        self
    }

    /// Insert or replace a document outside of any recorded call.
    pub fn insert(&self, doc: Document) {
        let Some(id) = document_id(&doc).map(String::from) else {
            return;
        };
        let doc_type = document_type(&doc).map(String::from);
        if let Ok(mut docs) = self.inner.docs.write() {
            docs.insert(id.clone(), doc);
        }
        self.inner.events.emit(StoreEvent::Created {
            document_id: id,
            document_type: doc_type,
        });
    }

    /// Delete a document, as an external editor would.
    pub fn delete(&self, id: &str) -> Option<Document> {
        let removed = self.inner.docs.write().ok()?.remove(id)?;
        self.inner.events.emit(StoreEvent::Deleted {
            document_id: id.to_string(),
            document_type: document_type(&removed).map(String::from),
        });
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.inner.docs.read().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.docs.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every subsequent call of `operation` fail until [`recover`](Self::recover).
    pub fn fail_on(&self, operation: StoreOperation) {
        if let Ok(mut failing) = self.inner.failing.lock() {
            failing.insert(operation);
        }
    }

    pub fn recover(&self, operation: StoreOperation) {
        if let Ok(mut failing) = self.inner.failing.lock() {
            failing.remove(&operation);
        }
    }

    /// Recorded calls, oldest first.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self, operation: StoreOperation) -> usize {
        self.inner
            .calls
            .lock()
            .map(|calls| calls.iter().filter(|c| c.operation == operation).count())
            .unwrap_or(0)
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.inner.calls.lock() {
            calls.clear();
        }
    }

    async fn enter(&self, call: StoreCall) -> Result<()> {
        let operation = call.operation;
        if let Ok(mut calls) = self.inner.calls.lock() {
            calls.push(call);
        }

        let latency = self
            .inner
            .latency
            .lock()
            .map(|latency| *latency)
            .unwrap_or(Duration::ZERO);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failing = self
            .inner
            .failing
            .lock()
            .map(|failing| failing.contains(&operation))
            .unwrap_or(false);
        if failing {
            return Err(Error::Store(format!("injected {operation:?} failure")));
        }
        Ok(())
    }

    fn poisoned() -> Error {
        Error::Internal("memory store lock poisoned".to_string())
    }
}

fn project(doc: &Document, fields: &[String]) -> Document {
    let mut projected = Document::new();
    for name in ["_id", "_type"].into_iter().chain(fields.iter().map(String::as_str)) {
        if let Some(value) = doc.get(name) {
            projected.insert(name.to_string(), value.clone());
        }
    }
    projected
}

fn evaluate(docs: &BTreeMap<String, Document>, query: &DocumentQuery) -> Vec<Document> {
    match query {
        DocumentQuery::ByIds(ids) => {
            let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
            docs.iter()
                .filter(|(id, _)| wanted.contains(id.as_str()))
                .map(|(_, doc)| doc.clone())
                .collect()
        }
        DocumentQuery::ById(id) => docs.get(id).cloned().into_iter().collect(),
        DocumentQuery::OfType {
            doc_type,
            defined,
            fields,
        } => docs
            .values()
            .filter(|doc| document_type(doc) == Some(doc_type.as_str()))
            .filter(|doc| {
                defined
                    .as_deref()
                    .map_or(true, |path| !is_absent(get_in(doc, path)))
            })
            .map(|doc| match fields {
                Some(fields) => project(doc, fields),
                None => doc.clone(),
            })
            .collect(),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch(&self, query: DocumentQuery) -> Result<Vec<Document>> {
        self.enter(StoreCall {
            operation: StoreOperation::Fetch,
            query: Some(query.clone()),
            transaction: None,
        })
        .await?;

        let docs = self.inner.docs.read().map_err(|_| Self::poisoned())?;
        let result = evaluate(&docs, &query);
        trace!(
            subsystem = subsystem::STORE,
            component = component::MEMORY_STORE,
            result_count = result.len(),
            "Fetched documents"
        );
        Ok(result)
    }

    async fn create(&self, mut document: Document) -> Result<Document> {
        self.enter(StoreCall {
            operation: StoreOperation::Create,
            query: None,
            transaction: None,
        })
        .await?;

        let id = match document_id(&document) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                document.insert("_id".to_string(), Value::String(id.clone()));
                id
            }
        };

        {
            let mut docs = self.inner.docs.write().map_err(|_| Self::poisoned())?;
            if docs.contains_key(&id) {
                return Err(Error::Store(format!("document {id} already exists")));
            }
            docs.insert(id.clone(), document.clone());
        }

        debug!(
            subsystem = subsystem::STORE,
            component = component::MEMORY_STORE,
            document_id = %id,
            "Created document"
        );
        self.inner.events.emit(StoreEvent::Created {
            document_id: id,
            document_type: document_type(&document).map(String::from),
        });
        Ok(document)
    }

    async fn commit(&self, transaction: Transaction) -> Result<()> {
        self.enter(StoreCall {
            operation: StoreOperation::Commit,
            query: None,
            transaction: Some(transaction.clone()),
        })
        .await?;

        let mut events = Vec::with_capacity(transaction.len());
        {
            let mut docs = self.inner.docs.write().map_err(|_| Self::poisoned())?;

            // apply to copies so a missing document leaves everything untouched
            let mut staged: BTreeMap<String, Document> = BTreeMap::new();
            for op in transaction.operations() {
                if !staged.contains_key(&op.id) {
                    let original = docs.get(&op.id).cloned().ok_or_else(|| {
                        Error::NotFound(format!("cannot patch missing document {}", op.id))
                    })?;
                    staged.insert(op.id.clone(), original);
                }
                let Some(doc) = staged.get_mut(&op.id) else {
                    continue;
                };
                for (path, value) in &op.patch.set {
                    set_path(doc, path, value.clone());
                }
                for path in &op.patch.unset {
                    unset_path(doc, path);
                }
            }

            for (id, doc) in staged {
                events.push(StoreEvent::Patched {
                    document_id: id.clone(),
                    document_type: document_type(&doc).map(String::from),
                });
                docs.insert(id, doc);
            }
        }

        debug!(
            subsystem = subsystem::STORE,
            component = component::MEMORY_STORE,
            patched = events.len(),
            "Committed transaction"
        );
        for event in events {
            self.inner.events.emit(event);
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        Some(self.inner.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tagsync_core::Patch;

    fn seeded() -> MemoryStore {
        MemoryStore::new().with_documents([
            json!({"_id": "c1", "_type": "category", "title": "Rust"}),
            json!({"_id": "p1", "_type": "post", "tags": [{"value": "rust"}]}),
            json!({"_id": "p2", "_type": "post", "tags": null}),
            json!({"_id": "p3", "_type": "post"}),
        ])
    }

    #[tokio::test]
    async fn test_fetch_by_ids_and_id() {
        let store = seeded();
        let docs = store
            .fetch(DocumentQuery::ByIds(vec!["c1".into(), "zz".into()]))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);

        let docs = store.fetch(DocumentQuery::ById("p1".into())).await.unwrap();
        assert_eq!(docs[0]["_type"], json!("post"));
    }

    #[tokio::test]
    async fn test_fetch_of_type_defined_and_projection() {
        let store = seeded();
        let docs = store
            .fetch(DocumentQuery::of_type("post").where_defined("tags").project(["tags"]))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(document_id(&docs[0]), Some("p1"));
        assert_eq!(docs[0].len(), 3);
    }

    #[tokio::test]
    async fn test_commit_applies_set_and_unset() {
        let store = seeded();
        let tx = Transaction::new()
            .patch("p1", Patch::set("tags", json!([])))
            .patch("c1", Patch::unset("title"));
        store.commit(tx).await.unwrap();

        assert_eq!(store.get("p1").unwrap()["tags"], json!([]));
        assert!(!store.get("c1").unwrap().contains_key("title"));
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = seeded();
        let tx = Transaction::new()
            .patch("p1", Patch::set("tags", json!([])))
            .patch("missing", Patch::unset("tags"));
        let err = store.commit(tx).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.get("p1").unwrap()["tags"], json!([{"value": "rust"}]));
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let mut doc = Document::new();
        doc.insert("_type".into(), json!("category"));
        let created = store.create(doc).await.unwrap();
        let id = document_id(&created).unwrap().to_string();
        assert!(store.get(&id).is_some());

        let err = store.create(created).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_events_on_writes() {
        let store = seeded();
        let mut rx = store.subscribe().unwrap();

        store
            .commit(Transaction::new().patch("p1", Patch::unset("tags")))
            .await
            .unwrap();
        store.delete("c1");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type(), "document.patched");
        assert_eq!(first.document_type(), Some("post"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type(), "document.deleted");
        assert_eq!(second.document_id(), "c1");
    }

    #[tokio::test]
    async fn test_failure_injection_and_call_log() {
        let store = seeded();
        store.fail_on(StoreOperation::Fetch);
        assert!(store.fetch(DocumentQuery::of_type("post")).await.is_err());

        store.recover(StoreOperation::Fetch);
        assert!(store.fetch(DocumentQuery::of_type("post")).await.is_ok());
        assert_eq!(store.call_count(StoreOperation::Fetch), 2);
        assert_eq!(store.call_count(StoreOperation::Commit), 0);
        assert_eq!(
            store.calls()[0].query,
            Some(DocumentQuery::of_type("post"))
        );
    }
}
