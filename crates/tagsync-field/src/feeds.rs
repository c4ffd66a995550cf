//! Push-based tag feeds.
//!
//! Each feed runs as its own tokio task and reports to the owning field
//! over an mpsc channel. Selected and predefined feeds load once; reference
//! and related feeds reload whenever the store reports a change to the type
//! they read, and the reference feed also reloads on an explicit
//! [`FeedHandle::refresh`].
//!
//! Dropping a [`FeedHandle`] aborts its task.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tagsync_core::logging::{component, subsystem};
use tagsync_core::path::{get_in, top_level};
use tagsync_core::{
    document_to_tag, prepare_tags_as_list, prepare_value_as_list, DocumentQuery, DocumentStore,
    RawTag, RefinedTag, Result, StoreEvent, TagPaths, Tags,
};

/// Which option group a feed fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Selected,
    Predefined,
    Reference,
    Related,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Selected => "selected",
            FeedKind::Predefined => "predefined",
            FeedKind::Reference => "reference",
            FeedKind::Related => "related",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a feed reads.
#[derive(Debug, Clone)]
pub enum FeedSource {
    /// The field's stored value at mount.
    Selected(Option<Value>),
    /// Raw tags from the field configuration.
    Predefined(Vec<Value>),
    /// Every document of the canonical type.
    Reference { reference_type: String },
    /// The same field on every document of the host type.
    Related { document_type: String, field: String },
}

impl FeedSource {
    pub fn kind(&self) -> FeedKind {
        match self {
            FeedSource::Selected(_) => FeedKind::Selected,
            FeedSource::Predefined(_) => FeedKind::Predefined,
            FeedSource::Reference { .. } => FeedKind::Reference,
            FeedSource::Related { .. } => FeedKind::Related,
        }
    }

    /// Document type whose changes trigger a reload; `None` for one-shot feeds.
    pub fn watched_type(&self) -> Option<&str> {
        match self {
            FeedSource::Selected(_) | FeedSource::Predefined(_) => None,
            FeedSource::Reference { reference_type } => Some(reference_type),
            FeedSource::Related { document_type, .. } => Some(document_type),
        }
    }

    /// Load the feed's tags once.
    pub async fn load(&self, store: &dyn DocumentStore, paths: &TagPaths) -> Result<Vec<RefinedTag>> {
        match self {
            FeedSource::Selected(value) => prepare_value_as_list(store, value.clone(), paths).await,
            FeedSource::Predefined(raw) => {
                let tags = raw.iter().cloned().filter_map(RawTag::from_value).collect();
                prepare_tags_as_list(store, Some(Tags::Many(tags)), paths).await
            }
            FeedSource::Reference { reference_type } => {
                let docs = store.fetch(DocumentQuery::of_type(reference_type)).await?;
                Ok(docs.iter().map(|doc| document_to_tag(doc, paths)).collect())
            }
            FeedSource::Related {
                document_type,
                field,
            } => {
                let query = DocumentQuery::of_type(document_type)
                    .where_defined(field)
                    .project([top_level(field)]);
                let docs = store.fetch(query).await?;

                let mut seen = HashSet::new();
                let mut tags = Vec::new();
                for doc in docs {
                    let value = get_in(&doc, field).cloned();
                    for tag in prepare_value_as_list(store, value, paths).await? {
                        if seen.insert(tag.key.clone()) {
                            tags.push(tag);
                        }
                    }
                }
                Ok(tags)
            }
        }
    }
}

/// Message from a feed task to its field.
#[derive(Debug, Clone)]
pub enum FeedUpdate {
    Loaded { kind: FeedKind, tags: Vec<RefinedTag> },
    /// The feed stopped; it contributes no tags until the field remounts.
    Failed { kind: FeedKind, error: String },
}

impl FeedUpdate {
    pub fn kind(&self) -> FeedKind {
        match self {
            FeedUpdate::Loaded { kind, .. } | FeedUpdate::Failed { kind, .. } => *kind,
        }
    }
}

/// Owner of one running feed task.
#[derive(Debug)]
pub struct FeedHandle {
    kind: FeedKind,
    refresh_tx: Option<mpsc::Sender<()>>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    /// Ask a live feed to reload now.
    ///
    /// Returns false for one-shot feeds and for feeds that have stopped.
    pub fn refresh(&self) -> bool {
        let Some(refresh_tx) = &self.refresh_tx else {
            return false;
        };
        match refresh_tx.try_send(()) {
            // a full buffer already holds a pending reload
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the feed.
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a feed task reporting to `tx`.
pub fn spawn_feed(
    source: FeedSource,
    store: Arc<dyn DocumentStore>,
    paths: TagPaths,
    tx: mpsc::Sender<FeedUpdate>,
) -> FeedHandle {
    let kind = source.kind();
    let (refresh_tx, refresh_rx) = match source.watched_type() {
        Some(_) => {
            let (refresh_tx, refresh_rx) = mpsc::channel(1);
            (Some(refresh_tx), Some(refresh_rx))
        }
        None => (None, None),
    };

    let task = tokio::spawn(run_feed(source, store, paths, tx, refresh_rx));
    FeedHandle {
        kind,
        refresh_tx,
        task,
    }
}

async fn run_feed(
    source: FeedSource,
    store: Arc<dyn DocumentStore>,
    paths: TagPaths,
    tx: mpsc::Sender<FeedUpdate>,
    mut refresh_rx: Option<mpsc::Receiver<()>>,
) {
    let kind = source.kind();
    // subscribe before the first load so no change slips between the two
    let mut events = source.watched_type().and_then(|_| store.subscribe());

    loop {
        let update = match source.load(store.as_ref(), &paths).await {
            Ok(tags) => {
                debug!(
                    subsystem = subsystem::FIELD,
                    component = component::FEED,
                    feed = %kind,
                    tag_count = tags.len(),
                    "Feed loaded"
                );
                FeedUpdate::Loaded { kind, tags }
            }
            Err(e) => {
                warn!(
                    subsystem = subsystem::FIELD,
                    component = component::FEED,
                    feed = %kind,
                    error = %e,
                    "Feed failed to load, stopping"
                );
                FeedUpdate::Failed {
                    kind,
                    error: e.to_string(),
                }
            }
        };

        let failed = matches!(update, FeedUpdate::Failed { .. });
        if tx.send(update).await.is_err() || failed {
            return;
        }

        let (Some(watched), Some(refresh_rx)) = (source.watched_type(), refresh_rx.as_mut()) else {
            return;
        };
        if !wait_for_change(kind, watched, &mut events, refresh_rx).await {
            return;
        }
    }
}

/// Block until the feed should reload. False when the field went away.
async fn wait_for_change(
    kind: FeedKind,
    watched: &str,
    events: &mut Option<broadcast::Receiver<StoreEvent>>,
    refresh_rx: &mut mpsc::Receiver<()>,
) -> bool {
    loop {
        tokio::select! {
            command = refresh_rx.recv() => return command.is_some(),
            event = next_event(events) => match event {
                Ok(event) if event.concerns(watched) => {
                    debug!(
                        subsystem = subsystem::FIELD,
                        component = component::FEED,
                        feed = %kind,
                        event_type = event.event_type(),
                        document_id = event.document_id(),
                        "Store change, reloading feed"
                    );
                    return true;
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        subsystem = subsystem::FIELD,
                        component = component::FEED,
                        feed = %kind,
                        skipped,
                        "Store events lagged, reloading feed"
                    );
                    return true;
                }
                Err(broadcast::error::RecvError::Closed) => *events = None,
            },
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<StoreEvent>>,
) -> std::result::Result<StoreEvent, broadcast::error::RecvError> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tagsync_store::{MemoryStore, StoreOperation};

    fn store() -> MemoryStore {
        MemoryStore::new().with_documents([
            json!({"_id": "c1", "_type": "category", "label": "Rust", "value": "rust"}),
            json!({"_id": "c2", "_type": "category", "label": "Go", "value": "go"}),
            json!({"_id": "p1", "_type": "post", "tags": [{"label": "A", "value": "a"}, {"label": "B", "value": "b"}]}),
            json!({"_id": "p2", "_type": "post", "tags": [{"label": "A again", "value": "a"}]}),
        ])
    }

    async fn next(rx: &mut mpsc::Receiver<FeedUpdate>) -> FeedUpdate {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("feed did not report in time")
            .expect("feed channel closed")
    }

    fn labels(update: &FeedUpdate) -> Vec<String> {
        match update {
            FeedUpdate::Loaded { tags, .. } => tags.iter().map(RefinedTag::label_text).collect(),
            FeedUpdate::Failed { error, .. } => panic!("feed failed: {error}"),
        }
    }

    #[tokio::test]
    async fn test_selected_feed_is_one_shot() {
        let store: Arc<dyn DocumentStore> = Arc::new(store());
        let (tx, mut rx) = mpsc::channel(8);
        let source = FeedSource::Selected(Some(json!([{"_ref": "c2", "_type": "reference"}])));
        let handle = spawn_feed(source, store, TagPaths::default(), tx);

        let update = next(&mut rx).await;
        assert_eq!(update.kind(), FeedKind::Selected);
        assert_eq!(labels(&update), vec!["Go"]);
        assert!(!handle.refresh());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_predefined_feed() {
        let store: Arc<dyn DocumentStore> = Arc::new(store());
        let (tx, mut rx) = mpsc::channel(8);
        let source = FeedSource::Predefined(vec![json!({"label": "X", "value": "x"}), json!(7)]);
        let _handle = spawn_feed(source, store, TagPaths::default(), tx);

        assert_eq!(labels(&next(&mut rx).await), vec!["X"]);
    }

    #[tokio::test]
    async fn test_related_feed_deduplicates_by_key() {
        let store: Arc<dyn DocumentStore> = Arc::new(store());
        let (tx, mut rx) = mpsc::channel(8);
        let source = FeedSource::Related {
            document_type: "post".into(),
            field: "tags".into(),
        };
        let _handle = spawn_feed(source, store, TagPaths::default(), tx);

        assert_eq!(labels(&next(&mut rx).await), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_reference_feed_reloads_on_refresh_and_changes() {
        let memory = store();
        let store: Arc<dyn DocumentStore> = Arc::new(memory.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let source = FeedSource::Reference {
            reference_type: "category".into(),
        };
        let handle = spawn_feed(source, store, TagPaths::default(), tx);

        assert_eq!(labels(&next(&mut rx).await), vec!["Rust", "Go"]);

        assert!(handle.refresh());
        assert_eq!(labels(&next(&mut rx).await).len(), 2);

        memory.delete("c1");
        assert_eq!(labels(&next(&mut rx).await), vec!["Go"]);
    }

    #[tokio::test]
    async fn test_reference_feed_ignores_other_types() {
        let memory = store();
        let store: Arc<dyn DocumentStore> = Arc::new(memory.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let source = FeedSource::Reference {
            reference_type: "category".into(),
        };
        let _handle = spawn_feed(source, store, TagPaths::default(), tx);
        next(&mut rx).await;

        memory.delete("p2");
        let quiet = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn test_failed_feed_stops() {
        let memory = store();
        memory.fail_on(StoreOperation::Fetch);
        let store: Arc<dyn DocumentStore> = Arc::new(memory);
        let (tx, mut rx) = mpsc::channel(8);
        let source = FeedSource::Reference {
            reference_type: "category".into(),
        };
        let handle = spawn_feed(source, store, TagPaths::default(), tx);

        assert!(matches!(
            next(&mut rx).await,
            FeedUpdate::Failed {
                kind: FeedKind::Reference,
                ..
            }
        ));
        assert!(rx.recv().await.is_none());
        assert!(!handle.refresh());
    }

    #[tokio::test]
    async fn test_dropping_handle_aborts_feed() {
        let store: Arc<dyn DocumentStore> = Arc::new(store());
        let (tx, mut rx) = mpsc::channel(8);
        let source = FeedSource::Reference {
            reference_type: "category".into(),
        };
        let handle = spawn_feed(source, store, TagPaths::default(), tx);
        next(&mut rx).await;

        drop(handle);
        assert!(rx.recv().await.is_none());
    }
}
