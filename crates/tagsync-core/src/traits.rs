//! Core traits for tagsync abstractions.
//!
//! These traits define the services the reconciliation engine consumes:
//! a document store, schema introspection, and caller-supplied creation
//! hooks. Concrete stores live in `tagsync-store`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::events::StoreEvent;
use crate::models::Document;

// =============================================================================
// QUERIES
// =============================================================================

/// Read-only projection query against the document collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentQuery {
    /// Every document whose `_id` is in the set.
    ByIds(Vec<String>),
    /// The document with this `_id`, if any.
    ById(String),
    /// Every document of a type.
    OfType {
        doc_type: String,
        /// Only documents where this dotted path is defined (non-null).
        defined: Option<String>,
        /// Project to `_id`, `_type`, and these top-level fields.
        fields: Option<Vec<String>>,
    },
}

impl DocumentQuery {
    pub fn of_type(doc_type: impl Into<String>) -> Self {
        DocumentQuery::OfType {
            doc_type: doc_type.into(),
            defined: None,
            fields: None,
        }
    }

    /// Restrict an `OfType` query to documents where `path` is defined.
    pub fn where_defined(self, path: impl Into<String>) -> Self {
        match self {
            DocumentQuery::OfType {
                doc_type, fields, ..
            } => DocumentQuery::OfType {
                doc_type,
                defined: Some(path.into()),
                fields,
            },
            other => other,
        }
    }

    /// Project an `OfType` query to the given top-level fields.
    pub fn project<I, S>(self, projected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self {
            DocumentQuery::OfType {
                doc_type, defined, ..
            } => DocumentQuery::OfType {
                doc_type,
                defined,
                fields: Some(projected.into_iter().map(Into::into).collect()),
            },
            other => other,
        }
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Set and/or unset operations against one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Patch {
    /// Dotted path → new value.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub set: Map<String, Value>,
    /// Dotted paths to remove.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,
}

impl Patch {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        let mut set = Map::new();
        set.insert(path.into(), value);
        Self {
            set,
            unset: Vec::new(),
        }
    }

    pub fn unset(path: impl Into<String>) -> Self {
        Self {
            set: Map::new(),
            unset: vec![path.into()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }
}

/// A queued patch for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOperation {
    pub id: String,
    #[serde(flatten)]
    pub patch: Patch,
}

/// Chainable batch of patches applied atomically by [`DocumentStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    operations: Vec<PatchOperation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a patch. Patches are additive; nothing is sent until commit.
    pub fn patch(mut self, id: impl Into<String>, patch: Patch) -> Self {
        self.operations.push(PatchOperation {
            id: id.into(),
            patch,
        });
        self
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<PatchOperation> {
        self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Client for the multi-document content store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run a read-only query.
    async fn fetch(&self, query: DocumentQuery) -> Result<Vec<Document>>;

    /// Atomically create one document, returning its stored form.
    async fn create(&self, document: Document) -> Result<Document>;

    /// Apply every patch of the transaction, all or nothing.
    async fn commit(&self, transaction: Transaction) -> Result<()>;

    /// Change stream, when the store offers one.
    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        None
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// Introspection over declared document types.
pub trait SchemaRegistry: Send + Sync {
    /// Declared type name of a top-level field, if the type declares it.
    fn field_type(&self, doc_type: &str, field: &str) -> Option<String>;

    /// Whether the field is declared as a slug.
    fn is_slug_field(&self, doc_type: &str, field: &str) -> bool {
        self.field_type(doc_type, field).as_deref() == Some(crate::defaults::SLUG_FIELD_TYPE)
    }
}

// =============================================================================
// HOOKS
// =============================================================================

/// Caller-supplied extension point that turns free text into a field map.
///
/// `target_type` is the canonical document type when creating a reference
/// document, and `None` when creating a plain object tag.
#[async_trait]
pub trait CreationHook: Send + Sync {
    async fn propose(&self, input: &str, target_type: Option<&str>) -> Result<Document>;
}
