//! Canonical document creation from free text.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::logging::{component, subsystem};
use crate::models::{document_id, Document, RefinedTag, TagPaths};
use crate::path::{get_in, set_path, top_level};
use crate::traits::{CreationHook, DocumentStore, SchemaRegistry};

static SLUG_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("slug separator pattern is valid"));

/// Lowercase and collapse every run of non-word characters into one `-`.
///
/// `"Hello World!"` → `"hello-world-"`, `"a  --  b"` → `"a-b"`.
pub fn slugify(input: &str) -> String {
    SLUG_SEPARATOR
        .replace_all(&input.to_lowercase(), "-")
        .into_owned()
}

/// Slugify the proposed value in place when the schema declares the value
/// field as a slug. A top-level value path is wrapped as `{current}`; a
/// nested path (e.g. `slug.current`) already points inside the slug.
fn apply_slug(fields: &mut Document, paths: &TagPaths) {
    let raw = match get_in(fields, &paths.value) {
        Some(Value::String(raw)) if !raw.is_empty() => raw.clone(),
        _ => return,
    };
    let slug = slugify(&raw);
    let replacement = if top_level(&paths.value) == paths.value {
        json!({ "current": slug })
    } else {
        Value::String(slug)
    };
    set_path(fields, &paths.value, replacement);
}

/// Create a canonical document of `target_type` from free text.
///
/// Returns the projection `{_id, _type, <label path>, <value path>}` of the
/// stored document so callers can build a tag without reading it back.
/// Failures are logged and returned; nothing is retried or cached.
#[instrument(
    skip(store, schema, hook, paths),
    fields(subsystem = subsystem::CORE, component = component::CREATION)
)]
pub async fn create_reference_document(
    store: &dyn DocumentStore,
    schema: &dyn SchemaRegistry,
    hook: &dyn CreationHook,
    input: &str,
    target_type: &str,
    paths: &TagPaths,
) -> Result<Document> {
    let mut fields = hook.propose(input, Some(target_type)).await.map_err(|e| {
        error!(
            subsystem = subsystem::CORE,
            component = component::CREATION,
            reference_type = target_type,
            error = %e,
            "Creation hook failed"
        );
        Error::Creation(format!("creation hook failed: {e}"))
    })?;

    if schema.is_slug_field(target_type, top_level(&paths.value)) {
        apply_slug(&mut fields, paths);
    }

    let mut document = Document::new();
    document.insert("_id".to_string(), Value::String(Uuid::new_v4().to_string()));
    document.insert("_type".to_string(), Value::String(target_type.to_string()));
    document.extend(fields);
    // the hook may supply its own _id
    let id = document_id(&document).unwrap_or_default().to_string();

    let stored = store.create(document).await.map_err(|e| {
        error!(
            subsystem = subsystem::CORE,
            component = component::CREATION,
            reference_type = target_type,
            document_id = %id,
            error = %e,
            "Failed to create reference document"
        );
        Error::Creation(format!("failed to create {target_type} document: {e}"))
    })?;

    let mut projection = Document::new();
    for system in ["_id", "_type"] {
        if let Some(value) = stored.get(system) {
            projection.insert(system.to_string(), value.clone());
        }
    }
    if let Some(label) = get_in(&stored, &paths.label) {
        set_path(&mut projection, &paths.label, label.clone());
    }
    if let Some(value) = get_in(&stored, &paths.value) {
        set_path(&mut projection, &paths.value, value.clone());
    }

    debug!(
        subsystem = subsystem::CORE,
        component = component::CREATION,
        reference_type = target_type,
        document_id = document_id(&stored).unwrap_or_default(),
        "Created reference document"
    );
    Ok(projection)
}

/// Default creation hook: the input text at both the label and value paths.
#[derive(Debug, Clone, Default)]
pub struct PathsHook {
    paths: TagPaths,
}

impl PathsHook {
    pub fn new(paths: TagPaths) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl CreationHook for PathsHook {
    async fn propose(&self, input: &str, _target_type: Option<&str>) -> Result<Document> {
        let mut fields = Document::new();
        set_path(&mut fields, &self.paths.label, Value::String(input.to_string()));
        set_path(&mut fields, &self.paths.value, Value::String(input.to_string()));
        Ok(fields)
    }
}

/// Default validity predicate for a new free-text tag.
pub fn default_check_valid(input: &str, existing: &[RefinedTag]) -> bool {
    !input.is_empty()
        && input.trim() == input
        && !existing
            .iter()
            .any(|tag| tag.value_text().as_deref() == Some(input))
}
