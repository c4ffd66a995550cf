//! Bulk reconciliation sweep.
//!
//! Scans every document of a host type that holds a tag field, compares the
//! embedded tags against the canonical documents of the reference type, and
//! repairs everything in one batched transaction.
//!
//! The read and the commit are not isolated: an edit made to a candidate
//! between the two can be overwritten by the computed patch.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, trace};

use tagsync_core::logging::{component, subsystem};
use tagsync_core::path::{coerce_to_string, get_in, set_path, top_level, unwrap_slug};
use tagsync_core::{
    document_id, Document, DocumentQuery, DocumentStore, Patch, Result, TagPaths, Transaction,
};

/// Identity of a sweep: two requests with the same key do the same work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SweepKey {
    pub document_type: String,
    pub field_path: String,
    pub reference_type: String,
    pub is_reference_field: bool,
    pub paths: TagPaths,
}

impl fmt::Display for SweepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}<-{}[{}/{}{}]",
            self.document_type,
            self.field_path,
            self.reference_type,
            self.paths.label,
            self.paths.value,
            if self.is_reference_field { ",ref" } else { "" }
        )
    }
}

/// Parameters of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRequest {
    /// Host document type holding the tag field.
    pub document_type: String,
    /// Dotted path of the tag field on host documents.
    pub field_path: String,
    /// Canonical document type the tags come from.
    pub reference_type: String,
    pub is_reference_field: bool,
    pub paths: TagPaths,
}

impl SweepRequest {
    pub fn new(
        document_type: impl Into<String>,
        field_path: impl Into<String>,
        reference_type: impl Into<String>,
    ) -> Self {
        Self {
            document_type: document_type.into(),
            field_path: field_path.into(),
            reference_type: reference_type.into(),
            is_reference_field: false,
            paths: TagPaths::default(),
        }
    }

    pub fn with_reference_field(mut self, is_reference_field: bool) -> Self {
        self.is_reference_field = is_reference_field;
        self
    }

    pub fn with_paths(mut self, paths: TagPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn key(&self) -> SweepKey {
        SweepKey {
            document_type: self.document_type.clone(),
            field_path: self.field_path.clone(),
            reference_type: self.reference_type.clone(),
            is_reference_field: self.is_reference_field,
            paths: self.paths.clone(),
        }
    }
}

/// Counts reported by a sweep; for observability, not correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub patched: usize,
    pub examined: usize,
}

#[derive(Debug)]
struct CanonicalCopy {
    label: Option<Value>,
    value: Option<String>,
}

/// The canonical documents of the reference type, indexed for validity
/// checks and drift repair.
#[derive(Debug, Default)]
struct CanonicalIndex {
    ids: HashSet<String>,
    values: HashSet<String>,
    by_id: HashMap<String, CanonicalCopy>,
}

impl CanonicalIndex {
    fn build(docs: &[Document], paths: &TagPaths) -> Self {
        let mut index = Self::default();
        for doc in docs {
            let Some(id) = document_id(doc) else {
                continue;
            };
            let label = get_in(doc, &paths.label)
                .filter(|v| !v.is_null())
                .cloned();
            let value = get_in(doc, &paths.value)
                .map(unwrap_slug)
                .and_then(coerce_to_string);

            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                index.values.insert(value.clone());
            }
            index.ids.insert(id.to_string());
            index
                .by_id
                .insert(id.to_string(), CanonicalCopy { label, value });
        }
        index
    }

    fn is_valid(&self, item: &Value, request: &SweepRequest) -> bool {
        let Value::Object(map) = item else {
            return false;
        };
        if request.is_reference_field {
            return map
                .get("_ref")
                .and_then(Value::as_str)
                .is_some_and(|id| self.ids.contains(id));
        }
        get_in(map, &request.paths.value)
            .and_then(coerce_to_string)
            .is_some_and(|value| self.values.contains(&value))
    }

    /// Bring an object tag's label/value in line with its canonical document.
    /// Returns whether anything changed.
    fn repair(&self, item: &mut Value, paths: &TagPaths) -> bool {
        let Value::Object(map) = item else {
            return false;
        };
        let Some(canonical) = map
            .get("_id")
            .and_then(Value::as_str)
            .and_then(|id| self.by_id.get(id))
        else {
            return false;
        };

        let mut changed = false;
        if let Some(label) = &canonical.label {
            if get_in(map, &paths.label) != Some(label) {
                set_path(map, &paths.label, label.clone());
                changed = true;
            }
        }
        if let Some(value) = &canonical.value {
            let current = get_in(map, &paths.value)
                .and_then(coerce_to_string)
                .unwrap_or_default();
            if &current != value {
                set_path(map, &paths.value, Value::String(value.clone()));
                changed = true;
            }
        }
        changed
    }
}

/// Patch needed for one candidate's field value, if any.
fn plan_patch(current: &Value, index: &CanonicalIndex, request: &SweepRequest) -> Option<Patch> {
    let field = &request.field_path;
    match current {
        Value::Array(items) => {
            let mut any_repaired = false;
            let kept: Vec<Value> = items
                .iter()
                .filter(|item| index.is_valid(item, request))
                .cloned()
                .map(|mut item| {
                    if !request.is_reference_field && index.repair(&mut item, &request.paths) {
                        any_repaired = true;
                    }
                    item
                })
                .collect();

            (kept.len() != items.len() || any_repaired)
                .then(|| Patch::set(field.clone(), Value::Array(kept)))
        }
        Value::Object(_) => {
            if !index.is_valid(current, request) {
                return Some(Patch::unset(field.clone()));
            }
            if request.is_reference_field {
                return None;
            }
            let mut next = current.clone();
            index
                .repair(&mut next, &request.paths)
                .then(|| Patch::set(field.clone(), next))
        }
        _ => None,
    }
}

/// Repair every host document whose tag field disagrees with the canonical set.
///
/// Commits at most one transaction; nothing is written when no document
/// needs a change.
#[instrument(
    skip(store, request),
    fields(
        subsystem = subsystem::JOBS,
        component = component::SWEEP,
        document_type = %request.document_type,
        field_path = %request.field_path,
        reference_type = %request.reference_type,
    )
)]
pub async fn sync_references(
    store: &dyn DocumentStore,
    request: &SweepRequest,
) -> Result<SweepOutcome> {
    let start = Instant::now();

    let canonical_docs = store
        .fetch(
            DocumentQuery::of_type(&request.reference_type).project([
                top_level(&request.paths.label).to_string(),
                top_level(&request.paths.value).to_string(),
            ]),
        )
        .await?;
    let index = CanonicalIndex::build(&canonical_docs, &request.paths);

    let field_top = top_level(&request.field_path).to_string();
    let candidates = store
        .fetch(
            DocumentQuery::of_type(&request.document_type)
                .where_defined(&request.field_path)
                .project([field_top]),
        )
        .await?;

    if candidates.is_empty() {
        debug!(
            canonical = index.ids.len(),
            "No candidate documents, nothing to sweep"
        );
        return Ok(SweepOutcome::default());
    }

    let mut outcome = SweepOutcome::default();
    let mut transaction = Transaction::new();
    for doc in &candidates {
        outcome.examined += 1;
        let (Some(id), Some(current)) = (document_id(doc), get_in(doc, &request.field_path))
        else {
            continue;
        };
        if let Some(patch) = plan_patch(current, &index, request) {
            trace!(document_id = %id, unset = !patch.unset.is_empty(), "Queued repair");
            transaction = transaction.patch(id, patch);
            outcome.patched += 1;
        }
    }

    if !transaction.is_empty() {
        store.commit(transaction).await?;
    }

    info!(
        patched = outcome.patched,
        examined = outcome.examined,
        duration_ms = start.elapsed().as_millis() as u64,
        "Sweep complete"
    );
    Ok(outcome)
}
