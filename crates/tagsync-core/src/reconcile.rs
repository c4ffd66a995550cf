//! Local reconciliation of one field's selection against its canonical set.
//!
//! Pure functions: the caller decides when to run them and whether to write
//! the result back.

use std::collections::{HashMap, HashSet};

use crate::models::RefinedTag;

/// Result of [`reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub tags: Vec<RefinedTag>,
    /// True iff the length or any element's label/value changed.
    pub changed: bool,
}

impl Reconciled {
    fn unchanged(selected: &[RefinedTag]) -> Self {
        Self {
            tags: selected.to_vec(),
            changed: false,
        }
    }
}

/// Drop selected tags whose canonical document is gone and refresh the
/// label/value of those that drifted. Tags without an `_id` pass through.
///
/// A no-op when either side is empty; an empty canonical set usually means
/// it has not loaded yet.
pub fn reconcile(selected: &[RefinedTag], canonical: &[RefinedTag]) -> Reconciled {
    if selected.is_empty() || canonical.is_empty() {
        return Reconciled::unchanged(selected);
    }

    let by_id: HashMap<&str, &RefinedTag> = canonical
        .iter()
        .filter_map(|tag| tag.id.as_deref().map(|id| (id, tag)))
        .collect();

    let tags: Vec<RefinedTag> = selected
        .iter()
        .filter_map(|tag| {
            let Some(id) = tag.id.as_deref() else {
                return Some(tag.clone());
            };
            let current = by_id.get(id)?;
            let mut tag = tag.clone();
            if !tag.same_content(current) {
                tag.refresh_from(current);
            }
            Some(tag)
        })
        .collect();

    let changed = tags.len() != selected.len()
        || tags
            .iter()
            .zip(selected)
            .any(|(after, before)| !after.same_content(before));

    Reconciled { tags, changed }
}

/// True iff the tag points at a canonical document that is not in `canonical`.
pub fn is_dangling(tag: &RefinedTag, canonical: &[RefinedTag]) -> bool {
    match tag.id.as_deref() {
        Some(id) => !canonical.iter().any(|c| c.id.as_deref() == Some(id)),
        None => false,
    }
}

/// Identity of a tag set: sorted, comma-joined `_id`s.
///
/// Reordering and label/value churn leave it unchanged.
pub fn identity_key(tags: &[RefinedTag]) -> String {
    let mut ids: Vec<&str> = tags
        .iter()
        .filter_map(|tag| tag.id.as_deref())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    ids.sort_unstable();
    ids.join(",")
}
