//! Tag representation converters.
//!
//! `prepare_*` turns persisted raw tags into refined (UI-ready) tags,
//! resolving references against the store. `revert_*` turns refined tags
//! back into the persisted shape, restoring any custom label/value layout.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use crate::defaults;
use crate::error::Result;
use crate::logging::{component, subsystem};
use crate::models::{document_id, key_for, Document, RawTag, RefinedTag, TagPaths, Tags};
use crate::path::{get_in, set_path, unset_path, unwrap_slug};
use crate::traits::{DocumentQuery, DocumentStore};

/// Fields of a raw object tag that the refined shape models explicitly.
const BOOKKEEPING_FIELDS: [&str; 7] = [
    "_id",
    "_key",
    "_type",
    "label",
    "value",
    "_labelTemp",
    "_valueTemp",
];

fn non_null(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| !v.is_null()).cloned()
}

/// Convert one object raw tag.
///
/// Label and value are read from the custom paths; the tag's own generic
/// `label`/`value` fields are kept as shadows.
pub fn prepare_tag(raw: Document, paths: &TagPaths) -> RefinedTag {
    let label = non_null(get_in(&raw, &paths.label));
    let value = non_null(get_in(&raw, &paths.value));
    let label_shadow = non_null(raw.get("label"));
    let value_shadow = non_null(raw.get("value"));
    let id = document_id(&raw).map(String::from);

    let mut fields = raw;
    for name in BOOKKEEPING_FIELDS {
        fields.remove(name);
    }

    RefinedTag {
        key: key_for(value.as_ref()),
        id,
        label,
        value,
        label_shadow,
        value_shadow,
        fields,
    }
}

/// Convert a canonical document to a refined tag linked back to it.
///
/// Slug values (`{current}`) are unwrapped to their string.
pub fn document_to_tag(doc: &Document, paths: &TagPaths) -> RefinedTag {
    let label = non_null(get_in(doc, &paths.label));
    let value = get_in(doc, &paths.value)
        .map(unwrap_slug)
        .filter(|v| !v.is_null())
        .cloned();

    RefinedTag {
        key: key_for(value.as_ref()),
        id: document_id(doc).map(String::from),
        label_shadow: label.clone(),
        value_shadow: value.clone(),
        label,
        value,
        fields: Document::new(),
    }
}

/// Resolve reference ids with one batched lookup, keeping input order.
/// Ids with no matching document are dropped; repeated ids resolve once.
async fn resolve_references(
    store: &dyn DocumentStore,
    ids: Vec<String>,
    paths: &TagPaths,
) -> Result<Vec<RefinedTag>> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
    let docs = store.fetch(DocumentQuery::ByIds(ids.clone())).await?;
    let by_id: HashMap<&str, &Document> = docs
        .iter()
        .filter_map(|doc| document_id(doc).map(|id| (id, doc)))
        .collect();

    let resolved: Vec<RefinedTag> = ids
        .iter()
        .filter_map(|id| by_id.get(id.as_str()))
        .map(|doc| document_to_tag(doc, paths))
        .collect();

    if resolved.len() < ids.len() {
        debug!(
            subsystem = subsystem::CORE,
            component = component::CONVERTER,
            requested = ids.len(),
            resolved = resolved.len(),
            "Dropped references to missing documents"
        );
    }
    Ok(resolved)
}

/// Convert raw tags to refined tags.
///
/// A sequence is classified by its *first* element: if it is a reference,
/// every reference in the sequence is resolved in one lookup; otherwise every
/// object tag is converted. Mixed sequences are not supported and the
/// off-kind entries are skipped.
pub async fn prepare_tags(
    store: &dyn DocumentStore,
    tags: Option<Tags<RawTag>>,
    paths: &TagPaths,
) -> Result<Option<Tags<RefinedTag>>> {
    let Some(tags) = tags else {
        return Ok(None);
    };

    match tags {
        Tags::Many(items) => {
            let first_is_reference = match items.first() {
                Some(first) => first.is_reference(),
                None => return Ok(Some(Tags::Many(Vec::new()))),
            };

            if first_is_reference {
                let ids = items
                    .into_iter()
                    .filter_map(|tag| match tag {
                        RawTag::Reference(reference) => Some(reference.id),
                        RawTag::Object(_) => None,
                    })
                    .collect();
                let refined = resolve_references(store, ids, paths).await?;
                Ok(Some(Tags::Many(refined)))
            } else {
                let refined = items
                    .into_iter()
                    .filter_map(|tag| match tag {
                        RawTag::Object(map) => Some(prepare_tag(map, paths)),
                        RawTag::Reference(_) => None,
                    })
                    .collect();
                Ok(Some(Tags::Many(refined)))
            }
        }
        Tags::One(RawTag::Reference(reference)) => {
            let docs = store.fetch(DocumentQuery::ById(reference.id)).await?;
            Ok(docs
                .first()
                .map(|doc| Tags::One(document_to_tag(doc, paths))))
        }
        Tags::One(RawTag::Object(map)) => Ok(Some(Tags::One(prepare_tag(map, paths)))),
    }
}

/// [`prepare_tags`] flattened to a list (absent → empty).
pub async fn prepare_tags_as_list(
    store: &dyn DocumentStore,
    tags: Option<Tags<RawTag>>,
    paths: &TagPaths,
) -> Result<Vec<RefinedTag>> {
    Ok(prepare_tags(store, tags, paths)
        .await?
        .map(Tags::into_vec)
        .unwrap_or_default())
}

/// Parse a stored field value and prepare it as a list.
pub async fn prepare_value_as_list(
    store: &dyn DocumentStore,
    value: Option<Value>,
    paths: &TagPaths,
) -> Result<Vec<RefinedTag>> {
    let raw = value.and_then(Tags::<RawTag>::from_value);
    prepare_tags_as_list(store, raw, paths).await
}

/// Convert one refined tag back to its persisted shape.
///
/// Reference fields store only the pointer; a tag without a canonical id
/// cannot be stored in one and yields `None`.
pub fn revert_tag(tag: RefinedTag, paths: &TagPaths, is_reference: bool) -> Option<RawTag> {
    if is_reference {
        return tag.id.map(RawTag::reference);
    }

    let mut map = tag.fields;
    map.insert(
        "_type".to_string(),
        Value::String(defaults::REFINED_TAG_TYPE.to_string()),
    );
    map.insert("_key".to_string(), Value::String(tag.key));
    if let Some(id) = tag.id {
        map.insert("_id".to_string(), Value::String(id));
    }

    // generic fields go back to their original contents first
    if let Some(label) = tag.label_shadow {
        map.insert("label".to_string(), label);
    }
    if let Some(value) = tag.value_shadow {
        map.insert("value".to_string(), value);
    }

    match tag.label {
        Some(label) => set_path(&mut map, &paths.label, label),
        None => {
            unset_path(&mut map, &paths.label);
        }
    }
    match tag.value {
        Some(value) => set_path(&mut map, &paths.value, value),
        None => {
            unset_path(&mut map, &paths.value);
        }
    }

    Some(RawTag::Object(map))
}

/// Convert refined tags back to persisted raw tags.
///
/// With `is_multi` the result is always a sequence (a lone tag becomes a
/// one-element sequence); otherwise it is a single tag, taking the first
/// element of a sequence, or `None` for an empty one.
pub fn revert_tags(
    tags: Option<Tags<RefinedTag>>,
    paths: &TagPaths,
    is_multi: bool,
    is_reference: bool,
) -> Option<Tags<RawTag>> {
    let tags = tags?;

    if is_multi {
        let reverted = tags
            .into_vec()
            .into_iter()
            .filter_map(|tag| revert_tag(tag, paths, is_reference))
            .collect();
        return Some(Tags::Many(reverted));
    }

    let first = match tags {
        Tags::One(tag) => Some(tag),
        Tags::Many(items) => items.into_iter().next(),
    };
    first
        .and_then(|tag| revert_tag(tag, paths, is_reference))
        .map(Tags::One)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_prepare_tag_default_paths() {
        let tag = prepare_tag(doc(json!({"label": "Rust", "value": "rust"})), &TagPaths::default());
        assert_eq!(tag.key, "rust");
        assert_eq!(tag.label, Some(json!("Rust")));
        assert_eq!(tag.value, Some(json!("rust")));
        assert_eq!(tag.label_shadow, Some(json!("Rust")));
        assert_eq!(tag.value_shadow, Some(json!("rust")));
        assert!(tag.fields.is_empty());
    }

    #[test]
    fn test_prepare_tag_custom_nested_paths() {
        let paths = TagPaths::new("title", "meta.code");
        let tag = prepare_tag(
            doc(json!({"title": "Rust", "meta": {"code": "rs"}, "color": "orange"})),
            &paths,
        );
        assert_eq!(tag.key, "rs");
        assert_eq!(tag.label, Some(json!("Rust")));
        assert_eq!(tag.value, Some(json!("rs")));
        assert_eq!(tag.label_shadow, None);
        assert_eq!(tag.value_shadow, None);
        assert_eq!(tag.fields["color"], json!("orange"));
    }

    #[test]
    fn test_prepare_tag_keeps_canonical_id() {
        let tag = prepare_tag(
            doc(json!({"_id": "cat-1", "_type": "tag", "label": "A", "value": "a"})),
            &TagPaths::default(),
        );
        assert_eq!(tag.id.as_deref(), Some("cat-1"));
        assert!(!tag.fields.contains_key("_type"));
    }

    #[test]
    fn test_document_to_tag_unwraps_slug() {
        let paths = TagPaths::new("title", "slug");
        let tag = document_to_tag(
            &doc(json!({"_id": "c1", "_type": "category", "title": "Hello", "slug": {"current": "hello"}})),
            &paths,
        );
        assert_eq!(tag.id.as_deref(), Some("c1"));
        assert_eq!(tag.key, "hello");
        assert_eq!(tag.value, Some(json!("hello")));
        assert_eq!(tag.label_shadow, Some(json!("Hello")));
        assert_eq!(tag.value_shadow, Some(json!("hello")));
    }

    #[test]
    fn test_round_trip_default_paths() {
        let paths = TagPaths::default();
        let raw = doc(json!({"label": "Rust", "value": "rust", "color": "orange"}));
        let refined = prepare_tag(raw.clone(), &paths);
        let Some(RawTag::Object(back)) = revert_tag(refined, &paths, false) else {
            panic!("expected object tag");
        };
        assert_eq!(back["label"], raw["label"]);
        assert_eq!(back["value"], raw["value"]);
        assert_eq!(back["color"], raw["color"]);
        assert_eq!(back["_type"], json!("tag"));
    }

    #[test]
    fn test_round_trip_custom_paths_restores_layout() {
        let paths = TagPaths::new("name", "meta.code");
        let raw = doc(json!({"name": "Rust", "meta": {"code": "rs", "extra": 1}}));
        let refined = prepare_tag(raw.clone(), &paths);
        let Some(RawTag::Object(back)) = revert_tag(refined, &paths, false) else {
            panic!("expected object tag");
        };
        assert_eq!(back["name"], json!("Rust"));
        assert_eq!(back["meta"], json!({"code": "rs", "extra": 1}));
        // no generic label/value leak into a custom layout
        assert!(!back.contains_key("label"));
        assert!(!back.contains_key("value"));
        assert!(!back.contains_key("_labelTemp"));
        assert!(!back.contains_key("_valueTemp"));
    }

    #[test]
    fn test_revert_reference() {
        let tag = RefinedTag::new("Rust", "rust").with_id("cat-1");
        assert_eq!(
            revert_tag(tag, &TagPaths::default(), true),
            Some(RawTag::reference("cat-1"))
        );
        let free = RefinedTag::new("Free", "free");
        assert_eq!(revert_tag(free, &TagPaths::default(), true), None);
    }

    #[test]
    fn test_revert_tags_single_takes_first() {
        let tags = Tags::Many(vec![RefinedTag::new("A", "a"), RefinedTag::new("B", "b")]);
        let reverted = revert_tags(Some(tags), &TagPaths::default(), false, false);
        let Some(Tags::One(RawTag::Object(map))) = reverted else {
            panic!("expected single object tag");
        };
        assert_eq!(map["value"], json!("a"));
    }

    #[test]
    fn test_revert_tags_multi_wraps_single() {
        let reverted = revert_tags(
            Some(Tags::One(RefinedTag::new("A", "a"))),
            &TagPaths::default(),
            true,
            false,
        );
        assert!(matches!(reverted, Some(Tags::Many(ref items)) if items.len() == 1));
    }

    #[test]
    fn test_revert_tags_absent_and_empty() {
        assert_eq!(revert_tags(None, &TagPaths::default(), true, false), None);
        assert_eq!(
            revert_tags(Some(Tags::Many(vec![])), &TagPaths::default(), false, false),
            None
        );
        assert_eq!(
            revert_tags(Some(Tags::Many(vec![])), &TagPaths::default(), true, false),
            Some(Tags::Many(vec![]))
        );
    }
}
