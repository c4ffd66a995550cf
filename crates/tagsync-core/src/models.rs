//! Tag and document data models.
//!
//! Three tag shapes move through the system:
//!
//! - [`RawTag`]: what is persisted inside a host document field, either a
//!   pointer (`{_ref, _type: "reference"}`) or an open object whose label and
//!   value live at custom paths.
//! - [`RefinedTag`]: the UI-ready shape with canonical `label`/`value`, a
//!   value-derived `_key`, and shadow fields that let the original custom
//!   layout be restored without loss.
//! - A canonical [`Document`] that a reference tag (or an object tag's `_id`)
//!   points back to.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::defaults;
use crate::path::coerce_to_string;

/// A store document: an open JSON object with `_id` and `_type` system fields.
pub type Document = Map<String, Value>;

/// The `_id` of a document, if present and a string.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get("_id").and_then(Value::as_str)
}

/// The `_type` of a document, if present and a string.
pub fn document_type(doc: &Document) -> Option<&str> {
    doc.get("_type").and_then(Value::as_str)
}

// =============================================================================
// TAG PATHS
// =============================================================================

/// Dotted paths of a tag's label and value fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagPaths {
    pub label: String,
    pub value: String,
}

impl TagPaths {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

impl Default for TagPaths {
    fn default() -> Self {
        Self::new(defaults::LABEL_PATH, defaults::VALUE_PATH)
    }
}

// =============================================================================
// RAW TAG
// =============================================================================

/// Pointer to a canonical document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagReference {
    pub id: String,
}

/// Persisted shape of one tag inside a host document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum RawTag {
    /// `{ "_ref": id, "_type": "reference" }`
    Reference(TagReference),
    /// Independent snapshot with label/value at custom paths.
    Object(Document),
}

impl RawTag {
    /// Build a reference raw tag.
    pub fn reference(id: impl Into<String>) -> Self {
        RawTag::Reference(TagReference { id: id.into() })
    }

    /// Classify a JSON value. Objects carrying both `_ref` (a string) and
    /// `_type` are references; any other object is an object tag. Non-objects
    /// are not tags.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => {
                if map.contains_key("_type") {
                    if let Some(id) = map.get("_ref").and_then(Value::as_str) {
                        return Some(RawTag::reference(id));
                    }
                }
                Some(RawTag::Object(map))
            }
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, RawTag::Reference(_))
    }

    pub fn into_value(self) -> Value {
        match self {
            RawTag::Reference(reference) => {
                let mut map = Map::new();
                map.insert("_ref".to_string(), Value::String(reference.id));
                map.insert(
                    "_type".to_string(),
                    Value::String(defaults::REFERENCE_TAG_TYPE.to_string()),
                );
                Value::Object(map)
            }
            RawTag::Object(map) => Value::Object(map),
        }
    }
}

impl TryFrom<Value> for RawTag {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        RawTag::from_value(value).ok_or_else(|| "tag must be a JSON object".to_string())
    }
}

impl From<RawTag> for Value {
    fn from(tag: RawTag) -> Self {
        tag.into_value()
    }
}

// =============================================================================
// REFINED TAG
// =============================================================================

/// UI-ready tag.
///
/// `label`/`value` are the values extracted from the custom paths.
/// `label_shadow`/`value_shadow` keep the original tag's generic `label` and
/// `value` fields so reverting restores the exact custom layout. `fields`
/// carries every other field of the original tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedTag {
    #[serde(rename = "_key")]
    pub key: String,
    /// Weak back-reference to the canonical document this tag came from.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(rename = "_labelTemp", default, skip_serializing_if = "Option::is_none")]
    pub label_shadow: Option<Value>,
    #[serde(rename = "_valueTemp", default, skip_serializing_if = "Option::is_none")]
    pub value_shadow: Option<Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RefinedTag {
    /// Build a free-text tag with no custom fields.
    pub fn new(label: impl Into<Value>, value: impl Into<Value>) -> Self {
        let label = label.into();
        let value = value.into();
        Self {
            key: key_for(Some(&value)),
            id: None,
            label_shadow: Some(label.clone()),
            value_shadow: Some(value.clone()),
            label: Some(label),
            value: Some(value),
            fields: Map::new(),
        }
    }

    /// Attach a canonical document id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Label as display text (empty when absent).
    pub fn label_text(&self) -> String {
        self.label
            .as_ref()
            .and_then(coerce_to_string)
            .unwrap_or_default()
    }

    /// Value as a loose string, if present.
    pub fn value_text(&self) -> Option<String> {
        self.value.as_ref().and_then(coerce_to_string)
    }

    /// Replace label/value (and both shadows) with a canonical copy's.
    pub fn refresh_from(&mut self, canonical: &RefinedTag) {
        self.key = key_for(canonical.value.as_ref());
        self.label = canonical.label.clone();
        self.value = canonical.value.clone();
        self.label_shadow = canonical.label.clone();
        self.value_shadow = canonical.value.clone();
    }

    /// True when label and value are equal to `other`'s.
    pub fn same_content(&self, other: &RefinedTag) -> bool {
        self.label == other.label && self.value == other.value
    }
}

/// Content-addressed key for a tag value.
pub fn key_for(value: Option<&Value>) -> String {
    value.and_then(coerce_to_string).unwrap_or_default()
}

// =============================================================================
// MULTIPLICITY
// =============================================================================

/// A field value holding one tag or a sequence of tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tags<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Tags<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Tags::Many(items) => items,
            Tags::One(item) => vec![item],
        }
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            Tags::Many(items) => items,
            Tags::One(item) => std::slice::from_ref(item),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Tags<U> {
        match self {
            Tags::Many(items) => Tags::Many(items.into_iter().map(f).collect()),
            Tags::One(item) => Tags::One(f(item)),
        }
    }
}

impl Tags<RawTag> {
    /// Parse a stored field value. Non-object sequence entries are skipped;
    /// a scalar field value yields `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Tags::Many(
                items.into_iter().filter_map(RawTag::from_value).collect(),
            )),
            Value::Null => None,
            other => RawTag::from_value(other).map(Tags::One),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Tags::Many(items) => Value::Array(items.into_iter().map(RawTag::into_value).collect()),
            Tags::One(item) => item.into_value(),
        }
    }
}
