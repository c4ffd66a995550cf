//! Tag field configuration.
//!
//! Read once when a field mounts and immutable afterwards. The option names
//! are camelCase so schema declarations can be loaded from JSON or YAML as
//! written.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::defaults;
use crate::models::TagPaths;

/// Where a field may pull canonical tags from.
///
/// Only a type name names an actual source; `true` is accepted for
/// compatibility and counts as "configured" without enabling any feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceSource {
    Flag(bool),
    Type(String),
}

impl ReferenceSource {
    pub fn is_set(&self) -> bool {
        match self {
            ReferenceSource::Flag(flag) => *flag,
            ReferenceSource::Type(name) => !name.is_empty(),
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            ReferenceSource::Type(name) if !name.is_empty() => Some(name),
            _ => None,
        }
    }
}

/// Optional behaviour block of a tag field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOptions {
    /// Raw tags always offered as options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predefined_tags: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_from_reference: Option<ReferenceSource>,
    /// Name of the same field on sibling documents of the host type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_from_related: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_create: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(default)]
    pub is_multi: bool,
    #[serde(default)]
    pub is_reference: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<FieldOptions>,
}

impl FieldConfig {
    pub fn multi() -> Self {
        Self {
            is_multi: true,
            ..Self::default()
        }
    }

    pub fn with_reference(mut self, is_reference: bool) -> Self {
        self.is_reference = is_reference;
        self
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Label/value paths, defaulting to `label` / `value`.
    pub fn paths(&self) -> TagPaths {
        let options = self.options.as_ref();
        TagPaths::new(
            options
                .and_then(|o| o.custom_label.clone())
                .unwrap_or_else(|| defaults::LABEL_PATH.to_string()),
            options
                .and_then(|o| o.custom_value.clone())
                .unwrap_or_else(|| defaults::VALUE_PATH.to_string()),
        )
    }

    /// Canonical document type the field pulls from, when one is named.
    pub fn reference_type(&self) -> Option<&str> {
        self.options
            .as_ref()
            .and_then(|o| o.include_from_reference.as_ref())
            .and_then(ReferenceSource::type_name)
    }

    /// Whether `includeFromReference` is set to anything truthy.
    pub fn pulls_from_reference(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|o| o.include_from_reference.as_ref())
            .is_some_and(ReferenceSource::is_set)
    }

    pub fn related_field(&self) -> Option<&str> {
        self.options
            .as_ref()
            .and_then(|o| o.include_from_related.as_deref())
            .filter(|name| !name.is_empty())
    }

    pub fn predefined_tags(&self) -> Option<&[Value]> {
        self.options
            .as_ref()
            .and_then(|o| o.predefined_tags.as_deref())
    }

    /// Creation is allowed unless explicitly disabled.
    pub fn allow_create(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|o| o.allow_create)
            .unwrap_or(true)
    }

    /// Non-blocking configuration problems.
    pub fn advisories(&self) -> Vec<ConfigAdvisory> {
        let mut advisories = Vec::new();
        let Some(options) = self.options.as_ref() else {
            return advisories;
        };

        if self.is_reference && options.allow_create != Some(false) && !self.pulls_from_reference()
        {
            advisories.push(ConfigAdvisory::ReferenceCreate);
        }
        if self.is_reference && options.predefined_tags.is_some() {
            advisories.push(ConfigAdvisory::ReferencePredefined);
        }
        advisories
    }
}

/// Configuration that works but is almost certainly not what was meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigAdvisory {
    /// A reference field can create tags but has no reference type to create them in.
    ReferenceCreate,
    /// A reference field declares predefined tags, which have no document to point at.
    ReferencePredefined,
}

impl ConfigAdvisory {
    pub fn message(&self) -> &'static str {
        match self {
            ConfigAdvisory::ReferenceCreate => {
                "reference field allows creation; set allowCreate: false or name a type in includeFromReference"
            }
            ConfigAdvisory::ReferencePredefined => {
                "predefinedTags cannot be used on a reference field"
            }
        }
    }
}

impl fmt::Display for ConfigAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_camel_case() {
        let config: FieldConfig = serde_json::from_value(json!({
            "isMulti": true,
            "isReference": false,
            "options": {
                "includeFromReference": "category",
                "customLabel": "title",
                "customValue": "slug.current",
                "allowCreate": false
            }
        }))
        .unwrap();

        assert!(config.is_multi);
        assert_eq!(config.reference_type(), Some("category"));
        assert!(config.pulls_from_reference());
        assert!(!config.allow_create());
        assert_eq!(config.paths(), TagPaths::new("title", "slug.current"));
    }

    #[test]
    fn test_reference_source_flag() {
        let config: FieldConfig =
            serde_json::from_value(json!({"options": {"includeFromReference": true}})).unwrap();
        assert!(config.pulls_from_reference());
        assert_eq!(config.reference_type(), None);

        let config: FieldConfig =
            serde_json::from_value(json!({"options": {"includeFromReference": false}})).unwrap();
        assert!(!config.pulls_from_reference());
    }

    #[test]
    fn test_defaults() {
        let config = FieldConfig::default();
        assert_eq!(config.paths(), TagPaths::default());
        assert!(config.allow_create());
        assert!(config.advisories().is_empty());
        assert_eq!(config.related_field(), None);
    }

    #[test]
    fn test_reference_create_advisory() {
        let config = FieldConfig::multi()
            .with_reference(true)
            .with_options(FieldOptions::default());
        assert_eq!(config.advisories(), vec![ConfigAdvisory::ReferenceCreate]);

        let opted_out = FieldConfig::multi()
            .with_reference(true)
            .with_options(FieldOptions {
                allow_create: Some(false),
                ..FieldOptions::default()
            });
        assert!(opted_out.advisories().is_empty());

        let sourced = FieldConfig::multi()
            .with_reference(true)
            .with_options(FieldOptions {
                include_from_reference: Some(ReferenceSource::Type("category".into())),
                ..FieldOptions::default()
            });
        assert!(sourced.advisories().is_empty());
    }

    #[test]
    fn test_reference_predefined_advisory() {
        let config = FieldConfig::multi()
            .with_reference(true)
            .with_options(FieldOptions {
                predefined_tags: Some(vec![json!({"label": "A", "value": "a"})]),
                allow_create: Some(false),
                ..FieldOptions::default()
            });
        assert_eq!(config.advisories(), vec![ConfigAdvisory::ReferencePredefined]);
    }
}
