//! Static schema registry loaded from configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tagsync_core::{Error, Result, SchemaRegistry};

/// Field types per document type: `{ "category": { "slug": "slug" } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticSchema {
    types: HashMap<String, HashMap<String, String>>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field's type.
    pub fn with_field(
        mut self,
        doc_type: impl Into<String>,
        field: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        self.types
            .entry(doc_type.into())
            .or_default()
            .insert(field.into(), field_type.into());
        self
    }

    /// Parse a YAML (or JSON) mapping of types to field types.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).map_err(|e| Error::Config(format!("invalid schema: {e}")))
    }
}

impl SchemaRegistry for StaticSchema {
    fn field_type(&self, doc_type: &str, field: &str) -> Option<String> {
        self.types.get(doc_type)?.get(field).cloned()
    }
}
