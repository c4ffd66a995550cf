//! Field definitions for scheduled sweeps.
//!
//! ```yaml
//! fields:
//!   - documentType: post
//!     field: tags
//!     reference: category
//!   - documentType: article
//!     field: topics
//!     reference: ${TOPIC_TYPE}
//!     isReference: true
//!     customLabel: title
//!     customValue: slug.current
//! ```

use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;

use tagsync_core::{defaults, Error, Result, TagPaths};
use tagsync_jobs::SweepRequest;

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid"));

/// One tag field to keep consistent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub document_type: String,
    pub field: String,
    /// Canonical document type the field's tags come from.
    pub reference: String,
    #[serde(default)]
    pub is_reference: bool,
    #[serde(default)]
    pub custom_label: Option<String>,
    #[serde(default)]
    pub custom_value: Option<String>,
}

impl FieldDefinition {
    pub fn paths(&self) -> TagPaths {
        TagPaths::new(
            self.custom_label
                .clone()
                .unwrap_or_else(|| defaults::LABEL_PATH.to_string()),
            self.custom_value
                .clone()
                .unwrap_or_else(|| defaults::VALUE_PATH.to_string()),
        )
    }

    pub fn sweep_request(&self) -> SweepRequest {
        SweepRequest::new(&self.document_type, &self.field, &self.reference)
            .with_reference_field(self.is_reference)
            .with_paths(self.paths())
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("documentType", &self.document_type),
            ("field", &self.field),
            ("reference", &self.reference),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("field definition has an empty {name}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FieldsFile {
    #[serde(default)]
    fields: Vec<FieldDefinition>,
}

/// Replace `${VAR}` with the variable's value; unknown variables are kept.
fn substitute_env_vars(content: &str) -> String {
    ENV_VAR
        .replace_all(content, |caps: &Captures| {
            let name = &caps[1];
            std::env::var(name).unwrap_or_else(|_| format!("${{{}}}", name))
        })
        .into_owned()
}

/// Parse field definitions from YAML.
pub fn parse_fields(content: &str) -> Result<Vec<FieldDefinition>> {
    let content = substitute_env_vars(content);
    let file: FieldsFile = serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("invalid field definitions: {}", e)))?;
    if file.fields.is_empty() {
        return Err(Error::Config("no fields defined".to_string()));
    }
    for field in &file.fields {
        field.validate()?;
    }
    Ok(file.fields)
}

/// Load field definitions from `path`, or from the `TAGSYNC_FIELDS`
/// variable (inline YAML) when no path is given.
pub fn load_fields(path: Option<&Path>) -> Result<Vec<FieldDefinition>> {
    let content = match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => std::env::var("TAGSYNC_FIELDS").map_err(|_| {
            Error::Config("pass --config <file> or set TAGSYNC_FIELDS".to_string())
        })?,
    };
    parse_fields(&content)
}
