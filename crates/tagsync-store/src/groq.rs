//! Rendering of [`DocumentQuery`] into the store's query language.

use serde_json::{json, Map, Value};

use tagsync_core::DocumentQuery;

/// A query string plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub query: String,
    pub params: Map<String, Value>,
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render a dotted path as an attribute access chain.
///
/// Plain identifiers use dot access; anything else is quoted as
/// `@["seg"]`.
pub fn render_path(path: &str) -> String {
    let mut rendered = String::new();
    for (i, segment) in path.split('.').enumerate() {
        if is_identifier(segment) {
            if i > 0 {
                rendered.push('.');
            }
            rendered.push_str(segment);
        } else {
            if i == 0 {
                rendered.push('@');
            }
            rendered.push('[');
            rendered.push_str(&Value::String(segment.to_string()).to_string());
            rendered.push(']');
        }
    }
    rendered
}

fn render_projection(fields: &[String]) -> String {
    let mut parts = vec!["_id".to_string(), "_type".to_string()];
    for field in fields {
        if field == "_id" || field == "_type" {
            continue;
        }
        if is_identifier(field) {
            parts.push(field.clone());
        } else {
            let key = Value::String(field.clone()).to_string();
            parts.push(format!("{key}: {}", render_path(field)));
        }
    }
    format!("{{{}}}", parts.join(", "))
}

pub fn render(query: &DocumentQuery) -> RenderedQuery {
    let mut params = Map::new();
    let query = match query {
        DocumentQuery::ByIds(ids) => {
            params.insert("ids".to_string(), json!(ids));
            "*[_id in $ids]".to_string()
        }
        DocumentQuery::ById(id) => {
            params.insert("id".to_string(), json!(id));
            "*[_id == $id][0...1]".to_string()
        }
        DocumentQuery::OfType {
            doc_type,
            defined,
            fields,
        } => {
            params.insert("type".to_string(), json!(doc_type));
            let mut filter = "_type == $type".to_string();
            if let Some(path) = defined {
                filter.push_str(&format!(" && defined({})", render_path(path)));
            }
            let projection = fields
                .as_deref()
                .map(render_projection)
                .unwrap_or_default();
            format!("*[{filter}]{projection}")
        }
    };
    RenderedQuery { query, params }
}
