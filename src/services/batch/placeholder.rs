//! `$.field` placeholder substitution between batch items.
//!
//! A placeholder is a whole JSON string value (or a whole URL path segment)
//! of the form `$.field` or `$.field.nested`. It is replaced with that field
//! of the referenced item's response body. JSON values keep their type.

use serde_json::Value;

const PREFIX: &str = "$.";

/// Errors raised while substituting placeholders.
#[derive(Debug, thiserror::Error)]
pub enum PlaceholderError {
    #[error("Request body is not valid JSON: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("Placeholder {0} has no value in the referenced response")]
    Unresolved(String),
}

fn path_of(candidate: &str) -> Option<&str> {
    candidate
        .strip_prefix(PREFIX)
        .filter(|path| !path.is_empty())
}

/// Read a dotted path out of `source`.
pub fn lookup<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(source, |value, key| value.get(key))
        .filter(|value| !value.is_null())
}

fn resolve(source: &Value, placeholder: &str, path: &str) -> Result<Value, PlaceholderError> {
    lookup(source, path)
        .cloned()
        .ok_or_else(|| PlaceholderError::Unresolved(placeholder.to_string()))
}

fn substitute_value(value: &mut Value, source: &Value) -> Result<(), PlaceholderError> {
    match value {
        Value::String(s) => {
            if let Some(path) = path_of(s) {
                let resolved = resolve(source, s, path)?;
                *value = resolved;
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_value(item, source)?;
            }
        }
        Value::Object(fields) => {
            for field in fields.values_mut() {
                substitute_value(field, source)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Substitute placeholders in a JSON body. An empty body stays empty.
pub fn substitute_body(body: &str, source: &Value) -> Result<String, PlaceholderError> {
    if body.trim().is_empty() {
        return Ok(String::new());
    }
    let mut document: Value = serde_json::from_str(body)?;
    substitute_value(&mut document, source)?;
    Ok(document.to_string())
}

/// Substitute placeholders in the path segments of a relative URL.
pub fn substitute_url(url: &str, source: &Value) -> Result<String, PlaceholderError> {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };

    let segments = path
        .split('/')
        .map(|segment| match path_of(segment) {
            Some(field) => resolve(source, segment, field).map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            None => Ok(segment.to_string()),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut substituted = segments.join("/");
    if let Some(query) = query {
        substituted.push('?');
        substituted.push_str(query);
    }
    Ok(substituted)
}
