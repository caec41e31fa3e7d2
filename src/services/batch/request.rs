//! Batch wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::idempotency::IDEMPOTENCY_KEY_HEADER;

/// A single request header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One item of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Caller-chosen identifier, unique within the batch.
    pub request_id: i64,
    /// Target path relative to the API root, e.g. `savingsaccounts/1/transactions?command=deposit`.
    pub relative_url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
    /// `request_id` of an earlier item whose response feeds this item's placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<i64>,
    /// JSON document, possibly containing `$.field` placeholders.
    #[serde(default)]
    pub body: String,
}

impl BatchRequest {
    pub fn new(
        request_id: i64,
        method: impl Into<String>,
        relative_url: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            relative_url: relative_url.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: &Value) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn with_reference(mut self, request_id: i64) -> Self {
        self.reference = Some(request_id);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_idempotency_key(self, key: impl Into<String>) -> Self {
        self.with_header(IDEMPOTENCY_KEY_HEADER, key)
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.header(IDEMPOTENCY_KEY_HEADER)
    }
}

/// Outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub request_id: i64,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
    pub body: Value,
}

impl BatchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}
