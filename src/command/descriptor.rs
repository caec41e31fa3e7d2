//! Command descriptor, acting principal, and business-logic result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Immutable description of an intended mutating action.
///
/// The `(action_name, entity_name)` pair selects the business logic; the
/// idempotency key travels alongside the descriptor rather than inside it so
/// that the same descriptor can be retried under the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDescriptor {
    /// Operation kind, e.g. `"DEPOSIT"`.
    pub action_name: String,
    /// Target entity type, e.g. `"SAVINGSACCOUNT"`.
    pub entity_name: String,
    /// Target entity instance, when the command addresses an existing one.
    pub entity_id: Option<i64>,
    /// Relative resource path the command was submitted against.
    pub href: String,
    /// Existing ledger record to re-enter (maker-checker recheck).
    pub command_id: Option<i64>,
    /// Command input as submitted.
    pub payload: Value,
}

impl CommandDescriptor {
    pub fn new(action_name: impl Into<String>, entity_name: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            entity_name: entity_name.into(),
            entity_id: None,
            href: String::new(),
            command_id: None,
            payload: Value::Null,
        }
    }

    pub fn with_entity_id(mut self, entity_id: i64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = href.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Re-enter an already reserved ledger record instead of claiming a new key.
    pub fn recheck(mut self, command_id: i64) -> Self {
        self.command_id = Some(command_id);
        self
    }

    pub fn is_recheck(&self) -> bool {
        self.command_id.is_some()
    }

    /// Serialized payload as stored in the ledger. Absent payloads become `{}`.
    pub fn command_json(&self) -> String {
        match &self.payload {
            Value::Null => "{}".to_string(),
            payload => payload.to_string(),
        }
    }

    /// Read a payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

/// The acting user, recorded as maker (and checker on recheck).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: i64,
    pub username: String,
}

impl Principal {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// What business logic reports back for a successfully executed command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// Ledger record id; filled in by the admission service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_resource_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub changes: Map<String, Value>,
}

impl CommandResult {
    pub fn with_resource_id(resource_id: i64) -> Self {
        Self {
            resource_id: Some(resource_id),
            ..Self::default()
        }
    }

    pub fn sub_resource(mut self, sub_resource_id: i64) -> Self {
        self.sub_resource_id = Some(sub_resource_id);
        self
    }

    pub fn change(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.insert(key.into(), value.into());
        self
    }
}
