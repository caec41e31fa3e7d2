//! Business logic interface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqliteConnection;

use crate::command::{CommandDescriptor, CommandResult, Principal};

/// Result type for business logic operations.
pub type Result<T> = std::result::Result<T, CommandError>;

/// A single rejected payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldViolation {
    pub parameter: String,
    pub code: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(
        parameter: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            parameter: parameter.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

fn join_messages(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by business logic.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Validation errors exist: {}", join_messages(.0))]
    Validation(Vec<FieldViolation>),

    /// A domain rule rejected the command. `status_code` defaults to 403.
    #[error("{message}")]
    DomainRule {
        code: String,
        message: String,
        parameters: Vec<Value>,
        status_code: u16,
    },

    #[error("{entity} with identifier {id} does not exist")]
    ResourceNotFound { entity: String, id: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CommandError {
    pub fn domain_rule(code: impl Into<String>, message: impl Into<String>) -> Self {
        CommandError::DomainRule {
            code: code.into(),
            message: message.into(),
            parameters: Vec::new(),
            status_code: http::StatusCode::FORBIDDEN.as_u16(),
        }
    }

    pub fn validation(violation: FieldViolation) -> Self {
        CommandError::Validation(vec![violation])
    }
}

/// Interface for the domain logic behind one `(action, entity)` pair.
///
/// `execute` runs on the connection of the unit of work the admission service
/// opened for it: a dedicated transaction for isolated submissions, or the
/// caller's enclosing transaction for joined ones. Implementations must only
/// touch the store through that connection.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Structural/business validation before anything is reserved.
    fn validate(&self, _command: &CommandDescriptor) -> Result<()> {
        Ok(())
    }

    /// Apply the command.
    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        command: &CommandDescriptor,
        principal: &Principal,
    ) -> Result<CommandResult>;
}

/// Handlers keyed by `(action_name, entity_name)`.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same pair.
    pub fn register(
        mut self,
        action_name: &str,
        entity_name: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        self.handlers
            .insert((action_name.to_string(), entity_name.to_string()), handler);
        self
    }

    pub fn get(&self, action_name: &str, entity_name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .get(&(action_name.to_string(), entity_name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl CommandHandler for NoopHandler {
        async fn execute(
            &self,
            _conn: &mut SqliteConnection,
            _command: &CommandDescriptor,
            _principal: &Principal,
        ) -> Result<CommandResult> {
            Ok(CommandResult::default())
        }
    }

    #[test]
    fn test_registry_lookup_by_action_and_entity() {
        let registry =
            HandlerRegistry::new().register("DEPOSIT", "SAVINGSACCOUNT", Arc::new(NoopHandler));

        assert_eq!(registry.len(), 1);
        assert!(registry.get("DEPOSIT", "SAVINGSACCOUNT").is_some());
        assert!(registry.get("WITHDRAWAL", "SAVINGSACCOUNT").is_none());
        assert!(registry.get("DEPOSIT", "LOAN").is_none());
    }

    #[test]
    fn test_default_validation_accepts() {
        let cmd = CommandDescriptor::new("DEPOSIT", "SAVINGSACCOUNT");
        assert!(NoopHandler.validate(&cmd).is_ok());
    }

    #[test]
    fn test_domain_rule_defaults_to_forbidden() {
        match CommandError::domain_rule("error.msg.rule", "Rule broken") {
            CommandError::DomainRule { status_code, .. } => assert_eq!(status_code, 403),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validation_message_joins_violations() {
        let err = CommandError::Validation(vec![
            FieldViolation::new("amount", "validation.msg.required", "amount is required"),
            FieldViolation::new("date", "validation.msg.invalid", "date is invalid"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation errors exist: amount is required; date is invalid"
        );
    }
}
