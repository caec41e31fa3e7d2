//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Command attempts table schema.
#[derive(Iden, Clone, Copy)]
pub enum CommandAttempts {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "action_name"]
    ActionName,
    #[iden = "entity_name"]
    EntityName,
    #[iden = "entity_id"]
    EntityId,
    #[iden = "idempotency_key"]
    IdempotencyKey,
    #[iden = "href"]
    Href,
    #[iden = "command_json"]
    CommandJson,
    #[iden = "status"]
    Status,
    #[iden = "result"]
    Result,
    #[iden = "result_status_code"]
    ResultStatusCode,
    #[iden = "resource_id"]
    ResourceId,
    #[iden = "error_info"]
    ErrorInfo,
    #[iden = "maker_id"]
    MakerId,
    #[iden = "made_on"]
    MadeOn,
    #[iden = "checker_id"]
    CheckerId,
    #[iden = "checked_on"]
    CheckedOn,
}

/// Every column of a command attempt row, in decode order.
pub const ATTEMPT_COLUMNS: [CommandAttempts; 16] = [
    CommandAttempts::Id,
    CommandAttempts::ActionName,
    CommandAttempts::EntityName,
    CommandAttempts::EntityId,
    CommandAttempts::IdempotencyKey,
    CommandAttempts::Href,
    CommandAttempts::CommandJson,
    CommandAttempts::Status,
    CommandAttempts::Result,
    CommandAttempts::ResultStatusCode,
    CommandAttempts::ResourceId,
    CommandAttempts::ErrorInfo,
    CommandAttempts::MakerId,
    CommandAttempts::MadeOn,
    CommandAttempts::CheckerId,
    CommandAttempts::CheckedOn,
];

/// SQL for creating the command attempts table.
///
/// The unique `(action_name, entity_name, idempotency_key)` constraint is what
/// makes reservation at-most-once: of any number of racing inserts for one
/// triple, exactly one commits.
pub const CREATE_COMMAND_ATTEMPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS command_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action_name TEXT NOT NULL,
    entity_name TEXT NOT NULL,
    entity_id INTEGER,
    idempotency_key TEXT NOT NULL,
    href TEXT NOT NULL DEFAULT '',
    command_json TEXT NOT NULL DEFAULT '{}',
    status INTEGER NOT NULL,
    result TEXT,
    result_status_code INTEGER,
    resource_id INTEGER,
    error_info TEXT,
    maker_id INTEGER NOT NULL,
    made_on TEXT NOT NULL,
    checker_id INTEGER,
    checked_on TEXT,
    CONSTRAINT uk_command_attempts_idempotency UNIQUE (action_name, entity_name, idempotency_key)
);
"#;
