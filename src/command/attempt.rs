//! Command attempt records: one ledger row per reserved idempotency key.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{CommandDescriptor, CommandResult, Principal};
use crate::services::error_translator::ErrorInfo;

/// Processing state of a ledger record.
///
/// `UnderProcessing` moves to exactly one of the terminal states.
/// Discriminants are the persisted status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    Processed = 1,
    UnderProcessing = 4,
    Failed = 5,
}

impl CommandStatus {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Processed),
            4 => Some(Self::UnderProcessing),
            5 => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::UnderProcessing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "PROCESSED",
            Self::UnderProcessing => "UNDER_PROCESSING",
            Self::Failed => "FAILED",
        }
    }
}

/// A persisted command attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandAttempt {
    pub id: i64,
    pub action_name: String,
    pub entity_name: String,
    pub entity_id: Option<i64>,
    pub idempotency_key: String,
    pub href: String,
    pub command_json: String,
    pub status: CommandStatus,
    /// Serialized [`CommandResult`], present once processed.
    pub result: Option<Value>,
    pub result_status_code: Option<u16>,
    pub resource_id: Option<i64>,
    /// Structured failure, present once failed.
    pub error_info: Option<ErrorInfo>,
    pub maker_id: i64,
    pub made_on: DateTime<Utc>,
    pub checker_id: Option<i64>,
    pub checked_on: Option<DateTime<Utc>>,
}

impl CommandAttempt {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Body a caller sees for this attempt: the stored result when processed,
    /// the stored error when failed, nothing while still in flight.
    pub fn outcome_body(&self) -> Option<Value> {
        match self.status {
            CommandStatus::Processed => self.result.clone(),
            CommandStatus::Failed => self
                .error_info
                .as_ref()
                .and_then(|info| serde_json::to_value(info).ok()),
            CommandStatus::UnderProcessing => None,
        }
    }
}

/// Values written when a key is first reserved.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCommandAttempt {
    pub action_name: String,
    pub entity_name: String,
    pub entity_id: Option<i64>,
    pub idempotency_key: String,
    pub href: String,
    pub command_json: String,
    pub maker_id: i64,
    pub made_on: DateTime<Utc>,
}

impl NewCommandAttempt {
    pub fn from_command(
        command: &CommandDescriptor,
        maker: &Principal,
        idempotency_key: &str,
    ) -> Self {
        Self {
            action_name: command.action_name.clone(),
            entity_name: command.entity_name.clone(),
            entity_id: command.entity_id,
            idempotency_key: idempotency_key.to_string(),
            href: command.href.clone(),
            command_json: command.command_json(),
            maker_id: maker.id,
            made_on: Utc::now(),
        }
    }
}

/// Final outcome written by `finalize`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Succeeded(CommandResult),
    Failed(ErrorInfo),
}

impl CommandOutcome {
    pub fn status(&self) -> CommandStatus {
        match self {
            Self::Succeeded(_) => CommandStatus::Processed,
            Self::Failed(_) => CommandStatus::Failed,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Succeeded(_) => http::StatusCode::OK.as_u16(),
            Self::Failed(info) => info.status_code,
        }
    }
}
