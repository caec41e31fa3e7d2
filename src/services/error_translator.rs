//! Maps admission failures to a stable, structured error taxonomy.
//!
//! The same failure class always yields the same `code`. `category` tells a
//! caller whether to treat the failure as "already submitted", "try again
//! later", or "fix the request".

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::interfaces::CommandError;
use crate::services::admission::AdmissionError;

pub const DUPLICATE_SUBMISSION_CODE: &str = "error.msg.command.duplicate.submission";
pub const COMMAND_NOT_FOUND_CODE: &str = "error.msg.command.id.invalid";
pub const ATTEMPT_NOT_FOUND_CODE: &str = "error.msg.command.attempt.not.found";
pub const UNSUPPORTED_COMMAND_CODE: &str = "error.msg.command.unsupported";
pub const VALIDATION_CODE: &str = "validation.msg.validation.errors.exist";
pub const STORAGE_UNAVAILABLE_CODE: &str = "error.msg.storage.unavailable";

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// The idempotency key is already claimed; the command is in flight or done.
    Duplicate,
    /// The store could not be reached; the same request may succeed later.
    Transient,
    /// The request itself is wrong; retrying it unchanged will fail again.
    Permanent,
}

/// Structured failure detail, persisted on failed records and returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub status_code: u16,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Value>,
    pub category: ErrorCategory,
}

impl ErrorInfo {
    pub fn new(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            status_code: status.as_u16(),
            code: code.into(),
            message: message.into(),
            parameters: Vec::new(),
            category,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// JSON body for API responses.
    pub fn to_body(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "code": self.code }))
    }
}

/// Translate an admission failure into its stable error triple.
pub fn translate_error(failure: &AdmissionError) -> ErrorInfo {
    match failure {
        AdmissionError::DuplicateSubmission {
            action_name,
            entity_name,
            idempotency_key,
            prior,
        } => {
            let mut parameters = vec![json!(idempotency_key)];
            if let Some(prior) = prior {
                parameters.push(json!({
                    "commandId": prior.id,
                    "status": prior.status.as_str(),
                    "resultStatusCode": prior.result_status_code,
                    "body": prior.outcome_body(),
                }));
            }
            ErrorInfo::new(
                StatusCode::CONFLICT,
                DUPLICATE_SUBMISSION_CODE,
                format!(
                    "The {action_name} {entity_name} request with idempotency key \
                     {idempotency_key} was already submitted"
                ),
                ErrorCategory::Duplicate,
            )
            .with_parameters(parameters)
        }
        AdmissionError::CommandNotFound(command_id) => ErrorInfo::new(
            StatusCode::NOT_FOUND,
            COMMAND_NOT_FOUND_CODE,
            format!("Command with identifier {command_id} does not exist"),
            ErrorCategory::Permanent,
        )
        .with_parameters(vec![json!(command_id)]),
        AdmissionError::AttemptNotFound {
            action_name,
            entity_name,
            idempotency_key,
        } => ErrorInfo::new(
            StatusCode::NOT_FOUND,
            ATTEMPT_NOT_FOUND_CODE,
            format!(
                "No {action_name} {entity_name} command with idempotency key {idempotency_key}"
            ),
            ErrorCategory::Permanent,
        )
        .with_parameters(vec![json!(idempotency_key)]),
        AdmissionError::UnsupportedCommand {
            action_name,
            entity_name,
        } => ErrorInfo::new(
            StatusCode::BAD_REQUEST,
            UNSUPPORTED_COMMAND_CODE,
            format!("Command {action_name} on {entity_name} is not supported"),
            ErrorCategory::Permanent,
        ),
        AdmissionError::Validation(violations) => validation_info(violations),
        AdmissionError::Execution { source, .. } => translate_command_error(source),
        AdmissionError::StorageUnavailable(e) => storage_unavailable(e.to_string()),
    }
}

fn translate_command_error(error: &CommandError) -> ErrorInfo {
    match error {
        CommandError::Validation(violations) => validation_info(violations),
        CommandError::DomainRule {
            code,
            message,
            parameters,
            status_code,
        } => ErrorInfo {
            status_code: *status_code,
            code: code.clone(),
            message: message.clone(),
            parameters: parameters.clone(),
            category: ErrorCategory::Permanent,
        },
        CommandError::ResourceNotFound { entity, id } => ErrorInfo::new(
            StatusCode::NOT_FOUND,
            format!("error.msg.{}.id.invalid", entity.to_lowercase()),
            error.to_string(),
            ErrorCategory::Permanent,
        )
        .with_parameters(vec![json!(id)]),
        CommandError::Database(e) => storage_unavailable(e.to_string()),
    }
}

fn validation_info(violations: &[crate::interfaces::FieldViolation]) -> ErrorInfo {
    ErrorInfo::new(
        StatusCode::BAD_REQUEST,
        VALIDATION_CODE,
        "Validation errors exist.",
        ErrorCategory::Permanent,
    )
    .with_parameters(
        violations
            .iter()
            .filter_map(|v| serde_json::to_value(v).ok())
            .collect(),
    )
}

fn storage_unavailable(detail: String) -> ErrorInfo {
    ErrorInfo::new(
        StatusCode::SERVICE_UNAVAILABLE,
        STORAGE_UNAVAILABLE_CODE,
        format!("Storage unavailable: {detail}"),
        ErrorCategory::Transient,
    )
}
