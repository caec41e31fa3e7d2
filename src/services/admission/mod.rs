//! Command admission service.
//!
//! Two-phase processing of idempotent commands: reserve the idempotency key
//! in the ledger, run business logic, then finalize the record with the
//! result or the failure. The transaction scope of each ledger write is an
//! explicit argument, so a reservation can commit on its own (and survive a
//! failed execution) or ride along in the caller's transaction (and vanish
//! with it).

use std::sync::Arc;

use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::command::{
    CommandAttempt, CommandDescriptor, CommandOutcome, CommandResult, NewCommandAttempt, Principal,
};
use crate::interfaces::{CommandError, CommandHandler, FieldViolation, HandlerRegistry};
use crate::services::error_translator::{translate_error, ErrorInfo};
use crate::storage::sqlite::{release_savepoint, rollback_to_savepoint, savepoint};
use crate::storage::{Insertion, LedgerError, SqliteCommandLedger, TxScope};
use crate::utils::idempotency::resolve_idempotency_key;

/// Savepoint wrapping business logic on a joined connection.
const EXECUTION_SAVEPOINT: &str = "command_execution";

/// Result type for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Errors surfaced by the admission service.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The idempotency key is already held by another attempt. `prior` is
    /// that attempt when it could be read.
    #[error(
        "Duplicate submission: action={action_name}, entity={entity_name}, key={idempotency_key}"
    )]
    DuplicateSubmission {
        action_name: String,
        entity_name: String,
        idempotency_key: String,
        prior: Option<Box<CommandAttempt>>,
    },

    #[error("Command not found: id={0}")]
    CommandNotFound(i64),

    #[error(
        "Command attempt not found: action={action_name}, entity={entity_name}, \
         key={idempotency_key}"
    )]
    AttemptNotFound {
        action_name: String,
        entity_name: String,
        idempotency_key: String,
    },

    #[error("Unsupported command: action={action_name}, entity={entity_name}")]
    UnsupportedCommand {
        action_name: String,
        entity_name: String,
    },

    #[error("Validation failed: {} violation(s)", .0.len())]
    Validation(Vec<FieldViolation>),

    #[error("Command execution failed: {source}")]
    Execution {
        command_id: Option<i64>,
        #[source]
        source: CommandError,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] LedgerError),
}

impl From<LedgerError> for AdmissionError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::DuplicateKey {
                action_name,
                entity_name,
                idempotency_key,
            } => AdmissionError::DuplicateSubmission {
                action_name,
                entity_name,
                idempotency_key,
                prior: None,
            },
            LedgerError::NotFound(command_id) => AdmissionError::CommandNotFound(command_id),
            other => AdmissionError::StorageUnavailable(other),
        }
    }
}

impl AdmissionError {
    /// Whether this failure means "someone already holds this key".
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AdmissionError::DuplicateSubmission { .. })
    }

    fn duplicate(
        command: &CommandDescriptor,
        idempotency_key: &str,
        prior: CommandAttempt,
    ) -> Self {
        AdmissionError::DuplicateSubmission {
            action_name: command.action_name.clone(),
            entity_name: command.entity_name.clone(),
            idempotency_key: idempotency_key.to_string(),
            prior: Some(Box::new(prior)),
        }
    }
}

/// Outcome of a successful `reserve`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// This call created the record and holds the license to execute.
    Fresh(CommandAttempt),
    /// A record already existed (earlier submission or recheck by id).
    Reentered(CommandAttempt),
}

impl Reservation {
    pub fn record(&self) -> &CommandAttempt {
        match self {
            Reservation::Fresh(record) | Reservation::Reentered(record) => record,
        }
    }

    pub fn into_record(self) -> CommandAttempt {
        match self {
            Reservation::Fresh(record) | Reservation::Reentered(record) => record,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Reservation::Fresh(_))
    }
}

/// A single command submission.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: CommandDescriptor,
    pub principal: Principal,
    /// Caller-supplied key; a fresh one is generated when absent.
    pub idempotency_key: Option<String>,
}

impl CommandRequest {
    pub fn new(command: CommandDescriptor, principal: Principal) -> Self {
        Self {
            command,
            principal,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Admission service.
///
/// The only writer of the command ledger.
#[derive(Clone)]
pub struct CommandAdmission {
    ledger: SqliteCommandLedger,
    handlers: Arc<HandlerRegistry>,
}

impl CommandAdmission {
    /// Create a new admission service.
    pub fn new(ledger: SqliteCommandLedger, handlers: HandlerRegistry) -> Self {
        Self {
            ledger,
            handlers: Arc::new(handlers),
        }
    }

    pub fn ledger(&self) -> &SqliteCommandLedger {
        &self.ledger
    }

    /// Claim `idempotency_key` for `command`.
    ///
    /// Returns the existing record when one already holds the triple (or,
    /// for a recheck, the record named by `command.command_id`). A racing
    /// insert that loses on the unique constraint fails with
    /// [`AdmissionError::DuplicateSubmission`].
    pub async fn reserve(
        &self,
        command: &CommandDescriptor,
        principal: &Principal,
        idempotency_key: &str,
        scope: TxScope<'_>,
    ) -> Result<Reservation> {
        if let Some(command_id) = command.command_id {
            let record = self.ledger.mark_checked(command_id, principal, scope).await?;
            info!(
                command_id,
                checker = principal.id,
                "Re-entered command for recheck"
            );
            return Ok(Reservation::Reentered(record));
        }

        let attempt = NewCommandAttempt::from_command(command, principal, idempotency_key);
        let insertion = self
            .ledger
            .insert_if_absent(&attempt, scope)
            .await
            .map_err(|e| {
                if matches!(e, LedgerError::DuplicateKey { .. }) {
                    warn!(
                        action = %command.action_name,
                        entity = %command.entity_name,
                        key = %idempotency_key,
                        "Lost reservation race on idempotency key"
                    );
                }
                AdmissionError::from(e)
            })?;

        match insertion {
            Insertion::Created(record) => {
                info!(
                    command_id = record.id,
                    action = %record.action_name,
                    entity = %record.entity_name,
                    "Reserved command"
                );
                Ok(Reservation::Fresh(record))
            }
            Insertion::Existing(record) => {
                debug!(
                    command_id = record.id,
                    status = record.status.as_str(),
                    "Idempotency key already reserved"
                );
                Ok(Reservation::Reentered(record))
            }
        }
    }

    /// Write the outcome of a reserved record.
    ///
    /// Writing the same outcome twice leaves the same terminal state.
    pub async fn finalize(
        &self,
        record: &CommandAttempt,
        outcome: CommandOutcome,
        scope: TxScope<'_>,
    ) -> Result<CommandAttempt> {
        let finalized = self.ledger.update_result(record.id, &outcome, scope).await?;
        info!(
            command_id = finalized.id,
            status = finalized.status.as_str(),
            "Finalized command"
        );
        Ok(finalized)
    }

    /// Read-only lookup of a record by its idempotency triple.
    pub async fn lookup(
        &self,
        action_name: &str,
        entity_name: &str,
        idempotency_key: &str,
    ) -> Result<CommandAttempt> {
        self.ledger
            .find(action_name, entity_name, idempotency_key)
            .await?
            .ok_or_else(|| AdmissionError::AttemptNotFound {
                action_name: action_name.to_string(),
                entity_name: entity_name.to_string(),
                idempotency_key: idempotency_key.to_string(),
            })
    }

    pub fn translate_error(&self, failure: &AdmissionError) -> ErrorInfo {
        translate_error(failure)
    }

    /// Submit a command with its own transactions.
    ///
    /// The reservation commits before business logic starts, so a failed or
    /// abandoned execution never frees the key for a second run. Business
    /// logic and its success record commit together; a failure is recorded
    /// in a separate transaction after the work is rolled back.
    ///
    /// Returns the finalized record when business logic ran, or the stamped
    /// record for a recheck.
    pub async fn submit(&self, request: &CommandRequest) -> Result<CommandAttempt> {
        let CommandRequest {
            command, principal, ..
        } = request;
        let handler = self.handler_for(command)?;
        validate(handler.as_ref(), command)?;
        let key = resolve_idempotency_key(request.idempotency_key.as_deref());

        if !command.is_recheck() {
            if let Some(prior) = self
                .ledger
                .find(&command.action_name, &command.entity_name, &key)
                .await?
            {
                info!(
                    command_id = prior.id,
                    status = prior.status.as_str(),
                    key = %key,
                    "Rejected duplicate submission"
                );
                return Err(AdmissionError::duplicate(command, &key, prior));
            }
        }

        let reserved = match self
            .reserve(command, principal, &key, TxScope::Isolated)
            .await
        {
            Err(error) if error.is_duplicate() => {
                let found = self
                    .ledger
                    .find(&command.action_name, &command.entity_name, &key)
                    .await;
                return Err(attach_prior(error, found, command, &key));
            }
            other => other?,
        };

        let record = match reserved {
            Reservation::Fresh(record) => record,
            Reservation::Reentered(record) if command.is_recheck() => return Ok(record),
            Reservation::Reentered(prior) => {
                return Err(AdmissionError::duplicate(command, &key, prior));
            }
        };

        match self
            .execute_isolated(handler.as_ref(), &record, command, principal)
            .await
        {
            Ok(finalized) => Ok(finalized),
            Err(error) => {
                let info = translate_error(&error);
                warn!(
                    command_id = record.id,
                    code = %info.code,
                    error = %error,
                    "Command failed"
                );
                if let Err(e) = self
                    .finalize(&record, CommandOutcome::Failed(info), TxScope::Isolated)
                    .await
                {
                    warn!(command_id = record.id, error = %e, "Failed to record command failure");
                }
                Err(error)
            }
        }
    }

    /// Submit a command inside the caller's transaction.
    ///
    /// Reservation, business logic and finalization all run on `conn`; if the
    /// caller rolls back, no trace of the attempt remains. A failed command's
    /// own writes are undone before its failure is recorded.
    pub async fn submit_joined(
        &self,
        conn: &mut SqliteConnection,
        request: &CommandRequest,
    ) -> Result<CommandAttempt> {
        let CommandRequest {
            command, principal, ..
        } = request;
        let handler = self.handler_for(command)?;
        validate(handler.as_ref(), command)?;
        let key = resolve_idempotency_key(request.idempotency_key.as_deref());

        if !command.is_recheck() {
            if let Some(prior) = SqliteCommandLedger::find_in(
                &mut *conn,
                &command.action_name,
                &command.entity_name,
                &key,
            )
            .await?
            {
                return Err(AdmissionError::duplicate(command, &key, prior));
            }
        }

        let reserved = match self
            .reserve(command, principal, &key, TxScope::Joined(&mut *conn))
            .await
        {
            Err(error) if error.is_duplicate() => {
                let found = SqliteCommandLedger::find_in(
                    &mut *conn,
                    &command.action_name,
                    &command.entity_name,
                    &key,
                )
                .await;
                return Err(attach_prior(error, found, command, &key));
            }
            other => other?,
        };

        let record = match reserved {
            Reservation::Fresh(record) => record,
            Reservation::Reentered(record) if command.is_recheck() => return Ok(record),
            Reservation::Reentered(prior) => {
                return Err(AdmissionError::duplicate(command, &key, prior));
            }
        };

        savepoint(&mut *conn, EXECUTION_SAVEPOINT).await?;
        let executed = handler.execute(&mut *conn, command, principal).await;

        match executed {
            Ok(result) => {
                release_savepoint(&mut *conn, EXECUTION_SAVEPOINT).await?;
                self.finalize(
                    &record,
                    CommandOutcome::Succeeded(result),
                    TxScope::Joined(&mut *conn),
                )
                .await
            }
            Err(source) => {
                rollback_to_savepoint(&mut *conn, EXECUTION_SAVEPOINT).await?;
                let error = AdmissionError::Execution {
                    command_id: Some(record.id),
                    source,
                };
                let info = translate_error(&error);
                warn!(
                    command_id = record.id,
                    code = %info.code,
                    error = %error,
                    "Command failed inside enclosing transaction"
                );
                if let Err(e) = self
                    .finalize(
                        &record,
                        CommandOutcome::Failed(info),
                        TxScope::Joined(&mut *conn),
                    )
                    .await
                {
                    warn!(command_id = record.id, error = %e, "Failed to record command failure");
                }
                Err(error)
            }
        }
    }

    /// Run business logic in its own unit of work and record success there.
    async fn execute_isolated(
        &self,
        handler: &dyn CommandHandler,
        record: &CommandAttempt,
        command: &CommandDescriptor,
        principal: &Principal,
    ) -> Result<CommandAttempt> {
        let mut uow = self.ledger.begin().await?;
        let executed: std::result::Result<CommandResult, CommandError> =
            handler.execute(uow.connection(), command, principal).await;

        let result = match executed {
            Ok(result) => result,
            Err(source) => {
                if let Err(e) = uow.rollback().await {
                    warn!(
                        command_id = record.id,
                        error = %e,
                        "Rollback failed after command error"
                    );
                }
                return Err(AdmissionError::Execution {
                    command_id: Some(record.id),
                    source,
                });
            }
        };

        let finalized = self
            .finalize(
                record,
                CommandOutcome::Succeeded(result),
                TxScope::Joined(uow.connection()),
            )
            .await;
        uow.finish(finalized).await
    }

    fn handler_for(&self, command: &CommandDescriptor) -> Result<Arc<dyn CommandHandler>> {
        self.handlers
            .get(&command.action_name, &command.entity_name)
            .ok_or_else(|| AdmissionError::UnsupportedCommand {
                action_name: command.action_name.clone(),
                entity_name: command.entity_name.clone(),
            })
    }
}

/// Fill in the record that won a reservation race, when it could be read.
fn attach_prior(
    error: AdmissionError,
    found: crate::storage::Result<Option<CommandAttempt>>,
    command: &CommandDescriptor,
    idempotency_key: &str,
) -> AdmissionError {
    match found {
        Ok(Some(prior)) => AdmissionError::duplicate(command, idempotency_key, prior),
        _ => error,
    }
}

fn validate(handler: &dyn CommandHandler, command: &CommandDescriptor) -> Result<()> {
    handler.validate(command).map_err(|e| match e {
        CommandError::Validation(violations) => AdmissionError::Validation(violations),
        other => AdmissionError::Execution {
            command_id: None,
            source: other,
        },
    })
}
