//! SQLite command ledger.

use chrono::{DateTime, Utc};
use sea_query::{Expr, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use super::UnitOfWork;
use crate::command::{CommandAttempt, CommandOutcome, CommandStatus, NewCommandAttempt, Principal};
use crate::storage::schema::{CommandAttempts, ATTEMPT_COLUMNS, CREATE_COMMAND_ATTEMPTS_TABLE};
use crate::storage::{LedgerError, Result, TxScope};

/// Outcome of [`SqliteCommandLedger::insert_if_absent`].
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    /// No record existed for the triple; this call created it.
    Created(CommandAttempt),
    /// A committed record already held the triple.
    Existing(CommandAttempt),
}

/// SQLite implementation of the command ledger.
#[derive(Clone)]
pub struct SqliteCommandLedger {
    pool: SqlitePool,
}

impl SqliteCommandLedger {
    /// Create a new SQLite command ledger.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_COMMAND_ATTEMPTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start an isolated write transaction.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        UnitOfWork::begin(&self.pool).await
    }

    /// Reserve the record's triple unless a record already holds it.
    ///
    /// Returns [`LedgerError::DuplicateKey`] when the insert loses a race on
    /// the unique constraint.
    pub async fn insert_if_absent(
        &self,
        attempt: &NewCommandAttempt,
        scope: TxScope<'_>,
    ) -> Result<Insertion> {
        match scope {
            TxScope::Joined(conn) => Self::insert_if_absent_in(conn, attempt).await,
            TxScope::Isolated => {
                let mut uow = self.begin().await?;
                let result = Self::insert_if_absent_in(uow.connection(), attempt).await;
                uow.finish(result).await
            }
        }
    }

    /// Stamp the checker on an existing record (maker-checker recheck).
    pub async fn mark_checked(
        &self,
        command_id: i64,
        checker: &Principal,
        scope: TxScope<'_>,
    ) -> Result<CommandAttempt> {
        match scope {
            TxScope::Joined(conn) => Self::mark_checked_in(conn, command_id, checker).await,
            TxScope::Isolated => {
                let mut uow = self.begin().await?;
                let result = Self::mark_checked_in(uow.connection(), command_id, checker).await;
                uow.finish(result).await
            }
        }
    }

    /// Write the final outcome of a record and return the stored row.
    pub async fn update_result(
        &self,
        command_id: i64,
        outcome: &CommandOutcome,
        scope: TxScope<'_>,
    ) -> Result<CommandAttempt> {
        match scope {
            TxScope::Joined(conn) => Self::update_result_in(conn, command_id, outcome).await,
            TxScope::Isolated => {
                let mut uow = self.begin().await?;
                let result = Self::update_result_in(uow.connection(), command_id, outcome).await;
                uow.finish(result).await
            }
        }
    }

    /// Look up a record by its idempotency triple.
    pub async fn find(
        &self,
        action_name: &str,
        entity_name: &str,
        idempotency_key: &str,
    ) -> Result<Option<CommandAttempt>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_in(&mut conn, action_name, entity_name, idempotency_key).await
    }

    pub async fn find_by_id(&self, command_id: i64) -> Result<Option<CommandAttempt>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_id_in(&mut conn, command_id).await
    }

    /// Look up a record by its idempotency triple on a specific connection.
    pub async fn find_in(
        conn: &mut SqliteConnection,
        action_name: &str,
        entity_name: &str,
        idempotency_key: &str,
    ) -> Result<Option<CommandAttempt>> {
        let query = Query::select()
            .columns(ATTEMPT_COLUMNS)
            .from(CommandAttempts::Table)
            .and_where(Expr::col(CommandAttempts::ActionName).eq(action_name))
            .and_where(Expr::col(CommandAttempts::EntityName).eq(entity_name))
            .and_where(Expr::col(CommandAttempts::IdempotencyKey).eq(idempotency_key))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        row.as_ref().map(attempt_from_row).transpose()
    }

    pub async fn find_by_id_in(
        conn: &mut SqliteConnection,
        command_id: i64,
    ) -> Result<Option<CommandAttempt>> {
        let query = Query::select()
            .columns(ATTEMPT_COLUMNS)
            .from(CommandAttempts::Table)
            .and_where(Expr::col(CommandAttempts::Id).eq(command_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn insert_if_absent_in(
        conn: &mut SqliteConnection,
        attempt: &NewCommandAttempt,
    ) -> Result<Insertion> {
        if let Some(existing) = Self::find_in(
            conn,
            &attempt.action_name,
            &attempt.entity_name,
            &attempt.idempotency_key,
        )
        .await?
        {
            return Ok(Insertion::Existing(existing));
        }

        let query = Query::insert()
            .into_table(CommandAttempts::Table)
            .columns([
                CommandAttempts::ActionName,
                CommandAttempts::EntityName,
                CommandAttempts::EntityId,
                CommandAttempts::IdempotencyKey,
                CommandAttempts::Href,
                CommandAttempts::CommandJson,
                CommandAttempts::Status,
                CommandAttempts::MakerId,
                CommandAttempts::MadeOn,
            ])
            .values_panic([
                attempt.action_name.as_str().into(),
                attempt.entity_name.as_str().into(),
                attempt.entity_id.into(),
                attempt.idempotency_key.as_str().into(),
                attempt.href.as_str().into(),
                attempt.command_json.as_str().into(),
                CommandStatus::UnderProcessing.code().into(),
                attempt.maker_id.into(),
                attempt.made_on.to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);

        let command_id = match sqlx::query(&query).execute(&mut *conn).await {
            Ok(done) => done.last_insert_rowid(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(LedgerError::DuplicateKey {
                    action_name: attempt.action_name.clone(),
                    entity_name: attempt.entity_name.clone(),
                    idempotency_key: attempt.idempotency_key.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        debug!(
            command_id,
            action = %attempt.action_name,
            entity = %attempt.entity_name,
            "Inserted command attempt"
        );

        let created = Self::find_by_id_in(conn, command_id)
            .await?
            .ok_or(LedgerError::NotFound(command_id))?;
        Ok(Insertion::Created(created))
    }

    async fn mark_checked_in(
        conn: &mut SqliteConnection,
        command_id: i64,
        checker: &Principal,
    ) -> Result<CommandAttempt> {
        let query = Query::update()
            .table(CommandAttempts::Table)
            .values([
                (CommandAttempts::CheckerId, checker.id.into()),
                (CommandAttempts::CheckedOn, Utc::now().to_rfc3339().into()),
            ])
            .and_where(Expr::col(CommandAttempts::Id).eq(command_id))
            .to_string(SqliteQueryBuilder);

        let done = sqlx::query(&query).execute(&mut *conn).await?;
        if done.rows_affected() == 0 {
            return Err(LedgerError::NotFound(command_id));
        }

        Self::find_by_id_in(conn, command_id)
            .await?
            .ok_or(LedgerError::NotFound(command_id))
    }

    async fn update_result_in(
        conn: &mut SqliteConnection,
        command_id: i64,
        outcome: &CommandOutcome,
    ) -> Result<CommandAttempt> {
        let (result, resource_id, error_info) = match outcome {
            CommandOutcome::Succeeded(result) => {
                let mut stored = result.clone();
                stored.command_id = Some(command_id);
                (Some(serde_json::to_string(&stored)?), result.resource_id, None)
            }
            CommandOutcome::Failed(info) => (None, None, Some(serde_json::to_string(info)?)),
        };

        let query = Query::update()
            .table(CommandAttempts::Table)
            .values([
                (CommandAttempts::Status, outcome.status().code().into()),
                (CommandAttempts::Result, result.into()),
                (
                    CommandAttempts::ResultStatusCode,
                    i64::from(outcome.status_code()).into(),
                ),
                (CommandAttempts::ResourceId, resource_id.into()),
                (CommandAttempts::ErrorInfo, error_info.into()),
            ])
            .and_where(Expr::col(CommandAttempts::Id).eq(command_id))
            .to_string(SqliteQueryBuilder);

        let done = sqlx::query(&query).execute(&mut *conn).await?;
        if done.rows_affected() == 0 {
            return Err(LedgerError::NotFound(command_id));
        }

        Self::find_by_id_in(conn, command_id)
            .await?
            .ok_or(LedgerError::NotFound(command_id))
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| LedgerError::InvalidTimestamp(value.to_string()))
}

fn http_status_code(code: i64) -> Result<u16> {
    u16::try_from(code).map_err(|_| LedgerError::InvalidStatusCode(code))
}

fn attempt_from_row(row: &SqliteRow) -> Result<CommandAttempt> {
    let status_code: i64 = row.try_get("status")?;
    let status =
        CommandStatus::from_code(status_code).ok_or(LedgerError::InvalidStatus(status_code))?;

    let result: Option<String> = row.try_get("result")?;
    let error_info: Option<String> = row.try_get("error_info")?;
    let result_status_code: Option<i64> = row.try_get("result_status_code")?;
    let made_on: String = row.try_get("made_on")?;
    let checked_on: Option<String> = row.try_get("checked_on")?;

    Ok(CommandAttempt {
        id: row.try_get("id")?,
        action_name: row.try_get("action_name")?,
        entity_name: row.try_get("entity_name")?,
        entity_id: row.try_get("entity_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        href: row.try_get("href")?,
        command_json: row.try_get("command_json")?,
        status,
        result: result.as_deref().map(serde_json::from_str).transpose()?,
        result_status_code: result_status_code.map(http_status_code).transpose()?,
        resource_id: row.try_get("resource_id")?,
        error_info: error_info.as_deref().map(serde_json::from_str).transpose()?,
        maker_id: row.try_get("maker_id")?,
        made_on: parse_timestamp(&made_on)?,
        checker_id: row.try_get("checker_id")?,
        checked_on: checked_on.as_deref().map(parse_timestamp).transpose()?,
    })
}
