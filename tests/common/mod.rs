//! Shared utilities for integration tests.
//!
//! Every test gets its own SQLite file in a temporary directory, a savings
//! `accounts` table and a handler for deposits, withdrawals and notes.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use serde_json::{json, Value};
use sqlx::SqliteConnection;
use tempfile::TempDir;

use cmdledger::config::{BatchConfig, StorageConfig};
use cmdledger::interfaces::command_handler::Result;
use cmdledger::interfaces::{CommandError, CommandHandler, FieldViolation, HandlerRegistry};
use cmdledger::services::batch::RouteTable;
use cmdledger::storage::init_storage;
use cmdledger::utils::bootstrap::try_init_tracing;
use cmdledger::{
    BatchCoordinator, CommandAdmission, CommandDescriptor, CommandResult, Principal,
    SqliteCommandLedger,
};

pub const ENTITY: &str = "SAVINGSACCOUNT";
pub const DEPOSIT: &str = "DEPOSIT";
pub const WITHDRAWAL: &str = "WITHDRAWAL";
pub const NOTE: &str = "NOTE";
pub const INSUFFICIENT_BALANCE_CODE: &str = "error.msg.savingsaccount.insufficient.balance";

const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    balance INTEGER NOT NULL DEFAULT 0
)"#;

const CREATE_ACCOUNT_TRANSACTIONS: &str = r#"
CREATE TABLE account_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    amount INTEGER NOT NULL
)"#;

const CREATE_NOTES: &str = r#"
CREATE TABLE notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL,
    note TEXT NOT NULL
)"#;

/// Deposits, withdrawals and notes against `accounts`.
pub struct AccountHandler {
    action: &'static str,
}

impl AccountHandler {
    pub fn new(action: &'static str) -> Self {
        Self { action }
    }
}

fn amount_of(command: &CommandDescriptor) -> Option<i64> {
    command.field("transactionAmount").and_then(Value::as_i64)
}

async fn balance_of(conn: &mut SqliteConnection, account_id: i64) -> Result<i64> {
    let balance: Option<i64> = sqlx::query_scalar("SELECT balance FROM accounts WHERE id = ?")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    balance.ok_or(CommandError::ResourceNotFound {
        entity: "SavingsAccount".to_string(),
        id: account_id,
    })
}

#[async_trait]
impl CommandHandler for AccountHandler {
    fn validate(&self, command: &CommandDescriptor) -> Result<()> {
        if self.action == NOTE {
            return match command.field("note").and_then(Value::as_str) {
                Some(note) if !note.is_empty() => Ok(()),
                _ => Err(CommandError::validation(FieldViolation::new(
                    "note",
                    "validation.msg.note.cannot.be.blank",
                    "The parameter `note` is mandatory.",
                ))),
            };
        }
        match amount_of(command) {
            Some(amount) if amount > 0 => Ok(()),
            _ => Err(CommandError::validation(FieldViolation::new(
                "transactionAmount",
                "validation.msg.savingsaccount.transaction.transactionAmount.not.greater.than.zero",
                "The parameter `transactionAmount` must be greater than 0.",
            ))),
        }
    }

    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        command: &CommandDescriptor,
        _principal: &Principal,
    ) -> Result<CommandResult> {
        let account_id = command.entity_id.unwrap_or_default();
        let balance = balance_of(conn, account_id).await?;

        if self.action == NOTE {
            let note = command
                .field("note")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let done = sqlx::query("INSERT INTO notes (account_id, note) VALUES (?, ?)")
                .bind(account_id)
                .bind(note)
                .execute(&mut *conn)
                .await?;
            let note_id = done.last_insert_rowid();
            return Ok(CommandResult::with_resource_id(account_id).sub_resource(note_id));
        }

        let amount = amount_of(command).unwrap_or_default();
        let delta = if self.action == WITHDRAWAL {
            if balance < amount {
                return Err(CommandError::domain_rule(
                    INSUFFICIENT_BALANCE_CODE,
                    "Insufficient account balance.",
                ));
            }
            -amount
        } else {
            amount
        };

        sqlx::query("UPDATE accounts SET balance = balance + ? WHERE id = ?")
            .bind(delta)
            .bind(account_id)
            .execute(&mut *conn)
            .await?;
        let done = sqlx::query(
            "INSERT INTO account_transactions (account_id, kind, amount) VALUES (?, ?, ?)",
        )
        .bind(account_id)
        .bind(self.action)
        .bind(amount)
        .execute(&mut *conn)
        .await?;

        Ok(CommandResult::with_resource_id(account_id)
            .sub_resource(done.last_insert_rowid())
            .change("balance", balance + delta))
    }
}

pub fn handlers() -> HandlerRegistry {
    HandlerRegistry::new()
        .register(DEPOSIT, ENTITY, Arc::new(AccountHandler::new(DEPOSIT)))
        .register(
            WITHDRAWAL,
            ENTITY,
            Arc::new(AccountHandler::new(WITHDRAWAL)),
        )
        .register(NOTE, ENTITY, Arc::new(AccountHandler::new(NOTE)))
}

pub fn routes() -> RouteTable {
    RouteTable::new()
        .route(
            Method::POST,
            "savingsaccounts/{id}/transactions?command=deposit",
            DEPOSIT,
            ENTITY,
        )
        .route(
            Method::POST,
            "savingsaccounts/{id}/transactions?command=withdrawal",
            WITHDRAWAL,
            ENTITY,
        )
        .route(Method::POST, "savingsaccounts/{id}/notes", NOTE, ENTITY)
}

/// A ledger in a fresh temporary directory with the account tables in place.
pub struct TestLedger {
    pub dir: TempDir,
    pub ledger: SqliteCommandLedger,
}

impl TestLedger {
    pub async fn new() -> Self {
        try_init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = StorageConfig {
            path: dir.path().join("ledger.db").to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let ledger = init_storage(&config)
            .await
            .expect("Failed to open ledger");

        for ddl in [CREATE_ACCOUNTS, CREATE_ACCOUNT_TRANSACTIONS, CREATE_NOTES] {
            sqlx::query(ddl)
                .execute(ledger.pool())
                .await
                .expect("Failed to create account tables");
        }

        Self { dir, ledger }
    }

    pub fn admission(&self) -> Arc<CommandAdmission> {
        Arc::new(CommandAdmission::new(self.ledger.clone(), handlers()))
    }

    pub fn coordinator(&self) -> BatchCoordinator {
        BatchCoordinator::new(self.admission(), routes(), BatchConfig::default())
    }

    pub async fn open_account(&self, balance: i64) -> i64 {
        sqlx::query("INSERT INTO accounts (balance) VALUES (?)")
            .bind(balance)
            .execute(self.ledger.pool())
            .await
            .expect("Failed to open account")
            .last_insert_rowid()
    }

    pub async fn balance(&self, account_id: i64) -> i64 {
        sqlx::query_scalar("SELECT balance FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_one(self.ledger.pool())
            .await
            .expect("Failed to read balance")
    }

    pub async fn transaction_count(&self, account_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM account_transactions WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(self.ledger.pool())
            .await
            .expect("Failed to count transactions")
    }

    pub async fn ledger_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM command_attempts")
            .fetch_one(self.ledger.pool())
            .await
            .expect("Failed to count command attempts")
    }
}

pub fn maker() -> Principal {
    Principal::new(1, "mifos")
}

pub fn transaction(action: &str, account_id: i64, amount: i64) -> CommandDescriptor {
    CommandDescriptor::new(action, ENTITY)
        .with_entity_id(account_id)
        .with_href(format!(
            "/savingsaccounts/{account_id}/transactions?command={}",
            action.to_lowercase()
        ))
        .with_payload(json!({ "transactionAmount": amount, "locale": "en" }))
}

pub fn deposit(account_id: i64, amount: i64) -> CommandDescriptor {
    transaction(DEPOSIT, account_id, amount)
}

pub fn withdrawal(account_id: i64, amount: i64) -> CommandDescriptor {
    transaction(WITHDRAWAL, account_id, amount)
}
