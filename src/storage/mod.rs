//! Command ledger storage.
//!
//! The ledger is the single point of mutual exclusion between concurrent
//! submitters: every write takes an explicit [`TxScope`] so callers choose
//! whether it commits on its own or rides along in their transaction.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqliteConnection;
use tracing::info;

use crate::config::StorageConfig;

pub mod schema;
pub mod sqlite;

pub use sqlite::{Insertion, SqliteCommandLedger, UnitOfWork};

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(
        "Duplicate idempotency key: action={action_name}, entity={entity_name}, \
         key={idempotency_key}"
    )]
    DuplicateKey {
        action_name: String,
        entity_name: String,
        idempotency_key: String,
    },

    #[error("Command attempt not found: id={0}")]
    NotFound(i64),

    #[error("Unknown command status code: {0}")]
    InvalidStatus(i64),

    #[error("Stored result status code out of range: {0}")]
    InvalidStatusCode(i64),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Transaction scope for a ledger write.
pub enum TxScope<'a> {
    /// Run in a dedicated `BEGIN IMMEDIATE` transaction that commits on its
    /// own, independent of anything the caller has open.
    Isolated,
    /// Run on the caller's connection, inside the caller's transaction.
    Joined(&'a mut SqliteConnection),
}

impl std::fmt::Debug for TxScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxScope::Isolated => f.write_str("Isolated"),
            TxScope::Joined(_) => f.write_str("Joined"),
        }
    }
}

/// Open the ledger described by `config` and make sure its schema exists.
pub async fn init_storage(config: &StorageConfig) -> Result<SqliteCommandLedger> {
    info!(
        path = %config.path,
        max_connections = config.max_connections,
        "Opening command ledger"
    );

    if let Some(parent) = Path::new(&config.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let journal_mode = if config.wal {
        SqliteJournalMode::Wal
    } else {
        SqliteJournalMode::Delete
    };

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(journal_mode)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    let ledger = SqliteCommandLedger::new(pool);
    ledger.init().await?;

    Ok(ledger)
}
