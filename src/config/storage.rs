//! Storage configuration types.

use serde::Deserialize;

/// SQLite command ledger configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path. Parent directories are created on open.
    pub path: String,
    /// Pool size.
    pub max_connections: u32,
    /// How long a writer waits for the database lock before failing.
    pub busy_timeout_ms: u64,
    /// Use write-ahead logging so readers don't block the writer.
    pub wal: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/ledger.db".to_string(),
            max_connections: 16,
            busy_timeout_ms: 5000,
            wal: true,
        }
    }
}
