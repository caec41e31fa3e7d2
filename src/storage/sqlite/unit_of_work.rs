//! Explicit transaction handles over pooled SQLite connections.

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::warn;

use crate::storage::{LedgerError, Result};

/// One `BEGIN IMMEDIATE` transaction on a connection checked out of the pool.
///
/// Finish it with [`commit`](Self::commit), [`rollback`](Self::rollback) or
/// [`finish`](Self::finish). Dropping an unfinished unit of work closes its
/// connection instead of returning it to the pool, which rolls the open
/// transaction back.
pub struct UnitOfWork {
    conn: Option<PoolConnection<Sqlite>>,
}

impl UnitOfWork {
    /// Check out a connection and start a write transaction on it.
    pub async fn begin(pool: &SqlitePool) -> Result<Self> {
        let mut conn = pool.acquire().await?;

        // BEGIN IMMEDIATE acquires the write lock upfront, preventing deadlocks
        // when concurrent DEFERRED transactions race to upgrade from shared to exclusive.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        Ok(Self { conn: Some(conn) })
    }

    /// The connection carrying this transaction.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        // Only commit/rollback take the connection, and both consume `self`.
        self.conn
            .as_deref_mut()
            .expect("unit of work connection is present until finished")
    }

    pub async fn commit(mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            // A failed COMMIT (e.g. SQLITE_BUSY) leaves the transaction open.
            if sqlx::query("ROLLBACK").execute(&mut *conn).await.is_err() {
                drop(conn.detach());
            }
            return Err(e.into());
        }

        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            drop(conn.detach());
            return Err(e.into());
        }

        Ok(())
    }

    /// Commit if `result` is `Ok`, roll back otherwise.
    ///
    /// A rollback failure is logged; the caller still gets the first error.
    pub async fn finish<T, E>(self, result: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<LedgerError>,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed after error");
                }
                Err(e)
            }
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("Unit of work dropped without commit or rollback, closing connection");
            drop(conn.detach());
        }
    }
}

/// Open a named savepoint inside the current transaction.
pub async fn savepoint(conn: &mut SqliteConnection, name: &str) -> Result<()> {
    sqlx::query(&format!("SAVEPOINT {name}"))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Keep everything done since the savepoint.
pub async fn release_savepoint(conn: &mut SqliteConnection, name: &str) -> Result<()> {
    sqlx::query(&format!("RELEASE SAVEPOINT {name}"))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Undo everything done since the savepoint and drop it.
pub async fn rollback_to_savepoint(conn: &mut SqliteConnection, name: &str) -> Result<()> {
    sqlx::query(&format!("ROLLBACK TO SAVEPOINT {name}"))
        .execute(&mut *conn)
        .await?;
    release_savepoint(conn, name).await
}
