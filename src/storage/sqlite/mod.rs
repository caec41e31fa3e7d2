//! SQLite implementation of the command ledger.

mod command_ledger;
mod unit_of_work;

pub use command_ledger::{Insertion, SqliteCommandLedger};
pub use unit_of_work::{release_savepoint, rollback_to_savepoint, savepoint, UnitOfWork};
