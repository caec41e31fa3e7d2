//! cmdledger - idempotent command admission.
//!
//! Guarantees that each logically distinct mutating command, identified by an
//! idempotency key, reaches business logic at most once. Commands are
//! reserved in a ledger table guarded by a uniqueness constraint before any
//! business logic runs, then finalized with their result or failure.
//! Batches of commands run either inside one enclosing transaction or as
//! independent per-item transactions.

pub mod command;
pub mod config;
pub mod interfaces;
pub mod services;
pub mod storage;
pub mod utils;

pub use command::{
    CommandAttempt, CommandDescriptor, CommandOutcome, CommandResult, CommandStatus, Principal,
};
pub use services::admission::{AdmissionError, CommandAdmission, CommandRequest, Reservation};
pub use services::batch::{BatchCoordinator, BatchRequest, BatchResponse};
pub use services::error_translator::{translate_error, ErrorCategory, ErrorInfo};
pub use storage::{SqliteCommandLedger, TxScope};
