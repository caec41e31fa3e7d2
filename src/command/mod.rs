//! Command values: what a caller intends to do and what the ledger records
//! about each attempt.

mod attempt;
mod descriptor;

pub use attempt::{CommandAttempt, CommandOutcome, CommandStatus, NewCommandAttempt};
pub use descriptor::{CommandDescriptor, CommandResult, Principal};
