//! Abstract interfaces for cmdledger collaborators.
//!
//! These traits define the contracts for:
//! - Business logic (the domain rules a reserved command runs)

pub mod command_handler;

pub use command_handler::{CommandError, CommandHandler, FieldViolation, HandlerRegistry};
