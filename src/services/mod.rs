//! Admission, batch execution and error translation.

pub mod admission;
pub mod batch;
pub mod error_translator;
