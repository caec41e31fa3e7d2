//! Idempotency key resolution.

use uuid::Uuid;

/// Request header carrying a caller-supplied idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// The caller's key when it has one, otherwise a fresh random key.
///
/// Surrounding whitespace is ignored; a blank key counts as absent.
pub fn resolve_idempotency_key(supplied: Option<&str>) -> String {
    match supplied.map(str::trim) {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}
