//! Batch execution configuration.

use serde::Deserialize;

/// Limits applied by the batch coordinator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Largest accepted batch; bigger batches are rejected whole.
    pub max_requests: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_requests: 200 }
    }
}
