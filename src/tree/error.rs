use thiserror::Error;

use super::Key;

/// Errors that can occur during B+ tree operations
#[derive(Debug, Clone, Error)]
pub enum BPlusTreeError {
    #[error("Key not found: {0}")]
    KeyNotFound(Key),

    #[error("Invalid order: {0} (must be >= 3)")]
    InvalidOrder(usize),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

pub type BPlusTreeResult<T> = Result<T, BPlusTreeError>;
