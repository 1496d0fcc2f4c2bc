//! Error type shared by the mutex and queue services.

use thiserror::Error;

/// Errors from the mutex and queue services and their stores.
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// The shared store could not be reached. Callers guarding an exclusive
    /// action must treat this as "unknown", never as "free".
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store answered but the command failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rejected before reaching the store: empty names, zero or
    /// out-of-range durations.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Broken invariant inside this crate.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinationError {
    /// True when the store could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CoordinationError>;
