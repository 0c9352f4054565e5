//! Error types for the registry core

use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors raised by the blob map and the API registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// A write or reservation does not fit the existing slot
    #[error("Slot '{key}' holds {capacity} bytes, cannot store {requested}")]
    SlotOverflow {
        key: String,
        capacity: usize,
        requested: usize,
    },

    /// Interface was published with a different size than requested
    #[error("Interface '{name}' is {found} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    /// Interface was published with a different schema version
    #[error("Interface '{name}' is version {registered}, expected {requested}")]
    VersionMismatch {
        name: String,
        registered: u32,
        requested: u32,
    },

    /// Name cannot be used as a registry key
    #[error("Invalid interface name: {0:?}")]
    InvalidName(String),

    /// Operation is declared but not supported
    #[error("Operation '{0}' is not supported")]
    Unsupported(&'static str),
}

impl ApiError {
    /// Create a slot overflow error
    pub fn slot_overflow(key: impl Into<String>, capacity: usize, requested: usize) -> Self {
        ApiError::SlotOverflow {
            key: key.into(),
            capacity,
            requested,
        }
    }
}
