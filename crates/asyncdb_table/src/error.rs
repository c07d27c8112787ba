//! Error types for table operations.

use crate::value::{Value, ValueKind};
use std::fmt;
use thiserror::Error;

/// Result type for table operations.
pub type TableResult<T> = Result<T, TableError>;

/// Which half of a row failed type validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSlot {
    /// The row key.
    Key,
    /// The row value.
    Value,
}

impl fmt::Display for TypeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key => f.write_str("key"),
            Self::Value => f.write_str("value"),
        }
    }
}

/// Errors that can occur during table operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// The requested key is not present in the table.
    #[error("key not found - {key}")]
    KeyNotFound {
        /// The key that was looked up.
        key: Value,
    },

    /// A key or value does not have the type the table declares.
    #[error("type mismatch: expected {slot} type - {expected}, got - {actual}")]
    TypeMismatch {
        /// Whether the key or the value was rejected.
        slot: TypeSlot,
        /// The declared type.
        expected: ValueKind,
        /// The type that was supplied.
        actual: ValueKind,
    },

    /// Tables must be named.
    #[error("table name cannot be empty")]
    EmptyTableName,

    /// The backend failed for a reason of its own.
    #[error("backend error: {0}")]
    Backend(String),
}

impl TableError {
    /// Creates a key-not-found error.
    pub fn key_not_found(key: &Value) -> Self {
        Self::KeyNotFound { key: key.clone() }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(slot: TypeSlot, expected: ValueKind, actual: ValueKind) -> Self {
        Self::TypeMismatch {
            slot,
            expected,
            actual,
        }
    }

    /// Returns true for [`TableError::KeyNotFound`].
    #[must_use]
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }
}
