//! Error types for AsyncDB core.

use asyncdb_table::TableError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in AsyncDB core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A table with this name is already registered.
    #[error("table already exists - {name}")]
    TableExists {
        /// The table name.
        name: String,
    },

    /// No table with this name is registered.
    #[error("table not found - {name}")]
    TableNotFound {
        /// The table name.
        name: String,
    },

    /// Tables must be named.
    #[error("table name cannot be empty")]
    EmptyTableName,

    /// The requester lost the timestamp priority race for a lock.
    #[error("lock conflict")]
    LockConflict,

    /// The requesting transaction released its locks while the request was
    /// in progress.
    #[error("locks released")]
    LocksReleased,

    /// A parked lock waiter hit the configured deadline.
    #[error("lock wait timed out")]
    LockTimeout,

    /// The transaction is committing or aborting.
    #[error("transaction in terminal state")]
    TerminalState,

    /// The connection already has an active transaction.
    #[error("connection in transaction")]
    ConnInTransaction,

    /// The connection has no active transaction.
    #[error("connection not in transaction")]
    NotInTransaction,

    /// Table backend error.
    #[error(transparent)]
    Table(#[from] TableError),

    /// A spawned operation task panicked or was cancelled.
    #[error("operation task failed: {message}")]
    TaskFailed {
        /// Description of the failure.
        message: String,
    },

    /// Several errors reported by one call.
    #[error("{}", join_messages(.0))]
    Joined(Vec<CoreError>),
}

fn join_messages(errors: &[CoreError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn flatten<I>(errors: I) -> Vec<CoreError>
where
    I: IntoIterator<Item = CoreError>,
{
    let mut flat = Vec::new();
    for err in errors {
        match err {
            CoreError::Joined(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    flat
}

impl CoreError {
    /// Creates a table-exists error.
    pub fn table_exists(name: impl Into<String>) -> Self {
        Self::TableExists { name: name.into() }
    }

    /// Creates a table-not-found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Self::TableNotFound { name: name.into() }
    }

    /// Creates a task-failed error.
    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }

    /// Combines errors into one.
    ///
    /// Returns `None` for no errors and the error itself for exactly one.
    /// Nested `Joined` errors are flattened.
    pub fn join<I>(errors: I) -> Option<Self>
    where
        I: IntoIterator<Item = CoreError>,
    {
        let mut flat = flatten(errors);
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Self::Joined(flat)),
        }
    }

    /// Joins `self` with an optional follow-up error.
    #[must_use]
    pub fn and(self, other: Option<CoreError>) -> Self {
        match other {
            None => self,
            Some(other) => Self::Joined(flatten([self, other])),
        }
    }

    /// Iterates over this error and, for `Joined`, its members.
    pub fn iter(&self) -> impl Iterator<Item = &CoreError> {
        let members: &[CoreError] = match self {
            Self::Joined(inner) => inner,
            other => std::slice::from_ref(other),
        };
        members.iter()
    }

    /// Returns true if this is (or contains) a lock conflict.
    pub fn is_lock_conflict(&self) -> bool {
        self.iter().any(|e| matches!(e, Self::LockConflict))
    }

    /// Returns true if this is (or contains) a key-not-found error.
    pub fn is_key_not_found(&self) -> bool {
        self.iter()
            .any(|e| matches!(e, Self::Table(t) if t.is_key_not_found()))
    }

    /// Returns true if retrying the transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        self.iter().any(|e| {
            matches!(
                e,
                Self::LockConflict | Self::TerminalState | Self::LockTimeout
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asyncdb_table::{TypeSlot, Value, ValueKind};

    #[test]
    fn messages() {
        assert_eq!(
            CoreError::table_exists("t").to_string(),
            "table already exists - t"
        );
        assert_eq!(
            CoreError::table_not_found("missing").to_string(),
            "table not found - missing"
        );
        assert_eq!(CoreError::LockConflict.to_string(), "lock conflict");
        assert_eq!(
            CoreError::NotInTransaction.to_string(),
            "connection not in transaction"
        );
        let err: CoreError = TableError::key_not_found(&Value::from(1)).into();
        assert_eq!(err.to_string(), "key not found - 1");
        let err: CoreError =
            TableError::type_mismatch(TypeSlot::Key, ValueKind::Integer, ValueKind::Text).into();
        assert_eq!(
            err.to_string(),
            "type mismatch: expected key type - integer, got - text"
        );
    }

    #[test]
    fn join_none_one_many() {
        assert_eq!(CoreError::join(Vec::new()), None);
        assert_eq!(
            CoreError::join([CoreError::LockConflict]),
            Some(CoreError::LockConflict)
        );
        let joined = CoreError::join([
            CoreError::LockConflict,
            CoreError::join([CoreError::TerminalState, CoreError::LocksReleased]).unwrap(),
        ])
        .unwrap();
        assert_eq!(
            joined,
            CoreError::Joined(vec![
                CoreError::LockConflict,
                CoreError::TerminalState,
                CoreError::LocksReleased
            ])
        );
        assert_eq!(
            joined.to_string(),
            "lock conflict\ntransaction in terminal state\nlocks released"
        );
    }

    #[test]
    fn retryable() {
        assert!(CoreError::LockConflict.is_retryable());
        assert!(CoreError::TerminalState.is_retryable());
        assert!(!CoreError::NotInTransaction.is_retryable());
        let joined = CoreError::NotInTransaction.and(Some(CoreError::LockConflict));
        assert!(joined.is_retryable());
        assert!(joined.is_lock_conflict());
        assert_eq!(
            CoreError::NotInTransaction.and(None),
            CoreError::NotInTransaction
        );
    }
}
