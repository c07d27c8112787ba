//! Table capability trait definition.

use crate::error::TableResult;
use crate::value::Value;

/// A keyed row store that the engine reads from and commits into.
///
/// Tables are **opaque to the engine**. They provide point reads, upserts
/// and deletes, and can check whether a key/value pair has the types they
/// declare. Tables never see uncommitted data: the engine buffers writes in
/// a transaction log and only calls [`Table::put`] and [`Table::delete`]
/// when a transaction commits.
///
/// # Invariants
///
/// - `get` after a successful `put(k, v)` returns `v`
/// - `delete` of a missing key fails with `KeyNotFound`
/// - `validate_types` has no side effects
/// - Tables must be `Send + Sync`; implementations use interior locking
///
/// # Implementors
///
/// - [`super::InMemoryTable`] - For tests and ephemeral data
/// - [`super::SimulatedTable`] - For latency simulation
pub trait Table: Send + Sync {
    /// Returns the table's name.
    fn name(&self) -> &str;

    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The key has the wrong type (`TypeMismatch`)
    /// - The key is not present (`KeyNotFound`)
    fn get(&self, key: &Value) -> TableResult<Value>;

    /// Inserts or replaces the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the key or value has the wrong type.
    fn put(&self, key: Value, value: Value) -> TableResult<()>;

    /// Removes the row stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The key has the wrong type (`TypeMismatch`)
    /// - The key is not present (`KeyNotFound`)
    fn delete(&self, key: &Value) -> TableResult<()>;

    /// Checks that `key` (and `value`, when given) match the declared types.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` naming the first offending half of the row.
    fn validate_types(&self, key: &Value, value: Option<&Value>) -> TableResult<()>;
}
