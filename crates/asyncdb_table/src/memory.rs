//! In-memory table backend.

use crate::error::{TableError, TableResult, TypeSlot};
use crate::table::Table;
use crate::value::{Value, ValueKind};
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory table with declared key and value types.
///
/// This backend stores all rows in a hash map and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral data that doesn't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use asyncdb_table::{InMemoryTable, Table, Value, ValueKind};
///
/// let table = InMemoryTable::new("stock", ValueKind::Array, ValueKind::Integer).unwrap();
/// let key = Value::from(vec![Value::from(1), Value::from(42)]);
/// table.put(key.clone(), Value::from(10)).unwrap();
/// assert_eq!(table.len(), 1);
/// ```
#[derive(Debug)]
pub struct InMemoryTable {
    name: String,
    key_kind: ValueKind,
    value_kind: ValueKind,
    rows: RwLock<HashMap<Value, Value>>,
}

impl InMemoryTable {
    /// Creates a new empty table.
    ///
    /// # Errors
    ///
    /// Returns `EmptyTableName` if `name` is empty.
    pub fn new(
        name: impl Into<String>,
        key_kind: ValueKind,
        value_kind: ValueKind,
    ) -> TableResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TableError::EmptyTableName);
        }
        Ok(Self {
            name,
            key_kind,
            value_kind,
            rows: RwLock::new(HashMap::new()),
        })
    }

    /// Bulk-loads rows, replacing any existing rows with the same key.
    ///
    /// Useful for seeding fixtures before a test starts issuing transactions.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` on the first row that doesn't fit the declared
    /// types. Rows before it remain loaded.
    pub fn load(&self, rows: impl IntoIterator<Item = (Value, Value)>) -> TableResult<()> {
        let mut data = self.rows.write();
        for (key, value) in rows {
            self.check(&key, Some(&value))?;
            data.insert(key, value);
        }
        Ok(())
    }

    /// Returns the declared key kind.
    #[must_use]
    pub fn key_kind(&self) -> ValueKind {
        self.key_kind
    }

    /// Returns the declared value kind.
    #[must_use]
    pub fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Returns a copy of all rows, sorted by key.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        let mut rows: Vec<_> = self
            .rows
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        rows.sort();
        rows
    }

    fn check(&self, key: &Value, value: Option<&Value>) -> TableResult<()> {
        if !self.key_kind.accepts(key) {
            return Err(TableError::type_mismatch(
                TypeSlot::Key,
                self.key_kind,
                key.kind(),
            ));
        }
        if let Some(value) = value {
            if !self.value_kind.accepts(value) {
                return Err(TableError::type_mismatch(
                    TypeSlot::Value,
                    self.value_kind,
                    value.kind(),
                ));
            }
        }
        Ok(())
    }
}

impl Table for InMemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &Value) -> TableResult<Value> {
        self.check(key, None)?;
        self.rows
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| TableError::key_not_found(key))
    }

    fn put(&self, key: Value, value: Value) -> TableResult<()> {
        self.check(&key, Some(&value))?;
        self.rows.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &Value) -> TableResult<()> {
        self.check(key, None)?;
        match self.rows.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(TableError::key_not_found(key)),
        }
    }

    fn validate_types(&self, key: &Value, value: Option<&Value>) -> TableResult<()> {
        self.check(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn int_table() -> InMemoryTable {
        InMemoryTable::new("test", ValueKind::Integer, ValueKind::Integer).unwrap()
    }

    #[test]
    fn memory_new_is_empty() {
        let table = int_table();
        assert!(table.is_empty());
        assert_eq!(table.name(), "test");
    }

    #[test]
    fn memory_empty_name_rejected() {
        let result = InMemoryTable::new("", ValueKind::Any, ValueKind::Any);
        assert!(matches!(result, Err(TableError::EmptyTableName)));
    }

    #[test]
    fn memory_put_then_get() {
        let table = int_table();
        table.put(Value::from(1), Value::from(2)).unwrap();
        assert_eq!(table.get(&Value::from(1)).unwrap(), Value::from(2));
    }

    #[test]
    fn memory_put_overwrites() {
        let table = int_table();
        table.put(Value::from(1), Value::from(2)).unwrap();
        table.put(Value::from(1), Value::from(3)).unwrap();
        assert_eq!(table.get(&Value::from(1)).unwrap(), Value::from(3));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn memory_get_missing_key() {
        let table = int_table();
        let err = table.get(&Value::from(9)).unwrap_err();
        assert_eq!(err.to_string(), "key not found - 9");
    }

    #[test]
    fn memory_delete_removes_row() {
        let table = int_table();
        table.put(Value::from(1), Value::from(2)).unwrap();
        table.delete(&Value::from(1)).unwrap();
        assert!(table.get(&Value::from(1)).unwrap_err().is_key_not_found());
    }

    #[test]
    fn memory_delete_missing_key() {
        let table = int_table();
        let err = table.delete(&Value::from(1)).unwrap_err();
        assert!(err.is_key_not_found());
    }

    #[test]
    fn memory_wrong_key_type() {
        let table = int_table();
        let err = table.put(Value::from("1"), Value::from(2)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "type mismatch: expected key type - integer, got - text"
        );
        assert!(table.get(&Value::from("1")).is_err());
    }

    #[test]
    fn memory_wrong_value_type() {
        let table = int_table();
        let err = table.put(Value::from(1), Value::from("2")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "type mismatch: expected value type - integer, got - text"
        );
        assert!(table.is_empty());
    }

    #[test]
    fn memory_validate_types_without_value() {
        let table = int_table();
        table.validate_types(&Value::from(1), None).unwrap();
        assert!(table.validate_types(&Value::from(true), None).is_err());
    }

    #[test]
    fn memory_load_and_snapshot() {
        let table = int_table();
        table
            .load(vec![
                (Value::from(2), Value::from(20)),
                (Value::from(1), Value::from(10)),
            ])
            .unwrap();
        assert_eq!(
            table.snapshot(),
            vec![
                (Value::from(1), Value::from(10)),
                (Value::from(2), Value::from(20)),
            ]
        );
    }

    #[test]
    fn memory_load_stops_at_bad_row() {
        let table = int_table();
        let result = table.load(vec![
            (Value::from(1), Value::from(10)),
            (Value::from(2), Value::from("bad")),
            (Value::from(3), Value::from(30)),
        ]);
        assert!(result.is_err());
        assert_eq!(table.len(), 1);
    }

    proptest! {
        #[test]
        fn memory_last_put_wins(ops in prop::collection::vec((0i64..8, any::<i64>()), 1..64)) {
            let table = int_table();
            let mut model = HashMap::new();
            for (k, v) in &ops {
                table.put(Value::from(*k), Value::from(*v)).unwrap();
                model.insert(*k, *v);
            }
            for (k, v) in model {
                prop_assert_eq!(table.get(&Value::from(k)).unwrap(), Value::from(v));
            }
        }
    }
}
