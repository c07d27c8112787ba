//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, values and operation
//! sequences for tables with integer keys and values.

use asyncdb_table::Value;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating table keys of any supported shape.
pub fn key_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[a-z]{1,8}")
            .expect("Invalid regex")
            .prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ];
    prop_oneof![
        3 => leaf.clone(),
        1 => prop::collection::vec(leaf, 1..4).prop_map(Value::from),
    ]
}

/// Strategy for generating valid table names.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// A data operation against an integer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOp {
    /// Write `value` under `key`.
    Put {
        /// Row key.
        key: i64,
        /// Row value.
        value: i64,
    },
    /// Read `key`.
    Get {
        /// Row key.
        key: i64,
    },
    /// Delete `key`.
    Delete {
        /// Row key.
        key: i64,
    },
}

/// Strategy for a single operation over a small key space.
pub fn table_op_strategy(keys: i64) -> impl Strategy<Value = TableOp> {
    let keys = 0..keys.max(1);
    prop_oneof![
        3 => (keys.clone(), any::<i64>()).prop_map(|(key, value)| TableOp::Put { key, value }),
        2 => keys.clone().prop_map(|key| TableOp::Get { key }),
        1 => keys.prop_map(|key| TableOp::Delete { key }),
    ]
}

/// Strategy for a sequence of operations.
pub fn table_ops_strategy(keys: i64, max_len: usize) -> impl Strategy<Value = Vec<TableOp>> {
    prop::collection::vec(table_op_strategy(keys), 1..max_len.max(2))
}

/// Reference model of a single table: a sorted map.
///
/// Applying the same operations to the model and to a transaction must
/// produce the same results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableModel {
    rows: BTreeMap<i64, i64>,
}

/// Expected result of one [`TableOp`] according to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOutcome {
    /// The operation succeeds with no value.
    Done,
    /// A `Get` returns this value.
    Value(i64),
    /// The key does not exist.
    KeyNotFound,
}

impl TableModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an operation and returns what the database should report.
    pub fn apply(&mut self, op: TableOp) -> ModelOutcome {
        match op {
            TableOp::Put { key, value } => {
                self.rows.insert(key, value);
                ModelOutcome::Done
            }
            TableOp::Get { key } => self
                .rows
                .get(&key)
                .map_or(ModelOutcome::KeyNotFound, |v| ModelOutcome::Value(*v)),
            TableOp::Delete { key } => match self.rows.remove(&key) {
                Some(_) => ModelOutcome::Done,
                None => ModelOutcome::KeyNotFound,
            },
        }
    }

    /// Returns the rows as database values, sorted by key.
    pub fn rows(&self) -> Vec<(Value, Value)> {
        self.rows
            .iter()
            .map(|(k, v)| (Value::from(*k), Value::from(*v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_semantics() {
        let mut model = TableModel::new();
        assert_eq!(model.apply(TableOp::Get { key: 1 }), ModelOutcome::KeyNotFound);
        assert_eq!(
            model.apply(TableOp::Put { key: 1, value: 5 }),
            ModelOutcome::Done
        );
        assert_eq!(model.apply(TableOp::Get { key: 1 }), ModelOutcome::Value(5));
        assert_eq!(model.apply(TableOp::Delete { key: 1 }), ModelOutcome::Done);
        assert_eq!(
            model.apply(TableOp::Delete { key: 1 }),
            ModelOutcome::KeyNotFound
        );
        assert!(model.rows().is_empty());
    }

    proptest! {
        #[test]
        fn generated_names_are_valid(name in table_name_strategy()) {
            prop_assert!(!name.is_empty());
        }

        #[test]
        fn generated_ops_stay_in_key_space(ops in table_ops_strategy(4, 32)) {
            for op in ops {
                let key = match op {
                    TableOp::Put { key, .. } | TableOp::Get { key } | TableOp::Delete { key } => key,
                };
                prop_assert!((0..4).contains(&key));
            }
        }
    }
}
