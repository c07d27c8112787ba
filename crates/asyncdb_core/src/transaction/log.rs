//! Buffered writes of one transaction.

use crate::types::TableId;
use asyncdb_table::Value;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// A buffered write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    /// Insert or overwrite the row.
    Put(Value),
    /// Remove the row.
    Delete,
}

/// One log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Table the write targets.
    pub table: TableId,
    /// Row key.
    pub key: Value,
    /// The write itself.
    pub write: PendingWrite,
}

/// Write-ahead buffer of a transaction, grouped by table.
#[derive(Debug, Default)]
pub struct TransactionLog {
    tables: Mutex<BTreeMap<TableId, Vec<(Value, PendingWrite)>>>,
}

impl TransactionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a write.
    pub fn add_action(&self, table: TableId, key: Value, write: PendingWrite) {
        self.tables
            .lock()
            .entry(table)
            .or_default()
            .push((key, write));
    }

    /// Returns the newest buffered write for `key`, if any.
    pub fn find_last_value(&self, table: TableId, key: &Value) -> Option<PendingWrite> {
        let tables = self.tables.lock();
        tables
            .get(&table)?
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, write)| write.clone())
    }

    /// Returns all records, table by table, each table in insertion order.
    pub fn entries(&self) -> Vec<LogEntry> {
        let tables = self.tables.lock();
        tables
            .iter()
            .flat_map(|(table, writes)| {
                writes.iter().map(move |(key, write)| LogEntry {
                    table: *table,
                    key: key.clone(),
                    write: write.clone(),
                })
            })
            .collect()
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.tables.lock().values().map(Vec::len).sum()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards every buffered record.
    pub fn clear(&self) {
        self.tables.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn newest_write_wins() {
        let log = TransactionLog::new();
        let t = TableId(1);
        log.add_action(t, Value::from(1), PendingWrite::Put(Value::from(2)));
        log.add_action(t, Value::from(1), PendingWrite::Put(Value::from(3)));
        assert_eq!(
            log.find_last_value(t, &Value::from(1)),
            Some(PendingWrite::Put(Value::from(3)))
        );

        log.add_action(t, Value::from(1), PendingWrite::Delete);
        assert_eq!(
            log.find_last_value(t, &Value::from(1)),
            Some(PendingWrite::Delete)
        );
        assert_eq!(log.find_last_value(t, &Value::from(9)), None);
        assert_eq!(log.find_last_value(TableId(2), &Value::from(1)), None);
    }

    #[test]
    fn entries_grouped_by_table_in_order() {
        let log = TransactionLog::new();
        log.add_action(TableId(2), Value::from("b"), PendingWrite::Delete);
        log.add_action(TableId(1), Value::from("x"), PendingWrite::Put(Value::from(1)));
        log.add_action(TableId(2), Value::from("a"), PendingWrite::Put(Value::from(2)));

        let keys: Vec<_> = log
            .entries()
            .into_iter()
            .map(|e| (e.table, e.key))
            .collect();
        assert_eq!(
            keys,
            vec![
                (TableId(1), Value::from("x")),
                (TableId(2), Value::from("b")),
                (TableId(2), Value::from("a")),
            ]
        );
        assert_eq!(log.len(), 3);

        log.clear();
        assert!(log.is_empty());
        assert!(log.entries().is_empty());
    }

    proptest! {
        #[test]
        fn find_last_value_matches_last_write(
            writes in prop::collection::vec((0i64..8, prop::option::of(any::<i64>())), 1..64),
            probe in 0i64..8,
        ) {
            let log = TransactionLog::new();
            let t = TableId(7);
            for (k, v) in &writes {
                let write = match v {
                    Some(v) => PendingWrite::Put(Value::from(*v)),
                    None => PendingWrite::Delete,
                };
                log.add_action(t, Value::from(*k), write);
            }

            let expected = writes.iter().rev().find(|(k, _)| *k == probe).map(|(_, v)| match v {
                Some(v) => PendingWrite::Put(Value::from(*v)),
                None => PendingWrite::Delete,
            });
            prop_assert_eq!(log.find_last_value(t, &Value::from(probe)), expected);
        }
    }
}
