//! Transaction manager.

use super::log::TransactionLog;
use super::state::{Transaction, TransactionKind};
use crate::error::{CoreError, CoreResult};
use crate::types::{ConnectionId, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tracks the active transaction of every connection.
///
/// A connection has at most one transaction slot. Starting a transaction on
/// an occupied slot fails with `ConnInTransaction`, which is the guard both
/// `begin_transaction` and implicit transactions rely on.
pub struct TransactionManager {
    slots: RwLock<HashMap<ConnectionId, Arc<Transaction>>>,
}

impl TransactionManager {
    /// Creates an empty transaction manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a transaction for `conn`.
    pub fn start_transaction(
        &self,
        conn: ConnectionId,
        ts: Timestamp,
        kind: TransactionKind,
    ) -> CoreResult<Arc<Transaction>> {
        let mut slots = self.slots.write();
        if slots.contains_key(&conn) {
            return Err(CoreError::ConnInTransaction);
        }
        let txn = Arc::new(Transaction::new(conn, ts, kind));
        debug!(conn = %conn, txn = %txn.id(), %ts, ?kind, "transaction started");
        slots.insert(conn, Arc::clone(&txn));
        Ok(txn)
    }

    /// Replaces the transaction of `conn` with a fresh one.
    ///
    /// The new transaction keeps the kind of the old one but gets a new ID,
    /// the given timestamp and an empty log. The slot is never vacated.
    pub fn restart_transaction(
        &self,
        conn: ConnectionId,
        ts: Timestamp,
    ) -> CoreResult<Arc<Transaction>> {
        let mut slots = self.slots.write();
        let old = slots.get(&conn).ok_or(CoreError::NotInTransaction)?;
        let txn = Arc::new(Transaction::new(conn, ts, old.kind()));
        debug!(conn = %conn, old = %old.id(), txn = %txn.id(), %ts, "transaction restarted");
        slots.insert(conn, Arc::clone(&txn));
        Ok(txn)
    }

    /// Returns the transaction of `conn`, if any.
    pub fn get(&self, conn: ConnectionId) -> Option<Arc<Transaction>> {
        self.slots.read().get(&conn).cloned()
    }

    /// Returns the write buffer of `conn`'s transaction.
    pub fn get_log(&self, conn: ConnectionId) -> CoreResult<Arc<TransactionLog>> {
        self.slots
            .read()
            .get(&conn)
            .map(|txn| Arc::clone(txn.log()))
            .ok_or(CoreError::NotInTransaction)
    }

    /// Removes all transaction state of `conn`.
    pub fn end_transaction(&self, conn: ConnectionId) -> CoreResult<Arc<Transaction>> {
        let txn = self
            .slots
            .write()
            .remove(&conn)
            .ok_or(CoreError::NotInTransaction)?;
        debug!(conn = %conn, txn = %txn.id(), "transaction ended");
        Ok(txn)
    }

    /// Discards the buffered writes of `conn`'s transaction, keeping the slot.
    pub fn delete_log(&self, conn: ConnectionId) -> CoreResult<()> {
        self.get_log(conn)?.clear();
        Ok(())
    }

    /// Number of connections with an active transaction.
    pub fn active_count(&self) -> usize {
        self.slots.read().len()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}
