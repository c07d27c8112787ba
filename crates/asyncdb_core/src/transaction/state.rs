//! Transaction state.

use super::log::TransactionLog;
use crate::error::{CoreError, CoreResult};
use crate::types::{ConnectionId, Timestamp, TransactionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Lifecycle mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Accepting operations.
    Active,
    /// `commit` has started; new operations are rejected.
    Committing,
    /// Rollback or abort has started; new operations are rejected.
    Aborting,
    /// Finished.
    Ready,
}

impl TransactionMode {
    /// Returns true for `Committing` and `Aborting`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committing | Self::Aborting)
    }
}

/// How the transaction was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Started by `begin_transaction`.
    Explicit,
    /// Created on behalf of a single operation and committed right after it.
    Implicit,
}

/// A transaction bound to one connection.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    connection: ConnectionId,
    ts: Timestamp,
    kind: TransactionKind,
    mode: Mutex<TransactionMode>,
    in_flight: AtomicUsize,
    drained: Notify,
    log: Arc<TransactionLog>,
}

impl Transaction {
    pub(crate) fn new(connection: ConnectionId, ts: Timestamp, kind: TransactionKind) -> Self {
        Self {
            id: TransactionId::new(),
            connection,
            ts,
            kind,
            mode: Mutex::new(TransactionMode::Active),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            log: Arc::new(TransactionLog::new()),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the owning connection.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Returns the start timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.ts
    }

    /// Returns how the transaction was started.
    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Returns the current mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        *self.mode.lock()
    }

    /// Returns the write buffer.
    #[must_use]
    pub fn log(&self) -> &Arc<TransactionLog> {
        &self.log
    }

    /// Number of operations currently running against this transaction.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Registers an operation. Fails with `TerminalState` unless active.
    pub fn enter(self: &Arc<Self>) -> CoreResult<InFlightGuard> {
        let mode = self.mode.lock();
        if *mode != TransactionMode::Active {
            return Err(CoreError::TerminalState);
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(InFlightGuard {
            txn: Arc::clone(self),
        })
    }

    /// Moves an active transaction into `Committing` or `Aborting`.
    ///
    /// Exactly one caller wins; everyone else gets `TerminalState`.
    pub fn begin_terminal(&self, target: TransactionMode) -> CoreResult<()> {
        let mut mode = self.mode.lock();
        if *mode != TransactionMode::Active {
            return Err(CoreError::TerminalState);
        }
        *mode = target;
        Ok(())
    }

    pub(crate) fn finish(&self) {
        *self.mode.lock() = TransactionMode::Ready;
    }

    /// Waits until every registered operation has finished.
    pub async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn exit(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Keeps an operation registered with its transaction until dropped.
#[derive(Debug)]
#[must_use = "dropping the guard ends the operation immediately"]
pub struct InFlightGuard {
    txn: Arc<Transaction>,
}

impl InFlightGuard {
    /// Returns the transaction this operation runs in.
    #[must_use]
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.txn
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.txn.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn txn() -> Arc<Transaction> {
        Arc::new(Transaction::new(
            ConnectionId::new(),
            Timestamp::new(1),
            TransactionKind::Explicit,
        ))
    }

    #[test]
    fn terminal_transition_happens_once() {
        let t = txn();
        assert_eq!(t.mode(), TransactionMode::Active);
        t.begin_terminal(TransactionMode::Committing).unwrap();
        assert!(t.mode().is_terminal());
        assert_eq!(
            t.begin_terminal(TransactionMode::Aborting),
            Err(CoreError::TerminalState)
        );
        assert_eq!(t.enter().unwrap_err(), CoreError::TerminalState);
        t.finish();
        assert_eq!(t.mode(), TransactionMode::Ready);
    }

    #[tokio::test]
    async fn drained_returns_immediately_when_idle() {
        txn().drained().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drained_waits_for_guards() {
        let t = txn();
        let g1 = t.enter().unwrap();
        let g2 = t.enter().unwrap();
        assert_eq!(t.in_flight(), 2);

        let waiter = {
            let t = Arc::clone(&t);
            tokio::spawn(async move { t.drained().await })
        };

        drop(g1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(g2);
        waiter.await.unwrap();
        assert_eq!(t.in_flight(), 0);
    }
}
