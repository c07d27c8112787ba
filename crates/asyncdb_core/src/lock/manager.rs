//! Lock manager.

use super::object::{Decision, Holder, ObjectLock, Wake, Waiter};
use super::LockMode;
use crate::error::{CoreError, CoreResult};
use crate::types::{TableId, Timestamp, TransactionId};
use asyncdb_table::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type KeyLocks = RwLock<HashMap<Value, Arc<Mutex<ObjectLock>>>>;

/// Point-in-time view of one key's lock state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Current write holder.
    pub writer: Option<TransactionId>,
    /// Current read holders.
    pub readers: Vec<TransactionId>,
    /// Number of parked waiters.
    pub waiting: usize,
}

/// Per-key read/write locks with timestamp-priority waiting.
///
/// # Locking order
///
/// `held` → `released` (read) and `released` (read) → key mutex. No path
/// takes them in the other direction.
pub struct LockManager {
    tables: RwLock<HashMap<TableId, Arc<KeyLocks>>>,
    /// Keys each transaction has touched, with the strongest mode requested.
    held: Mutex<HashMap<TransactionId, HashMap<(TableId, Value), LockMode>>>,
    /// Transactions whose locks have been released.
    released: RwLock<HashSet<TransactionId>>,
    next_ticket: AtomicU64,
    timeout: Option<Duration>,
}

impl LockManager {
    /// Creates a lock manager whose waiters wait indefinitely.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    /// Creates a lock manager with an optional waiter deadline.
    #[must_use]
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
            released: RwLock::new(HashSet::new()),
            next_ticket: AtomicU64::new(1),
            timeout,
        }
    }

    /// Acquires `mode` on `(table, key)` for `txn`.
    ///
    /// Resolves immediately when the lock is free, already held, or lost to
    /// an older holder (`LockConflict`). When `txn` is older than every
    /// conflicting holder it parks until a release hands it the lock, turns
    /// it away, or its own transaction is released (`LocksReleased`).
    pub async fn lock(
        &self,
        mode: LockMode,
        txn: TransactionId,
        ts: Timestamp,
        table: TableId,
        key: &Value,
    ) -> CoreResult<()> {
        if self.is_released(txn) {
            return Err(CoreError::LocksReleased);
        }
        self.record(txn, table, key, mode)?;
        let object = self.object(table, key);
        let me = Holder { txn, ts };

        let (ticket, rx) = {
            let released = self.released.read();
            if released.contains(&txn) {
                return Err(CoreError::LocksReleased);
            }
            let mut lock = object.lock();
            match lock.decide(&me, mode, |t| released.contains(&t)) {
                Decision::Grant => {
                    lock.grant(me, mode);
                    debug!(txn = %txn, table = %table, key = %key, %mode, "lock granted");
                    return Ok(());
                }
                Decision::Conflict => {
                    debug!(txn = %txn, table = %table, key = %key, %mode, "lock conflict");
                    return Err(CoreError::LockConflict);
                }
                Decision::Wait => {
                    let (tx, rx) = oneshot::channel();
                    let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                    lock.enqueue(Waiter::new(me, mode, ticket, tx));
                    debug!(txn = %txn, table = %table, key = %key, %mode, "lock wait");
                    (ticket, rx)
                }
            }
        };

        self.wait(&object, ticket, rx).await
    }

    async fn wait(
        &self,
        object: &Mutex<ObjectLock>,
        ticket: u64,
        mut rx: oneshot::Receiver<Wake>,
    ) -> CoreResult<()> {
        let wake = match self.timeout {
            None => (&mut rx).await.ok(),
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    let removed = {
                        let released = self.released.read();
                        let mut lock = object.lock();
                        let removed = lock.remove_waiter(ticket);
                        if removed {
                            lock.promote(|t| released.contains(&t));
                        }
                        removed
                    };
                    if removed {
                        warn!(ticket, ?limit, "lock wait timed out");
                        return Err(CoreError::LockTimeout);
                    }
                    // Resolved between the deadline and taking the mutex.
                    rx.try_recv().ok()
                }
            },
        };

        match wake {
            Some(Wake::Granted) => Ok(()),
            Some(Wake::Conflict) => Err(CoreError::LockConflict),
            Some(Wake::Released) | None => Err(CoreError::LocksReleased),
        }
    }

    /// Releases every lock held by `txn` and fails its parked requests.
    ///
    /// After this call any further `lock` for `txn` fails with
    /// `LocksReleased`, including requests already in progress.
    pub fn release_locks(&self, txn: TransactionId) -> CoreResult<()> {
        self.released.write().insert(txn);
        let keys = self.held.lock().remove(&txn).unwrap_or_default();
        debug!(txn = %txn, keys = keys.len(), "releasing locks");

        for (table, key) in keys.into_keys() {
            let Some(object) = self.existing(table, &key) else {
                continue;
            };
            let released = self.released.read();
            object.lock().release(txn, |t| released.contains(&t));
        }
        Ok(())
    }

    /// Forgets that `txn` was released.
    ///
    /// Only safe once no operation of `txn` can still reach `lock`.
    pub fn forget(&self, txn: TransactionId) {
        self.released.write().remove(&txn);
    }

    /// Returns true if `txn` has been released.
    pub fn is_released(&self, txn: TransactionId) -> bool {
        self.released.read().contains(&txn)
    }

    /// Returns the lock state of `(table, key)`, if it was ever locked.
    pub fn holders(&self, table: TableId, key: &Value) -> Option<LockSnapshot> {
        let object = self.existing(table, key)?;
        let lock = object.lock();
        Some(LockSnapshot {
            writer: lock.writer(),
            readers: lock.readers(),
            waiting: lock.waiting(),
        })
    }

    /// Returns the number of keys `txn` has requested locks on.
    pub fn lock_count(&self, txn: TransactionId) -> usize {
        self.held.lock().get(&txn).map_or(0, HashMap::len)
    }

    fn record(&self, txn: TransactionId, table: TableId, key: &Value, mode: LockMode) -> CoreResult<()> {
        let mut held = self.held.lock();
        if self.released.read().contains(&txn) {
            return Err(CoreError::LocksReleased);
        }
        let entry = held
            .entry(txn)
            .or_default()
            .entry((table, key.clone()))
            .or_insert(mode);
        *entry = (*entry).max(mode);
        Ok(())
    }

    fn object(&self, table: TableId, key: &Value) -> Arc<Mutex<ObjectLock>> {
        let keys = {
            let tables = self.tables.read();
            tables.get(&table).cloned()
        };
        let keys = match keys {
            Some(keys) => keys,
            None => Arc::clone(self.tables.write().entry(table).or_default()),
        };

        if let Some(object) = keys.read().get(key) {
            return Arc::clone(object);
        }
        let mut keys = keys.write();
        Arc::clone(keys.entry(key.clone()).or_default())
    }

    fn existing(&self, table: TableId, key: &Value) -> Option<Arc<Mutex<ObjectLock>>> {
        let keys = self.tables.read().get(&table).cloned()?;
        let object = keys.read().get(key).cloned();
        object
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("tables", &self.tables.read().len())
            .field("transactions", &self.held.lock().len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
