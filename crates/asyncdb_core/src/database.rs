//! Database facade and transaction coordinator.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::hash::{Fnv1aHasher, TableHasher};
use crate::lock::{LockManager, LockMode};
use crate::registry::TableRegistry;
use crate::transaction::{
    InFlightGuard, LogEntry, PendingWrite, Transaction, TransactionKind, TransactionManager,
    TransactionMode,
};
use crate::types::{ConnectionId, TableId, TransactionId};
use asyncdb_table::{Table, TableError, TableResult, Value};
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A client session.
pub type Connection = Arc<ConnectionContext>;

/// State of one client session: its ID and current transaction, if any.
///
/// Calls on one connection should be issued one at a time. Concurrent
/// `begin`/`commit`/`rollback` calls are serialized internally, but data
/// operations racing on one connection only share its transaction.
#[derive(Debug)]
pub struct ConnectionContext {
    id: ConnectionId,
    txn: RwLock<Option<Arc<Transaction>>>,
}

impl ConnectionContext {
    fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            txn: RwLock::new(None),
        }
    }

    /// Returns the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the ID of the attached transaction.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.txn.read().as_ref().map(|t| t.id())
    }
}

/// A data operation running on its own task.
///
/// Resolves to the operation's result. A panic inside the task surfaces as
/// [`CoreError::TaskFailed`].
#[derive(Debug)]
#[must_use = "operations run in the background; await them to observe the result"]
pub struct Operation<T> {
    state: OperationState<T>,
}

#[derive(Debug)]
enum OperationState<T> {
    /// Refused before a task was spawned.
    Rejected(CoreError),
    Running(JoinHandle<CoreResult<T>>),
}

impl<T> Operation<T> {
    fn rejected(err: CoreError) -> Self {
        Self {
            state: OperationState::Rejected(err),
        }
    }
}

impl<T> Future for Operation<T> {
    type Output = CoreResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let handle = match &mut self.get_mut().state {
            OperationState::Rejected(err) => return Poll::Ready(Err(err.clone())),
            OperationState::Running(handle) => handle,
        };
        match Pin::new(handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) => Poll::Ready(Err(CoreError::task_failed(err.to_string()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The main database handle.
///
/// `AsyncDb` owns the table registry, the lock manager and the transaction
/// manager, and coordinates them for every operation:
///
/// - each `put`/`get`/`delete` runs on a spawned Tokio task;
/// - outside `begin_transaction` an operation runs in an implicit
///   transaction that commits as soon as the operation finishes;
/// - every key an operation touches is write-locked for the rest of the
///   transaction, using timestamp priority (see [`crate::lock`]);
/// - writes are buffered in the transaction log and applied on commit.
///
/// The handle is cheap to clone.
///
/// # Example
///
/// ```rust
/// use asyncdb_core::{AsyncDb, Config};
/// use asyncdb_table::{InMemoryTable, Value, ValueKind};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = AsyncDb::new(Config::default());
/// let conn = db.connect();
/// let table = InMemoryTable::new("t", ValueKind::Integer, ValueKind::Integer)?;
/// db.create_table(&conn, Arc::new(table))?;
///
/// db.put(&conn, "t", 1, 2).await?;
/// assert_eq!(db.get(&conn, "t", 1).await?, Value::from(2));
///
/// db.begin_transaction(&conn)?;
/// db.put(&conn, "t", 1, 3).await?;
/// db.rollback_transaction(&conn).await?;
/// assert_eq!(db.get(&conn, "t", 1).await?, Value::from(2));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncDb {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    tables: TableRegistry,
    locks: LockManager,
    txns: TransactionManager,
    clock: Arc<dyn Clock>,
}

/// One data operation, owned so it can move onto a task.
#[derive(Debug)]
enum Statement {
    Put { table: String, key: Value, value: Value },
    Get { table: String, key: Value },
    Delete { table: String, key: Value },
}

impl Statement {
    fn table(&self) -> &str {
        match self {
            Self::Put { table, .. } | Self::Get { table, .. } | Self::Delete { table, .. } => table,
        }
    }
}

/// Whether the current operation created its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Runs inside a transaction someone else started.
    Enclosing,
    /// Started an implicit transaction and must commit it.
    Implicit,
}

/// Why an operation step failed.
#[derive(Debug)]
enum StepError {
    /// The statement itself failed; the transaction stays usable.
    Statement(CoreError),
    /// Lock acquisition failed.
    Lock(CoreError),
}

impl From<TableError> for StepError {
    fn from(err: TableError) -> Self {
        Self::Statement(err.into())
    }
}

impl AsyncDb {
    /// Creates a database with the wall clock and FNV-1a table IDs.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_parts(
            config,
            Arc::new(SystemClock::new()),
            Arc::new(Fnv1aHasher::new()),
        )
    }

    /// Creates a database with an explicit clock and table hasher.
    #[must_use]
    pub fn with_parts(
        config: Config,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn TableHasher>,
    ) -> Self {
        let locks = LockManager::with_timeout(config.lock_timeout);
        Self {
            inner: Arc::new(Inner {
                config,
                tables: TableRegistry::new(hasher),
                locks,
                txns: TransactionManager::new(),
                clock,
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the lock manager.
    #[must_use]
    pub fn lock_manager(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Returns the transaction manager.
    #[must_use]
    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.inner.txns
    }

    /// Returns the ID a table name maps to.
    #[must_use]
    pub fn table_id(&self, name: &str) -> TableId {
        self.inner.tables.table_id(name)
    }

    /// Opens a new connection.
    #[must_use]
    pub fn connect(&self) -> Connection {
        let conn = Arc::new(ConnectionContext::new());
        debug!(conn = %conn.id, "connected");
        conn
    }

    /// Closes a connection, rolling back its transaction if it has one.
    pub async fn disconnect(&self, conn: &Connection) -> CoreResult<()> {
        debug!(conn = %conn.id, "disconnecting");
        match self.inner.rollback(conn).await {
            Ok(()) | Err(CoreError::NotInTransaction) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Registers a table under its own name.
    pub fn create_table(&self, _conn: &Connection, table: Arc<dyn Table>) -> CoreResult<()> {
        self.inner.tables.create(table).map(|_| ())
    }

    /// Removes a table.
    ///
    /// Writes to the table still buffered in open transactions fail when
    /// those transactions commit.
    pub fn drop_table(&self, _conn: &Connection, name: &str) -> CoreResult<()> {
        self.inner.tables.drop_table(name).map(|_| ())
    }

    /// Returns the names of all tables, sorted.
    #[must_use]
    pub fn list_tables(&self, _conn: &Connection) -> Vec<String> {
        self.inner.tables.list()
    }

    /// Writes `value` under `key`.
    ///
    /// The key and value are type-checked against the table before any lock
    /// is taken. The write becomes visible to other connections on commit.
    pub fn put(
        &self,
        conn: &Connection,
        table: &str,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Operation<()> {
        let stmt = Statement::Put {
            table: table.to_string(),
            key: key.into(),
            value: value.into(),
        };
        self.spawn(conn, stmt, |_| ())
    }

    /// Reads the value under `key`, seeing this transaction's own writes.
    pub fn get(&self, conn: &Connection, table: &str, key: impl Into<Value>) -> Operation<Value> {
        let stmt = Statement::Get {
            table: table.to_string(),
            key: key.into(),
        };
        self.spawn(conn, stmt, |value| value.unwrap_or(Value::Null))
    }

    /// Deletes `key`. Fails with `KeyNotFound` if it does not exist.
    pub fn delete(&self, conn: &Connection, table: &str, key: impl Into<Value>) -> Operation<()> {
        let stmt = Statement::Delete {
            table: table.to_string(),
            key: key.into(),
        };
        self.spawn(conn, stmt, |_| ())
    }

    /// Starts an explicit transaction.
    pub fn begin_transaction(&self, conn: &Connection) -> CoreResult<TransactionId> {
        self.inner.begin(conn)
    }

    /// Commits the connection's transaction.
    ///
    /// Waits for in-flight operations, applies the log, then releases every
    /// lock. Apply errors are collected and returned together; entries that
    /// were applied before a failure stay applied.
    pub async fn commit_transaction(&self, conn: &Connection) -> CoreResult<()> {
        self.inner.commit(conn, None).await
    }

    /// Discards the connection's transaction.
    pub async fn rollback_transaction(&self, conn: &Connection) -> CoreResult<()> {
        self.inner.rollback(conn).await
    }

    /// Returns true if the connection has an open transaction.
    #[must_use]
    pub fn in_transaction(&self, conn: &Connection) -> bool {
        conn.txn.read().is_some()
    }

    /// Registers `stmt` with the connection's transaction, then spawns it.
    ///
    /// Registration happens before this returns, so a `commit` or
    /// `rollback` issued afterwards waits for the operation.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    fn spawn<T, F>(&self, conn: &Connection, stmt: Statement, finish: F) -> Operation<T>
    where
        T: Send + 'static,
        F: FnOnce(Option<Value>) -> T + Send + 'static,
    {
        let (guard, scope) = match self.inner.enter(conn) {
            Ok(entered) => entered,
            Err(err) => return Operation::rejected(err),
        };
        let inner = Arc::clone(&self.inner);
        let conn = Arc::clone(conn);
        let handle = tokio::spawn(async move {
            inner.run(conn, guard, scope, stmt).await.map(finish)
        });
        Operation {
            state: OperationState::Running(handle),
        }
    }
}

impl std::fmt::Debug for AsyncDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDb")
            .field("config", &self.inner.config)
            .field("tables", &self.inner.tables)
            .field("locks", &self.inner.locks)
            .field("txns", &self.inner.txns)
            .field("clock", &self.inner.clock)
            .finish()
    }
}

impl Inner {
    async fn run(
        &self,
        conn: Connection,
        guard: InFlightGuard,
        scope: Scope,
        stmt: Statement,
    ) -> CoreResult<Option<Value>> {
        let txn = Arc::clone(guard.transaction());
        let result = self.execute(&txn, stmt).await;
        drop(guard);

        match result {
            Ok(out) => self.finish_statement(&conn, &txn, scope).await.map(|()| out),
            Err(StepError::Statement(err)) => {
                let commit = self.finish_statement(&conn, &txn, scope).await.err();
                Err(err.and(commit))
            }
            Err(StepError::Lock(CoreError::LocksReleased)) => Err(CoreError::TerminalState),
            Err(StepError::Lock(err)) => {
                debug!(txn = %txn.id(), error = %err, "aborting after lock failure");
                let abort = self.abort(&conn, &txn).await.err();
                Err(err.and(abort))
            }
        }
    }

    /// Attaches an implicit transaction if needed and registers the
    /// operation with the transaction.
    fn enter(&self, conn: &ConnectionContext) -> CoreResult<(InFlightGuard, Scope)> {
        let mut slot = conn.txn.write();
        let (txn, scope) = match slot.as_ref() {
            Some(txn) => (Arc::clone(txn), Scope::Enclosing),
            None => {
                if !self.config.implicit_transactions {
                    return Err(CoreError::NotInTransaction);
                }
                let txn = self.txns.start_transaction(
                    conn.id,
                    self.clock.now(),
                    TransactionKind::Implicit,
                )?;
                *slot = Some(Arc::clone(&txn));
                (txn, Scope::Implicit)
            }
        };
        let guard = txn.enter()?;
        Ok((guard, scope))
    }

    async fn finish_statement(
        &self,
        conn: &ConnectionContext,
        txn: &Transaction,
        scope: Scope,
    ) -> CoreResult<()> {
        match scope {
            Scope::Enclosing => Ok(()),
            Scope::Implicit => self.commit(conn, Some(txn.id())).await,
        }
    }

    async fn execute(&self, txn: &Transaction, stmt: Statement) -> Result<Option<Value>, StepError> {
        let (table_id, table) = self
            .tables
            .resolve(stmt.table())
            .map_err(StepError::Statement)?;
        let log = txn.log();

        match stmt {
            Statement::Put { key, value, .. } => {
                table.validate_types(&key, Some(&value))?;
                self.acquire(txn, table_id, &key).await?;
                log.add_action(table_id, key, PendingWrite::Put(value));
                Ok(None)
            }
            Statement::Get { key, .. } => {
                table.validate_types(&key, None)?;
                self.acquire(txn, table_id, &key).await?;
                match log.find_last_value(table_id, &key) {
                    Some(PendingWrite::Put(value)) => Ok(Some(value)),
                    Some(PendingWrite::Delete) => Err(TableError::key_not_found(&key).into()),
                    None => read_row(table, key)
                        .await
                        .map(Some)
                        .map_err(StepError::Statement),
                }
            }
            Statement::Delete { key, .. } => {
                table.validate_types(&key, None)?;
                self.acquire(txn, table_id, &key).await?;
                match log.find_last_value(table_id, &key) {
                    Some(PendingWrite::Put(_)) => {}
                    Some(PendingWrite::Delete) => {
                        return Err(TableError::key_not_found(&key).into());
                    }
                    None => {
                        read_row(table, key.clone())
                            .await
                            .map_err(StepError::Statement)?;
                    }
                }
                log.add_action(table_id, key, PendingWrite::Delete);
                Ok(None)
            }
        }
    }

    /// Every data path takes a write lock, reads included.
    async fn acquire(&self, txn: &Transaction, table: TableId, key: &Value) -> Result<(), StepError> {
        self.locks
            .lock(LockMode::Write, txn.id(), txn.timestamp(), table, key)
            .await
            .map_err(StepError::Lock)
    }

    fn begin(&self, conn: &ConnectionContext) -> CoreResult<TransactionId> {
        let mut slot = conn.txn.write();
        if slot.is_some() {
            return Err(CoreError::ConnInTransaction);
        }
        let txn = self
            .txns
            .start_transaction(conn.id, self.clock.now(), TransactionKind::Explicit)?;
        let id = txn.id();
        *slot = Some(txn);
        Ok(id)
    }

    /// Commits the connection's transaction. With `expected` set, commits
    /// only if that transaction is still the attached one.
    async fn commit(&self, conn: &ConnectionContext, expected: Option<TransactionId>) -> CoreResult<()> {
        let txn = {
            let slot = conn.txn.write();
            let txn = match (slot.as_ref(), expected) {
                (Some(txn), Some(id)) if txn.id() != id => return Err(CoreError::TerminalState),
                (Some(txn), _) => txn,
                (None, Some(_)) => return Err(CoreError::TerminalState),
                (None, None) => return Err(CoreError::NotInTransaction),
            };
            txn.begin_terminal(TransactionMode::Committing)?;
            Arc::clone(txn)
        };
        debug!(conn = %conn.id, txn = %txn.id(), "committing");

        txn.drained().await;

        let mut errors = self.apply(&txn).await;
        if let Err(err) = self.locks.release_locks(txn.id()) {
            errors.push(err);
        }
        self.locks.forget(txn.id());
        if let Err(err) = self.detach(conn, &txn) {
            errors.push(err);
        }
        txn.finish();

        match CoreError::join(errors) {
            None => {
                debug!(conn = %conn.id, txn = %txn.id(), "committed");
                Ok(())
            }
            Some(err) => Err(err),
        }
    }

    async fn rollback(&self, conn: &ConnectionContext) -> CoreResult<()> {
        let txn = {
            let slot = conn.txn.write();
            let txn = slot.as_ref().ok_or(CoreError::NotInTransaction)?;
            txn.begin_terminal(TransactionMode::Aborting)?;
            Arc::clone(txn)
        };
        debug!(conn = %conn.id, txn = %txn.id(), "rolling back");
        self.discard(conn, &txn, false).await
    }

    /// Aborts `txn` after one of its operations lost a lock.
    ///
    /// Does nothing if the transaction is no longer attached or is already
    /// finishing. An explicit transaction is restarted under a fresh ID and
    /// timestamp so the connection stays in a transaction.
    async fn abort(&self, conn: &ConnectionContext, txn: &Arc<Transaction>) -> CoreResult<()> {
        {
            let slot = conn.txn.write();
            if !conn_holds(&slot, txn) || txn.begin_terminal(TransactionMode::Aborting).is_err() {
                return Ok(());
            }
        }
        let restart = txn.kind() == TransactionKind::Explicit;
        self.discard(conn, txn, restart).await
    }

    /// Releases locks, drains, and drops the log of an aborting transaction.
    async fn discard(
        &self,
        conn: &ConnectionContext,
        txn: &Arc<Transaction>,
        restart: bool,
    ) -> CoreResult<()> {
        let mut errors = Vec::new();
        if let Err(err) = self.locks.release_locks(txn.id()) {
            errors.push(err);
        }
        txn.drained().await;
        self.locks.forget(txn.id());

        if restart {
            let mut slot = conn.txn.write();
            if conn_holds(&slot, txn) {
                let restarted = self
                    .txns
                    .delete_log(conn.id)
                    .and_then(|()| self.txns.restart_transaction(conn.id, self.clock.now()));
                match restarted {
                    Ok(fresh) => {
                        debug!(conn = %conn.id, old = %txn.id(), txn = %fresh.id(), "transaction restarted");
                        *slot = Some(fresh);
                    }
                    Err(err) => errors.push(err),
                }
            }
        } else if let Err(err) = self.detach(conn, txn) {
            errors.push(err);
        }
        txn.finish();

        CoreError::join(errors).map_or(Ok(()), Err)
    }

    /// Ends `txn` in the transaction manager and detaches it from `conn`.
    fn detach(&self, conn: &ConnectionContext, txn: &Arc<Transaction>) -> CoreResult<()> {
        let mut slot = conn.txn.write();
        if conn_holds(&slot, txn) {
            *slot = None;
        }
        match self.txns.get(conn.id) {
            Some(current) if current.id() == txn.id() => self.txns.end_transaction(conn.id).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Applies every log entry, collecting failures.
    async fn apply(&self, txn: &Transaction) -> Vec<CoreError> {
        let entries = txn.log().entries();
        if entries.is_empty() {
            return Vec::new();
        }
        let plan: Vec<(LogEntry, Option<Arc<dyn Table>>)> = entries
            .into_iter()
            .map(|entry| {
                let table = self.tables.get(entry.table);
                (entry, table)
            })
            .collect();
        let txn_id = txn.id();

        let applied = tokio::task::spawn_blocking(move || {
            let mut errors = Vec::new();
            for (entry, table) in plan {
                let result = match table {
                    None => Err(CoreError::table_not_found(entry.table.to_string())),
                    Some(table) => apply_entry(table.as_ref(), entry.key, entry.write)
                        .map_err(CoreError::from),
                };
                if let Err(err) = result {
                    warn!(txn = %txn_id, table = %entry.table, error = %err, "commit apply failed");
                    errors.push(err);
                }
            }
            errors
        })
        .await;

        match applied {
            Ok(errors) => errors,
            Err(err) => vec![CoreError::task_failed(err.to_string())],
        }
    }
}

fn conn_holds(slot: &Option<Arc<Transaction>>, txn: &Arc<Transaction>) -> bool {
    slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, txn))
}

fn apply_entry(table: &dyn Table, key: Value, write: PendingWrite) -> TableResult<()> {
    match write {
        PendingWrite::Put(value) => table.put(key, value),
        PendingWrite::Delete => table.delete(&key),
    }
}

/// Reads a row on the blocking pool; backends may block.
async fn read_row(table: Arc<dyn Table>, key: Value) -> CoreResult<Value> {
    tokio::task::spawn_blocking(move || table.get(&key))
        .await
        .map_err(|err| CoreError::task_failed(err.to_string()))?
        .map_err(CoreError::from)
}
