//! # AsyncDB Core
//!
//! Concurrency-control core of AsyncDB, an in-process transactional
//! key/value database.
//!
//! This crate provides:
//! - A timestamp-priority [lock manager](lock) with per-key read/write locks
//! - A [transaction manager](transaction) with per-connection write buffers
//! - The [`AsyncDb`] coordinator tying locking, buffering and commit together
//!
//! Tables themselves live behind the [`asyncdb_table::Table`] capability.
//!
//! ## Isolation
//!
//! Every key an operation touches is locked until its transaction ends, and
//! writes are buffered until commit, so other connections never observe
//! uncommitted data. Younger transactions that conflict with older ones fail
//! fast with [`CoreError::LockConflict`] and are expected to retry.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod database;
mod error;
mod hash;
pub mod lock;
mod registry;
pub mod transaction;
mod types;

pub use clock::{Clock, LogicalClock, SystemClock};
pub use config::Config;
pub use database::{AsyncDb, Connection, ConnectionContext, Operation};
pub use error::{CoreError, CoreResult};
pub use hash::{Fnv1aHasher, TableHasher};
pub use lock::{LockManager, LockMode, LockSnapshot};
pub use registry::TableRegistry;
pub use transaction::{
    InFlightGuard, LogEntry, PendingWrite, Transaction, TransactionKind, TransactionLog,
    TransactionManager, TransactionMode,
};
pub use types::{ConnectionId, TableId, Timestamp, TransactionId};
