//! Transaction state and the per-connection transaction manager.
//!
//! A [`Transaction`] carries the start timestamp used for lock priority,
//! its lifecycle mode, a counter of in-flight operations and the
//! [`TransactionLog`] of buffered writes. Writes stay in the log, invisible
//! to every other transaction, until commit applies them to the tables.

mod log;
mod manager;
mod state;

pub use log::{LogEntry, PendingWrite, TransactionLog};
pub use manager::TransactionManager;
pub use state::{InFlightGuard, Transaction, TransactionKind, TransactionMode};
