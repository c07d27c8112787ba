//! Timestamp-priority lock manager.
//!
//! Every `(table, key)` pair has its own [`ObjectLock`](object) holding the
//! current write holder, the read holders and a FIFO queue of parked
//! waiters. Priority is decided by transaction start timestamp:
//!
//! - an **older** requester (smaller timestamp) that conflicts with a
//!   younger holder parks in the queue until the holder releases;
//! - a **younger** requester that conflicts with an older (or equal) holder
//!   fails immediately with [`CoreError::LockConflict`](crate::CoreError).
//!
//! Waits therefore only ever point from older to younger transactions, so
//! no cycle of waiters can form.
//!
//! Locking is a two-phase protocol: under the per-key mutex the request is
//! decided and, if it must wait, a one-shot channel is registered in the
//! queue; the mutex is dropped before the channel is awaited. The sending
//! side is always [`LockManager::release_locks`] (or a timeout removing the
//! waiter itself), so a parked request resolves exactly once.

mod manager;
mod object;

pub use manager::{LockManager, LockSnapshot};

use std::fmt;

/// Lock mode requested on a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    /// Shared lock.
    Read,
    /// Exclusive lock.
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}
