//! Engine configuration.

use std::time::Duration;

/// Configuration for an [`AsyncDb`](crate::AsyncDb) instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether data operations issued outside `begin`/`commit` run in an
    /// implicit, auto-committed transaction. When off they fail with
    /// `NotInTransaction`.
    pub implicit_transactions: bool,

    /// How long a parked lock waiter may wait before giving up.
    ///
    /// `None` waits until the blocking transaction releases.
    pub lock_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            implicit_transactions: true,
            lock_timeout: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether implicit transactions are allowed.
    #[must_use]
    pub const fn implicit_transactions(mut self, value: bool) -> Self {
        self.implicit_transactions = value;
        self
    }

    /// Requires every data operation to run inside an explicit transaction.
    #[must_use]
    pub const fn explicit_only(self) -> Self {
        self.implicit_transactions(false)
    }

    /// Sets the lock wait deadline.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Removes the lock wait deadline.
    #[must_use]
    pub const fn no_lock_timeout(mut self) -> Self {
        self.lock_timeout = None;
        self
    }
}
