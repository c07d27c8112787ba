//! Transaction timestamp sources.

use crate::types::Timestamp;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of transaction start timestamps.
///
/// Timestamps define the priority order used by the lock manager, so an
/// implementation must never hand out the same value twice.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the next timestamp.
    fn now(&self) -> Timestamp;
}

/// Wall-clock nanoseconds since the Unix epoch.
///
/// Readings are forced to be strictly increasing within the process, so
/// two transactions started in the same nanosecond (or across a backwards
/// clock step) still get distinct, ordered timestamps.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicU64,
}

impl SystemClock {
    /// Creates a new system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn wall_nanos() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Self::wall_nanos();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Timestamp::new(next),
                Err(current) => last = current,
            }
        }
    }
}

/// A counter-based clock, for deterministic tests.
#[derive(Debug)]
pub struct LogicalClock {
    next: AtomicU64,
}

impl LogicalClock {
    /// Creates a logical clock whose first reading is `start`.
    #[must_use]
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn system_clock_is_strictly_increasing() {
        let clock = SystemClock::new();
        let mut prev = clock.now();
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(prev.is_older_than(next));
            prev = next;
        }
    }

    #[test]
    fn system_clock_unique_across_threads() {
        let clock = Arc::new(SystemClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || (0..500).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn logical_clock_counts_up() {
        let clock = LogicalClock::starting_at(10);
        assert_eq!(clock.now(), Timestamp::new(10));
        assert_eq!(clock.now(), Timestamp::new(11));
    }
}
