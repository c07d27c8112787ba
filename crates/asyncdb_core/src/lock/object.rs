//! Lock state for a single `(table, key)` pair.

use super::LockMode;
use crate::types::{Timestamp, TransactionId};
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// A transaction holding or requesting a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Holder {
    pub(crate) txn: TransactionId,
    pub(crate) ts: Timestamp,
}

/// How a parked waiter is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Granted,
    Conflict,
    Released,
}

/// Outcome of evaluating a request against the current holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Grant,
    Wait,
    Conflict,
}

#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) holder: Holder,
    pub(crate) mode: LockMode,
    pub(crate) ticket: u64,
    tx: oneshot::Sender<Wake>,
}

impl Waiter {
    pub(crate) fn new(holder: Holder, mode: LockMode, ticket: u64, tx: oneshot::Sender<Wake>) -> Self {
        Self {
            holder,
            mode,
            ticket,
            tx,
        }
    }
}

/// Holders and waiters of one key.
///
/// Invariant: at most one writer, and the writer coexists with readers only
/// when it is the sole reader itself (an upgraded lock).
#[derive(Debug, Default)]
pub(crate) struct ObjectLock {
    writer: Option<Holder>,
    readers: Vec<Holder>,
    queue: VecDeque<Waiter>,
}

impl ObjectLock {
    pub(crate) fn writer(&self) -> Option<TransactionId> {
        self.writer.map(|h| h.txn)
    }

    pub(crate) fn readers(&self) -> Vec<TransactionId> {
        self.readers.iter().map(|h| h.txn).collect()
    }

    pub(crate) fn waiting(&self) -> usize {
        self.queue.len()
    }

    /// Decides a request without changing any state.
    ///
    /// Holders whose transaction is already released are ignored; their
    /// `release_locks` call is still on its way to this key.
    ///
    /// A write blocked by readers waits only when it is older than every
    /// other reader. One older reader is enough to make it conflict.
    pub(crate) fn decide<F>(&self, me: &Holder, mode: LockMode, is_released: F) -> Decision
    where
        F: Fn(TransactionId) -> bool,
    {
        if self.writer.is_some_and(|w| w.txn == me.txn) {
            return Decision::Grant;
        }
        let writer = self.writer.filter(|w| !is_released(w.txn));

        match mode {
            LockMode::Read => {
                if self.readers.iter().any(|r| r.txn == me.txn) {
                    return Decision::Grant;
                }
                match writer {
                    None => Decision::Grant,
                    Some(w) => wait_or_conflict(me, [w]),
                }
            }
            LockMode::Write => match writer {
                Some(w) => wait_or_conflict(me, [w]),
                None => {
                    let blockers: Vec<Holder> = self
                        .readers
                        .iter()
                        .filter(|r| r.txn != me.txn && !is_released(r.txn))
                        .copied()
                        .collect();
                    if blockers.is_empty() {
                        Decision::Grant
                    } else {
                        wait_or_conflict(me, blockers)
                    }
                }
            },
        }
    }

    /// Records `me` as a holder. Granting an already held lock is a no-op.
    pub(crate) fn grant(&mut self, me: Holder, mode: LockMode) {
        if self.writer.is_some_and(|w| w.txn == me.txn) {
            return;
        }
        match mode {
            LockMode::Read => {
                if !self.readers.iter().any(|r| r.txn == me.txn) {
                    self.readers.push(me);
                }
            }
            LockMode::Write => self.writer = Some(me),
        }
    }

    pub(crate) fn enqueue(&mut self, waiter: Waiter) {
        self.queue.push_back(waiter);
    }

    /// Removes a parked waiter by ticket. Returns false if it was already
    /// resolved.
    pub(crate) fn remove_waiter(&mut self, ticket: u64) -> bool {
        let before = self.queue.len();
        self.queue.retain(|w| w.ticket != ticket);
        before != self.queue.len()
    }

    /// Drops everything `txn` holds or waits for on this key and wakes the
    /// queue.
    pub(crate) fn release<F>(&mut self, txn: TransactionId, is_released: F)
    where
        F: Fn(TransactionId) -> bool,
    {
        if self.writer.is_some_and(|w| w.txn == txn) {
            self.writer = None;
        }
        self.readers.retain(|r| r.txn != txn);

        let mut kept = VecDeque::with_capacity(self.queue.len());
        for waiter in self.queue.drain(..) {
            if waiter.holder.txn == txn {
                let _ = waiter.tx.send(Wake::Released);
            } else {
                kept.push_back(waiter);
            }
        }
        self.queue = kept;

        self.promote(is_released);
    }

    /// Resolves queue heads until the head has to keep waiting.
    pub(crate) fn promote<F>(&mut self, is_released: F)
    where
        F: Fn(TransactionId) -> bool,
    {
        while let Some(head) = self.queue.front() {
            if is_released(head.holder.txn) {
                if let Some(waiter) = self.queue.pop_front() {
                    let _ = waiter.tx.send(Wake::Released);
                }
                continue;
            }
            match self.decide(&head.holder, head.mode, &is_released) {
                Decision::Wait => break,
                Decision::Grant => {
                    let Some(waiter) = self.queue.pop_front() else {
                        break;
                    };
                    let had_write = self.writer.is_some_and(|w| w.txn == waiter.holder.txn);
                    let had_read = self.readers.iter().any(|r| r.txn == waiter.holder.txn);
                    self.grant(waiter.holder, waiter.mode);
                    if waiter.tx.send(Wake::Granted).is_err() {
                        // Receiver gave up; undo what this grant added.
                        if !had_write && waiter.mode == LockMode::Write {
                            self.writer = None;
                        }
                        if !had_read && waiter.mode == LockMode::Read {
                            self.readers.retain(|r| r.txn != waiter.holder.txn);
                        }
                    }
                }
                Decision::Conflict => {
                    if let Some(waiter) = self.queue.pop_front() {
                        let _ = waiter.tx.send(Wake::Conflict);
                    }
                }
            }
        }
    }
}

/// Older requesters wait for younger blockers; anything else conflicts.
fn wait_or_conflict<I>(me: &Holder, blockers: I) -> Decision
where
    I: IntoIterator<Item = Holder>,
{
    if blockers.into_iter().all(|b| me.ts.is_older_than(b.ts)) {
        Decision::Wait
    } else {
        Decision::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn holder(ts: u64) -> Holder {
        Holder {
            txn: TransactionId::new(),
            ts: Timestamp::new(ts),
        }
    }

    fn never(_: TransactionId) -> bool {
        false
    }

    fn park(lock: &mut ObjectLock, h: Holder, mode: LockMode, ticket: u64) -> oneshot::Receiver<Wake> {
        let (tx, rx) = oneshot::channel();
        lock.enqueue(Waiter::new(h, mode, ticket, tx));
        rx
    }

    #[test]
    fn free_lock_grants() {
        let lock = ObjectLock::default();
        let a = holder(1);
        assert_eq!(lock.decide(&a, LockMode::Read, never), Decision::Grant);
        assert_eq!(lock.decide(&a, LockMode::Write, never), Decision::Grant);
    }

    #[test]
    fn write_priority() {
        let mut lock = ObjectLock::default();
        let a = holder(1);
        lock.grant(a, LockMode::Write);

        assert_eq!(lock.decide(&a, LockMode::Write, never), Decision::Grant);
        assert_eq!(lock.decide(&a, LockMode::Read, never), Decision::Grant);
        assert_eq!(lock.decide(&holder(2), LockMode::Write, never), Decision::Conflict);
        assert_eq!(lock.decide(&holder(2), LockMode::Read, never), Decision::Conflict);
        assert_eq!(lock.decide(&holder(0), LockMode::Write, never), Decision::Wait);
        assert_eq!(lock.decide(&holder(0), LockMode::Read, never), Decision::Wait);
    }

    #[test]
    fn equal_timestamp_conflicts() {
        let mut lock = ObjectLock::default();
        lock.grant(holder(5), LockMode::Write);
        assert_eq!(lock.decide(&holder(5), LockMode::Write, never), Decision::Conflict);
    }

    #[test]
    fn readers_share_and_upgrade() {
        let mut lock = ObjectLock::default();
        let a = holder(3);
        let b = holder(4);
        lock.grant(a, LockMode::Read);
        assert_eq!(lock.decide(&b, LockMode::Read, never), Decision::Grant);
        lock.grant(b, LockMode::Read);
        lock.grant(b, LockMode::Read);
        assert_eq!(lock.readers().len(), 2);

        // a is older than the other reader, so it may wait for the upgrade.
        assert_eq!(lock.decide(&a, LockMode::Write, never), Decision::Wait);
        // b is younger than reader a.
        assert_eq!(lock.decide(&b, LockMode::Write, never), Decision::Conflict);

        lock.release(b.txn, never);
        assert_eq!(lock.decide(&a, LockMode::Write, never), Decision::Grant);
        lock.grant(a, LockMode::Write);
        assert_eq!(lock.writer(), Some(a.txn));
        assert_eq!(lock.readers(), vec![a.txn]);
    }

    #[test]
    fn write_waits_only_for_younger_readers() {
        let mut lock = ObjectLock::default();
        lock.grant(holder(2), LockMode::Read);
        lock.grant(holder(6), LockMode::Read);

        assert_eq!(lock.decide(&holder(4), LockMode::Write, never), Decision::Conflict);
        assert_eq!(lock.decide(&holder(1), LockMode::Write, never), Decision::Wait);
    }

    #[test]
    fn released_holders_are_ignored() {
        let mut lock = ObjectLock::default();
        let a = holder(1);
        lock.grant(a, LockMode::Write);
        let gone = |t: TransactionId| t == a.txn;
        assert_eq!(lock.decide(&holder(9), LockMode::Write, gone), Decision::Grant);
    }

    #[test]
    fn release_promotes_head() {
        let mut lock = ObjectLock::default();
        let young = holder(10);
        lock.grant(young, LockMode::Write);

        let old = holder(1);
        let mut rx = park(&mut lock, old, LockMode::Write, 1);
        lock.release(young.txn, never);

        assert_eq!(rx.try_recv().unwrap(), Wake::Granted);
        assert_eq!(lock.writer(), Some(old.txn));
        assert_eq!(lock.waiting(), 0);
    }

    #[test]
    fn release_wakes_all_compatible_readers() {
        let mut lock = ObjectLock::default();
        let young = holder(10);
        lock.grant(young, LockMode::Write);

        let r1 = holder(1);
        let r2 = holder(2);
        let mut rx1 = park(&mut lock, r1, LockMode::Read, 1);
        let mut rx2 = park(&mut lock, r2, LockMode::Read, 2);
        lock.release(young.txn, never);

        assert_eq!(rx1.try_recv().unwrap(), Wake::Granted);
        assert_eq!(rx2.try_recv().unwrap(), Wake::Granted);
        assert_eq!(lock.readers().len(), 2);
    }

    #[test]
    fn head_that_lost_priority_conflicts() {
        let mut lock = ObjectLock::default();
        let holder_a = holder(10);
        lock.grant(holder_a, LockMode::Write);

        let first = holder(3);
        let second = holder(5);
        let mut rx1 = park(&mut lock, first, LockMode::Write, 1);
        let mut rx2 = park(&mut lock, second, LockMode::Write, 2);
        lock.release(holder_a.txn, never);

        // first wins the lock; second is younger than the new writer.
        assert_eq!(rx1.try_recv().unwrap(), Wake::Granted);
        assert_eq!(rx2.try_recv().unwrap(), Wake::Conflict);
        assert_eq!(lock.waiting(), 0);
    }

    #[test]
    fn releasing_waiter_fails_its_own_requests() {
        let mut lock = ObjectLock::default();
        lock.grant(holder(10), LockMode::Write);
        let waiter = holder(1);
        let mut rx = park(&mut lock, waiter, LockMode::Write, 1);
        lock.release(waiter.txn, never);
        assert_eq!(rx.try_recv().unwrap(), Wake::Released);
        assert_eq!(lock.waiting(), 0);
    }

    #[test]
    fn dropped_receiver_undoes_grant() {
        let mut lock = ObjectLock::default();
        let young = holder(10);
        lock.grant(young, LockMode::Write);
        let rx = park(&mut lock, holder(1), LockMode::Write, 1);
        drop(rx);
        lock.release(young.txn, never);
        assert_eq!(lock.writer(), None);
    }

    fn assert_exclusive(lock: &ObjectLock) {
        if let Some(writer) = lock.writer() {
            assert!(lock.readers().iter().all(|r| *r == writer));
        }
    }

    proptest! {
        #[test]
        fn writer_is_exclusive(steps in prop::collection::vec((0usize..4, any::<bool>(), any::<bool>()), 1..64)) {
            let txns: Vec<Holder> = (0..4).map(|i| holder(i as u64 + 1)).collect();
            let mut lock = ObjectLock::default();
            let mut parked = Vec::new();

            for (ticket, (who, write, release)) in steps.into_iter().enumerate() {
                let me = txns[who];
                if release {
                    lock.release(me.txn, never);
                } else {
                    let mode = if write { LockMode::Write } else { LockMode::Read };
                    match lock.decide(&me, mode, never) {
                        Decision::Grant => lock.grant(me, mode),
                        Decision::Wait => parked.push(park(&mut lock, me, mode, ticket as u64)),
                        Decision::Conflict => {}
                    }
                }
                assert_exclusive(&lock);
            }
        }
    }

    #[test]
    fn remove_waiter_by_ticket() {
        let mut lock = ObjectLock::default();
        lock.grant(holder(10), LockMode::Write);
        let _rx = park(&mut lock, holder(1), LockMode::Write, 7);
        assert!(lock.remove_waiter(7));
        assert!(!lock.remove_waiter(7));
    }
}
