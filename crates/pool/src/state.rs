//! The pool's single lock-protected state object.
//!
//! Everything that must stay consistent (`idle`, `outstanding`, the total
//! count and the waiter queue) lives here and is mutated only through
//! `&mut PoolState`, i.e. while holding the pool mutex. None of these
//! methods block or await.

use std::collections::{HashSet, VecDeque};

use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

use crate::entry::{ConnId, IdleEntry};
use crate::stats::PoolStats;

pub(crate) type WaiterId = u64;

/// What a parked acquirer is woken with.
pub(crate) enum Grant<C> {
    /// A released connection, already marked outstanding.
    Connection(ConnId, C),
    /// One reserved unit of headroom; the waiter opens on its own behalf.
    Headroom,
}

/// Outcome of a checkout attempt.
pub(crate) enum Checkout<C> {
    /// Oldest idle connection, now outstanding.
    Idle(ConnId, C),
    /// Headroom reserved; the caller must open and then call
    /// [`PoolState::admitted`] or [`PoolState::admission_failed`].
    Admit,
    /// Saturated; parked at the back of the waiter queue.
    Wait(WaiterId, oneshot::Receiver<Grant<C>>),
    /// The pool is shut down.
    Closed,
}

struct Waiter<C> {
    id: WaiterId,
    tx: oneshot::Sender<Grant<C>>,
}

/// Invariant: `total == idle.len() + outstanding.len() + opening + closing`,
/// and `total <= capacity`. A non-empty waiter queue implies an empty idle
/// queue and no headroom.
pub(crate) struct PoolState<C> {
    capacity: usize,
    idle: VecDeque<IdleEntry<C>>,
    outstanding: HashSet<ConnId>,
    total: usize,
    opening: usize,
    closing: usize,
    waiters: VecDeque<Waiter<C>>,
    next_waiter: WaiterId,
    closed: bool,
}

impl<C> PoolState<C> {
    pub(crate) fn new(capacity: usize, warm: impl IntoIterator<Item = IdleEntry<C>>) -> Self {
        let idle: VecDeque<_> = warm.into_iter().collect();
        debug_assert!(idle.len() <= capacity);
        Self {
            capacity,
            total: idle.len(),
            idle,
            outstanding: HashSet::with_capacity(capacity),
            opening: 0,
            closing: 0,
            waiters: VecDeque::new(),
            next_waiter: 0,
            closed: false,
        }
    }

    /// Idle reuse first, then admission, then a place in the queue.
    pub(crate) fn checkout(&mut self) -> Checkout<C> {
        if self.closed {
            return Checkout::Closed;
        }
        if let Some(entry) = self.idle.pop_front() {
            let (id, conn) = entry.into_parts();
            self.outstanding.insert(id);
            return Checkout::Idle(id, conn);
        }
        if self.total < self.capacity {
            self.reserve();
            return Checkout::Admit;
        }

        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter;
        self.next_waiter = self.next_waiter.wrapping_add(1);
        self.waiters.push_back(Waiter { id, tx });
        Checkout::Wait(id, rx)
    }

    fn reserve(&mut self) {
        self.total += 1;
        self.opening += 1;
    }

    pub(crate) fn admitted(&mut self, id: ConnId) {
        self.opening -= 1;
        self.outstanding.insert(id);
    }

    pub(crate) fn admission_failed(&mut self) {
        self.opening -= 1;
        self.total -= 1;
        self.offer_headroom();
    }

    /// Hand free headroom to waiters, oldest first.
    fn offer_headroom(&mut self) {
        if self.closed {
            return;
        }
        while self.total < self.capacity {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            self.reserve();
            if waiter.tx.send(Grant::Headroom).is_err() {
                self.opening -= 1;
                self.total -= 1;
            }
        }
    }

    pub(crate) fn is_outstanding(&self, id: ConnId) -> bool {
        self.outstanding.contains(&id)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Check a validated connection back in.
    ///
    /// Returns the connection if the pool is closed; the caller closes it
    /// and reports back through [`PoolState::finish_close`].
    pub(crate) fn recycle(&mut self, id: ConnId, conn: C, now: Instant) -> Option<C> {
        self.outstanding.remove(&id);
        self.put(id, conn, now)
    }

    /// Move an invalid outstanding connection to `closing` while it is
    /// closed ahead of its replacement.
    pub(crate) fn retire(&mut self, id: ConnId) {
        if self.outstanding.remove(&id) {
            self.closing += 1;
        }
    }

    /// A retired connection has been closed. Returns `true` if its slot
    /// is now reserved for the replacement open, `false` if the pool
    /// closed meanwhile and the slot is gone.
    pub(crate) fn reopen(&mut self) -> bool {
        self.closing -= 1;
        if self.closed {
            self.total -= 1;
            return false;
        }
        self.opening += 1;
        true
    }

    /// Check in the replacement opened by [`PoolState::reopen`].
    pub(crate) fn replaced(&mut self, id: ConnId, conn: C, now: Instant) -> Option<C> {
        self.opening -= 1;
        self.put(id, conn, now)
    }

    /// Drop an outstanding connection from the count for good.
    pub(crate) fn shrink(&mut self, id: ConnId) {
        if self.outstanding.remove(&id) {
            self.total -= 1;
            self.offer_headroom();
        }
    }

    fn put(&mut self, id: ConnId, mut conn: C, now: Instant) -> Option<C> {
        if self.closed {
            self.closing += 1;
            return Some(conn);
        }
        while let Some(waiter) = self.waiters.pop_front() {
            self.outstanding.insert(id);
            let Err(grant) = waiter.tx.send(Grant::Connection(id, conn)) else {
                return None;
            };
            self.outstanding.remove(&id);
            let Grant::Connection(_, returned) = grant else {
                unreachable!("put only sends connections");
            };
            conn = returned;
        }
        self.idle.push_back(IdleEntry::new(id, conn, now));
        None
    }

    /// Remove idle entries past the `min_idle` floor that have been idle
    /// longer than `idle_timeout`. The oldest `min_idle` entries are never
    /// touched. Removed entries count as `closing` until
    /// [`PoolState::finish_close`].
    pub(crate) fn evict(
        &mut self,
        now: Instant,
        min_idle: usize,
        idle_timeout: Duration,
    ) -> Vec<IdleEntry<C>> {
        let mut evicted = Vec::new();
        let mut kept = VecDeque::with_capacity(self.idle.len());
        for (position, entry) in std::mem::take(&mut self.idle).into_iter().enumerate() {
            if position >= min_idle && entry.is_expired(now, idle_timeout) {
                evicted.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.idle = kept;
        self.closing += evicted.len();
        evicted
    }

    /// `n` connections taken out through `evict`, `close` or a closed-pool
    /// check-in have had their close attempted.
    pub(crate) fn finish_close(&mut self, n: usize) {
        self.closing -= n;
        self.total -= n;
        self.offer_headroom();
    }

    /// Mark the pool closed, wake every waiter with a dropped sender and
    /// hand back the idle connections for closing.
    pub(crate) fn close(&mut self) -> Vec<IdleEntry<C>> {
        self.closed = true;
        self.waiters.clear();
        let drained: Vec<_> = self.idle.drain(..).collect();
        self.closing += drained.len();
        drained
    }

    /// Remove a waiter registration. `false` means it was already served.
    pub(crate) fn cancel_waiter(&mut self, id: WaiterId) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(position) => {
                self.waiters.remove(position);
                true
            }
            None => false,
        }
    }

    /// Take back a grant whose waiter went away before using it.
    pub(crate) fn reclaim(&mut self, grant: Grant<C>, now: Instant) -> Option<(ConnId, C)> {
        match grant {
            Grant::Connection(id, conn) => self.recycle(id, conn, now).map(|conn| (id, conn)),
            Grant::Headroom => {
                self.admission_failed();
                None
            }
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            total: self.total,
            idle: self.idle.len(),
            outstanding: self.outstanding.len(),
            opening: self.opening,
            closing: self.closing,
            waiters: self.waiters.len(),
        }
    }

    #[cfg(test)]
    fn idle_ids(&self) -> Vec<ConnId> {
        self.idle.iter().map(IdleEntry::id).collect()
    }
}
