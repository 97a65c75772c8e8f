//! Pool statistics

/// Point-in-time snapshot of the pool's counters.
///
/// Between operations `total == idle + outstanding`; while an `open` or
/// `close` is in flight the difference shows up in `opening` / `closing`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured maximum number of connections.
    pub capacity: usize,
    /// Connections that currently exist or are being opened/closed.
    pub total: usize,
    /// Connections waiting in the idle queue.
    pub idle: usize,
    /// Connections borrowed by callers.
    pub outstanding: usize,
    /// Admission units reserved for an `open` in flight.
    pub opening: usize,
    /// Evicted or drained connections whose `close` is in flight.
    pub closing: usize,
    /// Callers parked in `acquire`.
    pub waiters: usize,
}

impl PoolStats {
    /// Room left to open new connections.
    #[must_use]
    pub fn headroom(&self) -> usize {
        self.capacity.saturating_sub(self.total)
    }

    /// `true` when every slot is in use and nothing is idle.
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.idle == 0 && self.total >= self.capacity
    }
}
