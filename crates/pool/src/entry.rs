//! Connection identity and idle entries.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::{Duration, Instant};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a pooled connection.
///
/// Assigned by the pool when the connection is opened and unique for the
/// lifetime of the process, so handles from different pools never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(u64);

impl ConnId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connection sitting in the idle queue.
pub(crate) struct IdleEntry<C> {
    id: ConnId,
    conn: C,
    became_idle_at: Instant,
}

impl<C> IdleEntry<C> {
    pub(crate) fn new(id: ConnId, conn: C, now: Instant) -> Self {
        Self {
            id,
            conn,
            became_idle_at: now,
        }
    }

    pub(crate) fn id(&self) -> ConnId {
        self.id
    }

    /// Strictly older than `timeout` at `now`.
    pub(crate) fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.became_idle_at) > timeout
    }

    pub(crate) fn into_parts(self) -> (ConnId, C) {
        (self.id, self.conn)
    }
}
