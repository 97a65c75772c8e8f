//! Idle eviction: the sweep itself and the background task that runs it.

use std::sync::Weak;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connector::Connector;
use crate::pool::{close_quietly, CloseTicket, PoolInner};

impl<K: Connector> PoolInner<K> {
    /// Close idle connections beyond the `min_idle` floor that have been idle
    /// longer than `idle_timeout`.
    ///
    /// Entries are taken out of the idle queue under the lock, so a
    /// concurrent acquire either gets an entry or the sweep does, never
    /// both. The count drops only after each close has been attempted.
    pub(crate) async fn evict_idle(&self) -> usize {
        let evicted = self.state.lock().evict(
            Instant::now(),
            self.config.min_idle,
            self.config.idle_timeout,
        );
        let count = evicted.len();
        if count == 0 {
            return 0;
        }

        let _ticket = CloseTicket::new(self, count);
        for entry in evicted {
            tracing::debug!(conn = %entry.id(), "evicting idle connection");
            let (id, conn) = entry.into_parts();
            close_quietly(&self.connector, id, conn).await;
        }
        count
    }
}

/// Spawn the periodic sweep.
///
/// The task holds only a weak reference, so it ends when the pool is dropped
/// as well as when `shutdown` is cancelled.
pub(crate) fn spawn<K: Connector>(
    pool: Weak<PoolInner<K>>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
        let mut ticker = time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.cancelled() => break,
            }

            let Some(pool) = pool.upgrade() else {
                break;
            };
            let evicted = pool.evict_idle().await;
            if evicted > 0 {
                let stats = pool.state.lock().stats();
                tracing::debug!(evicted, idle = stats.idle, total = stats.total, "idle sweep finished");
            }
        }
        tracing::trace!("evictor stopped");
    })
}
