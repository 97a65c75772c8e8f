//! Bounded, FIFO-fair connection pool with validation on release.
//!
//! `Pool<K>` calls `K::open`, `K::is_valid` and `K::close` directly. All
//! bookkeeping goes through one `parking_lot::Mutex<PoolState>`; the lock is
//! never held across an `.await`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::connection::PooledConnection;
use crate::connector::Connector;
use crate::entry::{ConnId, IdleEntry};
use crate::error::{Error, Result};
use crate::evictor;
use crate::state::{Checkout, Grant, PoolState, WaiterId};
use crate::stats::PoolStats;

// ---------------------------------------------------------------------------
// Release outcome
// ---------------------------------------------------------------------------

/// What happened to a connection handed to [`Pool::release`].
#[must_use]
pub enum Release<K: Connector> {
    /// Valid; back in the idle queue or handed to a waiter.
    Recycled,
    /// Invalid; closed and replaced by a freshly opened connection.
    Replaced,
    /// Invalid, and the replacement could not be opened. The pool is one
    /// connection smaller until a later acquire re-admits it.
    Shrunk(Error),
    /// The pool is shut down; the connection was closed.
    Discarded,
    /// Not a connection this pool has lent out. Nothing changed and the
    /// handle is given back.
    Rejected(PooledConnection<K>),
}

impl<K: Connector> Release<K> {
    /// Whether the handle was recognised as outstanding.
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    /// Failure to keep the connection count while processing the release.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Shrunk(err) => Some(err),
            _ => None,
        }
    }
}

impl<K: Connector> fmt::Debug for Release<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recycled => f.write_str("Recycled"),
            Self::Replaced => f.write_str("Replaced"),
            Self::Shrunk(err) => f.debug_tuple("Shrunk").field(err).finish(),
            Self::Discarded => f.write_str("Discarded"),
            Self::Rejected(conn) => f.debug_tuple("Rejected").field(conn).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// Inner shared state for the pool.
pub(crate) struct PoolInner<K: Connector> {
    pub(crate) connector: K,
    backend: K::Config,
    pub(crate) config: PoolConfig,
    pub(crate) state: Mutex<PoolState<K::Connection>>,
    shutdown: CancellationToken,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl<K: Connector> Drop for PoolInner<K> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Close a connection, logging and swallowing failures.
pub(crate) async fn close_quietly<K: Connector>(connector: &K, id: ConnId, conn: K::Connection) {
    if let Err(err) = connector.close(conn).await {
        tracing::warn!(conn = %id, error = %err, "failed to close connection");
    }
}

/// Settles `count` closing connections when dropped, even if the closes
/// themselves were cancelled.
pub(crate) struct CloseTicket<'a, K: Connector> {
    inner: &'a PoolInner<K>,
    count: usize,
}

impl<'a, K: Connector> CloseTicket<'a, K> {
    pub(crate) fn new(inner: &'a PoolInner<K>, count: usize) -> Self {
        Self { inner, count }
    }
}

impl<K: Connector> Drop for CloseTicket<'_, K> {
    fn drop(&mut self) {
        if self.count > 0 {
            self.inner.state.lock().finish_close(self.count);
        }
    }
}

/// Releases a reserved admission unit unless the open completed.
struct Admission<'a, K: Connector> {
    inner: &'a PoolInner<K>,
    armed: bool,
}

impl<K: Connector> Drop for Admission<'_, K> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().admission_failed();
        }
    }
}

/// Frees the slot of a connection whose return was abandoned midway.
struct PendingReturn<'a, K: Connector> {
    inner: &'a PoolInner<K>,
    id: ConnId,
    armed: bool,
}

impl<K: Connector> Drop for PendingReturn<'_, K> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().shrink(self.id);
        }
    }
}

/// A registration in the waiter queue. Dropping it unsettled removes the
/// registration, or passes on a grant that already arrived.
struct Parked<'a, K: Connector> {
    inner: &'a Arc<PoolInner<K>>,
    waiter: WaiterId,
    rx: oneshot::Receiver<Grant<K::Connection>>,
    settled: bool,
}

impl<K: Connector> Drop for Parked<'_, K> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let late = {
            let mut state = self.inner.state.lock();
            if state.cancel_waiter(self.waiter) {
                None
            } else {
                self.rx.try_recv().ok()
            }
        };
        if let Some(grant) = late {
            self.inner.reclaim(grant);
        }
    }
}

impl<K: Connector> PoolInner<K> {
    async fn open(&self) -> Result<K::Connection> {
        self.connector.open(&self.backend).await.map_err(|err| {
            tracing::warn!(error = %err, "failed to open connection");
            Error::backend(err)
        })
    }

    /// Validate and check in a connection that is still outstanding.
    pub(crate) async fn give_back(&self, id: ConnId, mut conn: K::Connection) -> Release<K> {
        let mut pending = PendingReturn {
            inner: self,
            id,
            armed: true,
        };

        if self.connector.is_valid(&mut conn).await {
            let leftover = self.state.lock().recycle(id, conn, Instant::now());
            pending.armed = false;
            return match leftover {
                None => {
                    tracing::trace!(conn = %id, "connection returned to pool");
                    Release::Recycled
                }
                Some(conn) => self.discard(id, conn).await,
            };
        }

        tracing::debug!(conn = %id, "connection failed validation; replacing");
        self.state.lock().retire(id);
        pending.armed = false;

        let mut ticket = CloseTicket::new(self, 1);
        close_quietly(&self.connector, id, conn).await;
        ticket.count = 0;
        if !self.state.lock().reopen() {
            return Release::Discarded;
        }

        let mut admission = Admission {
            inner: self,
            armed: true,
        };
        match self.open().await {
            Ok(fresh) => {
                let fresh_id = ConnId::next();
                let leftover = self.state.lock().replaced(fresh_id, fresh, Instant::now());
                admission.armed = false;
                match leftover {
                    None => {
                        tracing::debug!(old = %id, new = %fresh_id, "replaced invalid connection");
                        Release::Replaced
                    }
                    Some(conn) => self.discard(fresh_id, conn).await,
                }
            }
            Err(err) => {
                drop(admission);
                tracing::warn!(conn = %id, "replacement failed; pool shrinks by one");
                Release::Shrunk(err)
            }
        }
    }

    /// Close a connection the closed pool handed back (already `closing`).
    async fn discard(&self, id: ConnId, conn: K::Connection) -> Release<K> {
        let _ticket = CloseTicket::new(self, 1);
        close_quietly(&self.connector, id, conn).await;
        Release::Discarded
    }

    /// Pass on a grant whose waiter went away.
    fn reclaim(self: &Arc<Self>, grant: Grant<K::Connection>) {
        let leftover = self.state.lock().reclaim(grant, Instant::now());
        let Some((id, conn)) = leftover else {
            return;
        };
        // the pool closed while the grant was in flight
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                drop(handle.spawn(async move {
                    let _ticket = CloseTicket::new(&inner, 1);
                    close_quietly(&inner.connector, id, conn).await;
                }));
            }
            Err(_) => {
                drop(conn);
                self.state.lock().finish_close(1);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pool<K>
// ---------------------------------------------------------------------------

/// Bounded connection pool.
///
/// Holds at most `capacity` connections, idle and borrowed together. Idle
/// connections are reused oldest first; when none are idle and there is
/// headroom a new one is opened; otherwise callers queue in arrival order
/// until a connection is released or their timeout elapses.
pub struct Pool<K: Connector> {
    inner: Arc<PoolInner<K>>,
}

impl<K: Connector> Clone for Pool<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Connector> fmt::Debug for Pool<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.inner.state.lock().stats();
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("stats", &stats)
            .finish()
    }
}

impl<K: Connector> Pool<K> {
    /// Open `capacity` connections and start the background evictor.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// `Configuration` if `config` is invalid; `BackendUnavailable` if any
    /// initial open fails, in which case the connections opened so far are
    /// closed first.
    pub async fn new(connector: K, backend: K::Config, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let mut warm = Vec::with_capacity(config.capacity);
        for _ in 0..config.capacity {
            match connector.open(&backend).await {
                Ok(conn) => warm.push((ConnId::next(), conn)),
                Err(err) => {
                    tracing::warn!(
                        opened = warm.len(),
                        capacity = config.capacity,
                        error = %err,
                        "failed to open initial connections"
                    );
                    for (id, conn) in warm {
                        close_quietly(&connector, id, conn).await;
                    }
                    return Err(Error::backend(err));
                }
            }
        }

        let now = Instant::now();
        let entries = warm
            .into_iter()
            .map(|(id, conn)| IdleEntry::new(id, conn, now));
        let state = PoolState::new(config.capacity, entries);

        let inner = Arc::new(PoolInner {
            connector,
            backend,
            config,
            state: Mutex::new(state),
            shutdown: CancellationToken::new(),
            evictor: Mutex::new(None),
        });
        let handle = evictor::spawn(
            Arc::downgrade(&inner),
            inner.config.eviction_interval,
            inner.shutdown.clone(),
        );
        *inner.evictor.lock() = Some(handle);

        tracing::debug!(capacity = inner.config.capacity, "connection pool ready");
        Ok(Self { inner })
    }

    /// Acquire with the configured `acquire_timeout`.
    pub async fn get(&self) -> Result<PooledConnection<K>> {
        self.acquire(self.inner.config.acquire_timeout).await
    }

    /// Borrow a connection, waiting at most `timeout` when the pool is
    /// saturated.
    ///
    /// # Errors
    /// `AcquireTimeout` if nothing became available in time,
    /// `BackendUnavailable` if a new connection had to be opened and that
    /// failed, `Closed` after [`Pool::shutdown`].
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection<K>> {
        let deadline = Instant::now().checked_add(timeout);
        let checkout = self.inner.state.lock().checkout();
        match checkout {
            Checkout::Idle(id, conn) => {
                tracing::trace!(conn = %id, "reusing idle connection");
                Ok(PooledConnection::new(id, conn, &self.inner))
            }
            Checkout::Admit => self.open_admitted().await,
            Checkout::Wait(waiter, rx) => self.wait(waiter, rx, deadline, timeout).await,
            Checkout::Closed => Err(Error::Closed),
        }
    }

    async fn open_admitted(&self) -> Result<PooledConnection<K>> {
        let mut admission = Admission {
            inner: &self.inner,
            armed: true,
        };
        let conn = self.inner.open().await?;
        let id = ConnId::next();
        self.inner.state.lock().admitted(id);
        admission.armed = false;

        tracing::debug!(conn = %id, "opened connection");
        Ok(PooledConnection::new(id, conn, &self.inner))
    }

    async fn wait(
        &self,
        waiter: WaiterId,
        rx: oneshot::Receiver<Grant<K::Connection>>,
        deadline: Option<Instant>,
        timeout: Duration,
    ) -> Result<PooledConnection<K>> {
        let mut parked = Parked {
            inner: &self.inner,
            waiter,
            rx,
            settled: false,
        };
        tracing::trace!(waiter, "pool saturated; waiting for a connection");

        let received = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, &mut parked.rx).await,
            None => Ok((&mut parked.rx).await),
        };

        let grant = match received {
            Ok(Ok(grant)) => grant,
            Ok(Err(_)) => {
                parked.settled = true;
                return Err(Error::Closed);
            }
            Err(_elapsed) => {
                let still_queued;
                let late = {
                    let mut state = self.inner.state.lock();
                    still_queued = state.cancel_waiter(waiter);
                    if still_queued {
                        None
                    } else {
                        parked.rx.try_recv().ok()
                    }
                };
                parked.settled = true;
                match late {
                    // served just as the deadline passed
                    Some(grant) => grant,
                    None if still_queued => {
                        tracing::debug!(waiter, ?timeout, "timed out waiting for a connection");
                        return Err(Error::acquire_timeout(timeout, self.inner.config.capacity));
                    }
                    None => return Err(Error::Closed),
                }
            }
        };
        parked.settled = true;

        match grant {
            Grant::Connection(id, conn) => Ok(PooledConnection::new(id, conn, &self.inner)),
            Grant::Headroom => {
                let Some(deadline) = deadline else {
                    return self.open_admitted().await;
                };
                // the reservation passes on when the open is dropped
                match tokio::time::timeout_at(deadline, self.open_admitted()).await {
                    Ok(opened) => opened,
                    Err(_elapsed) => {
                        tracing::debug!(waiter, ?timeout, "timed out opening a granted connection");
                        Err(Error::acquire_timeout(timeout, self.inner.config.capacity))
                    }
                }
            }
        }
    }

    /// Return a borrowed connection.
    ///
    /// Valid connections go back to the idle queue (or straight to the
    /// oldest waiter). Invalid ones are closed and replaced; if the
    /// replacement cannot be opened the pool shrinks and the error is
    /// reported through [`Release::error`].
    pub async fn release(&self, mut conn: PooledConnection<K>) -> Release<K> {
        let id = conn.id();
        let lent = self.inner.state.lock().is_outstanding(id);
        if !lent {
            tracing::debug!(conn = %id, "rejected release of a connection this pool did not lend");
            return Release::Rejected(conn);
        }
        let Some(raw) = conn.take() else {
            return Release::Rejected(conn);
        };
        self.inner.give_back(id, raw).await
    }

    /// Run one eviction sweep now. Returns how many connections were closed.
    pub async fn evict_idle(&self) -> usize {
        self.inner.evict_idle().await
    }

    /// Stop the evictor, close every idle connection and wake all waiters
    /// with [`Error::Closed`].
    ///
    /// Outstanding connections are not reclaimed; they are closed when they
    /// are released.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let evictor = self.inner.evictor.lock().take();
        if let Some(handle) = evictor {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "evictor task ended abnormally");
            }
        }

        let drained = self.inner.state.lock().close();
        let closed = drained.len();
        {
            let _ticket = CloseTicket::new(&self.inner, closed);
            for entry in drained {
                let (id, conn) = entry.into_parts();
                close_quietly(&self.inner.connector, id, conn).await;
            }
        }

        let stats = self.stats();
        tracing::info!(
            closed,
            outstanding = stats.outstanding,
            "connection pool shut down"
        );
    }

    /// `true` once [`Pool::shutdown`] has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().is_closed()
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().stats()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}
