//! The handle callers hold while a connection is borrowed.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use crate::connector::Connector;
use crate::entry::ConnId;
use crate::pool::PoolInner;

/// A connection borrowed from a [`Pool`](crate::Pool).
///
/// Give it back with [`Pool::release`](crate::Pool::release) to learn how the
/// return went. A handle that is simply dropped is returned through the
/// same path on a spawned task.
pub struct PooledConnection<K: Connector> {
    id: ConnId,
    conn: Option<K::Connection>,
    pool: Weak<PoolInner<K>>,
}

impl<K: Connector> PooledConnection<K> {
    pub(crate) fn new(id: ConnId, conn: K::Connection, pool: &Arc<PoolInner<K>>) -> Self {
        Self {
            id,
            conn: Some(conn),
            pool: Arc::downgrade(pool),
        }
    }

    /// Identity of the underlying connection.
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub(crate) fn take(&mut self) -> Option<K::Connection> {
        self.conn.take()
    }
}

impl<K: Connector> Deref for PooledConnection<K> {
    type Target = K::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("connection already returned to the pool")
    }
}

impl<K: Connector> DerefMut for PooledConnection<K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("connection already returned to the pool")
    }
}

impl<K: Connector> Drop for PooledConnection<K> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let id = self.id;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                drop(handle.spawn(async move {
                    let outcome = pool.give_back(id, conn).await;
                    if let Some(err) = outcome.error() {
                        tracing::warn!(conn = %id, error = %err, "dropped connection could not be recycled");
                    }
                }));
            }
            Err(_) => {
                tracing::warn!(conn = %id, "connection dropped outside a runtime; discarding it");
                drop(conn);
                pool.state.lock().shrink(id);
            }
        }
    }
}

impl<K: Connector> fmt::Debug for PooledConnection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("returned", &self.conn.is_none())
            .finish()
    }
}
