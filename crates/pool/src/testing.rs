//! Testing utilities: an in-memory connector with failure switches.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::connector::Connector;

/// Errors produced by [`MockConnector`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MockError {
    /// `open` was told to fail.
    #[error("connection refused")]
    Refused,
    /// `close` was told to fail.
    #[error("close failed")]
    CloseFailed,
}

/// Connection handed out by [`MockConnector`].
#[derive(Debug, PartialEq, Eq)]
pub struct MockConnection {
    serial: u64,
}

impl MockConnection {
    /// Open order of this connection, starting at 0.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

#[derive(Default)]
struct Shared {
    next_serial: AtomicU64,
    opened: AtomicUsize,
    fail_opens: AtomicBool,
    open_budget: Mutex<Option<usize>>,
    open_delay: Mutex<Duration>,
    fail_closes: AtomicBool,
    invalid: Mutex<HashSet<u64>>,
    closed: Mutex<Vec<u64>>,
}

/// Connector that records every call. Clones share state, so a test can
/// keep one clone and hand another to the pool.
#[derive(Clone, Default)]
pub struct MockConnector {
    shared: Arc<Shared>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `open` fail (or succeed again).
    pub fn fail_opens(&self, fail: bool) {
        self.shared.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Let `n` more opens succeed, then fail the rest.
    pub fn fail_open_after(&self, n: usize) {
        *self.shared.open_budget.lock() = Some(n);
    }

    /// Delay every `open` by `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.shared.open_delay.lock() = delay;
    }

    /// Make every subsequent `close` report an error.
    pub fn fail_closes(&self, fail: bool) {
        self.shared.fail_closes.store(fail, Ordering::SeqCst);
    }

    /// Mark a connection as failing validation.
    pub fn invalidate(&self, serial: u64) {
        self.shared.invalid.lock().insert(serial);
    }

    /// Number of successful opens so far.
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Serials passed to `close`, in call order.
    pub fn closed(&self) -> Vec<u64> {
        self.shared.closed.lock().clone()
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("opened", &self.opened())
            .field("closed", &self.closed().len())
            .finish()
    }
}

impl Connector for MockConnector {
    type Config = ();
    type Connection = MockConnection;
    type Error = MockError;

    async fn open(&self, _config: &()) -> Result<MockConnection, MockError> {
        let delay = *self.shared.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.shared.fail_opens.load(Ordering::SeqCst) {
            return Err(MockError::Refused);
        }
        {
            let mut budget = self.shared.open_budget.lock();
            if let Some(left) = budget.as_mut() {
                if *left == 0 {
                    return Err(MockError::Refused);
                }
                *left -= 1;
            }
        }
        let serial = self.shared.next_serial.fetch_add(1, Ordering::SeqCst);
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection { serial })
    }

    async fn is_valid(&self, conn: &mut MockConnection) -> bool {
        !self.shared.invalid.lock().contains(&conn.serial)
    }

    async fn close(&self, conn: MockConnection) -> Result<(), MockError> {
        self.shared.closed.lock().push(conn.serial);
        if self.shared.fail_closes.load(Ordering::SeqCst) {
            return Err(MockError::CloseFailed);
        }
        Ok(())
    }
}
