//! Pool configuration types

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a connection pool
///
/// Immutable once handed to [`Pool::new`](crate::Pool::new). The backend
/// locator and credentials are not part of it: they belong to the
/// connector's own `Config` type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Maximum number of connections, idle and borrowed together
    pub capacity: usize,
    /// Number of oldest idle connections the evictor never closes
    pub min_idle: usize,
    /// Default bound for [`Pool::get`](crate::Pool::get)
    pub acquire_timeout: Duration,
    /// Idle age after which a connection beyond `min_idle` may be evicted
    pub idle_timeout: Duration,
    /// Period of the background eviction sweep
    pub eviction_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            min_idle: 5,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10),
            eviction_interval: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given capacity and default timings.
    ///
    /// `min_idle` is clamped so the result validates for any `capacity >= 1`.
    pub fn new(capacity: usize) -> Self {
        let defaults = Self::default();
        Self {
            capacity,
            min_idle: defaults.min_idle.min(capacity),
            ..defaults
        }
    }

    /// Set the protected idle floor
    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the default acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the eviction sweep period
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::configuration("capacity must be greater than 0"));
        }
        if self.min_idle > self.capacity {
            return Err(Error::configuration(format!(
                "min_idle ({}) must not exceed capacity ({})",
                self.min_idle, self.capacity
            )));
        }
        if self.eviction_interval.is_zero() {
            return Err(Error::configuration(
                "eviction_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}
