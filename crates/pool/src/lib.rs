//! # Reservoir connection pool
//!
//! A bounded pool of expensive, reusable connections for a single backend.
//! Callers borrow with [`Pool::acquire`] and give back with
//! [`Pool::release`]; the pool caps how many connections exist, parks
//! callers in arrival order when it is saturated, validates connections on
//! return, and evicts idle connections beyond a protected floor in the
//! background.
//!
//! The backend itself is reached only through the [`Connector`] trait.
//!
//! ```ignore
//! use reservoir_pool::{Pool, PoolConfig};
//!
//! let pool = Pool::new(connector, backend, PoolConfig::new(8)).await?;
//! let conn = pool.acquire(Duration::from_secs(1)).await?;
//! // use the connection...
//! let outcome = pool.release(conn).await;
//! if let Some(err) = outcome.error() {
//!     tracing::warn!(error = %err, "pool lost a connection");
//! }
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub mod entry;
pub mod error;
mod evictor;
pub mod pool;
mod state;
pub mod stats;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::PoolConfig;
pub use connection::PooledConnection;
pub use connector::Connector;
pub use entry::ConnId;
pub use error::{Error, Result};
pub use pool::{Pool, Release};
pub use stats::PoolStats;
