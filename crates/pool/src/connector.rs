//! The collaborator contract the pool is built on.
//!
//! A `Connector` knows how to open, validate and close one kind of
//! connection. The pool never looks inside a connection; everything it
//! needs goes through these three calls.

use std::future::Future;

/// Opens, validates and closes connections for a single backend.
pub trait Connector: Send + Sync + 'static {
    /// Backend locator and credentials, passed back to every `open` call.
    type Config: Send + Sync + 'static;

    /// The connection type handed out by the pool.
    type Connection: Send + 'static;

    /// Error reported by `open` and `close`.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish a new connection.
    fn open(
        &self,
        config: &Self::Config,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Check whether a returned connection can be reused.
    fn is_valid(&self, conn: &mut Self::Connection) -> impl Future<Output = bool> + Send;

    /// Close a connection that is leaving the pool for good.
    ///
    /// Errors are logged by the pool and otherwise ignored.
    fn close(
        &self,
        conn: Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            drop(conn);
            Ok(())
        }
    }
}
