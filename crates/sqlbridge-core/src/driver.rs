//! Driver and connection traits.
//!
//! A [`Driver`] owns a database connection and gates access to it. Every
//! logical unit of work (one statement or a whole transaction) acquires the
//! connection first and releases it exactly once afterwards.
//! [`ConnectionScope`] enforces the release half of that contract.

use crate::error::Error;
use crate::query::{CompiledQuery, QueryResult};
use crate::{Cx, Outcome, Result};
use futures::Stream;
use std::future::Future;
use std::sync::Arc;

/// A connection able to run compiled statements.
pub trait DatabaseConnection: Send + Sync {
    /// Lazy, forward-only sequence of single-row results.
    type RowStream: Stream<Item = Result<QueryResult>> + Send + Unpin;

    /// Execute a statement once, materializing every row.
    ///
    /// Write statements also report the insert id and affected-row count.
    fn execute_query(
        &self,
        cx: &Cx,
        query: &CompiledQuery,
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send;

    /// Execute a read statement lazily, one row per yielded result.
    fn stream_query(
        &self,
        cx: &Cx,
        query: &CompiledQuery,
    ) -> impl Future<Output = Outcome<Self::RowStream, Error>> + Send;
}

/// Lifecycle owner of a connection.
///
/// Transaction control methods only send the control statement. Holding the
/// connection across the whole transaction body is the caller's job.
pub trait Driver: Send + Sync {
    type Connection: DatabaseConnection;

    /// Prepare the connection. Must run once before anything else.
    fn init(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Wait for exclusive access and return the connection.
    ///
    /// A caller whose `cx` is cancelled while queued gets
    /// `Outcome::Cancelled` and is never handed the connection.
    fn acquire_connection(
        &self,
        cx: &Cx,
    ) -> impl Future<Output = Outcome<Arc<Self::Connection>, Error>> + Send;

    fn begin_transaction(
        &self,
        cx: &Cx,
        connection: &Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn commit_transaction(
        &self,
        cx: &Cx,
        connection: &Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn rollback_transaction(
        &self,
        cx: &Cx,
        connection: &Self::Connection,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Give up exclusive access.
    ///
    /// Synchronous so it can run from `Drop`. Calling it without a matching
    /// acquire is a misuse error.
    ///
    /// A transaction still open on the connection is rolled back before the
    /// next acquirer gets it. Orchestrators should still commit or roll back
    /// themselves; this only catches holders that were dropped mid-body.
    #[allow(clippy::result_large_err)]
    fn release_connection(&self, connection: Arc<Self::Connection>) -> Result<()>;

    /// Close the connection. Final.
    fn destroy(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// An acquired connection that is released exactly once.
///
/// Call [`ConnectionScope::release`] to observe release errors. Otherwise the
/// scope releases when dropped, which covers early returns, cancelled futures
/// and unwinding.
pub struct ConnectionScope<'d, D: Driver> {
    driver: &'d D,
    connection: Arc<D::Connection>,
    released: bool,
}

impl<'d, D: Driver> ConnectionScope<'d, D> {
    /// Acquire the driver's connection.
    pub async fn acquire(driver: &'d D, cx: &Cx) -> Outcome<Self, Error> {
        match driver.acquire_connection(cx).await {
            Outcome::Ok(connection) => Outcome::Ok(Self {
                driver,
                connection,
                released: false,
            }),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    pub fn connection(&self) -> &D::Connection {
        &self.connection
    }

    /// A shared handle to the connection, valid for the life of the scope.
    pub fn shared(&self) -> Arc<D::Connection> {
        Arc::clone(&self.connection)
    }

    pub fn driver(&self) -> &'d D {
        self.driver
    }

    /// Release now and report the outcome.
    #[allow(clippy::result_large_err)]
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.driver.release_connection(Arc::clone(&self.connection))
    }
}

impl<D: Driver> Drop for ConnectionScope<'_, D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        tracing::debug!("connection scope dropped without explicit release");
        if let Err(e) = self.driver.release_connection(Arc::clone(&self.connection)) {
            tracing::warn!(error = %e, "failed to release connection on drop");
        }
    }
}

impl<D: Driver> std::fmt::Debug for ConnectionScope<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionScope")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
