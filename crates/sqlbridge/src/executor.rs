//! Units of work over a [`Driver`].
//!
//! An [`Executor`] is the orchestrating layer a query builder sits on. Each
//! method acquires the driver's connection, does its work and releases it
//! exactly once on every exit path, so one caller's unit never interleaves
//! with another's.

#![allow(clippy::result_large_err)]

use futures::Stream;
use sqlbridge_core::{
    CompiledQuery, ConnectionScope, Cx, DatabaseConnection, Driver, Error, Outcome, QueryResult,
    Result, Row,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Runs statements and transactions on a shared driver.
pub struct Executor<D: Driver> {
    driver: Arc<D>,
}

impl<D: Driver> Clone for Executor<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
        }
    }
}

impl<D: Driver> Executor<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Run one statement as its own unit of work.
    #[tracing::instrument(level = "debug", skip_all, fields(sql = %query.sql()))]
    pub async fn execute(&self, cx: &Cx, query: &CompiledQuery) -> Outcome<QueryResult, Error> {
        let scope = match ConnectionScope::acquire(&*self.driver, cx).await {
            Outcome::Ok(scope) => scope,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let outcome = scope.connection().execute_query(cx, query).await;
        finish(scope, outcome)
    }

    /// Run one statement and keep only its first row.
    pub async fn execute_take_first(
        &self,
        cx: &Cx,
        query: &CompiledQuery,
    ) -> Outcome<Option<Row>, Error> {
        match self.execute(cx, query).await {
            Outcome::Ok(result) => Outcome::Ok(result.into_first()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Stream a read statement.
    ///
    /// The connection stays acquired until the returned stream is dropped or
    /// released, whether or not it was read to the end.
    pub async fn stream<'d>(
        &'d self,
        cx: &Cx,
        query: &CompiledQuery,
    ) -> Outcome<ScopedStream<'d, D>, Error> {
        let scope = match ConnectionScope::acquire(&*self.driver, cx).await {
            Outcome::Ok(scope) => scope,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match scope.connection().stream_query(cx, query).await {
            Outcome::Ok(stream) => Outcome::Ok(ScopedStream { stream, scope }),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Hold the connection for the whole of `f`.
    pub async fn connection<T, F, Fut>(&self, cx: &Cx, f: F) -> Outcome<T, Error>
    where
        F: FnOnce(Arc<D::Connection>) -> Fut,
        Fut: Future<Output = Outcome<T, Error>>,
    {
        let scope = match ConnectionScope::acquire(&*self.driver, cx).await {
            Outcome::Ok(scope) => scope,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let outcome = f(scope.shared()).await;
        finish(scope, outcome)
    }

    /// Run `f` inside `begin`/`commit`.
    ///
    /// The connection is held from `begin` to the final control statement.
    /// Any non-`Ok` outcome from `f` rolls back and is returned as is.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn transaction<T, F, Fut>(&self, cx: &Cx, f: F) -> Outcome<T, Error>
    where
        F: FnOnce(Arc<D::Connection>) -> Fut,
        Fut: Future<Output = Outcome<T, Error>>,
    {
        let scope = match ConnectionScope::acquire(&*self.driver, cx).await {
            Outcome::Ok(scope) => scope,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        match self.driver.begin_transaction(cx, scope.connection()).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return finish(scope, Outcome::Err(e)),
            Outcome::Cancelled(r) => return finish(scope, Outcome::Cancelled(r)),
            Outcome::Panicked(p) => return finish(scope, Outcome::Panicked(p)),
        }

        let outcome = f(scope.shared()).await;

        let outcome = match outcome {
            Outcome::Ok(value) => {
                match self.driver.commit_transaction(cx, scope.connection()).await {
                    Outcome::Ok(()) => Outcome::Ok(value),
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                }
            }
            failed => {
                tracing::debug!("transaction body failed; rolling back");
                if let Outcome::Err(e) =
                    self.driver.rollback_transaction(cx, scope.connection()).await
                {
                    tracing::warn!(error = %e, "rollback failed");
                }
                failed
            }
        };
        finish(scope, outcome)
    }
}

/// Release `scope`, surfacing a release error only when `outcome` succeeded.
fn finish<D: Driver, T>(scope: ConnectionScope<'_, D>, outcome: Outcome<T, Error>) -> Outcome<T, Error> {
    match (scope.release(), outcome) {
        (Ok(()), outcome) => outcome,
        (Err(e), Outcome::Ok(_)) => Outcome::Err(e),
        (Err(e), outcome) => {
            tracing::warn!(error = %e, "release failed after unsuccessful unit of work");
            outcome
        }
    }
}

impl<D: Driver> std::fmt::Debug for Executor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}

/// A row stream that owns its connection scope.
///
/// Fields drop in order: the statement is finalized before the connection is
/// released.
pub struct ScopedStream<'d, D: Driver> {
    stream: <D::Connection as DatabaseConnection>::RowStream,
    scope: ConnectionScope<'d, D>,
}

impl<D: Driver> ScopedStream<'_, D> {
    /// Stop reading and release the connection now.
    pub fn release(self) -> Result<()> {
        let Self { stream, scope } = self;
        drop(stream);
        scope.release()
    }
}

impl<D: Driver> Stream for ScopedStream<'_, D> {
    type Item = Result<QueryResult>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().stream).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}

impl<D: Driver> std::fmt::Debug for ScopedStream<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStream")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
