//! Lifecycle and access control for the single connection.
//!
//! State machine: `Uninitialized -> Initializing -> Ready -> Destroyed`.
//! `destroy` wins over an `init` still running its hook. All access after
//! `init` goes through [`ConnectionMutex`], so statements from different
//! logical callers never interleave on the handle.
//!
//! There is no timeout: a holder that never releases blocks every later
//! acquirer. [`ConnectionScope`](sqlbridge_core::ConnectionScope) releases on
//! drop to make that hard to get wrong.

#![allow(clippy::result_large_err)]

use crate::connection::SqliteConnection;
use crate::database::SqliteDatabase;
use crate::dialect::{OnCreateConnection, SqliteDialectConfig};
use sqlbridge_core::error::{MisuseErrorKind, TransactionError, TransactionErrorKind};
use sqlbridge_core::{ConnectionMutex, Cx, Driver, Error, Outcome, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
enum DriverState {
    Uninitialized,
    Initializing,
    Ready(Arc<SqliteConnection>),
    Destroyed,
}

/// Driver over one already-open [`SqliteDatabase`].
pub struct SqliteDriver {
    database: Arc<SqliteDatabase>,
    on_create_connection: Option<OnCreateConnection>,
    mutex: ConnectionMutex,
    state: Mutex<DriverState>,
}

impl SqliteDriver {
    pub fn new(config: &SqliteDialectConfig) -> Self {
        Self {
            database: Arc::clone(&config.database),
            on_create_connection: config.on_create_connection.clone(),
            mutex: ConnectionMutex::new(),
            state: Mutex::new(DriverState::Uninitialized),
        }
    }

    fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The connection, if the driver is ready.
    fn ready_connection(&self) -> Result<Arc<SqliteConnection>> {
        match &*self.state() {
            DriverState::Ready(connection) => Ok(Arc::clone(connection)),
            DriverState::Uninitialized | DriverState::Initializing => Err(Error::misuse(
                MisuseErrorKind::NotInitialized,
                "driver used before init completed",
            )),
            DriverState::Destroyed => Err(Error::misuse(
                MisuseErrorKind::Destroyed,
                "driver used after destroy",
            )),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.state(), DriverState::Ready(_))
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(&*self.state(), DriverState::Destroyed)
    }

    /// Is some caller holding the connection?
    pub fn is_connection_held(&self) -> bool {
        self.mutex.is_locked()
    }

    /// Callers queued behind the current holder.
    pub fn pending_acquirers(&self) -> usize {
        self.mutex.waiters()
    }

    pub fn database(&self) -> &Arc<SqliteDatabase> {
        &self.database
    }

    fn control(
        cx: &Cx,
        connection: &SqliteConnection,
        sql: &'static str,
        kind: TransactionErrorKind,
    ) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        tracing::debug!(statement = sql, "transaction control");
        match connection.execute_raw(sql) {
            Ok(()) => Outcome::Ok(()),
            Err(Error::Query(q)) => Outcome::Err(Error::Transaction(TransactionError {
                kind,
                message: format!("{} failed: {}", sql, q),
            })),
            Err(e) => Outcome::Err(e),
        }
    }
}

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;

    #[tracing::instrument(level = "debug", skip(self, cx), fields(path = %self.database.path()))]
    async fn init(&self, cx: &Cx) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        {
            let mut state = self.state();
            match &*state {
                DriverState::Uninitialized => {}
                DriverState::Destroyed => {
                    return Outcome::Err(Error::misuse(
                        MisuseErrorKind::Destroyed,
                        "init called after destroy",
                    ));
                }
                DriverState::Initializing | DriverState::Ready(_) => {
                    return Outcome::Err(Error::misuse(
                        MisuseErrorKind::AlreadyInitialized,
                        "init called twice",
                    ));
                }
            }
            *state = DriverState::Initializing;
        }

        let connection = Arc::new(SqliteConnection::new(Arc::clone(&self.database)));

        let hooked = match &self.on_create_connection {
            Some(hook) => {
                tracing::debug!("running on_create_connection hook");
                hook(cx, Arc::clone(&connection)).await
            }
            None => Outcome::Ok(()),
        };

        let mut state = self.state();
        if !matches!(&*state, DriverState::Initializing) {
            drop(state);
            tracing::debug!("driver destroyed while init was running");
            return Outcome::Err(Error::misuse(
                MisuseErrorKind::Destroyed,
                "driver destroyed during init",
            ));
        }
        match hooked {
            Outcome::Ok(()) => {
                *state = DriverState::Ready(connection);
                drop(state);
                tracing::debug!("driver ready");
                Outcome::Ok(())
            }
            failed => {
                *state = DriverState::Uninitialized;
                failed
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    async fn acquire_connection(&self, cx: &Cx) -> Outcome<Arc<SqliteConnection>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        if let Err(e) = self.ready_connection() {
            return Outcome::Err(e);
        }

        match self.mutex.lock(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        // Destroy may have run while this caller was queued.
        match self.ready_connection() {
            Ok(connection) => {
                tracing::debug!(waiting = self.mutex.waiters(), "connection acquired");
                Outcome::Ok(connection)
            }
            Err(e) => {
                if let Err(unlock) = self.mutex.unlock() {
                    tracing::warn!(error = %unlock, "failed to unlock after refused acquire");
                }
                Outcome::Err(e)
            }
        }
    }

    async fn begin_transaction(&self, cx: &Cx, connection: &SqliteConnection) -> Outcome<(), Error> {
        Self::control(cx, connection, "begin", TransactionErrorKind::Begin)
    }

    async fn commit_transaction(
        &self,
        cx: &Cx,
        connection: &SqliteConnection,
    ) -> Outcome<(), Error> {
        Self::control(cx, connection, "commit", TransactionErrorKind::Commit)
    }

    async fn rollback_transaction(
        &self,
        cx: &Cx,
        connection: &SqliteConnection,
    ) -> Outcome<(), Error> {
        Self::control(cx, connection, "rollback", TransactionErrorKind::Rollback)
    }

    fn release_connection(&self, connection: Arc<SqliteConnection>) -> Result<()> {
        if !self.mutex.is_locked() {
            return Err(Error::misuse(
                MisuseErrorKind::UnlockNotHeld,
                "release_connection without a matching acquire",
            ));
        }

        // A holder that vanished mid-transaction must not hand an open
        // transaction to the next acquirer.
        if let Ok(false) = connection.is_autocommit() {
            tracing::warn!("connection released inside a transaction; rolling back");
            if let Err(e) = connection.execute_raw("rollback") {
                tracing::warn!(error = %e, "rollback on release failed");
            }
        }

        self.mutex.unlock()?;
        tracing::debug!("connection released");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    async fn destroy(&self, cx: &Cx) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        if self.is_destroyed() {
            return Outcome::Ok(());
        }

        // Wait for the current holder so a running unit of work is not cut off.
        match self.mutex.lock(cx).await {
            Outcome::Ok(()) => {}
            // Another destroy closed the mutex first.
            Outcome::Err(_) if self.is_destroyed() => return Outcome::Ok(()),
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        *self.state() = DriverState::Destroyed;
        let closed = self.database.close();
        // Callers queued behind destroy fail instead of waiting forever.
        self.mutex.close();
        if let Err(e) = self.mutex.unlock() {
            tracing::warn!(error = %e, "failed to unlock after destroy");
        }
        tracing::debug!("driver destroyed");
        closed.map_or_else(Outcome::Err, Outcome::Ok)
    }
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("database", &self.database)
            .field("state", &*self.state())
            .field("held", &self.mutex.is_locked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use sqlbridge_core::{CompiledQuery, DatabaseConnection, Value};

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
        match outcome {
            Outcome::Err(e) => e,
            Outcome::Ok(_) => panic!("expected error, got Ok"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn driver() -> SqliteDriver {
        let db = SqliteDatabase::open_memory().unwrap();
        SqliteDriver::new(&SqliteDialectConfig::new(Arc::new(db)))
    }

    #[test]
    fn test_acquire_before_init_is_misuse() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let driver = driver();
            let err = expect_err(driver.acquire_connection(&cx).await);
            assert_eq!(err.misuse_kind(), Some(MisuseErrorKind::NotInitialized));
            assert!(!driver.is_connection_held());
        });
    }

    #[test]
    fn test_init_twice_is_misuse() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let driver = driver();
            unwrap_outcome(driver.init(&cx).await);
            assert!(driver.is_ready());
            let err = expect_err(driver.init(&cx).await);
            assert_eq!(err.misuse_kind(), Some(MisuseErrorKind::AlreadyInitialized));
        });
    }

    #[test]
    fn test_acquire_release_cycle() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let driver = driver();
            unwrap_outcome(driver.init(&cx).await);

            let conn = unwrap_outcome(driver.acquire_connection(&cx).await);
            assert!(driver.is_connection_held());
            let result = unwrap_outcome(
                conn.execute_query(&cx, &CompiledQuery::read("select 1 as one", Vec::new()))
                    .await,
            );
            assert_eq!(result.rows[0].get_named::<i64>("one").unwrap(), 1);
            driver.release_connection(conn).unwrap();
            assert!(!driver.is_connection_held());
        });
    }

    #[test]
    fn test_release_without_acquire_is_misuse() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let driver = driver();
            unwrap_outcome(driver.init(&cx).await);
            let conn = unwrap_outcome(driver.acquire_connection(&cx).await);
            driver.release_connection(Arc::clone(&conn)).unwrap();
            let err = driver.release_connection(conn).unwrap_err();
            assert_eq!(err.misuse_kind(), Some(MisuseErrorKind::UnlockNotHeld));
        });
    }

    #[test]
    fn test_transaction_control_statements() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let driver = driver();
            unwrap_outcome(driver.init(&cx).await);
            let conn = unwrap_outcome(driver.acquire_connection(&cx).await);

            unwrap_outcome(
                conn.execute_query(&cx, &CompiledQuery::write("create table t (n integer)", Vec::new()))
                    .await,
            );
            unwrap_outcome(driver.begin_transaction(&cx, &conn).await);
            assert!(!conn.is_autocommit().unwrap());
            unwrap_outcome(
                conn.execute_query(
                    &cx,
                    &CompiledQuery::write("insert into t values (?)", vec![Value::Int(1)]),
                )
                .await,
            );
            unwrap_outcome(driver.rollback_transaction(&cx, &conn).await);
            assert!(conn.is_autocommit().unwrap());

            let rows = unwrap_outcome(
                conn.execute_query(&cx, &CompiledQuery::read("select n from t", Vec::new()))
                    .await,
            )
            .rows;
            assert!(rows.is_empty());

            let err = expect_err(driver.commit_transaction(&cx, &conn).await);
            assert!(matches!(err, Error::Transaction(TransactionError {
                kind: TransactionErrorKind::Commit,
                ..
            })));
            driver.release_connection(conn).unwrap();
        });
    }

    #[test]
    fn test_release_rolls_back_abandoned_transaction() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let driver = driver();
            unwrap_outcome(driver.init(&cx).await);
            let conn = unwrap_outcome(driver.acquire_connection(&cx).await);
            conn.execute_raw("create table t (n integer)").unwrap();
            unwrap_outcome(driver.begin_transaction(&cx, &conn).await);
            conn.execute_raw("insert into t values (1)").unwrap();
            driver.release_connection(conn).unwrap();

            let conn = unwrap_outcome(driver.acquire_connection(&cx).await);
            assert!(conn.is_autocommit().unwrap());
            let rows = conn.database().query("select n from t", &[]).unwrap();
            assert!(rows.is_empty());
            driver.release_connection(conn).unwrap();
        });
    }

    #[test]
    fn test_destroy_is_final() {
        let rt = RuntimeBuilder::current_thread().build().expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let driver = driver();
            unwrap_outcome(driver.init(&cx).await);
            unwrap_outcome(driver.destroy(&cx).await);
            assert!(driver.is_destroyed());
            assert!(driver.database().is_closed());

            let err = expect_err(driver.acquire_connection(&cx).await);
            assert_eq!(err.misuse_kind(), Some(MisuseErrorKind::Destroyed));
            let err = expect_err(driver.init(&cx).await);
            assert_eq!(err.misuse_kind(), Some(MisuseErrorKind::Destroyed));
            // A second destroy is a no-op.
            unwrap_outcome(driver.destroy(&cx).await);
        });
    }
}
