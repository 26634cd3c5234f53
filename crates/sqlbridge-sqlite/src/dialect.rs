//! The SQLite dialect: configuration and collaborator factory.

use crate::adapter::SqliteAdapter;
use crate::compiler::SqliteQueryCompiler;
use crate::connection::SqliteConnection;
use crate::database::SqliteDatabase;
use crate::driver::SqliteDriver;
use crate::introspector::SqliteIntrospector;
use futures::future::BoxFuture;
use sqlbridge_core::{Cx, Dialect, Error, Outcome};
use std::sync::Arc;

/// Hook run exactly once, during `init`, with the freshly created connection.
///
/// Typical uses are pragmas (`foreign_keys`, `journal_mode`) and registering
/// per-connection state. A non-`Ok` outcome aborts `init`.
pub type OnCreateConnection = Arc<
    dyn for<'a> Fn(&'a Cx, Arc<SqliteConnection>) -> BoxFuture<'a, Outcome<(), Error>>
        + Send
        + Sync,
>;

/// Configuration for [`SqliteDialect`].
#[derive(Clone)]
pub struct SqliteDialectConfig {
    /// An already-open engine handle. The driver never opens one itself.
    pub database: Arc<SqliteDatabase>,
    pub on_create_connection: Option<OnCreateConnection>,
}

impl SqliteDialectConfig {
    pub fn new(database: Arc<SqliteDatabase>) -> Self {
        Self {
            database,
            on_create_connection: None,
        }
    }

    /// Set the connection-creation hook.
    pub fn on_create_connection<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a Cx, Arc<SqliteConnection>) -> BoxFuture<'a, Outcome<(), Error>>
            + Send
            + Sync
            + 'static,
    {
        self.on_create_connection = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for SqliteDialectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDialectConfig")
            .field("database", &self.database)
            .field("on_create_connection", &self.on_create_connection.is_some())
            .finish()
    }
}

/// Entry point handed to a query builder.
#[derive(Debug, Clone)]
pub struct SqliteDialect {
    config: SqliteDialectConfig,
}

impl SqliteDialect {
    pub fn new(config: SqliteDialectConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SqliteDialectConfig {
        &self.config
    }
}

impl Dialect for SqliteDialect {
    type Driver = SqliteDriver;
    type Compiler = SqliteQueryCompiler;
    type Adapter = SqliteAdapter;
    type Introspector = SqliteIntrospector;

    fn create_driver(&self) -> SqliteDriver {
        SqliteDriver::new(&self.config)
    }

    fn create_query_compiler(&self) -> SqliteQueryCompiler {
        SqliteQueryCompiler
    }

    fn create_adapter(&self) -> SqliteAdapter {
        SqliteAdapter
    }

    fn create_introspector(&self, driver: Arc<SqliteDriver>) -> SqliteIntrospector {
        SqliteIntrospector::new(driver)
    }
}
