//! sqlbridge: compiled SQL on one serialized embedded SQLite connection.
//!
//! A query builder compiles statements into [`CompiledQuery`] values tagged
//! read or write. sqlbridge runs them on a single engine handle, reports
//! `insert_id` and `num_affected_rows` for writes, and serializes every
//! logical unit of work through a FIFO mutex.
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlbridge::prelude::*;
//! use std::sync::Arc;
//!
//! let db = Arc::new(SqliteDatabase::open_memory()?);
//! let dialect = SqliteDialect::new(SqliteDialectConfig::new(db));
//! let driver = Arc::new(dialect.create_driver());
//! driver.init(&cx).await;
//!
//! let executor = Executor::new(Arc::clone(&driver));
//! executor
//!     .execute(&cx, &CompiledQuery::write("create table person (name text)", vec![]))
//!     .await;
//!
//! // Commits only if the closure returns `Outcome::Ok`.
//! executor
//!     .transaction(&cx, |conn| async move {
//!         let insert = CompiledQuery::write("insert into person values (?)", vec![Value::from("Ann")]);
//!         conn.execute_query(&cx, &insert).await
//!     })
//!     .await;
//!
//! driver.destroy(&cx).await;
//! ```

pub mod executor;

pub use executor::{Executor, ScopedStream};

pub use sqlbridge_core::{
    Capabilities, ColumnInfo, ColumnMetadata, CompiledQuery, ConnectionMutex, ConnectionScope, Cx,
    DEFAULT_MIGRATION_LOCK_TABLE, DEFAULT_MIGRATION_TABLE, DatabaseConnection,
    DatabaseIntrospector, DatabaseMetadata, Dialect, DialectAdapter, Driver, Error, FromValue,
    IntrospectionOptions, MigrationLockOptions, Outcome, QueryCompiler, QueryKind, QueryResult,
    Result, Row, TableMetadata, Value,
};
pub use sqlbridge_core::error;

pub use sqlbridge_sqlite::{
    OnCreateConnection, OpenFlags, SqliteAdapter, SqliteConnection, SqliteDatabase,
    SqliteDialect, SqliteDialectConfig, SqliteDriver, SqliteIntrospector, SqliteOpenConfig,
    SqliteQueryCompiler, SqliteRowStream, sqlite_version,
};

/// Everything needed to open a database, build a driver and run statements.
pub mod prelude {
    pub use crate::{
        CompiledQuery, Cx, DatabaseConnection, DatabaseIntrospector, Dialect, DialectAdapter,
        Driver, Error, Executor, IntrospectionOptions, Outcome, QueryCompiler, QueryKind,
        QueryResult, Result, Row, SqliteDatabase, SqliteDialect, SqliteDialectConfig,
        SqliteDriver, Value,
    };
}
