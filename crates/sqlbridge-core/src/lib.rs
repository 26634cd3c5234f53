//! Core types and traits for sqlbridge.
//!
//! `sqlbridge-core` is the engine-neutral half of the project:
//!
//! - [`Value`] and [`Row`] for parameters and results
//! - [`CompiledQuery`], tagged [`QueryKind::Read`] or [`QueryKind::Write`]
//! - [`QueryResult`] with write metadata
//! - [`ConnectionMutex`], the FIFO lock serializing access to one connection
//! - [`Driver`], [`DatabaseConnection`] and [`ConnectionScope`]
//! - dialect collaborators: [`QueryCompiler`], [`DialectAdapter`],
//!   [`DatabaseIntrospector`], [`Dialect`]
//!
//! Async operations take a `&Cx` and return an `Outcome` from asupersync.

pub mod dialect;
pub mod driver;
pub mod error;
pub mod mutex;
pub mod query;
pub mod row;
pub mod schema;
pub mod value;

pub use asupersync::{Cx, Outcome};

pub use dialect::{
    Capabilities, DatabaseIntrospector, Dialect, DialectAdapter, MigrationLockOptions,
    QueryCompiler,
};
pub use driver::{ConnectionScope, DatabaseConnection, Driver};
pub use error::{Error, Result};
pub use mutex::ConnectionMutex;
pub use query::{CompiledQuery, QueryKind, QueryResult};
pub use row::{ColumnInfo, FromValue, Row};
pub use schema::{
    ColumnMetadata, DEFAULT_MIGRATION_LOCK_TABLE, DEFAULT_MIGRATION_TABLE, DatabaseMetadata,
    IntrospectionOptions, TableMetadata,
};
pub use value::Value;
