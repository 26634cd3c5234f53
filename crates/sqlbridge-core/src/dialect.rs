//! Dialect-level collaborators handed to a query builder.

use crate::driver::{DatabaseConnection, Driver};
use crate::error::Error;
use crate::query::{CompiledQuery, QueryKind};
use crate::schema::{
    DEFAULT_MIGRATION_LOCK_TABLE, DatabaseMetadata, IntrospectionOptions, TableMetadata,
};
use crate::value::Value;
use crate::{Cx, Outcome};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// SQL rendering rules for one dialect.
pub trait QueryCompiler: Send + Sync {
    /// Quote an identifier (table, column) for safe inclusion in SQL.
    fn quote_identifier(&self, name: &str) -> String;

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Body of an insert that supplies no column values.
    fn default_insert_values(&self) -> &'static str;

    /// Package SQL and parameters into a compiled statement.
    fn compile(&self, sql: &str, parameters: Vec<Value>, kind: QueryKind) -> CompiledQuery {
        CompiledQuery::new(sql, parameters, kind)
    }
}

/// Static feature flags of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub create_if_not_exists: bool,
    pub transactional_ddl: bool,
    pub returning: bool,
    pub output: bool,
}

/// Where the migration lock lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationLockOptions {
    pub lock_table: String,
    pub lock_row_id: String,
    pub lock_table_schema: Option<String>,
}

impl Default for MigrationLockOptions {
    fn default() -> Self {
        Self {
            lock_table: DEFAULT_MIGRATION_LOCK_TABLE.to_string(),
            lock_row_id: "migration_lock".to_string(),
            lock_table_schema: None,
        }
    }
}

/// Capability descriptor consumed by a query builder.
pub trait DialectAdapter: Send + Sync {
    fn supports_create_if_not_exists(&self) -> bool;
    fn supports_transactional_ddl(&self) -> bool;
    fn supports_returning(&self) -> bool;
    fn supports_output(&self) -> bool;

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            create_if_not_exists: self.supports_create_if_not_exists(),
            transactional_ddl: self.supports_transactional_ddl(),
            returning: self.supports_returning(),
            output: self.supports_output(),
        }
    }

    /// Take the migration lock on an acquired connection.
    fn acquire_migration_lock<C: DatabaseConnection>(
        &self,
        cx: &Cx,
        connection: &C,
        options: &MigrationLockOptions,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn release_migration_lock<C: DatabaseConnection>(
        &self,
        cx: &Cx,
        connection: &C,
        options: &MigrationLockOptions,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// Schema introspection.
pub trait DatabaseIntrospector: Send + Sync {
    /// List user tables with their columns.
    fn get_tables(
        &self,
        cx: &Cx,
        options: IntrospectionOptions,
    ) -> impl Future<Output = Outcome<Vec<TableMetadata>, Error>> + Send;

    fn get_table_metadata(
        &self,
        cx: &Cx,
        table: &str,
    ) -> impl Future<Output = Outcome<TableMetadata, Error>> + Send;

    fn get_metadata(
        &self,
        cx: &Cx,
        options: IntrospectionOptions,
    ) -> impl Future<Output = Outcome<DatabaseMetadata, Error>> + Send;
}

/// Factory for every dialect-specific collaborator.
pub trait Dialect {
    type Driver: Driver;
    type Compiler: QueryCompiler;
    type Adapter: DialectAdapter;
    type Introspector: DatabaseIntrospector;

    fn create_driver(&self) -> Self::Driver;
    fn create_query_compiler(&self) -> Self::Compiler;
    fn create_adapter(&self) -> Self::Adapter;
    fn create_introspector(&self, driver: Arc<Self::Driver>) -> Self::Introspector;
}
