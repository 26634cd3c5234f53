//! Schema introspection over the driver's connection.
//!
//! Table names come from `sqlite_master`, column details from
//! `pragma_table_info`. SQLite does not report autoincrement through either,
//! so that flag is recovered from the stored `create table` text by
//! [`autoincrement_column`].

#![allow(clippy::result_large_err)]

use crate::connection::SqliteConnection;
use crate::driver::SqliteDriver;
use regex::Regex;
use sqlbridge_core::error::{QueryError, QueryErrorKind};
use sqlbridge_core::{
    ColumnMetadata, CompiledQuery, ConnectionScope, Cx, DEFAULT_MIGRATION_LOCK_TABLE,
    DEFAULT_MIGRATION_TABLE, DatabaseConnection, DatabaseIntrospector, DatabaseMetadata, Error,
    IntrospectionOptions, Outcome, Row, TableMetadata, Value,
};
use std::sync::{Arc, OnceLock};

const TABLES_SQL: &str = "select name, sql from sqlite_master \
     where type = 'table' and name not like 'sqlite_%'";

const TABLE_SQL: &str = "select sql from sqlite_master where type = 'table' and name = ?";

const COLUMNS_SQL: &str = "select name, type, \"notnull\", dflt_value from pragma_table_info(?)";

/// Introspector bound to a driver. Each call acquires the connection for
/// its whole duration.
#[derive(Debug, Clone)]
pub struct SqliteIntrospector {
    driver: Arc<SqliteDriver>,
}

impl SqliteIntrospector {
    pub fn new(driver: Arc<SqliteDriver>) -> Self {
        Self { driver }
    }

    async fn query(
        cx: &Cx,
        connection: &SqliteConnection,
        sql: &str,
        parameters: Vec<Value>,
    ) -> Outcome<Vec<Row>, Error> {
        match connection
            .execute_query(cx, &CompiledQuery::read(sql, parameters))
            .await
        {
            Outcome::Ok(result) => Outcome::Ok(result.rows),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn table_on(
        cx: &Cx,
        connection: &SqliteConnection,
        name: String,
        create_sql: Option<String>,
    ) -> Outcome<TableMetadata, Error> {
        let rows = match Self::query(cx, connection, COLUMNS_SQL, vec![Value::from(name.as_str())])
            .await
        {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let autoincrement = create_sql.as_deref().and_then(autoincrement_column);

        let columns = rows
            .iter()
            .filter_map(|row| {
                let column = row.get_named::<String>("name").ok()?;
                let data_type = row.get_named::<String>("type").ok().unwrap_or_default();
                let not_null = row.get_named::<i64>("notnull").ok().unwrap_or(0);
                let has_default_value = row
                    .get_by_name("dflt_value")
                    .is_some_and(|v| !v.is_null());
                Some(ColumnMetadata {
                    is_autoincrementing: autoincrement.as_deref() == Some(column.as_str()),
                    name: column,
                    data_type,
                    is_nullable: not_null == 0,
                    has_default_value,
                })
            })
            .collect();

        Outcome::Ok(TableMetadata { name, columns })
    }

    async fn tables_on(
        cx: &Cx,
        connection: &SqliteConnection,
        options: IntrospectionOptions,
    ) -> Outcome<Vec<TableMetadata>, Error> {
        let (sql, parameters) = if options.with_internal_tables {
            (format!("{} order by name", TABLES_SQL), Vec::new())
        } else {
            (
                format!("{} and name not in (?, ?) order by name", TABLES_SQL),
                vec![
                    Value::from(DEFAULT_MIGRATION_TABLE),
                    Value::from(DEFAULT_MIGRATION_LOCK_TABLE),
                ],
            )
        };

        let rows = match Self::query(cx, connection, &sql, parameters).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let Ok(name) = row.get_named::<String>("name") else {
                continue;
            };
            let create_sql = row.get_named::<Option<String>>("sql").ok().flatten();
            match Self::table_on(cx, connection, name, create_sql).await {
                Outcome::Ok(table) => tables.push(table),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        tracing::debug!(table_count = tables.len(), "introspected tables");
        Outcome::Ok(tables)
    }
}

impl DatabaseIntrospector for SqliteIntrospector {
    #[tracing::instrument(level = "debug", skip(self, cx))]
    async fn get_tables(
        &self,
        cx: &Cx,
        options: IntrospectionOptions,
    ) -> Outcome<Vec<TableMetadata>, Error> {
        let scope = match ConnectionScope::acquire(&*self.driver, cx).await {
            Outcome::Ok(scope) => scope,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let outcome = Self::tables_on(cx, scope.connection(), options).await;
        match scope.release() {
            Ok(()) => outcome,
            Err(e) => Outcome::Err(e),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    async fn get_table_metadata(&self, cx: &Cx, table: &str) -> Outcome<TableMetadata, Error> {
        let scope = match ConnectionScope::acquire(&*self.driver, cx).await {
            Outcome::Ok(scope) => scope,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let rows = match Self::query(cx, scope.connection(), TABLE_SQL, vec![Value::from(table)])
            .await
        {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let Some(row) = rows.first() else {
            return Outcome::Err(Error::Query(
                QueryError::new(QueryErrorKind::NotFound, format!("no such table: {}", table))
                    .with_sql(TABLE_SQL),
            ));
        };
        let create_sql = row.get_as::<Option<String>>(0).ok().flatten();

        let outcome = Self::table_on(cx, scope.connection(), table.to_string(), create_sql).await;
        match scope.release() {
            Ok(()) => outcome,
            Err(e) => Outcome::Err(e),
        }
    }

    async fn get_metadata(
        &self,
        cx: &Cx,
        options: IntrospectionOptions,
    ) -> Outcome<DatabaseMetadata, Error> {
        match self.get_tables(cx, options).await {
            Outcome::Ok(tables) => Outcome::Ok(DatabaseMetadata { tables }),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

fn fragment_splitter() -> Option<&'static Regex> {
    static SPLITTER: OnceLock<Option<Regex>> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(r"[(),]").ok()).as_ref()
}

/// Name of the autoincrement column in a `create table` statement.
///
/// Best-effort: the text is split on parentheses and commas, the first
/// fragment mentioning `autoincrement` (any case) is taken, and its leading
/// token is the column name with quoting characters removed. Unusual
/// formatting can fool it, for example a string literal containing the
/// keyword in an earlier column or a quoted name with spaces. No match
/// yields `None`.
pub fn autoincrement_column(create_sql: &str) -> Option<String> {
    let fragment = fragment_splitter()?
        .split(create_sql)
        .find(|fragment| fragment.to_lowercase().contains("autoincrement"))?;
    let name: String = fragment
        .split_whitespace()
        .next()?
        .chars()
        .filter(|c| !matches!(*c, '"' | '`' | '[' | ']' | '\''))
        .collect();
    if name.is_empty() { None } else { Some(name) }
}
