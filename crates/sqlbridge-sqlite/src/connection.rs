//! The connection wrapper handed out by [`SqliteDriver`](crate::SqliteDriver).
//!
//! A [`SqliteConnection`] runs compiled statements on the shared engine
//! handle. Read statements are stepped to completion and their rows returned.
//! Write statements are followed, under the same handle lock, by a probe of
//! `last_insert_rowid()` and `changes()`, so the metadata always belongs to
//! the statement just executed. Conflict clauses need no special handling:
//! the engine's change counter already reports zero for an ignored insert.

#![allow(clippy::result_large_err)]

use crate::database::{SqliteDatabase, closed_error};
use crate::statement::Statement;
use futures::Stream;
use sqlbridge_core::error::MisuseErrorKind;
use sqlbridge_core::{
    CompiledQuery, Cx, DatabaseConnection, Error, Outcome, QueryKind, QueryResult, Result, Row,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

const WRITE_PROBE_SQL: &str = "select last_insert_rowid(), changes()";

/// The single logical connection of a driver.
#[derive(Debug)]
pub struct SqliteConnection {
    database: Arc<SqliteDatabase>,
}

impl SqliteConnection {
    pub(crate) fn new(database: Arc<SqliteDatabase>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Arc<SqliteDatabase> {
        &self.database
    }

    /// Execute a statement synchronously.
    pub fn execute_sync(&self, query: &CompiledQuery) -> Result<QueryResult> {
        tracing::trace!(sql = %query.sql(), kind = ?query.kind(), "execute_query");
        let handle = self.database.handle()?;
        let rows = Statement::prepare(&handle, query.sql(), query.parameters())?.collect(&handle)?;

        match query.kind() {
            QueryKind::Read => {
                tracing::debug!(row_count = rows.len(), "read executed");
                Ok(QueryResult::read(rows))
            }
            QueryKind::Write => {
                let (insert_id, affected) = write_metadata(handle.query(WRITE_PROBE_SQL, &[])?);
                tracing::debug!(insert_id, affected, "write executed");
                Ok(QueryResult::write(rows, insert_id, affected))
            }
        }
    }

    /// Prepare a read statement for row-by-row iteration.
    pub fn stream_sync(&self, query: &CompiledQuery) -> Result<SqliteRowStream> {
        if !query.is_read() {
            return Err(Error::misuse(
                MisuseErrorKind::StreamingWrite,
                "only read statements can be streamed",
            ));
        }
        tracing::trace!(sql = %query.sql(), "stream_query");
        let handle = self.database.handle()?;
        let statement = Statement::prepare(&handle, query.sql(), query.parameters())?;
        drop(handle);
        Ok(SqliteRowStream {
            database: Arc::clone(&self.database),
            statement: Some(statement),
            yielded: 0,
        })
    }

    /// Run parameterless SQL directly; used for transaction control.
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.database.execute_raw(sql)
    }

    /// Is the connection outside any explicit transaction?
    pub fn is_autocommit(&self) -> Result<bool> {
        self.database.is_autocommit()
    }
}

/// Insert id and change count from the probe row, zero when absent.
fn write_metadata(rows: Vec<Row>) -> (i64, u64) {
    let Some(row) = rows.into_iter().next() else {
        return (0, 0);
    };
    let insert_id = row.get_as::<Option<i64>>(0).ok().flatten().unwrap_or(0);
    let affected = row.get_as::<Option<u64>>(1).ok().flatten().unwrap_or(0);
    (insert_id, affected)
}

impl DatabaseConnection for SqliteConnection {
    type RowStream = SqliteRowStream;

    fn execute_query(
        &self,
        cx: &Cx,
        query: &CompiledQuery,
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        let result = match cx.cancel_reason() {
            Some(reason) => Outcome::Cancelled(reason),
            None => self
                .execute_sync(query)
                .map_or_else(Outcome::Err, Outcome::Ok),
        };
        async move { result }
    }

    fn stream_query(
        &self,
        cx: &Cx,
        query: &CompiledQuery,
    ) -> impl Future<Output = Outcome<Self::RowStream, Error>> + Send {
        let result = match cx.cancel_reason() {
            Some(reason) => Outcome::Cancelled(reason),
            None => self.stream_sync(query).map_or_else(Outcome::Err, Outcome::Ok),
        };
        async move { result }
    }
}

/// Forward-only stream of single-row results.
///
/// Each item is a [`QueryResult`] holding exactly one row, in the engine's
/// result order. The stream ends after the last row or the first error, and
/// it cannot be restarted. Dropping it early finalizes the statement, but the
/// connection stays acquired until its holder releases it.
pub struct SqliteRowStream {
    database: Arc<SqliteDatabase>,
    statement: Option<Statement>,
    yielded: usize,
}

impl SqliteRowStream {
    /// Rows yielded so far.
    pub fn rows_yielded(&self) -> usize {
        self.yielded
    }

    fn next_row(&mut self) -> Option<Result<QueryResult>> {
        let statement = self.statement.as_mut()?;
        let step = match self.database.handle() {
            Ok(handle) => statement.step(&handle),
            Err(_) => Err(closed_error()),
        };
        match step {
            Ok(Some(row)) => {
                self.yielded += 1;
                tracing::trace!(row = self.yielded, "stream row");
                Some(Ok(QueryResult::single_row(row)))
            }
            Ok(None) => {
                tracing::debug!(
                    sql = %statement.sql(),
                    row_count = self.yielded,
                    "stream exhausted"
                );
                self.statement = None;
                None
            }
            Err(e) => {
                self.statement = None;
                Some(Err(e))
            }
        }
    }
}

impl Stream for SqliteRowStream {
    type Item = Result<QueryResult>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().next_row())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.statement.is_some() {
            (0, None)
        } else {
            (0, Some(0))
        }
    }
}

impl std::fmt::Debug for SqliteRowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRowStream")
            .field("finished", &self.statement.is_none())
            .field("yielded", &self.yielded)
            .finish_non_exhaustive()
    }
}
