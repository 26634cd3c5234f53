//! Prepared statements.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::result_large_err)]

use crate::database::{HandleGuard, engine_error, nul_in_sql};
use crate::types;
use libsqlite3_sys as ffi;
use sqlbridge_core::error::{QueryError, QueryErrorKind};
use sqlbridge_core::{ColumnInfo, Error, Result, Row, Value};
use std::ffi::{CString, c_int};
use std::ptr;
use std::sync::Arc;

/// A prepared statement with its parameters bound.
///
/// Finalized on drop. Every call that touches the engine takes the
/// [`HandleGuard`] of the database it was prepared on.
pub(crate) struct Statement {
    raw: *mut ffi::sqlite3_stmt,
    columns: Arc<ColumnInfo>,
    sql: String,
    done: bool,
}

// SAFETY: the statement is only stepped while its database's handle lock is
// held, and finalization is serialized by the engine's own mutex.
unsafe impl Send for Statement {}

impl Statement {
    /// Prepare `sql` and bind `params` in order.
    ///
    /// SQL that compiles to no statement (blank or comment only) yields a
    /// statement that produces no rows.
    pub(crate) fn prepare(handle: &HandleGuard<'_>, sql: &str, params: &[Value]) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| nul_in_sql(sql))?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: the handle is open and locked; all pointers are valid.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                handle.raw(),
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(engine_error(handle, sql));
        }

        let mut stmt = Self {
            raw,
            columns: Arc::new(ColumnInfo::default()),
            sql: sql.to_string(),
            done: raw.is_null(),
        };
        if raw.is_null() {
            return Ok(stmt);
        }

        for (i, param) in params.iter().enumerate() {
            // SAFETY: raw is a live statement; the index is 1-based.
            let rc = unsafe { types::bind_value(raw, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                return Err(bind_error(handle, sql, i + 1));
            }
        }

        // SAFETY: raw is a live statement.
        let col_count = unsafe { ffi::sqlite3_column_count(raw) };
        let names = (0..col_count)
            .map(|i| {
                // SAFETY: i is within the column count.
                unsafe { types::column_name(raw, i) }.unwrap_or_else(|| format!("col{}", i))
            })
            .collect();
        stmt.columns = Arc::new(ColumnInfo::new(names));
        Ok(stmt)
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    #[cfg(test)]
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Advance to the next row. `Ok(None)` once the statement is exhausted.
    pub(crate) fn step(&mut self, handle: &HandleGuard<'_>) -> Result<Option<Row>> {
        if self.done {
            return Ok(None);
        }

        // SAFETY: raw is live (not done) and the handle is locked.
        let rc = unsafe { ffi::sqlite3_step(self.raw) };
        match rc {
            ffi::SQLITE_ROW => {
                let count = self.columns.len() as c_int;
                let values = (0..count)
                    // SAFETY: the statement is positioned on a row.
                    .map(|i| unsafe { types::read_column(self.raw, i) })
                    .collect();
                Ok(Some(Row::with_columns(Arc::clone(&self.columns), values)))
            }
            ffi::SQLITE_DONE => {
                self.done = true;
                Ok(None)
            }
            _ => {
                self.done = true;
                Err(engine_error(handle, &self.sql))
            }
        }
    }

    /// Step to completion, collecting every row.
    pub(crate) fn collect(mut self, handle: &HandleGuard<'_>) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.step(handle)? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: raw is a statement we own; it is never used again.
            unsafe {
                ffi::sqlite3_finalize(self.raw);
            }
        }
    }
}

fn bind_error(handle: &HandleGuard<'_>, sql: &str, param_index: usize) -> Error {
    let message = match engine_error(handle, sql) {
        Error::Query(q) => q.message,
        other => other.to_string(),
    };
    Error::Query(
        QueryError::new(
            QueryErrorKind::Bind,
            format!("Failed to bind parameter {}: {}", param_index, message),
        )
        .with_sql(sql),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteDatabase;

    #[test]
    fn test_step_yields_rows_in_order() {
        let db = SqliteDatabase::open_memory().unwrap();
        db.execute_raw("create table t (n integer); insert into t values (1), (2), (3)")
            .unwrap();
        let handle = db.handle().unwrap();
        let mut stmt = Statement::prepare(&handle, "select n from t order by n", &[]).unwrap();
        let mut seen = Vec::new();
        while let Some(row) = stmt.step(&handle).unwrap() {
            seen.push(row.get_as::<i64>(0).unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(stmt.is_done());
        assert!(stmt.step(&handle).unwrap().is_none());
    }

    #[test]
    fn test_blank_sql_is_empty_statement() {
        let db = SqliteDatabase::open_memory().unwrap();
        let handle = db.handle().unwrap();
        let stmt = Statement::prepare(&handle, "  -- nothing", &[]).unwrap();
        assert!(stmt.is_done());
        assert!(stmt.collect(&handle).unwrap().is_empty());
    }

    #[test]
    fn test_too_many_parameters_is_bind_error() {
        let db = SqliteDatabase::open_memory().unwrap();
        let handle = db.handle().unwrap();
        let err = Statement::prepare(&handle, "select ?", &[Value::Int(1), Value::Int(2)])
            .err()
            .unwrap();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::Bind));
    }

    #[test]
    fn test_values_round_trip_through_engine() {
        let db = SqliteDatabase::open_memory().unwrap();
        let handle = db.handle().unwrap();
        let params = [
            Value::Null,
            Value::Bool(true),
            Value::BigInt(i64::MAX),
            Value::Double(1.5),
            Value::Text("héllo".into()),
            Value::Bytes(vec![0, 255]),
            Value::Json(serde_json::json!({"a": 1})),
        ];
        let rows = Statement::prepare(&handle, "select ?, ?, ?, ?, ?, ?, ?", &params)
            .unwrap()
            .collect(&handle)
            .unwrap();
        let values: Vec<Value> = rows[0].clone().into_values();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Int(1),
                Value::BigInt(i64::MAX),
                Value::Double(1.5),
                Value::Text("héllo".into()),
                Value::Bytes(vec![0, 255]),
                Value::Text("{\"a\":1}".into()),
            ]
        );
    }
}
