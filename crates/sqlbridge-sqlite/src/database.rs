//! The engine handle.
//!
//! [`SqliteDatabase`] owns one `sqlite3*`. It is opened by the application and
//! handed to the dialect already open. Every FFI call on the handle happens
//! under its internal lock, which only protects individual calls; logical
//! units of work are serialized one level up by the driver's
//! [`ConnectionMutex`](sqlbridge_core::ConnectionMutex).

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]

use crate::statement::Statement;
use crate::types;
/// `libsqlite3-sys` blocklists `sqlite3_close_v2` from its generated
/// bindings; the symbol is still compiled into the bundled amalgamation.
mod ffi {
    pub use libsqlite3_sys::*;

    unsafe extern "C" {
        pub fn sqlite3_close_v2(db: *mut sqlite3) -> std::ffi::c_int;
    }
}
use sqlbridge_core::error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind};
use sqlbridge_core::{Error, Result, Row, Value};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Configuration for opening a database handle.
#[derive(Debug, Clone)]
pub struct SqliteOpenConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds. Zero disables the busy handler.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read_only: bool,
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Serialized threading mode for this handle.
    pub full_mutex: bool,
    pub shared_cache: bool,
    pub private_cache: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Read-write access to an existing database.
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Read-write access, creating the database if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }
        if self.shared_cache {
            flags |= ffi::SQLITE_OPEN_SHAREDCACHE;
        }
        if self.private_cache {
            flags |= ffi::SQLITE_OPEN_PRIVATECACHE;
        }

        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteOpenConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteOpenConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

struct Handle {
    db: *mut ffi::sqlite3,
}

// SAFETY: the pointer is only dereferenced by FFI calls made while holding the
// `Mutex<Handle>` in `SqliteDatabase`.
unsafe impl Send for Handle {}

/// Exclusive access to the raw handle for the duration of a few FFI calls.
pub(crate) struct HandleGuard<'a> {
    guard: MutexGuard<'a, Handle>,
}

impl HandleGuard<'_> {
    pub(crate) fn raw(&self) -> *mut ffi::sqlite3 {
        self.guard.db
    }

    /// Run a statement to completion and collect its rows.
    pub(crate) fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        Statement::prepare(self, sql, params)?.collect(self)
    }

    /// Execute one or more statements without parameters or results.
    pub(crate) fn exec(&self, sql: &str) -> Result<()> {
        let c_sql = CString::new(sql).map_err(|_| nul_in_sql(sql))?;
        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: the handle is open and locked; all pointers are valid.
        let rc = unsafe {
            ffi::sqlite3_exec(self.raw(), c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg)
        };

        if rc == ffi::SQLITE_OK {
            return Ok(());
        }

        let message = if errmsg.is_null() {
            types::error_string(rc)
        } else {
            // SAFETY: errmsg was allocated by sqlite and is freed right after.
            unsafe {
                let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                ffi::sqlite3_free(errmsg.cast());
                msg
            }
        };
        // SAFETY: the handle is open and locked.
        let extended = unsafe { ffi::sqlite3_extended_errcode(self.raw()) };
        Err(Error::Query(QueryError {
            kind: error_code_to_kind(rc, &message),
            sql: Some(sql.to_string()),
            code: Some(rc & 0xff),
            extended_code: Some(extended),
            message,
            source: None,
        }))
    }

    /// Is the handle outside any explicit transaction?
    pub(crate) fn is_autocommit(&self) -> bool {
        // SAFETY: the handle is open and locked.
        unsafe { ffi::sqlite3_get_autocommit(self.raw()) != 0 }
    }
}

/// An open SQLite database handle.
pub struct SqliteDatabase {
    inner: Mutex<Handle>,
    path: String,
}

// SAFETY: every access to the raw handle goes through `inner`.
unsafe impl Send for SqliteDatabase {}
unsafe impl Sync for SqliteDatabase {}

impl SqliteDatabase {
    /// Open a database with the given configuration.
    #[allow(clippy::result_large_err)]
    pub fn open(config: &SqliteOpenConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Open,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: valid pointers; the result code is checked below.
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                types::error_string(rc)
            } else {
                // SAFETY: db is a handle in error state; it must still be closed.
                unsafe {
                    let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                        .to_string_lossy()
                        .into_owned();
                    ffi::sqlite3_close(db);
                    msg
                }
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Open,
                message: format!("Failed to open database {}: {}", config.path, msg),
                source: None,
            }));
        }

        // SAFETY: db was just opened successfully.
        unsafe {
            ffi::sqlite3_extended_result_codes(db, 1);
            if config.busy_timeout_ms > 0 {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms.min(i32::MAX as u32) as c_int);
            }
        }

        tracing::debug!(path = %config.path, "opened sqlite database");

        Ok(Self {
            inner: Mutex::new(Handle { db }),
            path: config.path.clone(),
        })
    }

    #[allow(clippy::result_large_err)]
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteOpenConfig::memory())
    }

    #[allow(clippy::result_large_err)]
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteOpenConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Lock the raw handle, failing if it has been closed.
    #[allow(clippy::result_large_err)]
    pub(crate) fn handle(&self) -> Result<HandleGuard<'_>> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.db.is_null() {
            return Err(closed_error());
        }
        Ok(HandleGuard { guard })
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .db
            .is_null()
    }

    /// Execute SQL directly, without parameters (DDL, pragmas, control
    /// statements). Multiple `;`-separated statements are allowed.
    #[allow(clippy::result_large_err)]
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        tracing::trace!(sql = %sql, "execute_raw");
        self.handle()?.exec(sql)
    }

    /// Run one statement and collect all rows.
    #[allow(clippy::result_large_err)]
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql = %sql, params = params.len(), "query");
        self.handle()?.query(sql, params)
    }

    /// Is the handle outside any explicit transaction?
    #[allow(clippy::result_large_err)]
    pub fn is_autocommit(&self) -> Result<bool> {
        Ok(self.handle()?.is_autocommit())
    }

    /// Close the handle. Later calls see a closed-handle error.
    ///
    /// Statements still alive keep the underlying engine object until they
    /// are finalized.
    #[allow(clippy::result_large_err)]
    pub fn close(&self) -> Result<()> {
        let mut handle = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.db.is_null() {
            return Ok(());
        }
        // SAFETY: db is open and locked; close_v2 defers destruction until
        // outstanding statements are finalized.
        let rc = unsafe { ffi::sqlite3_close_v2(handle.db) };
        if rc != ffi::SQLITE_OK {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                message: format!("Failed to close database: {}", types::error_string(rc)),
                source: None,
            }));
        }
        handle.db = ptr::null_mut();
        tracing::debug!(path = %self.path, "closed sqlite database");
        Ok(())
    }
}

impl Drop for SqliteDatabase {
    fn drop(&mut self) {
        let handle = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !handle.db.is_null() {
            // SAFETY: db is valid and no other reference exists.
            unsafe {
                ffi::sqlite3_close_v2(handle.db);
            }
            handle.db = ptr::null_mut();
        }
    }
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ==================== Engine errors ====================

pub(crate) fn closed_error() -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Closed,
        message: "database handle is closed".to_string(),
        source: None,
    })
}

pub(crate) fn nul_in_sql(sql: &str) -> Error {
    Error::Query(QueryError::new(QueryErrorKind::Syntax, "SQL contains null byte").with_sql(sql))
}

/// Build an error from the handle's current error state.
pub(crate) fn engine_error(handle: &HandleGuard<'_>, sql: &str) -> Error {
    // SAFETY: the handle is open and locked.
    let (message, code, extended) = unsafe {
        let db = handle.raw();
        let message = CStr::from_ptr(ffi::sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned();
        (
            message,
            ffi::sqlite3_errcode(db) & 0xff,
            ffi::sqlite3_extended_errcode(db),
        )
    };

    Error::Query(QueryError {
        kind: error_code_to_kind(code, &message),
        sql: Some(sql.to_string()),
        code: Some(code),
        extended_code: Some(extended),
        message,
        source: None,
    })
}

pub(crate) fn error_code_to_kind(code: c_int, message: &str) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_INTERRUPT => QueryErrorKind::Cancelled,
        ffi::SQLITE_READONLY => QueryErrorKind::ReadOnly,
        ffi::SQLITE_RANGE | ffi::SQLITE_MISMATCH => QueryErrorKind::Bind,
        ffi::SQLITE_ERROR if message.contains("syntax error") => QueryErrorKind::Syntax,
        ffi::SQLITE_ERROR if message.starts_with("no such") => QueryErrorKind::NotFound,
        _ => QueryErrorKind::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let db = SqliteDatabase::open_memory().unwrap();
        assert_eq!(db.path(), ":memory:");
        assert!(!db.is_closed());
    }

    #[test]
    fn test_execute_raw_and_query() {
        let db = SqliteDatabase::open_memory().unwrap();
        db.execute_raw("create table t (id integer primary key, name text not null)")
            .unwrap();
        db.execute_raw("insert into t (name) values ('a'); insert into t (name) values ('b')")
            .unwrap();

        let rows = db
            .query("select id, name from t where name = ?", &[Value::from("b")])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<i64>("id").unwrap(), 2);
    }

    #[test]
    fn test_engine_errors_keep_message() {
        let db = SqliteDatabase::open_memory().unwrap();
        let err = db.query("select * from missing", &[]).unwrap_err();
        match err {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::NotFound);
                assert_eq!(q.message, "no such table: missing");
                assert_eq!(q.sql.as_deref(), Some("select * from missing"));
            }
            other => panic!("expected query error, got {other:?}"),
        }

        let err = db.execute_raw("selec 1").unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::Syntax));
    }

    #[test]
    fn test_constraint_error_kind() {
        let db = SqliteDatabase::open_memory().unwrap();
        db.execute_raw("create table t (id integer primary key)").unwrap();
        db.execute_raw("insert into t (id) values (1)").unwrap();
        let err = db.query("insert into t (id) values (1)", &[]).unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::Constraint));
    }

    #[test]
    fn test_autocommit_tracks_transactions() {
        let db = SqliteDatabase::open_memory().unwrap();
        assert!(db.is_autocommit().unwrap());
        db.execute_raw("begin").unwrap();
        assert!(!db.is_autocommit().unwrap());
        db.execute_raw("rollback").unwrap();
        assert!(db.is_autocommit().unwrap());
    }

    #[test]
    fn test_close_is_final() {
        let db = SqliteDatabase::open_memory().unwrap();
        db.close().unwrap();
        assert!(db.is_closed());
        assert!(matches!(
            db.execute_raw("select 1"),
            Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                ..
            }))
        ));
        // Closing twice is harmless.
        db.close().unwrap();
    }

    #[test]
    fn test_open_flags() {
        let flags = OpenFlags::default().to_sqlite_flags();
        assert_eq!(
            flags,
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE
        );
        let flags = OpenFlags::read_only().to_sqlite_flags();
        assert_eq!(flags, ffi::SQLITE_OPEN_READONLY);
    }

    #[test]
    fn test_open_read_only_missing_file_fails() {
        let config = SqliteOpenConfig::file("/nonexistent/dir/db.sqlite").flags(OpenFlags::read_only());
        assert!(matches!(
            SqliteDatabase::open(&config),
            Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Open,
                ..
            }))
        ));
    }
}
