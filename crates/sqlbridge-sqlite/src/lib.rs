//! Embedded SQLite driver for sqlbridge.
//!
// FFI calls into libsqlite3 require unsafe code
#![allow(unsafe_code)]
//!
//! The driver wraps one already-open engine handle and serializes every
//! logical unit of work on it through a FIFO [`ConnectionMutex`]. A unit is
//! either a single statement or a whole transaction body; nothing from a
//! second caller can run in between.
//!
//! # Features
//!
//! - Read statements materialized or streamed row by row
//! - Write statements report `insert_id` and `num_affected_rows`
//! - `begin`/`commit`/`rollback` control statements
//! - An `on_create_connection` hook run once during `init`
//! - Table and column introspection
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlbridge_sqlite::{SqliteDatabase, SqliteDialect, SqliteDialectConfig};
//! use sqlbridge_core::{CompiledQuery, ConnectionScope, DatabaseConnection, Dialect, Driver, Value};
//!
//! let db = Arc::new(SqliteDatabase::open_memory()?);
//! let dialect = SqliteDialect::new(SqliteDialectConfig::new(db));
//! let driver = dialect.create_driver();
//! driver.init(&cx).await;
//!
//! let scope = ConnectionScope::acquire(&driver, &cx).await;
//! let query = CompiledQuery::write("insert into person (name) values (?)", vec![Value::from("Ann")]);
//! let result = scope.connection().execute_query(&cx, &query).await;
//! scope.release()?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage class |
//! |-------|----------------------|
//! | `Null` | NULL |
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Json` | TEXT |
//!
//! INTEGER columns decode to `Int` when the value fits in 32 bits and to
//! `BigInt` otherwise.
//!
//! [`ConnectionMutex`]: sqlbridge_core::ConnectionMutex

pub mod adapter;
pub mod compiler;
pub mod connection;
pub mod database;
pub mod dialect;
pub mod driver;
pub mod introspector;
mod statement;
pub mod types;

pub use adapter::SqliteAdapter;
pub use compiler::SqliteQueryCompiler;
pub use connection::{SqliteConnection, SqliteRowStream};
pub use database::{OpenFlags, SqliteDatabase, SqliteOpenConfig};
pub use dialect::{OnCreateConnection, SqliteDialect, SqliteDialectConfig};
pub use driver::SqliteDriver;
pub use introspector::{SqliteIntrospector, autoincrement_column};

/// Version string of the linked SQLite library.
pub fn sqlite_version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a pointer to a static NUL-terminated
    // string.
    unsafe { std::ffi::CStr::from_ptr(libsqlite3_sys::sqlite3_libversion()) }
        .to_str()
        .unwrap_or("unknown")
}

/// Version number of the linked SQLite library, e.g. `3045001`.
pub fn sqlite_version_number() -> i32 {
    // SAFETY: sqlite3_libversion_number has no preconditions.
    unsafe { libsqlite3_sys::sqlite3_libversion_number() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_version() {
        let version = sqlite_version();
        assert!(
            version.starts_with('3'),
            "Expected SQLite 3.x, got {}",
            version
        );
    }

    #[test]
    fn test_sqlite_version_number() {
        let num = sqlite_version_number();
        assert!(
            num >= 3_035_000,
            "RETURNING needs SQLite >= 3.35, got {}",
            num
        );
    }
}
