//! Error types for sqlbridge operations.

use std::fmt;

/// The primary error type for all sqlbridge operations.
#[derive(Debug)]
pub enum Error {
    /// Engine handle errors (open, closed handle)
    Connection(ConnectionError),
    /// Statement errors reported by the engine
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction control errors
    Transaction(TransactionError),
    /// Programmer errors: unbalanced unlock, use after destroy
    Misuse(MisuseError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the database
    Open,
    /// The handle was closed before the operation ran
    Closed,
}

/// An error reported by the engine while preparing, binding or stepping a
/// statement.
///
/// `message` is the engine's own text, untouched. `kind` is a coarse
/// classification of `code` for callers that want to branch on it.
#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    /// Primary engine result code
    pub code: Option<i32>,
    /// Extended engine result code
    pub extended_code: Option<i32>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null, check)
    Constraint,
    /// Table, column or row not found
    NotFound,
    /// Permission denied
    Permission,
    /// Value too large
    DataTruncation,
    /// Database busy or locked by another handle
    Busy,
    /// Read-only database
    ReadOnly,
    /// Interrupted
    Cancelled,
    /// Parameter binding failed
    Bind,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// `begin` was rejected by the engine
    Begin,
    /// `commit` was rejected by the engine
    Commit,
    /// `rollback` was rejected by the engine
    Rollback,
}

/// Misuse of the driver or mutex API.
///
/// These are never retried and always point at a bug in the caller.
#[derive(Debug, Clone)]
pub struct MisuseError {
    pub kind: MisuseErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisuseErrorKind {
    /// `unlock` without a matching successful `lock`
    UnlockNotHeld,
    /// The driver was used before `init`
    NotInitialized,
    /// `init` was called twice
    AlreadyInitialized,
    /// The driver was used after `destroy`
    Destroyed,
    /// `stream_query` was called with a write statement
    StreamingWrite,
}

impl MisuseError {
    pub fn new(kind: MisuseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl QueryError {
    /// Build an error with only a kind and message, for failures detected
    /// before the engine is involved.
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sql: None,
            code: None,
            extended_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the SQL text that produced this error.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Is this a constraint violation?
    pub fn is_constraint_violation(&self) -> bool {
        self.kind == QueryErrorKind::Constraint
    }
}

impl Error {
    /// Shorthand for a misuse error.
    pub fn misuse(kind: MisuseErrorKind, message: impl Into<String>) -> Self {
        Error::Misuse(MisuseError::new(kind, message))
    }

    /// Is this a programmer error?
    pub fn is_misuse(&self) -> bool {
        matches!(self, Error::Misuse(_))
    }

    /// The misuse kind, if this is a misuse error.
    pub fn misuse_kind(&self) -> Option<MisuseErrorKind> {
        match self {
            Error::Misuse(m) => Some(m.kind),
            _ => None,
        }
    }

    /// The query error kind, if this came from the engine.
    pub fn query_kind(&self) -> Option<QueryErrorKind> {
        match self {
            Error::Query(q) => Some(q.kind),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Misuse(e) => write!(f, "Misuse: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extended_code.or(self.code) {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for MisuseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<MisuseError> for Error {
    fn from(err: MisuseError) -> Self {
        Error::Misuse(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for sqlbridge operations.
pub type Result<T> = std::result::Result<T, Error>;
