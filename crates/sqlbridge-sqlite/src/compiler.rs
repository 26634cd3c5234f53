//! SQL rendering rules for SQLite.

use sqlbridge_core::QueryCompiler;

/// Quotes identifiers with double quotes and numbers nothing: every
/// placeholder is a bare `?`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteQueryCompiler;

impl QueryCompiler for SqliteQueryCompiler {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn default_insert_values(&self) -> &'static str {
        "default values"
    }
}
