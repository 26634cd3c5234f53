//! Schema metadata returned by introspectors.

use serde::{Deserialize, Serialize};

/// Default name of the table recording applied migrations.
pub const DEFAULT_MIGRATION_TABLE: &str = "sqlbridge_migration";

/// Default name of the table holding the migration lock row.
pub const DEFAULT_MIGRATION_LOCK_TABLE: &str = "sqlbridge_migration_lock";

/// Is `name` one of the two migration bookkeeping tables?
pub fn is_migration_table(name: &str) -> bool {
    name == DEFAULT_MIGRATION_TABLE || name == DEFAULT_MIGRATION_LOCK_TABLE
}

/// Options for listing tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionOptions {
    /// Include the migration bookkeeping tables.
    pub with_internal_tables: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub tables: Vec<TableMetadata>,
}

impl DatabaseMetadata {
    pub fn table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The column the engine auto-increments, if one was detected.
    pub fn autoincrement_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.is_autoincrementing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Declared type exactly as written in the table definition.
    pub data_type: String,
    pub is_nullable: bool,
    pub is_autoincrementing: bool,
    pub has_default_value: bool,
}
