//! Compiled statements and their results.

use crate::row::Row;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Shape of a compiled statement.
///
/// Chosen by whoever builds the statement and never inferred from the SQL
/// text. It decides which execution path a connection takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// Row-producing statement with no side effects (`select`, `pragma`).
    Read,
    /// Statement that changes data or schema (`insert`, `update`, `delete`,
    /// DDL). Results carry an insert id and an affected-row count.
    Write,
}

/// One statement ready for execution: SQL text, bind parameters in order and
/// the statement kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    sql: String,
    parameters: Vec<Value>,
    kind: QueryKind,
}

impl CompiledQuery {
    pub fn new(sql: impl Into<String>, parameters: Vec<Value>, kind: QueryKind) -> Self {
        Self {
            sql: sql.into(),
            parameters,
            kind,
        }
    }

    /// A read statement.
    pub fn read(sql: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self::new(sql, parameters, QueryKind::Read)
    }

    /// A write statement.
    pub fn write(sql: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self::new(sql, parameters, QueryKind::Write)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Is this a read/select statement?
    pub fn is_read(&self) -> bool {
        self.kind == QueryKind::Read
    }
}

/// Rows produced by one statement, plus write metadata.
///
/// `insert_id` and `num_affected_rows` are `None` for reads and always
/// `Some` for writes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_affected_rows: Option<u64>,
}

impl QueryResult {
    /// Result of a read statement.
    pub fn read(rows: Vec<Row>) -> Self {
        Self {
            rows,
            insert_id: None,
            num_affected_rows: None,
        }
    }

    /// Result of a write statement.
    pub fn write(rows: Vec<Row>, insert_id: i64, num_affected_rows: u64) -> Self {
        Self {
            rows,
            insert_id: Some(insert_id),
            num_affected_rows: Some(num_affected_rows),
        }
    }

    /// A one-row batch, as yielded by streaming.
    pub fn single_row(row: Row) -> Self {
        Self::read(vec![row])
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn into_first(self) -> Option<Row> {
        self.rows.into_iter().next()
    }

    pub fn is_write(&self) -> bool {
        self.num_affected_rows.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_carried_not_sniffed() {
        // A select-looking statement tagged as a write stays a write.
        let q = CompiledQuery::write("select 1", Vec::new());
        assert!(!q.is_read());
        assert_eq!(q.kind(), QueryKind::Write);

        let q = CompiledQuery::read("insert into t default values", Vec::new());
        assert!(q.is_read());
    }

    #[test]
    fn test_read_result_has_no_write_metadata() {
        let result = QueryResult::read(Vec::new());
        assert!(result.insert_id.is_none());
        assert!(result.num_affected_rows.is_none());
        assert!(!result.is_write());
    }

    #[test]
    fn test_write_result_serialization() {
        let result = QueryResult::write(Vec::new(), 3, 1);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"rows": [], "insert_id": 3, "num_affected_rows": 1})
        );

        let json = serde_json::to_value(QueryResult::read(Vec::new())).unwrap();
        assert_eq!(json, serde_json::json!({"rows": []}));
    }

    #[test]
    fn test_single_row_batch() {
        let row = Row::new(vec!["a".into()], vec![Value::Int(1)]);
        let batch = QueryResult::single_row(row);
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.first().and_then(|r| r.get(0)), Some(&Value::Int(1)));
    }
}
