use std::collections::BTreeMap;

use rusqlite::Row;
use serde::Serialize;

use crate::value::Value;

use super::cursor::CursorId;

/// Columns + rows page returned by `query` and `queryCursorNext`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    #[serde(rename = "cursorId", skip_serializing_if = "Option::is_none")]
    pub cursor_id: Option<CursorId>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            cursor_id: None,
        }
    }

    /// Reshape into one `{column: value}` map per row.
    pub fn into_map_list(self) -> Vec<BTreeMap<String, Value>> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row).collect())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Columns(QueryResult),
    MapList(Vec<BTreeMap<String, Value>>),
}

pub(crate) fn row_values(row: &Row<'_>, column_count: usize) -> rusqlite::Result<Vec<Value>> {
    (0..column_count)
        .map(|idx| row.get_ref(idx).map(Value::from))
        .collect()
}
