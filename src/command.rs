use std::fmt;

use rusqlite::types::Value as SqlValue;

use crate::db::DbError;
use crate::value::Value;

/// One SQL statement plus its positional arguments, as received from the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    sql: String,
    arguments: Vec<Value>,
}

impl SqlCommand {
    pub fn new(sql: impl Into<String>, arguments: Option<Vec<Value>>) -> Self {
        Self {
            sql: sql.into(),
            arguments: arguments.unwrap_or_default(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Arguments as bound for statements that write.
    ///
    /// A list of byte-sized integers is how callers encode a blob, so it is
    /// rebuilt into raw bytes here.
    pub fn bind_arguments(&self) -> Result<Vec<SqlValue>, DbError> {
        self.arguments
            .iter()
            .enumerate()
            .map(|(idx, argument)| bind_value(idx, argument))
            .collect()
    }

    /// Arguments as bound for read-only queries: every value is stringified.
    pub fn query_arguments(&self) -> Vec<Option<String>> {
        self.arguments
            .iter()
            .map(|argument| match argument {
                Value::Null => None,
                other => Some(other.to_diagnostic_string()),
            })
            .collect()
    }

    /// Inline integer arguments into the statement text.
    ///
    /// Only applies when the number of `?` placeholders equals the number of
    /// arguments and none of them is numbered (`?NNN`); otherwise the command
    /// is returned unchanged. Non-integer arguments stay bound to their
    /// placeholder. Negative values are parenthesized so `10-?` never turns
    /// into a `--` comment.
    pub fn sanitize_for_query(&self) -> SqlCommand {
        if self.arguments.is_empty() || has_numbered_placeholder(&self.sql) {
            return self.clone();
        }

        let mut sql = String::with_capacity(self.sql.len());
        let mut arguments = Vec::new();
        let mut placeholders = 0usize;
        let mut remaining = self.arguments.iter();

        for ch in self.sql.chars() {
            if ch == '?' {
                placeholders += 1;
                let Some(argument) = remaining.next() else {
                    return self.clone();
                };
                if let Value::Integer(value) = argument {
                    if *value < 0 {
                        sql.push_str(&format!("({value})"));
                    } else {
                        sql.push_str(&value.to_string());
                    }
                    continue;
                }
                arguments.push(argument.clone());
            }
            sql.push(ch);
        }

        if placeholders != self.arguments.len() {
            return self.clone();
        }

        Self { sql, arguments }
    }
}

fn has_numbered_placeholder(sql: &str) -> bool {
    sql.as_bytes()
        .windows(2)
        .any(|pair| pair[0] == b'?' && pair[1].is_ascii_digit())
}

fn bind_value(idx: usize, argument: &Value) -> Result<SqlValue, DbError> {
    Ok(match argument {
        Value::Null => SqlValue::Null,
        Value::Bool(v) => SqlValue::Integer(i64::from(*v)),
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Blob(bytes) => SqlValue::Blob(bytes.clone()),
        Value::List(items) => match Value::list_as_bytes(items) {
            Some(bytes) => SqlValue::Blob(bytes),
            None => {
                return Err(DbError::BadParam(format!(
                    "argument {idx} is a list that is not a byte sequence: {argument}"
                )))
            }
        },
        Value::Map(_) => SqlValue::Text(argument.to_diagnostic_string()),
    })
}

impl fmt::Display for SqlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.arguments.is_empty() {
            write!(f, " {}", Value::List(self.arguments.clone()))?;
        }
        Ok(())
    }
}
