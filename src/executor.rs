//! Relational executor boundary and the embedded SQLite engine behind it.

use std::collections::HashMap;
use std::fmt;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::window_sql::Dialect;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Null | Self::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Real(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Key used when joining; numbers and text never compare equal.
    fn join_key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Integer(v) => Some(format!("i:{v}")),
            Self::Real(v) => Some(format!("r:{v}")),
            Self::Text(v) => Some(format!("s:{v}")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            Self::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(v) => Self::Integer(v),
            ValueRef::Real(v) => Self::Real(v),
            ValueRef::Text(v) => Self::Text(String::from_utf8_lossy(v).to_string()),
            ValueRef::Blob(v) => Self::Text(hex::encode(v)),
        }
    }
}

/// Row-major result set with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), ExecutorError> {
        if row.len() != self.columns.len() {
            return Err(ExecutorError::RowWidth {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Value of `column` on the row whose `key_column` equals `key` as text.
    pub fn lookup(&self, key_column: &str, key: &str, column: &str) -> Option<&Value> {
        let key_idx = self.column_index(key_column)?;
        let idx = self.column_index(column)?;
        self.rows
            .iter()
            .find(|row| row[key_idx].as_str() == Some(key))
            .map(|row| &row[idx])
    }

    /// Inner join on `key`, keeping the left row order. Right-hand columns
    /// whose name is already taken get a `_right` suffix, then `_right_2`,
    /// `_right_3` and so on until the name is free.
    pub fn inner_join(&self, right: &Table, key: &str) -> Result<Table, ExecutorError> {
        let left_key = self
            .column_index(key)
            .ok_or_else(|| ExecutorError::MissingColumn(key.to_string()))?;
        let right_key = right
            .column_index(key)
            .ok_or_else(|| ExecutorError::MissingColumn(key.to_string()))?;

        let mut right_rows: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, row) in right.rows.iter().enumerate() {
            if let Some(join_key) = row[right_key].join_key() {
                right_rows.entry(join_key).or_default().push(idx);
            }
        }

        let mut columns = self.columns.clone();
        for (idx, name) in right.columns.iter().enumerate() {
            if idx == right_key {
                continue;
            }
            let mut candidate = name.clone();
            let mut attempt = 1;
            while columns.contains(&candidate) {
                candidate = if attempt == 1 {
                    format!("{name}_right")
                } else {
                    format!("{name}_right_{attempt}")
                };
                attempt += 1;
            }
            columns.push(candidate);
        }

        let mut joined = Table::new(columns);
        for left_row in &self.rows {
            let Some(join_key) = left_row[left_key].join_key() else {
                continue;
            };
            let Some(matches) = right_rows.get(&join_key) else {
                continue;
            };
            for right_idx in matches {
                let mut row = left_row.clone();
                row.extend(
                    right.rows[*right_idx]
                        .iter()
                        .enumerate()
                        .filter(|(idx, _)| *idx != right_key)
                        .map(|(_, value)| value.clone()),
                );
                joined.rows.push(row);
            }
        }

        Ok(joined)
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid table name '{0}'")]
    InvalidTableName(String),
    #[error("column '{0}' not found")]
    MissingColumn(String),
    #[error("row has {found} values, expected {expected}")]
    RowWidth { expected: usize, found: usize },
}

/// What the feature engine needs from a query engine.
pub trait QueryExecutor {
    fn dialect(&self) -> Dialect;

    fn execute(&self, sql: &str) -> Result<Table, ExecutorError>;

    /// Makes `table` queryable under `name`, replacing any previous table.
    fn register_table(&mut self, name: &str, table: &Table) -> Result<(), ExecutorError>;
}

pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    pub fn open_in_memory() -> Result<Self, ExecutorError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA temp_store=MEMORY;")?;
        Ok(Self { conn })
    }
}

impl QueryExecutor for SqliteExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, sql: &str) -> Result<Table, ExecutorError> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let width = columns.len();

        let mut table = Table::new(columns);
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(Value::from(row.get_ref(idx)?));
            }
            table.rows.push(values);
        }

        debug!(
            component = "executor",
            event = "executor.query.finish",
            rows = table.rows.len(),
            columns = width
        );
        Ok(table)
    }

    fn register_table(&mut self, name: &str, table: &Table) -> Result<(), ExecutorError> {
        if !is_identifier(name) {
            return Err(ExecutorError::InvalidTableName(name.to_string()));
        }
        if let Some(column) = table.columns.iter().find(|column| !is_identifier(column)) {
            return Err(ExecutorError::InvalidTableName(format!("{name}.{column}")));
        }

        let column_list = table.columns.join(", ");
        let placeholders = (1..=table.columns.len())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {name}; CREATE TABLE {name} ({column_list});"
        ))?;
        {
            let mut stmt =
                tx.prepare(&format!("INSERT INTO {name} ({column_list}) VALUES ({placeholders})"))?;
            for row in &table.rows {
                if row.len() != table.columns.len() {
                    return Err(ExecutorError::RowWidth {
                        expected: table.columns.len(),
                        found: row.len(),
                    });
                }
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        info!(
            component = "executor",
            event = "executor.table.registered",
            table = name,
            rows = table.rows.len(),
            columns = table.columns.len()
        );
        Ok(())
    }
}

fn is_identifier(raw: &str) -> bool {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(raw: &str) -> Value {
        Value::Text(raw.to_string())
    }

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn inner_join_drops_unmatched_and_suffixes_collisions() {
        let left = table(
            &["customer_id", "aov"],
            vec![
                vec![text("a"), Value::Integer(10)],
                vec![text("b"), Value::Integer(20)],
            ],
        );
        let right = table(
            &["customer_id", "aov", "label"],
            vec![
                vec![text("b"), Value::Integer(99), Value::Integer(1)],
                vec![text("c"), Value::Integer(5), Value::Integer(0)],
            ],
        );

        let joined = left.inner_join(&right, "customer_id").unwrap();
        assert_eq!(joined.columns, vec!["customer_id", "aov", "aov_right", "label"]);
        assert_eq!(
            joined.rows,
            vec![vec![text("b"), Value::Integer(20), Value::Integer(99), Value::Integer(1)]]
        );
    }

    #[test]
    fn collision_suffix_never_reuses_an_existing_column() {
        let left = table(
            &["customer_id", "aov", "aov_right"],
            vec![vec![text("a"), Value::Integer(1), Value::Integer(2)]],
        );
        let right = table(
            &["customer_id", "aov", "aov_right"],
            vec![vec![text("a"), Value::Integer(3), Value::Integer(4)]],
        );

        let joined = left.inner_join(&right, "customer_id").unwrap();
        assert_eq!(
            joined.columns,
            vec!["customer_id", "aov", "aov_right", "aov_right_2", "aov_right_right"]
        );
        assert_eq!(joined.rows[0].len(), joined.columns.len());
    }

    #[test]
    fn join_requires_key_on_both_sides() {
        let left = table(&["customer_id"], vec![]);
        let right = table(&["id"], vec![]);
        assert!(matches!(
            left.inner_join(&right, "customer_id").unwrap_err(),
            ExecutorError::MissingColumn(_)
        ));
    }

    #[test]
    fn registered_tables_are_queryable() {
        let mut exec = SqliteExecutor::open_in_memory().unwrap();
        let source = table(
            &["customer_id", "price"],
            vec![
                vec![text("a"), Value::Real(0.5)],
                vec![text("a"), Value::Real(0.25)],
                vec![text("b"), Value::Null],
            ],
        );
        exec.register_table("transactions", &source).unwrap();

        let out = exec
            .execute("SELECT customer_id, SUM(price) AS total FROM transactions GROUP BY customer_id ORDER BY customer_id")
            .unwrap();
        assert_eq!(out.columns, vec!["customer_id", "total"]);
        assert_eq!(out.rows[0], vec![text("a"), Value::Real(0.75)]);
        assert_eq!(out.rows[1], vec![text("b"), Value::Null]);
    }

    #[test]
    fn bad_sql_surfaces_as_sqlite_error() {
        let exec = SqliteExecutor::open_in_memory().unwrap();
        assert!(matches!(
            exec.execute("SELECT * FROM missing_table").unwrap_err(),
            ExecutorError::Sqlite(_)
        ));
    }

    #[test]
    fn table_names_must_be_identifiers() {
        let mut exec = SqliteExecutor::open_in_memory().unwrap();
        let err = exec
            .register_table("bad name", &table(&["x"], vec![]))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidTableName(_)));
    }
}
