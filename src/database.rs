use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rusqlite::{types::ValueRef, Connection, OpenFlags};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::path::PathBuf;
use tokio::task;

use crate::error::QueryError;

/// One result row, column name to value, in column order.
pub type Row = Map<String, Value>;

/// Rows kept when a result grows past the byte limit.
pub const OVERFLOW_ROW_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn describe(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect();
        format!("{}({})", self.name, columns.join(", "))
    }
}

/// Runs SQL against the demo database.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, QueryError>;

    /// Tables and columns of the target database, if the executor can tell.
    async fn describe_schema(&self) -> Result<Vec<TableSchema>, QueryError> {
        Ok(Vec::new())
    }
}

pub struct SqliteExecutor {
    db_path: Option<PathBuf>,
    max_result_bytes: usize,
}

impl SqliteExecutor {
    pub fn new(db_path: Option<PathBuf>, max_result_bytes: usize) -> Self {
        Self {
            db_path,
            max_result_bytes,
        }
    }

    fn target(&self) -> Result<(PathBuf, usize), QueryError> {
        let path = self.db_path.clone().ok_or(QueryError::NotConfigured)?;
        Ok((path, self.max_result_bytes))
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, QueryError> {
        let (db_path, max_result_bytes) = self.target()?;
        let query = query.to_string();

        task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
            run_query(&conn, &query, max_result_bytes)
        })
        .await?
    }

    async fn describe_schema(&self) -> Result<Vec<TableSchema>, QueryError> {
        let (db_path, _) = self.target()?;

        task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
            read_schema(&conn)
        })
        .await?
    }
}

fn run_query(
    conn: &Connection,
    query: &str,
    max_result_bytes: usize,
) -> Result<Vec<Row>, QueryError> {
    let mut stmt = conn.prepare(query)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    let mut total_bytes = 0usize;
    let mut oversized = false;

    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), to_json(row.get_ref(idx)?));
        }

        if !oversized {
            total_bytes += Value::Object(record.clone()).to_string().len();
            oversized = total_bytes > max_result_bytes;
        }
        result.push(record);

        if oversized && result.len() >= OVERFLOW_ROW_LIMIT {
            break;
        }
    }

    if oversized {
        tracing::warn!(
            "Query result exceeds {} bytes, keeping the first {} rows",
            max_result_bytes,
            OVERFLOW_ROW_LIMIT
        );
        result.truncate(OVERFLOW_ROW_LIMIT);
    }

    tracing::debug!("Query returned {} rows ({} bytes)", result.len(), total_bytes);
    Ok(result)
}

fn read_schema(conn: &Connection) -> Result<Vec<TableSchema>, QueryError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let pragma = format!("PRAGMA table_info(\"{}\")", name.replace('"', "\"\""));
        let mut info = conn.prepare(&pragma)?;
        let columns = info
            .query_map([], |row| {
                Ok(ColumnSchema {
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        tables.push(TableSchema { name, columns });
    }

    Ok(tables)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_database(rows: usize) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE sales (
                id INTEGER PRIMARY KEY, region TEXT NOT NULL, amount REAL, note BLOB
            );",
        )
        .unwrap();
        for i in 0..rows {
            conn.execute(
                "INSERT INTO sales (region, amount, note) VALUES (?1, ?2, ?3)",
                rusqlite::params![format!("region-{}", i % 3), i as f64 * 1.5, vec![1u8, 2, 3]],
            )
            .unwrap();
        }
        (dir, path)
    }

    #[tokio::test]
    async fn test_execute_maps_columns_in_order() {
        let (_dir, path) = seed_database(2);
        let executor = SqliteExecutor::new(Some(path), 1024 * 1024);

        let rows = executor
            .execute("SELECT id, region, amount, note FROM sales ORDER BY id")
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["id", "region", "amount", "note"]);
        assert_eq!(rows[1]["region"], Value::from("region-1"));
        assert_eq!(rows[1]["amount"], Value::from(1.5));
        assert_eq!(rows[0]["note"], Value::from("AQID"));
    }

    #[tokio::test]
    async fn test_oversized_result_truncated_to_overflow_limit() {
        let (_dir, path) = seed_database(250);
        let executor = SqliteExecutor::new(Some(path), 64);

        let rows = executor.execute("SELECT * FROM sales").await.unwrap();
        assert_eq!(rows.len(), OVERFLOW_ROW_LIMIT);
    }

    #[tokio::test]
    async fn test_result_under_limit_untouched() {
        let (_dir, path) = seed_database(250);
        let executor = SqliteExecutor::new(Some(path), 100 * 1024 * 1024);

        let rows = executor.execute("SELECT * FROM sales").await.unwrap();
        assert_eq!(rows.len(), 250);
    }

    #[tokio::test]
    async fn test_sql_error_is_query_error() {
        let (_dir, path) = seed_database(1);
        let executor = SqliteExecutor::new(Some(path), 1024);

        let err = executor.execute("SELECT * FROM missing_table").await.unwrap_err();
        assert!(matches!(err, QueryError::Sqlite(_)));
    }

    #[tokio::test]
    async fn test_read_only_connection() {
        let (_dir, path) = seed_database(1);
        let executor = SqliteExecutor::new(Some(path), 1024);

        assert!(executor.execute("DELETE FROM sales").await.is_err());
        assert_eq!(executor.execute("SELECT * FROM sales").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_not_configured() {
        let executor = SqliteExecutor::new(None, 1024);
        assert!(matches!(
            executor.execute("SELECT 1").await,
            Err(QueryError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_describe_schema() {
        let (_dir, path) = seed_database(0);
        let executor = SqliteExecutor::new(Some(path), 1024);

        let schema = executor.describe_schema().await.unwrap();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0].name, "sales");
        assert_eq!(
            schema[0].describe(),
            "sales(id INTEGER, region TEXT, amount REAL, note BLOB)"
        );
    }
}
