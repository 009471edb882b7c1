//! SQLite Execution Engine
//!
//! Runs validated SQL against a SQLite database file opened read-only, and
//! doubles as a schema extractor for the same database.

use crate::error::{PilotError, Result};
use crate::execution::result::QueryOutput;
use crate::semantic::{RawColumn, RawForeignKey, RawSchema, RawTable, SchemaExtractor};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, sql: &str) -> Result<QueryOutput>;

    /// Check if the backing database is reachable
    async fn health_check(&self) -> Result<bool>;
}

pub struct SqliteExecutor {
    path: PathBuf,
    max_rows: usize,
}

impl SqliteExecutor {
    pub fn new(path: impl AsRef<Path>, max_rows: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_rows,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> Result<Connection> {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| PilotError::Execution(format!("Failed to open database {}: {}", path.display(), e)))
    }

    /// Run a blocking closure against a fresh read-only connection
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::open(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| PilotError::Execution(format!("Query task failed: {}", e)))?
    }
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> Result<QueryOutput> {
    let start = Instant::now();
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| PilotError::Execution(format!("Failed to prepare query: {}", e)))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let mut rows = stmt
        .query([])
        .map_err(|e| PilotError::Execution(format!("Failed to run query: {}", e)))?;
    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows
        .next()
        .map_err(|e| PilotError::Execution(format!("Failed to read row: {}", e)))?
    {
        if out.len() >= max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value = row
                .get_ref(i)
                .map_err(|e| PilotError::Execution(format!("Failed to read column {}: {}", i, e)))?;
            values.push(value_to_json(value));
        }
        out.push(values);
    }

    Ok(QueryOutput {
        columns,
        rows: out,
        truncated,
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn introspect(conn: &Connection) -> Result<RawSchema> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut raw = RawSchema::default();
    for name in names {
        let mut info = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&name)))?;
        let columns = info
            .query_map([], |row| {
                Ok(RawColumn {
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                    comment: None,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut fks = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(&name)))?;
        let foreign_keys = fks
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (referenced_table, column, referenced_column) in foreign_keys {
            match referenced_column {
                Some(referenced_column) => raw.foreign_keys.push(RawForeignKey {
                    table: name.clone(),
                    column,
                    referenced_table,
                    referenced_column,
                }),
                None => warn!(
                    "Skipping foreign key {}.{} -> {} without an explicit column",
                    name, column, referenced_table
                ),
            }
        }

        raw.tables.push(RawTable {
            name,
            comment: None,
            columns,
        });
    }
    Ok(raw)
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        let sql = sql.to_string();
        let max_rows = self.max_rows;
        let output = self.with_connection(move |conn| run_query(conn, &sql, max_rows)).await?;
        info!(
            "Query returned {} rows in {}ms{}",
            output.row_count(),
            output.execution_time_ms,
            if output.truncated { " (truncated)" } else { "" }
        );
        Ok(output)
    }

    async fn health_check(&self) -> Result<bool> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|v| v == 1)
                .map_err(PilotError::from)
        })
        .await
    }
}

#[async_trait]
impl SchemaExtractor for SqliteExecutor {
    async fn extract(&self) -> Result<RawSchema> {
        self.with_connection(introspect).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::from_raw;
    use tempfile::TempDir;

    fn sample_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("shop.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, is_active BOOLEAN);
            CREATE TABLE orders (
                id INTEGER PRIMARY KEY,
                customer_id INTEGER REFERENCES customers(id),
                amount REAL,
                created_at DATE
            );
            INSERT INTO customers VALUES (1, 'Ada', 1), (2, 'Bob', 0);
            INSERT INTO orders VALUES (1, 1, 10.5, '2025-02-01'), (2, 1, 20.0, '2025-02-10'), (3, 2, 5.0, '2025-03-01');
            "#,
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_execute_caps_rows() {
        let dir = TempDir::new().unwrap();
        let executor = SqliteExecutor::new(sample_db(&dir), 2);
        let output = executor.execute("SELECT id, amount FROM orders ORDER BY id").await.unwrap();
        assert_eq!(output.columns, vec!["id", "amount"]);
        assert_eq!(output.row_count(), 2);
        assert!(output.truncated);
        assert_eq!(output.rows[0][1], serde_json::json!(10.5));
    }

    #[tokio::test]
    async fn test_connection_is_read_only() {
        let dir = TempDir::new().unwrap();
        let executor = SqliteExecutor::new(sample_db(&dir), 10);
        let err = executor.execute("DELETE FROM orders").await;
        assert!(matches!(err, Err(PilotError::Execution(_))));
        assert!(executor.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_extract_schema_with_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let executor = SqliteExecutor::new(sample_db(&dir), 10);
        let raw = executor.extract().await.unwrap();
        assert_eq!(raw.tables.len(), 2);
        assert_eq!(raw.foreign_keys.len(), 1);
        assert_eq!(raw.foreign_keys[0].referenced_table, "customers");

        let schema = from_raw(raw).unwrap();
        assert!(schema.column("customers", "is_active").unwrap().is_flag());
    }
}
