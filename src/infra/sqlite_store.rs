use crate::app::ports::PersistencePort;
use crate::domain::JsonRow;
use crate::error::StoreError;
use crate::pipeline::load::is_valid_identifier;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// SQLite-backed persistence. Tables are created on first write with
/// untyped columns; columns first seen in later batches are added in place.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Rejected(format!("cannot create {:?}: {}", parent, e)))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("SQLite connection lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Number of rows in `table`; 0 when it does not exist.
    pub fn row_count(&self, table: &str) -> Result<usize, StoreError> {
        check_identifier(table)?;
        let conn = self.conn();
        if !table_exists(&conn, table)? {
            return Ok(0);
        }
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Every row of `table` in rowid order.
    pub fn fetch_all(&self, table: &str) -> Result<Vec<JsonRow>, StoreError> {
        check_identifier(table)?;
        let conn = self.conn();
        if !table_exists(&conn, table)? {
            return Ok(Vec::new());
        }
        let columns = table_columns(&conn, table)?;
        let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY rowid", quote(table)))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut obj = JsonRow::new();
            for (i, column) in columns.iter().enumerate() {
                let value: SqlValue = row.get(i)?;
                obj.insert(column.clone(), from_sql(value));
            }
            out.push(obj);
        }
        Ok(out)
    }
}

impl PersistencePort for SqliteStore {
    fn upsert(
        &self,
        table: &str,
        rows: &[JsonRow],
        conflict_columns: &[String],
    ) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns = union_columns(rows);
        for column in conflict_columns {
            if !columns.contains(column) {
                return Err(StoreError::MissingConflictColumn(column.clone()));
            }
        }

        let mut conn = self.conn();
        ensure_table(&conn, table, &columns, conflict_columns)?;

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !conflict_columns.contains(c))
            .map(|c| format!("{0}=excluded.{0}", quote(c)))
            .collect();
        let on_conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {}",
            quote(table),
            quoted_list(&columns),
            placeholders(columns.len()),
            quoted_list(conflict_columns),
            on_conflict
        );

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(columns.iter().map(|c| to_sql(row.get(c)))))?;
            }
        }
        tx.commit()?;
        debug!(table, rows = rows.len(), "Upserted rows into SQLite");
        Ok(rows.len())
    }

    fn insert(&self, table: &str, row: &JsonRow) -> Result<(), StoreError> {
        let columns: Vec<String> = row.keys().cloned().collect();
        let conn = self.conn();
        ensure_table(&conn, table, &columns, &[])?;
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            quoted_list(&columns),
            placeholders(columns.len())
        );
        conn.execute(&sql, params_from_iter(columns.iter().map(|c| to_sql(row.get(c)))))?;
        Ok(())
    }

    fn latest_value(
        &self,
        table: &str,
        column: &str,
        filters: &[(String, serde_json::Value)],
    ) -> Result<Option<serde_json::Value>, StoreError> {
        check_identifier(table)?;
        check_identifier(column)?;
        for (name, _) in filters {
            check_identifier(name)?;
        }

        let conn = self.conn();
        if !table_exists(&conn, table)? {
            return Ok(None);
        }
        let known = table_columns(&conn, table)?;
        if !known.iter().any(|c| c == column) || filters.iter().any(|(f, _)| !known.contains(f)) {
            return Ok(None);
        }

        let mut clauses = vec![format!("{} IS NOT NULL", quote(column))];
        clauses.extend(
            filters
                .iter()
                .enumerate()
                .map(|(i, (name, _))| format!("{} = ?{}", quote(name), i + 1)),
        );
        let sql = format!(
            "SELECT {0} FROM {1} WHERE {2} ORDER BY {0} DESC LIMIT 1",
            quote(column),
            quote(table),
            clauses.join(" AND ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(filters.iter().map(|(_, v)| to_sql(Some(v)))))?;
        match rows.next()? {
            Some(row) => Ok(Some(from_sql(row.get(0)?))),
            None => Ok(None),
        }
    }
}

fn check_identifier(name: &str) -> Result<(), StoreError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn quoted_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

/// Column names across all rows, in first-seen order.
fn union_columns(rows: &[JsonRow]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key.as_str()) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}

/// Create `table` or add missing columns, plus a unique index on the conflict key.
fn ensure_table(
    conn: &Connection,
    table: &str,
    columns: &[String],
    conflict_columns: &[String],
) -> Result<(), StoreError> {
    check_identifier(table)?;
    for column in columns {
        check_identifier(column)?;
    }

    if table_exists(conn, table)? {
        let existing = table_columns(conn, table)?;
        for column in columns.iter().filter(|c| !existing.contains(c)) {
            debug!(table, column = %column, "Adding column");
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote(table),
                quote(column)
            ))?;
        }
    } else {
        debug!(table, columns = columns.len(), "Creating table");
        conn.execute_batch(&format!(
            "CREATE TABLE {} ({})",
            quote(table),
            quoted_list(columns)
        ))?;
    }

    if !conflict_columns.is_empty() {
        let index = format!("ux_{}_{}", table, conflict_columns.join("_"));
        conn.execute_batch(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            quote(&index),
            quote(table),
            quoted_list(conflict_columns)
        ))?;
    }
    Ok(())
}

fn to_sql(value: Option<&serde_json::Value>) -> SqlValue {
    match value {
        None | Some(serde_json::Value::Null) => SqlValue::Null,
        Some(serde_json::Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Some(serde_json::Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: SqlValue) -> serde_json::Value {
    match value {
        SqlValue::Null | SqlValue::Blob(_) => serde_json::Value::Null,
        SqlValue::Integer(i) => i.into(),
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        SqlValue::Text(s) => serde_json::Value::String(s),
    }
}
