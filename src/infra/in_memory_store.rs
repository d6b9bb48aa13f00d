use crate::app::ports::PersistencePort;
use crate::domain::JsonRow;
use crate::error::StoreError;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Default)]
struct Table {
    rows: Vec<JsonRow>,
    /// Conflict-key fingerprint -> index into `rows`
    keys: HashMap<String, usize>,
}

/// In-memory persistence for development and tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<HashMap<String, Table>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<String, Table>> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Rows of `table` in first-write order.
    pub fn rows(&self, table: &str) -> Vec<JsonRow> {
        self.tables()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables().get(table).map_or(0, |t| t.rows.len())
    }
}

impl PersistencePort for InMemoryStore {
    fn upsert(
        &self,
        table: &str,
        rows: &[JsonRow],
        conflict_columns: &[String],
    ) -> Result<usize, StoreError> {
        // Validate the whole chunk before touching state.
        let mut fingerprints = Vec::with_capacity(rows.len());
        for row in rows {
            let mut key = Vec::with_capacity(conflict_columns.len());
            for column in conflict_columns {
                let value = row
                    .get(column)
                    .ok_or_else(|| StoreError::MissingConflictColumn(column.clone()))?;
                key.push(value.clone());
            }
            fingerprints.push(serde_json::Value::Array(key).to_string());
        }

        let mut tables = self.tables();
        let t = tables.entry(table.to_string()).or_default();
        for (row, key) in rows.iter().zip(fingerprints) {
            match t.keys.get(&key) {
                Some(&idx) => {
                    for (column, value) in row {
                        t.rows[idx].insert(column.clone(), value.clone());
                    }
                }
                None => {
                    t.keys.insert(key, t.rows.len());
                    t.rows.push(row.clone());
                }
            }
        }
        debug!(table, rows = rows.len(), "Upserted rows in memory");
        Ok(rows.len())
    }

    fn insert(&self, table: &str, row: &JsonRow) -> Result<(), StoreError> {
        self.tables()
            .entry(table.to_string())
            .or_default()
            .rows
            .push(row.clone());
        Ok(())
    }

    fn latest_value(
        &self,
        table: &str,
        column: &str,
        filters: &[(String, serde_json::Value)],
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let tables = self.tables();
        let Some(t) = tables.get(table) else {
            return Ok(None);
        };
        Ok(t.rows
            .iter()
            .filter(|row| filters.iter().all(|(k, v)| row.get(k) == Some(v)))
            .filter_map(|row| row.get(column).filter(|v| !v.is_null()))
            .max_by(|a, b| compare(a, b))
            .cloned())
    }
}

/// Numbers compare numerically, strings lexically; numbers sort below strings.
fn compare(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    use serde_json::Value::{Number, String};
    match (a, b) {
        (Number(x), Number(y)) => x
            .as_f64()
            .unwrap_or(f64::NAN)
            .total_cmp(&y.as_f64().unwrap_or(f64::NAN)),
        (String(x), String(y)) => x.cmp(y),
        (Number(_), _) => Ordering::Less,
        (_, Number(_)) => Ordering::Greater,
        _ => a.to_string().cmp(&b.to_string()),
    }
}
