use super::value::Value;
use serde::Serialize;

pub type JsonRow = serde_json::Map<String, serde_json::Value>;

/// Column-ordered table of values; the unit every pipeline stage consumes and
/// produces.
///
/// Invariant: every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RecordSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Rows shorter than the header are padded with nulls, longer ones truncated.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Build from JSON objects. Columns are ordered by first appearance across
    /// rows, and within one object in the order the JSON map yields its keys.
    /// Non-object entries are skipped.
    pub fn from_json_rows(objects: &[serde_json::Value]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for obj in objects.iter().filter_map(|o| o.as_object()) {
            for key in obj.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = objects
            .iter()
            .filter_map(|o| o.as_object())
            .map(|obj| {
                columns
                    .iter()
                    .map(|c| obj.get(c).map(Value::from_json).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn to_json_rows(&self) -> Vec<JsonRow> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.clone(), v.to_json()))
                    .collect()
            })
            .collect()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn set(&mut self, row: usize, column: &str, value: Value) {
        if let Some(idx) = self.column_index(column) {
            if let Some(r) = self.rows.get_mut(row) {
                r[idx] = value;
            }
        }
    }

    /// Appends `name` filled with `fill` unless it already exists.
    pub fn add_column(&mut self, name: &str, fill: Value) {
        if self.has_column(name) {
            return;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
    }

    /// Replaces (or appends) a whole column. `values` shorter than the table
    /// are null-padded.
    pub fn set_column(&mut self, name: &str, mut values: Vec<Value>) {
        values.resize(self.rows.len(), Value::Null);
        let idx = match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.add_column(name, Value::Null);
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
    }

    pub fn drop_column(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            self.columns.remove(idx);
            for row in &mut self.rows {
                row.remove(idx);
            }
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(idx) = self.column_index(from) {
            self.columns[idx] = to.to_string();
        }
    }

    pub fn map_column<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(&Value) -> Value,
    {
        if let Some(idx) = self.column_index(name) {
            for row in &mut self.rows {
                row[idx] = f(&row[idx]);
            }
        }
    }

    /// Keeps the rows whose flag is `true`; missing flags count as keep.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        let mut i = 0;
        self.rows.retain(|_| {
            let k = keep.get(i).copied().unwrap_or(true);
            i += 1;
            k
        });
    }

    /// Rebuilds the table with rows in the given index order.
    pub fn select_rows(&self, order: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: order.iter().filter_map(|&i| self.rows.get(i).cloned()).collect(),
        }
    }

    /// Moves columns into `order`; columns not named keep their relative order
    /// after the named ones. Unknown names are ignored.
    pub fn reorder_columns(&mut self, order: &[String]) {
        let mut indices: Vec<usize> = order.iter().filter_map(|c| self.column_index(c)).collect();
        for i in 0..self.columns.len() {
            if !indices.contains(&i) {
                indices.push(i);
            }
        }
        self.columns = indices.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            *row = indices.iter().map(|&i| row[i].clone()).collect();
        }
    }

    /// Composite key of one row over the given column indices.
    pub(crate) fn row_key(&self, row: usize, key_columns: &[usize]) -> String {
        key_columns
            .iter()
            .map(|&c| self.rows[row][c].key_repr())
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }
}
