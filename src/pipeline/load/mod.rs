//! Loader: chunked, idempotent upserts with per-run metadata.

pub mod run_metadata;

use crate::app::ports::PersistencePort;
use crate::constants::{DEFAULT_CHUNK_SIZE, METADATA_TABLE};
use crate::domain::{JsonRow, RecordSet};
use crate::error::{LoadError, StoreError};
use crate::observability::metrics;
use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

pub use run_metadata::{ActiveRun, PipelineRunMetadata, RunStatus};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// Plain SQL identifier: letters, digits and underscores, not starting with a digit.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Rows per upsert call
    pub chunk_size: usize,
    /// Table run metadata is inserted into
    pub metadata_table: String,
    /// Stamp each row with a `loaded_at` column
    pub stamp_loaded_at: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            metadata_table: METADATA_TABLE.to_string(),
            stamp_loaded_at: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadResult {
    pub total: usize,
    pub inserted: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub metadata: PipelineRunMetadata,
}

impl LoadResult {
    pub fn status(&self) -> RunStatus {
        self.metadata.status()
    }
}

pub struct Loader {
    store: Arc<dyn PersistencePort>,
    config: LoaderConfig,
}

impl Loader {
    pub fn new(store: Arc<dyn PersistencePort>) -> Self {
        Self::with_config(store, LoaderConfig::default())
    }

    pub fn with_config(store: Arc<dyn PersistencePort>, config: LoaderConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Upsert `batch` into `table` keyed by `conflict_key_columns`.
    ///
    /// Chunks are written in order and a failing chunk does not stop the
    /// rest. `Err` is only returned when the batch cannot be loaded at all;
    /// the run metadata is persisted in every case.
    pub fn load(
        &self,
        batch: &RecordSet,
        table: &str,
        conflict_key_columns: &[&str],
        pipeline_id: &str,
        run_id: &str,
    ) -> Result<LoadResult, LoadError> {
        let run = PipelineRunMetadata::begin(pipeline_id, run_id, table);
        info!(
            table,
            pipeline_id,
            run_id,
            rows = batch.len(),
            chunk_size = self.config.chunk_size,
            "Starting load"
        );

        if let Err(e) = preflight(batch, table, conflict_key_columns) {
            error!(table, pipeline_id, run_id, error = %e, "Load rejected");
            let metadata = run.finish(RunStatus::Failed, 0, batch.len(), Some(e.to_string()));
            self.save_metadata(&metadata);
            return Err(e);
        }

        let conflict: Vec<String> = conflict_key_columns.iter().map(|c| c.to_string()).collect();
        let mut rows = batch.to_json_rows();
        if self.config.stamp_loaded_at {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true);
            for row in &mut rows {
                row.insert("loaded_at".to_string(), now.clone().into());
            }
        }

        let (rows, keyless): (Vec<JsonRow>, Vec<JsonRow>) = rows
            .into_iter()
            .partition(|row| conflict.iter().all(|c| row.get(c).is_some_and(|v| !v.is_null())));

        let mut inserted = 0;
        let mut failed = keyless.len();
        let mut errors = Vec::new();
        if !keyless.is_empty() {
            warn!(table, rows = keyless.len(), "Rows with null conflict key values skipped");
            errors.push(format!(
                "{} rows have null conflict key values",
                keyless.len()
            ));
        }

        for (index, chunk) in rows.chunks(self.config.chunk_size.max(1)).enumerate() {
            match self.store.upsert(table, chunk, &conflict) {
                Ok(accepted) => {
                    inserted += accepted;
                    metrics::load::chunk_ok(table, accepted);
                    info!(table, chunk = index + 1, rows = chunk.len(), accepted, "Chunk upserted");
                }
                Err(e) => {
                    failed += chunk.len();
                    metrics::load::chunk_failed(table, chunk.len());
                    error!(table, chunk = index + 1, rows = chunk.len(), error = %e, "Chunk upsert failed");
                    errors.push(format!("chunk {}: {}", index + 1, e));
                }
            }
        }

        let status = if failed == 0 {
            RunStatus::Completed
        } else if inserted == 0 {
            RunStatus::Failed
        } else {
            RunStatus::PartialFailure
        };
        let message = (failed > 0).then(|| format!("Failed to load {} records", failed));
        let metadata = run.finish(status, inserted, failed, message);
        self.save_metadata(&metadata);

        info!(
            table,
            pipeline_id,
            run_id,
            total = batch.len(),
            inserted,
            failed,
            status = %status,
            "Load finished"
        );

        Ok(LoadResult {
            total: batch.len(),
            inserted,
            failed,
            errors,
            metadata,
        })
    }

    /// Greatest stored value of `column` in `table` among rows matching `filters`.
    pub fn last_loaded(
        &self,
        table: &str,
        column: &str,
        filters: &[(String, serde_json::Value)],
    ) -> Result<Option<serde_json::Value>, StoreError> {
        if !is_valid_identifier(table) {
            return Err(StoreError::InvalidIdentifier(table.to_string()));
        }
        self.store.latest_value(table, column, filters)
    }

    fn save_metadata(&self, metadata: &PipelineRunMetadata) {
        metrics::load::run_finished(metadata.status().as_str());
        match self.store.insert(&self.config.metadata_table, &metadata.to_row()) {
            Ok(()) => info!(
                pipeline_id = metadata.pipeline_id(),
                run_id = metadata.run_id(),
                status = %metadata.status(),
                "Pipeline metadata saved"
            ),
            Err(e) => error!(
                pipeline_id = metadata.pipeline_id(),
                run_id = metadata.run_id(),
                error = %e,
                "Failed to save pipeline metadata"
            ),
        }
    }
}

fn preflight(batch: &RecordSet, table: &str, conflict_key_columns: &[&str]) -> Result<(), LoadError> {
    if !is_valid_identifier(table) {
        return Err(LoadError::InvalidTable(table.to_string()));
    }
    if conflict_key_columns.is_empty() {
        return Err(LoadError::EmptyConflictKey);
    }
    // An empty batch has nothing to key; it loads as a completed no-op.
    if batch.is_empty() {
        return Ok(());
    }
    let missing: Vec<String> = conflict_key_columns
        .iter()
        .filter(|c| !batch.has_column(c))
        .map(|c| c.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LoadError::MissingConflictColumns(missing))
    }
}
