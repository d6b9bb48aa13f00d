use crate::app::ports::ProviderAdapter;
use crate::domain::{DataType, RecordSet};
use crate::error::Result;
use crate::pipeline::load::{LoadResult, Loader};
use crate::pipeline::processing::clean::{Cleaner, CleaningReport};
use crate::pipeline::processing::quality_gate::{ValidationLevel, ValidationSummary, Validator};
use crate::pipeline::processing::standardize::{StandardizationWarning, Standardizer};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Table and conflict key a batch is upserted into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    pub table: String,
    pub conflict_columns: Vec<String>,
}

impl LoadTarget {
    pub fn new(table: impl Into<String>, conflict_columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            conflict_columns,
        }
    }

    /// Default table and conflict key for `data_type`.
    pub fn for_data_type(data_type: &DataType) -> Self {
        Self {
            table: data_type.default_table(),
            conflict_columns: data_type
                .default_conflict_key()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// What happened to one batch.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub run_id: String,
    pub raw_rows: usize,
    pub standardized_rows: usize,
    pub warnings: Vec<StandardizationWarning>,
    /// `None` unless a cleaner is configured.
    pub cleaning: Option<CleaningReport>,
    pub summary: ValidationSummary,
    pub valid: bool,
    /// `None` when the batch was not valid enough to load.
    pub load: Option<LoadResult>,
}

/// Adapter -> Standardizer -> (Cleaner) -> Validator -> Loader, in sequence.
///
/// A batch whose summary is not valid is never loaded.
pub struct IngestUseCase {
    standardizer: Standardizer,
    cleaner: Option<Cleaner>,
    validator: Validator,
    loader: Arc<Loader>,
    pipeline_id: String,
    level_floor: ValidationLevel,
}

impl IngestUseCase {
    pub fn new(
        standardizer: Standardizer,
        validator: Validator,
        loader: Arc<Loader>,
        pipeline_id: impl Into<String>,
    ) -> Self {
        Self {
            standardizer,
            cleaner: None,
            validator,
            loader,
            pipeline_id: pipeline_id.into(),
            level_floor: ValidationLevel::Error,
        }
    }

    /// Clean standardized batches before they are validated.
    pub fn with_cleaner(mut self, cleaner: Cleaner) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    pub fn with_level_floor(mut self, level_floor: ValidationLevel) -> Self {
        self.level_floor = level_floor;
        self
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Fetch one item through `adapter` and ingest it.
    pub fn ingest_item(
        &self,
        adapter: &dyn ProviderAdapter,
        item: &str,
        target: &LoadTarget,
    ) -> Result<IngestOutcome> {
        let raw = adapter.fetch_records(item)?;
        self.ingest_records(&raw, &adapter.data_type(), target)
    }

    /// Ingest an already-fetched raw batch.
    pub fn ingest_records(
        &self,
        raw: &RecordSet,
        data_type: &DataType,
        target: &LoadTarget,
    ) -> Result<IngestOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let standardized = self.standardizer.standardize(raw, data_type);
        let standardized_rows = standardized.records.len();
        let (prepared, cleaning) = match &self.cleaner {
            Some(cleaner) => {
                let cleaned = cleaner.clean(&standardized.records);
                (cleaned.records, Some(cleaned.report))
            }
            None => (standardized.records, None),
        };
        let (records, summary) = self
            .validator
            .validate(&prepared, data_type, self.level_floor);
        let valid = self.validator.is_valid(&summary);

        let load = if valid {
            let conflict: Vec<&str> = target.conflict_columns.iter().map(String::as_str).collect();
            Some(self.loader.load(
                &records,
                &target.table,
                &conflict,
                &self.pipeline_id,
                &run_id,
            )?)
        } else {
            warn!(
                pipeline_id = %self.pipeline_id,
                run_id = %run_id,
                data_type = %data_type,
                pass_rate = summary.pass_rate(),
                failed_checks = summary.failed(),
                "Batch failed validation; not loading"
            );
            None
        };

        info!(
            pipeline_id = %self.pipeline_id,
            run_id = %run_id,
            data_type = %data_type,
            raw_rows = raw.len(),
            standardized_rows,
            loaded = load.as_ref().map_or(0, |l| l.inserted),
            "Ingest finished"
        );

        Ok(IngestOutcome {
            run_id,
            raw_rows: raw.len(),
            standardized_rows,
            warnings: standardized.warnings,
            cleaning,
            summary,
            valid,
            load,
        })
    }
}
