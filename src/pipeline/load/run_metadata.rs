use crate::domain::JsonRow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Loading,
    Completed,
    PartialFailure,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Loading => "loading",
            RunStatus::Completed => "completed",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record per load attempt.
///
/// Only an `ActiveRun` can produce a finished record, and `finish` consumes
/// it, so a record is stamped exactly once and is read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRunMetadata {
    pipeline_id: String,
    run_id: String,
    source: String,
    status: RunStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    records_processed: usize,
    records_failed: usize,
    error_message: Option<String>,
}

impl PipelineRunMetadata {
    /// Open a run in `loading` state; `source` names the target table.
    pub fn begin(pipeline_id: &str, run_id: &str, source: &str) -> ActiveRun {
        ActiveRun {
            metadata: PipelineRunMetadata {
                pipeline_id: pipeline_id.to_string(),
                run_id: run_id.to_string(),
                source: source.to_string(),
                status: RunStatus::Loading,
                start_time: Utc::now(),
                end_time: None,
                records_processed: 0,
                records_failed: 0,
                error_message: None,
            },
        }
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn records_processed(&self) -> usize {
        self.records_processed
    }

    pub fn records_failed(&self) -> usize {
        self.records_failed
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Flat row for the metadata table.
    pub fn to_row(&self) -> JsonRow {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => JsonRow::new(),
        }
    }
}

/// A run between `begin` and `finish`.
#[derive(Debug)]
pub struct ActiveRun {
    metadata: PipelineRunMetadata,
}

impl ActiveRun {
    pub fn metadata(&self) -> &PipelineRunMetadata {
        &self.metadata
    }

    pub fn finish(
        self,
        status: RunStatus,
        records_processed: usize,
        records_failed: usize,
        error_message: Option<String>,
    ) -> PipelineRunMetadata {
        PipelineRunMetadata {
            status,
            end_time: Some(Utc::now()),
            records_processed,
            records_failed,
            error_message,
            ..self.metadata
        }
    }
}
