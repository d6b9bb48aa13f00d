//! Metrics catalogue for the ingestion pipeline
//!
//! Every metric name lives in `MetricName` so call sites never spell strings.
//! Recording goes through the `metrics` facade; until a recorder is installed
//! (see `init`) every call is a no-op.

use metrics_exporter_prometheus::PrometheusHandle;
use std::fmt;
use std::sync::OnceLock;
use tracing::info;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Rate limiter
    RateLimiterAcquired,
    RateLimiterWaits,
    RateLimiterWaitSeconds,

    // Gateway
    GatewayRequests,
    GatewayRetries,
    GatewayErrors,
    GatewayRequestDuration,

    // Standardize
    StandardizeRecords,
    StandardizeCoercionFailures,
    StandardizeBackfilledColumns,
    StandardizeDuplicatesDropped,
    StandardizeWarnings,

    // Clean
    CleanDuplicatesRemoved,
    CleanValuesFilled,

    // Quality gate
    QualityGateChecksFailed,
    QualityGateBatchesValid,
    QualityGateBatchesInvalid,
    QualityGateRowsFiltered,
    QualityGatePassRate,

    // Load
    LoadRowsAccepted,
    LoadRowsFailed,
    LoadChunksFailed,
    LoadRuns,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RateLimiterAcquired => "market_ingest_rate_limiter_acquired_total",
            MetricName::RateLimiterWaits => "market_ingest_rate_limiter_waits_total",
            MetricName::RateLimiterWaitSeconds => "market_ingest_rate_limiter_wait_seconds",

            MetricName::GatewayRequests => "market_ingest_gateway_requests_total",
            MetricName::GatewayRetries => "market_ingest_gateway_retries_total",
            MetricName::GatewayErrors => "market_ingest_gateway_errors_total",
            MetricName::GatewayRequestDuration => "market_ingest_gateway_request_duration_seconds",

            MetricName::StandardizeRecords => "market_ingest_standardize_records_total",
            MetricName::StandardizeCoercionFailures => {
                "market_ingest_standardize_coercion_failures_total"
            }
            MetricName::StandardizeBackfilledColumns => {
                "market_ingest_standardize_backfilled_columns_total"
            }
            MetricName::StandardizeDuplicatesDropped => {
                "market_ingest_standardize_duplicates_dropped_total"
            }
            MetricName::StandardizeWarnings => "market_ingest_standardize_warnings_total",

            MetricName::CleanDuplicatesRemoved => "market_ingest_clean_duplicates_removed_total",
            MetricName::CleanValuesFilled => "market_ingest_clean_values_filled_total",

            MetricName::QualityGateChecksFailed => "market_ingest_quality_gate_checks_failed_total",
            MetricName::QualityGateBatchesValid => "market_ingest_quality_gate_batches_valid_total",
            MetricName::QualityGateBatchesInvalid => {
                "market_ingest_quality_gate_batches_invalid_total"
            }
            MetricName::QualityGateRowsFiltered => "market_ingest_quality_gate_rows_filtered_total",
            MetricName::QualityGatePassRate => "market_ingest_quality_gate_pass_rate",

            MetricName::LoadRowsAccepted => "market_ingest_load_rows_accepted_total",
            MetricName::LoadRowsFailed => "market_ingest_load_rows_failed_total",
            MetricName::LoadChunksFailed => "market_ingest_load_chunks_failed_total",
            MetricName::LoadRuns => "market_ingest_load_runs_total",
        }
    }

    /// (phase, description)
    pub fn metadata(&self) -> (&'static str, &'static str) {
        match self {
            MetricName::RateLimiterAcquired => ("rate_limiter", "Request slots granted"),
            MetricName::RateLimiterWaits => ("rate_limiter", "Acquires that had to wait"),
            MetricName::RateLimiterWaitSeconds => ("rate_limiter", "Time spent waiting for a slot"),
            MetricName::GatewayRequests => ("gateway", "Outbound requests by status class"),
            MetricName::GatewayRetries => ("gateway", "Retried requests"),
            MetricName::GatewayErrors => ("gateway", "Fetches that surfaced an error"),
            MetricName::GatewayRequestDuration => ("gateway", "Request duration"),
            MetricName::StandardizeRecords => ("standardize", "Records standardized"),
            MetricName::StandardizeCoercionFailures => ("standardize", "Values nulled by coercion"),
            MetricName::StandardizeBackfilledColumns => ("standardize", "Required columns backfilled"),
            MetricName::StandardizeDuplicatesDropped => ("standardize", "Duplicate rows dropped"),
            MetricName::StandardizeWarnings => ("standardize", "Standardization warnings"),
            MetricName::CleanDuplicatesRemoved => ("clean", "Duplicate rows removed by cleaning"),
            MetricName::CleanValuesFilled => ("clean", "Missing values imputed"),
            MetricName::QualityGateChecksFailed => ("quality_gate", "Failed checks by level"),
            MetricName::QualityGateBatchesValid => ("quality_gate", "Batches judged valid"),
            MetricName::QualityGateBatchesInvalid => ("quality_gate", "Batches judged invalid"),
            MetricName::QualityGateRowsFiltered => ("quality_gate", "Rows removed by filtering"),
            MetricName::QualityGatePassRate => ("quality_gate", "Pass rate per batch"),
            MetricName::LoadRowsAccepted => ("load", "Rows accepted by the store"),
            MetricName::LoadRowsFailed => ("load", "Rows in failed chunks"),
            MetricName::LoadChunksFailed => ("load", "Failed chunks"),
            MetricName::LoadRuns => ("load", "Load runs by final status"),
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            RateLimiterAcquired,
            RateLimiterWaits,
            RateLimiterWaitSeconds,
            GatewayRequests,
            GatewayRetries,
            GatewayErrors,
            GatewayRequestDuration,
            StandardizeRecords,
            StandardizeCoercionFailures,
            StandardizeBackfilledColumns,
            StandardizeDuplicatesDropped,
            StandardizeWarnings,
            CleanDuplicatesRemoved,
            CleanValuesFilled,
            QualityGateChecksFailed,
            QualityGateBatchesValid,
            QualityGateBatchesInvalid,
            QualityGateRowsFiltered,
            QualityGatePassRate,
            LoadRowsAccepted,
            LoadRowsFailed,
            LoadChunksFailed,
            LoadRuns,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; later calls
/// are ignored.
pub fn init() -> Result<(), String> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    for metric in MetricName::all_metrics() {
        let (_, description) = metric.metadata();
        if metric.as_str().ends_with("_total") {
            ::metrics::describe_counter!(metric.as_str(), description);
        } else {
            ::metrics::describe_histogram!(metric.as_str(), description);
        }
    }
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics system initialized");
    Ok(())
}

/// Prometheus exposition text, when a recorder is installed.
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|h| h.render())
}

pub mod rate_limiter {
    use super::MetricName;

    pub fn acquired(source: &str) {
        ::metrics::counter!(MetricName::RateLimiterAcquired.as_str(), "source" => source.to_string())
            .increment(1);
    }

    pub fn waited(source: &str, seconds: f64) {
        ::metrics::counter!(MetricName::RateLimiterWaits.as_str(), "source" => source.to_string())
            .increment(1);
        ::metrics::histogram!(MetricName::RateLimiterWaitSeconds.as_str(), "source" => source.to_string())
            .record(seconds);
    }
}

pub mod gateway {
    use super::MetricName;

    pub fn request(source: &str, status: &str, seconds: f64) {
        ::metrics::counter!(
            MetricName::GatewayRequests.as_str(),
            "source" => source.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        ::metrics::histogram!(MetricName::GatewayRequestDuration.as_str(), "source" => source.to_string())
            .record(seconds);
    }

    pub fn retry(source: &str) {
        ::metrics::counter!(MetricName::GatewayRetries.as_str(), "source" => source.to_string())
            .increment(1);
    }

    pub fn error(source: &str, kind: &str) {
        ::metrics::counter!(
            MetricName::GatewayErrors.as_str(),
            "source" => source.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }
}

pub mod standardize {
    use super::MetricName;

    pub fn records(data_type: &str, count: usize) {
        ::metrics::counter!(MetricName::StandardizeRecords.as_str(), "data_type" => data_type.to_string())
            .increment(count as u64);
    }

    pub fn coercion_failures(column: &str, count: usize) {
        ::metrics::counter!(MetricName::StandardizeCoercionFailures.as_str(), "column" => column.to_string())
            .increment(count as u64);
    }

    pub fn backfilled(column: &str) {
        ::metrics::counter!(MetricName::StandardizeBackfilledColumns.as_str(), "column" => column.to_string())
            .increment(1);
    }

    pub fn duplicates_dropped(count: usize) {
        ::metrics::counter!(MetricName::StandardizeDuplicatesDropped.as_str()).increment(count as u64);
    }

    pub fn warning(kind: &'static str) {
        ::metrics::counter!(MetricName::StandardizeWarnings.as_str(), "kind" => kind).increment(1);
    }
}

pub mod clean {
    use super::MetricName;

    pub fn duplicates_removed(count: usize) {
        ::metrics::counter!(MetricName::CleanDuplicatesRemoved.as_str()).increment(count as u64);
    }

    pub fn values_filled(column: &str, count: usize) {
        ::metrics::counter!(MetricName::CleanValuesFilled.as_str(), "column" => column.to_string())
            .increment(count as u64);
    }
}

pub mod quality_gate {
    use super::MetricName;

    pub fn check_failed(check: &str, level: &str) {
        ::metrics::counter!(
            MetricName::QualityGateChecksFailed.as_str(),
            "check" => check.to_string(),
            "level" => level.to_string()
        )
        .increment(1);
    }

    pub fn batch(data_type: &str, valid: bool, pass_rate: f64) {
        let name = if valid {
            MetricName::QualityGateBatchesValid
        } else {
            MetricName::QualityGateBatchesInvalid
        };
        ::metrics::counter!(name.as_str(), "data_type" => data_type.to_string()).increment(1);
        ::metrics::histogram!(MetricName::QualityGatePassRate.as_str(), "data_type" => data_type.to_string())
            .record(pass_rate);
    }

    pub fn rows_filtered(count: usize) {
        ::metrics::counter!(MetricName::QualityGateRowsFiltered.as_str()).increment(count as u64);
    }
}

pub mod load {
    use super::MetricName;

    pub fn chunk_ok(table: &str, rows: usize) {
        ::metrics::counter!(MetricName::LoadRowsAccepted.as_str(), "table" => table.to_string())
            .increment(rows as u64);
    }

    pub fn chunk_failed(table: &str, rows: usize) {
        ::metrics::counter!(MetricName::LoadChunksFailed.as_str(), "table" => table.to_string())
            .increment(1);
        ::metrics::counter!(MetricName::LoadRowsFailed.as_str(), "table" => table.to_string())
            .increment(rows as u64);
    }

    pub fn run_finished(status: &str) {
        ::metrics::counter!(MetricName::LoadRuns.as_str(), "status" => status.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_unique_and_prefixed() {
        let names: Vec<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
        assert!(names.iter().all(|n| n.starts_with("market_ingest_")));
    }

    #[test]
    fn every_metric_has_a_phase() {
        let phases = ["rate_limiter", "gateway", "standardize", "clean", "quality_gate", "load"];
        for metric in MetricName::all_metrics() {
            assert!(phases.contains(&metric.metadata().0), "{}", metric);
        }
    }
}
