use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use market_ingest::apis::JsonRecordsAdapter;
use market_ingest::app::ingest_use_case::{IngestOutcome, IngestUseCase, LoadTarget};
use market_ingest::app::ports::{Method, PersistencePort};
use market_ingest::config::{AppConfig, JobSection};
use market_ingest::domain::{DataType, RecordSet};
use market_ingest::infra::{ReqwestHttp, SqliteStore, SystemClock};
use market_ingest::observability::{init_logging, metrics};
use market_ingest::pipeline::ingestion::{RateLimiter, RequestGateway, SourceClient};
use market_ingest::pipeline::load::Loader;
use market_ingest::pipeline::processing::clean::Cleaner;
use market_ingest::pipeline::processing::quality_gate::{ReportFormat, ValidationLevel, Validator};
use market_ingest::pipeline::processing::standardize::Standardizer;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "market_ingest")]
#[command(about = "Standardize, validate and load market data from external providers")]
#[command(version)]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Write Prometheus metrics text to this file on exit
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Standardize, validate and load a JSON array of records
    IngestFile {
        #[arg(long)]
        input: PathBuf,
        /// stock, crypto, forex, economic, weather, sentiment or any other label
        #[arg(long)]
        data_type: String,
        /// Target table (defaults to the data type's table)
        #[arg(long)]
        table: Option<String>,
        /// Conflict key columns, comma-separated
        #[arg(long, value_delimiter = ',')]
        conflict: Option<Vec<String>>,
    },
    /// Standardize and validate a JSON array of records and print the report
    ValidateFile {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        data_type: String,
        /// text or json
        #[arg(long, default_value = "text")]
        format: ReportFormat,
    },
    /// Run the jobs from the config file, one worker per source
    RunJobs {
        /// Only run these jobs (comma-separated)
        #[arg(long, value_delimiter = ',')]
        jobs: Option<Vec<String>>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // run-jobs cannot do anything without a config file; the file commands fall back to defaults
    let config = if cli.config.exists() || matches!(cli.command, Commands::RunJobs { .. }) {
        AppConfig::load(&cli.config)
            .with_context(|| format!("loading config {}", cli.config.display()))?
    } else {
        AppConfig::default()
    };

    let _log_guard = init_logging(&config.pipeline.log_dir).with_context(|| {
        format!("creating log directory {}", config.pipeline.log_dir.display())
    })?;
    if let Err(e) = metrics::init() {
        warn!("Metrics disabled: {}", e);
    }

    let outcome = match cli.command {
        Commands::IngestFile {
            input,
            data_type,
            table,
            conflict,
        } => ingest_file(&config, &input, &data_type, table, conflict),
        Commands::ValidateFile {
            input,
            data_type,
            format,
        } => validate_file(&config, &input, &data_type, format),
        Commands::RunJobs { jobs } => run_jobs(&config, jobs),
    };

    if let Some(path) = &cli.metrics_out {
        write_metrics(path);
    }
    outcome
}

fn write_metrics(path: &Path) {
    let Some(text) = metrics::render() else {
        return;
    };
    match fs::write(path, text) {
        Ok(()) => info!(path = %path.display(), "Metrics written"),
        Err(e) => error!(path = %path.display(), error = %e, "Failed to write metrics"),
    }
}

fn read_records(path: &Path) -> Result<RecordSet> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    let Some(items) = payload.as_array() else {
        bail!("{} must contain a JSON array of records", path.display());
    };
    Ok(RecordSet::from_json_rows(items))
}

fn open_store(config: &AppConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.pipeline.database)
        .with_context(|| format!("opening {}", config.pipeline.database.display()))?;
    Ok(Arc::new(store))
}

/// Use case for batches from `source`, or with the pipeline-wide settings.
fn build_use_case(
    config: &AppConfig,
    store: Arc<dyn PersistencePort>,
    source: Option<&str>,
) -> Result<IngestUseCase> {
    let loader = Loader::with_config(store, config.loader_config());
    let (validator_config, cleaner_config) = match source {
        Some(name) => (config.validator_config_for(name), config.cleaner_config_for(name)),
        None => (config.validator_config(), config.cleaner_config()),
    };
    let mut use_case = IngestUseCase::new(
        Standardizer::new(config.standardizer_config()?),
        Validator::new(validator_config),
        Arc::new(loader),
        config.pipeline.pipeline_id.clone(),
    );
    if config.pipeline.clean {
        use_case = use_case.with_cleaner(Cleaner::new(cleaner_config));
    }
    Ok(use_case)
}

fn ingest_file(
    config: &AppConfig,
    input: &Path,
    data_type: &str,
    table: Option<String>,
    conflict: Option<Vec<String>>,
) -> Result<()> {
    let data_type = DataType::from(data_type);
    let raw = read_records(input)?;

    let defaults = LoadTarget::for_data_type(&data_type);
    let target = LoadTarget::new(
        table.unwrap_or(defaults.table),
        conflict.unwrap_or(defaults.conflict_columns),
    );

    let use_case = build_use_case(config, open_store(config)?, None)?;
    let outcome = use_case.ingest_records(&raw, &data_type, &target)?;
    print_outcome(&input.display().to_string(), &outcome);
    if !outcome.valid {
        bail!("batch failed validation");
    }
    Ok(())
}

fn validate_file(config: &AppConfig, input: &Path, data_type: &str, format: ReportFormat) -> Result<()> {
    let data_type = DataType::from(data_type);
    let raw = read_records(input)?;

    let standardized = Standardizer::new(config.standardizer_config()?).standardize(&raw, &data_type);
    for warning in &standardized.warnings {
        warn!(kind = warning.kind(), "{}", warning);
    }
    let validator = Validator::new(config.validator_config());
    let (_, summary) = validator.validate(&standardized.records, &data_type, ValidationLevel::Info);

    println!("{}", summary.to_report(format, validator.config().validity_threshold));
    Ok(())
}

fn run_jobs(config: &AppConfig, only: Option<Vec<String>>) -> Result<()> {
    let jobs: Vec<JobSection> = config
        .jobs
        .iter()
        .filter(|job| only.as_ref().map_or(true, |names| names.contains(&job.name)))
        .cloned()
        .collect();
    if jobs.is_empty() {
        warn!("No jobs to run");
        println!("⚠️  No jobs matched");
        return Ok(());
    }

    let clock = Arc::new(SystemClock);
    let limiter = Arc::new(RateLimiter::new(clock.clone()));
    let transport = Arc::new(ReqwestHttp::new()?);
    let mut gateway = RequestGateway::new(transport, limiter, clock);
    for source in &config.sources {
        gateway.register_source(source.to_source_config()?);
    }
    let gateway = Arc::new(gateway);

    let store = open_store(config)?;

    // Jobs against one source run in sequence so they share its rate limit.
    let mut by_source: BTreeMap<String, Vec<JobSection>> = BTreeMap::new();
    for job in jobs {
        by_source.entry(job.source.clone()).or_default().push(job);
    }

    let mut workers = Vec::with_capacity(by_source.len());
    for (source, jobs) in by_source {
        let method = config
            .source(&source)
            .map_or(Method::Get, |s| Method::from(s.method));
        let client = SourceClient::new(gateway.clone(), source.clone()).with_method(method);
        let use_case = build_use_case(config, store.clone(), Some(&source))?;
        workers.push((use_case, client, jobs));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let failures = runtime.block_on(async {
        let mut set = JoinSet::new();
        for (use_case, client, jobs) in workers {
            set.spawn_blocking(move || run_source_jobs(&use_case, client, &jobs));
        }

        let mut failures = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(failed) => failures += failed,
                Err(e) => {
                    error!("Source worker panicked: {}", e);
                    failures += 1;
                }
            }
        }
        failures
    });

    if failures > 0 {
        bail!("{} job items failed", failures);
    }
    println!("✅ All jobs completed");
    Ok(())
}

/// Runs every item of every job; returns how many items did not load.
fn run_source_jobs(use_case: &IngestUseCase, client: SourceClient, jobs: &[JobSection]) -> usize {
    let fetcher = Arc::new(client);
    let mut failures = 0;

    for job in jobs {
        let mut adapter =
            JsonRecordsAdapter::new(&job.name, fetcher.clone(), job.data_type(), &job.endpoint)
                .with_params(job.params.clone())
                .with_layout(job.records.clone());
        if let Some(param) = &job.item_param {
            adapter = adapter.with_item_param(param);
        }
        if let Some(column) = &job.item_column {
            adapter = adapter.with_item_column(column);
        }

        let items = if job.items.is_empty() {
            vec![String::new()]
        } else {
            job.items.clone()
        };
        let target = job.target();

        for item in &items {
            let label = if item.is_empty() {
                job.name.clone()
            } else {
                format!("{}/{}", job.name, item)
            };
            match use_case.ingest_item(&adapter, item, &target) {
                Ok(outcome) => {
                    if !outcome.valid {
                        failures += 1;
                    }
                    print_outcome(&label, &outcome);
                }
                Err(e) => {
                    failures += 1;
                    error!(job = %job.name, item = %item, error = %e, "Job item failed");
                    println!("❌ {}: {}", label, e);
                }
            }
        }
    }
    failures
}

fn print_outcome(label: &str, outcome: &IngestOutcome) {
    match &outcome.load {
        Some(load) => println!(
            "✅ {}: {} rows standardized, {} loaded, {} failed ({})",
            label,
            outcome.standardized_rows,
            load.inserted,
            load.failed,
            load.status()
        ),
        None => println!(
            "❌ {}: failed validation (pass rate {:.1}%, {} failed checks)",
            label,
            outcome.summary.pass_rate() * 100.0,
            outcome.summary.failed()
        ),
    }
    if !outcome.warnings.is_empty() {
        println!("   {} standardization warnings", outcome.warnings.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_file_splits_conflict_columns() {
        let cli = Cli::try_parse_from([
            "market_ingest",
            "ingest-file",
            "--input",
            "rows.json",
            "--data-type",
            "stock",
            "--conflict",
            "symbol,date",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("config.toml"));
        match cli.command {
            Commands::IngestFile {
                input,
                data_type,
                table,
                conflict,
            } => {
                assert_eq!(input, PathBuf::from("rows.json"));
                assert_eq!(data_type, "stock");
                assert_eq!(table, None);
                assert_eq!(conflict, Some(vec!["symbol".to_string(), "date".to_string()]));
            }
            _ => panic!("expected ingest-file"),
        }
    }

    #[test]
    fn validate_file_reads_report_format() {
        let cli = Cli::try_parse_from([
            "market_ingest",
            "validate-file",
            "--input",
            "rows.json",
            "--data-type",
            "forex",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::ValidateFile {
                format: ReportFormat::Text,
                ..
            }
        ));

        let cli = Cli::try_parse_from([
            "market_ingest",
            "validate-file",
            "--input",
            "rows.json",
            "--data-type",
            "forex",
            "--format",
            "json",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::ValidateFile {
                format: ReportFormat::Json,
                ..
            }
        ));

        assert!(Cli::try_parse_from([
            "market_ingest",
            "validate-file",
            "--input",
            "rows.json",
            "--data-type",
            "forex",
            "--format",
            "xml",
        ])
        .is_err());
    }

    #[test]
    fn run_jobs_accepts_global_flags_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "market_ingest",
            "run-jobs",
            "--jobs",
            "equities_daily,macro_series",
            "--config",
            "prod.toml",
            "--metrics-out",
            "metrics.prom",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("prod.toml"));
        assert_eq!(cli.metrics_out, Some(PathBuf::from("metrics.prom")));
        match cli.command {
            Commands::RunJobs { jobs } => assert_eq!(
                jobs,
                Some(vec!["equities_daily".to_string(), "macro_series".to_string()])
            ),
            _ => panic!("expected run-jobs"),
        }
    }

    #[test]
    fn missing_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["market_ingest"]).is_err());
        assert!(Cli::try_parse_from(["market_ingest", "ingest-file", "--input", "rows.json"]).is_err());
    }
}
