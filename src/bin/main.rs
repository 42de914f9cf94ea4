//! expql CLI - compile experiment definitions to analytics scripts
//!
//! Usage:
//!   expql compile <experiment.json> [--fingerprint]
//!   expql metric-value <params.json> [--by-date]
//!   expql validate <metrics.json> --fact-tables <tables.json>
//!   expql run <experiment.json> --events <events.json>
//!   expql seal <connection>
//!
//! Examples:
//!   expql compile checkout.json > checkout.js
//!   RUST_LOG=expql=debug expql run checkout.json --events sample-events.json

use clap::{Parser, Subcommand};
use expql::compile::{compile_experiment_query, compile_metric_value_query};
use expql::config::Settings;
use expql::crypto::{encrypt_params, init_master_key};
use expql::decode::decode_experiment_rows;
use expql::engine::Engine;
use expql::model::{
    fact_table_map, upgrade_legacy_metric, DimensionSpec, Event, EventSettings, ExperimentSettings,
    FactTableSchema, LegacyMetricDocument, MetricDefinition, MetricValueParams,
};
use expql::plan::ExperimentPlan;
use expql::validation::validate_metric;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "expql")]
#[command(about = "Compile experiment and metric definitions into event-analytics query scripts")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $EXPQL_CONFIG, ./expql.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an experiment results script
    Compile {
        /// Experiment description (settings, metrics, activation, dimension)
        file: PathBuf,

        /// Print the script fingerprint instead of the script
        #[arg(long)]
        fingerprint: bool,
    },

    /// Compile a metric value script
    MetricValue {
        /// Metric value parameters
        file: PathBuf,

        /// Include per-date rows
        #[arg(long)]
        by_date: bool,
    },

    /// Validate metric documents against fact tables
    Validate {
        /// JSON array of metric documents (any stored revision)
        file: PathBuf,

        /// JSON array of fact table schemas
        #[arg(long)]
        fact_tables: PathBuf,
    },

    /// Evaluate an experiment over recorded events
    Run {
        file: PathBuf,

        /// JSON array of events
        #[arg(long)]
        events: PathBuf,
    },

    /// Encrypt a configured connection with the master key
    Seal {
        /// Connection name from the config file
        connection: String,
    },
}

/// Experiment description read by `compile` and `run`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExperimentFile {
    settings: ExperimentSettings,
    /// Datasource event naming; the config file's `[events]` otherwise.
    #[serde(default)]
    events: Option<EventSettings>,
    metrics: Vec<MetricDefinition>,
    #[serde(default)]
    activation: Option<MetricDefinition>,
    #[serde(default)]
    dimension: Option<DimensionSpec>,
}

impl ExperimentFile {
    fn resolved_settings(&self, config: &Settings) -> ExperimentSettings {
        let events = self.events.clone().unwrap_or_else(|| config.event_settings());
        self.settings.clone().with_events(&events)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&settings.logging.filter);

    match cli.command {
        Commands::Compile { file, fingerprint } => cmd_compile(&settings, &file, fingerprint),
        Commands::MetricValue { file, by_date } => cmd_metric_value(&settings, &file, by_date),
        Commands::Validate { file, fact_tables } => cmd_validate(&settings, &file, &fact_tables),
        Commands::Run { file, events } => cmd_run(&settings, &file, &events),
        Commands::Seal { connection } => cmd_seal(&settings, &connection),
    }
}

/// `RUST_LOG` wins over the config filter; logs go to stderr.
fn init_logging(config_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let source = fs::read_to_string(path).map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
    serde_json::from_str(&source).map_err(|e| format!("Error parsing '{}': {}", path.display(), e))
}

fn cmd_compile(settings: &Settings, file: &Path, fingerprint: bool) -> ExitCode {
    let experiment: ExperimentFile = match read_json(file) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let query = compile_experiment_query(
        &experiment.resolved_settings(settings),
        &experiment.metrics,
        experiment.activation.as_ref(),
        experiment.dimension.as_ref(),
    );

    if fingerprint {
        println!("{}", query.fingerprint());
    } else {
        println!("{}", query);
    }
    ExitCode::SUCCESS
}

fn cmd_metric_value(settings: &Settings, file: &Path, by_date: bool) -> ExitCode {
    let mut params: MetricValueParams = match read_json(file) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    params.include_by_date |= by_date || settings.defaults.include_by_date;
    if params.extra_user_id_property.is_none() {
        params.extra_user_id_property = settings.event_settings().extra_user_id_property;
    }

    println!("{}", compile_metric_value_query(&params));
    ExitCode::SUCCESS
}

fn cmd_validate(settings: &Settings, file: &Path, fact_tables: &Path) -> ExitCode {
    let documents: Vec<LegacyMetricDocument> = match read_json(file) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let tables: Vec<FactTableSchema> = match read_json(fact_tables) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let features = match settings.defaults.feature_set() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tables = fact_table_map(tables);
    let mut failures = 0;
    for doc in documents {
        let metric = upgrade_legacy_metric(doc);
        match validate_metric(&metric, &tables, &features) {
            Ok(()) => println!("OK: {}", metric.id),
            Err(e) => {
                failures += 1;
                eprintln!("INVALID: {}: {}", metric.id, e);
            }
        }
    }

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_run(settings: &Settings, file: &Path, events: &Path) -> ExitCode {
    let experiment: ExperimentFile = match read_json(file) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let events: Vec<Event> = match read_json(events) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let plan = ExperimentPlan::build(
        &experiment.resolved_settings(settings),
        &experiment.metrics,
        experiment.activation.as_ref(),
        experiment.dimension.as_ref(),
    );
    let engine = Engine::new(settings.engine.batch_size);
    let rows = decode_experiment_rows(engine.run_experiment(&plan, &events));

    match serde_json::to_string_pretty(&rows) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error encoding results: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_seal(settings: &Settings, connection: &str) -> ExitCode {
    let params = match settings.get_connection(connection).and_then(|c| c.resolve()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let key = match init_master_key() {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Master key unavailable: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if !key.is_persistent() {
        eprintln!("Warning: EXPQL_MASTER_KEY is not set; sealed params will not survive this process");
    }

    match encrypt_params(key.key(), &params) {
        Ok(sealed) => {
            println!("{}", sealed);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Encryption failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
