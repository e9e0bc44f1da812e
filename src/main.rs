mod config;
mod database;
mod error;
mod features;
mod indicators;
mod ingest;
mod ledger;
mod models;
mod orchestrator;
mod registry;
mod types;

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::PipelineConfig;
use database::Database;
use features::{materialize_features, FeatureEngine};
use ingest::{ingest_symbol, CsvQuoteProvider};
use ledger::PredictionLedger;
use models::{ForecastEngine, ModelArtifact, ModelTrainer};
use orchestrator::{Orchestrator, Scheduler};
use registry::ModelRegistry;
use types::{ModelMetadata, ModelSelector, ModelStatus};

#[derive(Parser)]
#[command(name = "forecast-pipeline")]
#[command(version = "0.1.0")]
#[command(about = "Daily feature store, price forecasting and outcome reconciliation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration to a TOML file
    InitConfig {
        #[arg(short, long, default_value = "pipeline.toml")]
        output: PathBuf,
    },
    /// Load daily bars from the CSV directory
    Ingest {
        /// Symbol to ingest (defaults to the whole universe)
        #[arg(short, long)]
        symbol: Option<String>,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Compute and store feature vectors
    Features {
        #[arg(short, long)]
        symbol: Option<String>,
    },
    /// Fit a model and register it as a testing version
    Train {
        #[arg(short, long)]
        symbol: String,
        /// baseline or advanced
        #[arg(short, long, default_value = "baseline")]
        model: ModelSelector,
        /// Promote the new version to production
        #[arg(long)]
        promote: bool,
    },
    /// Register model metadata from JSON files
    Register {
        /// ModelMetadata JSON
        #[arg(long)]
        metadata: PathBuf,
        /// Fitted model artifact JSON
        #[arg(long)]
        artifact: Option<PathBuf>,
    },
    /// Make a model version the production version
    Promote {
        #[arg(short, long)]
        model: ModelSelector,
        #[arg(long)]
        version: String,
    },
    /// Change a model version's status (active, archived, testing)
    SetStatus {
        #[arg(short, long)]
        model: ModelSelector,
        #[arg(long)]
        version: String,
        #[arg(long)]
        status: ModelStatus,
    },
    /// List registered model versions
    Models {
        #[arg(short, long)]
        model: Option<ModelSelector>,
    },
    /// Print a forecast from the production model without storing it
    Forecast {
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long, default_value = "baseline")]
        model: ModelSelector,
        #[arg(long)]
        horizon: Option<usize>,
        /// Store the predictions in the ledger
        #[arg(long)]
        record: bool,
    },
    /// Fill in actual outcomes for matured predictions
    Reconcile {
        #[arg(short, long)]
        symbol: Option<String>,
    },
    /// Show accuracy of reconciled predictions
    Accuracy {
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long, default_value = "baseline")]
        model: ModelSelector,
        #[arg(long, default_value = "30")]
        days: i64,
    },
    /// Run (or resume) one pipeline cycle
    Run {
        /// Cycle date (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run cycles daily at the configured time until interrupted
    Schedule,
    /// Show recent job log rows
    Jobs {
        #[arg(short, long, default_value = "20")]
        limit: u32,
        #[arg(long)]
        cycle: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    if let Commands::InitConfig { output } = &cli.command {
        return config::write_default_config(output);
    }

    let config = config::load_config(cli.config.as_deref())?;
    let db = Database::new(&config.database.url, config.database.max_connections)
        .await
        .context("opening database")?;
    info!(url = %config.database.url, symbols = config.universe.symbols.len(), "Forecast pipeline ready");

    match cli.command {
        Commands::InitConfig { .. } => {}
        Commands::Ingest { symbol, start, end } => run_ingest(&db, &config, symbol, start, end).await?,
        Commands::Features { symbol } => run_features(&db, &config, symbol).await?,
        Commands::Train { symbol, model, promote } => run_train(&db, &config, &symbol, model, promote).await?,
        Commands::Register { metadata, artifact } => run_register(&db, &metadata, artifact.as_deref()).await?,
        Commands::Promote { model, version } => {
            ModelRegistry::new(db.clone()).promote(model.model_name(), &version).await?;
            println!("{} {} is now production", model.model_name(), version);
        }
        Commands::SetStatus { model, version, status } => {
            ModelRegistry::new(db.clone())
                .set_status(model.model_name(), &version, status)
                .await?;
            println!("{} {} -> {}", model.model_name(), version, status.as_str());
        }
        Commands::Models { model } => show_models(&db, model).await?,
        Commands::Forecast { symbol, model, horizon, record } => {
            run_forecast(&db, &config, &symbol, model, horizon, record).await?
        }
        Commands::Reconcile { symbol } => run_reconcile(&db, &config, symbol).await?,
        Commands::Accuracy { symbol, model, days } => show_accuracy(&db, &symbol, model, days).await?,
        Commands::Run { date } => run_cycle(db, config, date).await?,
        Commands::Schedule => run_schedule(db, config).await?,
        Commands::Jobs { limit, cycle } => show_jobs(&db, limit, cycle).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn target_symbols(config: &PipelineConfig, symbol: Option<String>, with_reference: bool) -> Vec<String> {
    match symbol {
        Some(s) => vec![s],
        None if with_reference => config.all_instruments(),
        None => config.universe.symbols.clone(),
    }
}

async fn run_ingest(
    db: &Database,
    config: &PipelineConfig,
    symbol: Option<String>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    let provider = CsvQuoteProvider::new(&config.ingest.csv_dir);
    let end = end.unwrap_or_else(|| Utc::now().date_naive());
    let start = start.unwrap_or(end - Duration::days(config.orchestrator.history_window_days));

    println!("\n{:<16} {:>8} {:>8} {:>8}", "Symbol", "Fetched", "Inserted", "Rejected");
    println!("{}", "-".repeat(43));
    for symbol in target_symbols(config, symbol, true) {
        match ingest_symbol(db, &provider, &symbol, start, end).await {
            Ok(s) => println!("{:<16} {:>8} {:>8} {:>8}", symbol, s.fetched, s.inserted, s.rejected),
            Err(e) => warn!(symbol = %symbol, error = %e, "Ingest failed"),
        }
    }
    Ok(())
}

async fn run_features(db: &Database, config: &PipelineConfig, symbol: Option<String>) -> Result<()> {
    let engine = FeatureEngine::new(config.features.clone());
    let as_of = Utc::now();
    let since = as_of - Duration::days(config.orchestrator.history_window_days);

    for symbol in target_symbols(config, symbol, false) {
        let summary = materialize_features(db, &engine, &config.universe, &symbol, Some(since), as_of).await?;
        println!(
            "{}: {} vectors computed, {} new, {} patterns",
            symbol, summary.computed, summary.inserted, summary.patterns
        );
    }
    Ok(())
}

async fn run_train(db: &Database, config: &PipelineConfig, symbol: &str, model: ModelSelector, promote: bool) -> Result<()> {
    let registry = ModelRegistry::new(db.clone());
    let trainer = ModelTrainer::new(db.clone(), registry.clone(), config.clone());
    let outcome = trainer.train(model, symbol, Utc::now()).await?;
    let meta = &outcome.metadata;

    println!("\n=== Trained {} {} ===", meta.model_name, meta.model_version);
    println!("Samples: {}", meta.training_samples);
    print_metric("Train RMSE", meta.metrics.train_rmse);
    print_metric("Val RMSE", meta.metrics.val_rmse);
    print_metric("Val MAE", meta.metrics.val_mae);
    print_metric("Val R2", meta.metrics.val_r2);
    print_metric("Directional accuracy", meta.metrics.directional_accuracy);
    if !meta.feature_importance.is_empty() {
        println!("Feature importance:");
        let mut ranked: Vec<_> = meta.feature_importance.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(a.1));
        for (name, score) in ranked {
            println!("  {:<24} {:.4}", name, score);
        }
    }

    if promote {
        registry.promote(&meta.model_name, &meta.model_version).await?;
        println!("Promoted to production");
    }
    Ok(())
}

fn print_metric(label: &str, value: Option<f64>) {
    match value {
        Some(v) => println!("{}: {:.4}", label, v),
        None => println!("{}: n/a", label),
    }
}

async fn run_register(db: &Database, metadata_path: &Path, artifact_path: Option<&Path>) -> Result<()> {
    let raw = std::fs::read_to_string(metadata_path).with_context(|| format!("reading {}", metadata_path.display()))?;
    let mut metadata: ModelMetadata = serde_json::from_str(&raw)?;

    if let Some(path) = artifact_path {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let artifact = ModelArtifact::from_json(&raw)?;
        if artifact.model_type() != metadata.model_type {
            bail!(
                "artifact is a {} model but metadata says {}",
                artifact.model_type().as_str(),
                metadata.model_type.as_str()
            );
        }
        metadata.artifact = Some(artifact.to_json()?);
    }
    // Production is only ever set through promote
    metadata.is_production = false;

    ModelRegistry::new(db.clone()).register(&metadata).await?;
    println!("Registered {} {}", metadata.model_name, metadata.model_version);
    Ok(())
}

async fn show_models(db: &Database, model: Option<ModelSelector>) -> Result<()> {
    let models = ModelRegistry::new(db.clone())
        .list(model.map(|m| m.model_name()))
        .await?;

    println!("\n{:<16} {:>9} {:<10} {:>4} {:>10} {:<20}", "Model", "Version", "Status", "Prod", "Val RMSE", "Trained");
    println!("{}", "-".repeat(74));
    for m in models {
        println!(
            "{:<16} {:>9} {:<10} {:>4} {:>10} {:<20}",
            m.model_name,
            m.model_version,
            m.status.as_str(),
            if m.is_production { "*" } else { "" },
            m.metrics.val_rmse.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "n/a".to_string()),
            m.trained_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn run_forecast(
    db: &Database,
    config: &PipelineConfig,
    symbol: &str,
    model: ModelSelector,
    horizon: Option<usize>,
    record: bool,
) -> Result<()> {
    let engine = ForecastEngine::new(
        db.clone(),
        ModelRegistry::new(db.clone()),
        config.forecast.clone(),
        config.orchestrator.history_window_days,
    );
    let horizon = horizon.unwrap_or(config.forecast.horizon_days);
    let predictions = engine.forecast(symbol, horizon, model).await?;

    println!("{}", serde_json::to_string_pretty(&predictions)?);
    if record {
        let written = PredictionLedger::new(db.clone()).record(&predictions).await?;
        info!(symbol, written, "Recorded predictions");
    }
    Ok(())
}

async fn run_reconcile(db: &Database, config: &PipelineConfig, symbol: Option<String>) -> Result<()> {
    let ledger = PredictionLedger::new(db.clone());
    let as_of = Utc::now();
    for symbol in target_symbols(config, symbol, false) {
        let updated = ledger.reconcile(&symbol, as_of).await?;
        println!("{}: {} predictions reconciled", symbol, updated);
    }
    Ok(())
}

async fn show_accuracy(db: &Database, symbol: &str, model: ModelSelector, days: i64) -> Result<()> {
    let report = PredictionLedger::new(db.clone())
        .accuracy(symbol, model.model_name(), days)
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_cycle(db: Database, config: PipelineConfig, date: Option<NaiveDate>) -> Result<()> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let provider = Arc::new(CsvQuoteProvider::new(&config.ingest.csv_dir));
    let orchestrator = Orchestrator::new(db, provider, config);

    let controller = orchestrator.controller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            controller.cancel();
        }
    });

    let report = orchestrator.run_cycle(date).await?;
    let state = orchestrator.controller().get_state().await;
    println!("\n=== {} ({} steps run) ===", report.cycle_id, state.steps_completed);
    for outcome in &report.outcomes {
        match &outcome.error {
            Some(e) => println!("{:<16} {:<12} {}", outcome.symbol, outcome.final_step, e),
            None => println!("{:<16} {:<12}", outcome.symbol, outcome.final_step),
        }
    }
    if report.cancelled {
        println!("Cycle cancelled; re-run to resume");
    }
    Ok(())
}

async fn run_schedule(db: Database, config: PipelineConfig) -> Result<()> {
    let provider = Arc::new(CsvQuoteProvider::new(&config.ingest.csv_dir));
    let schedule = config.schedule.clone();
    let orchestrator = Arc::new(Orchestrator::new(db, provider, config));
    let scheduler = Scheduler::new(orchestrator.clone(), &schedule)?;

    let mut status_rx = orchestrator.controller().subscribe();
    tokio::spawn(async move {
        while let Ok(status) = status_rx.recv().await {
            debug!(%status, "Cycle status changed");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = orchestrator.controller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(cycle_running = controller.is_running(), "Shutdown requested");
            controller.cancel();
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}

async fn show_jobs(db: &Database, limit: u32, cycle: Option<String>) -> Result<()> {
    let runs = match cycle {
        Some(cycle_id) => db.job_runs_for_cycle(&cycle_id).await?,
        None => db.recent_job_runs(limit).await?,
    };

    println!(
        "\n{:<18} {:<14} {:<12} {:<10} {:>8}  {}",
        "Cycle", "Symbol", "Job", "Status", "ms", "Message"
    );
    println!("{}", "-".repeat(90));
    for run in runs {
        println!(
            "{:<18} {:<14} {:<12} {:<10} {:>8}  {}",
            run.cycle_id,
            run.symbol,
            run.job_type,
            run.status.as_str(),
            run.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
            run.message
        );
    }
    Ok(())
}
