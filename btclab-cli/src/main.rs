//! BtcLab CLI — snapshot ingest, model training and prediction commands.
//!
//! Commands:
//! - `fetch` — pull one day of snapshots from the exchange into the data dir
//! - `stage` — convert raw JSON snapshots to CSV
//! - `load` — insert staged CSV files into the database and archive them
//! - `ingest` — fetch, stage and load in one run
//! - `train` — build the training frame and select the best model
//! - `predict` — call the next trend from the persisted best model
//! - `status` — row counts per table

use anyhow::{bail, Context, Result};
use btclab_core::config::{self, DatabaseConfig, JoinKind, Objective, PipelineConfig, ENV_FILE};
use btclab_core::endpoint::{EndpointKind, FetchWindow};
use btclab_core::fetch::{BinanceClient, FetchOutcome, Fetcher};
use btclab_runner::frame::{build_training_frame, FrameSpec};
use btclab_runner::ingest::{run_fetch, run_ingest, run_load, run_stage, table_counts, with_store};
use btclab_runner::predict::predict_latest;
use btclab_runner::progress::{NoProgress, PipelineProgress, StdoutProgress};
use btclab_runner::selector::{select_best, SelectionOptions, SelectionReport};
use btclab_runner::summary::RunSummary;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "btclab", about = "BtcLab CLI — BTC snapshot pipeline and trend model")]
struct Cli {
    /// Path to a TOML pipeline config. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Env file with the DB_* variables. Falls back to BTC_APP_ENV_FILE.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Raw snapshot directory (overrides config and BTC_APP_BASE_DIR).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Model directory (overrides config and BTC_APP_MODEL_DIR).
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Print results as JSON instead of text.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one day of snapshots from the exchange.
    Fetch {
        /// Day to fetch (YYYY-MM-DD). Defaults to yesterday, UTC.
        #[arg(long)]
        date: Option<String>,

        /// Only this endpoint: klines, ticker/24hr or ticker/tradingDay.
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Convert raw JSON snapshots to CSV.
    Stage,
    /// Insert staged CSV files into the database.
    Load,
    /// Fetch, stage and load in one run.
    Ingest {
        /// Day to fetch (YYYY-MM-DD). Defaults to yesterday, UTC.
        #[arg(long)]
        date: Option<String>,
    },
    /// Train every candidate and keep the best.
    Train {
        /// regression or classification.
        #[arg(long)]
        objective: Option<String>,

        /// inner, left or full.
        #[arg(long)]
        join: Option<String>,

        /// Seed for the split and the forests.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Predict the next trend from the best saved model.
    Predict,
    /// Row counts for every table.
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "btclab=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    load_env_file(cli.env_file.as_deref())?;
    let config = load_config(&cli)?;
    let json = cli.json;
    // JSON output keeps stdout machine-readable.
    let progress: &dyn PipelineProgress = if json { &NoProgress } else { &StdoutProgress };

    match cli.command {
        Commands::Fetch { date, endpoint } => run_fetch_cmd(&config, date.as_deref(), endpoint.as_deref(), progress, json),
        Commands::Stage => {
            let summary = run_stage(&config, progress)?;
            finish(&summary, json)
        }
        Commands::Load => {
            let db_path = database_path(&config)?;
            let summary = with_store(&db_path, |store| run_load(store, &config, progress))?;
            finish(&summary, json)
        }
        Commands::Ingest { date } => {
            let db_path = database_path(&config)?;
            let window = parse_window(date.as_deref())?;
            let client = BinanceClient::new(&config.api.base_url)?;
            let summary = run_ingest(&client, &config, &db_path, window, progress)?;
            finish(&summary, json)
        }
        Commands::Train { objective, join, seed } => {
            let mut config = config;
            if let Some(o) = objective {
                config.training.objective = o.parse::<Objective>()?;
            }
            if let Some(j) = join {
                config.training.join = j.parse::<JoinKind>()?;
            }
            if let Some(s) = seed {
                config.training.seed = s;
            }
            run_train_cmd(&config, json)
        }
        Commands::Predict => run_predict_cmd(&config, json),
        Commands::Status => run_status_cmd(&config),
    }
}

fn load_env_file(flag: Option<&Path>) -> Result<()> {
    let path = match flag {
        Some(p) => p.to_path_buf(),
        None => match std::env::var_os(ENV_FILE) {
            Some(p) => PathBuf::from(p),
            None => return Ok(()),
        },
    };
    config::load_env_file(&path)?;
    Ok(())
}

/// File (or defaults), then environment, then flags.
fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env(|k| std::env::var(k).ok());
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.model_dir {
        config.model_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Validate the DB_* variables and resolve the database file.
fn database_path(config: &PipelineConfig) -> Result<PathBuf> {
    let db = DatabaseConfig::from_env()?;
    tracing::info!(db = %db.display_target(), "database settings loaded");
    Ok(db.sqlite_path(&config.db_dir))
}

fn parse_window(date: Option<&str>) -> Result<FetchWindow> {
    match date {
        Some(s) => {
            let day = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))?;
            Ok(FetchWindow::for_date(day))
        }
        None => Ok(FetchWindow::yesterday()),
    }
}

fn run_fetch_cmd(
    config: &PipelineConfig,
    date: Option<&str>,
    endpoint: Option<&str>,
    progress: &dyn PipelineProgress,
    json: bool,
) -> Result<()> {
    let window = parse_window(date)?;
    let client = BinanceClient::new(&config.api.base_url)?;

    let Some(name) = endpoint else {
        let summary = run_fetch(&client, config, window, progress);
        return finish(&summary, json);
    };

    let kind: EndpointKind = name.parse()?;
    let fetcher = Fetcher::new(&client, config.api.query_params(), &config.data_dir);
    match fetcher.fetch_outcome(kind, window) {
        FetchOutcome::Saved(snapshot) => {
            println!("Saved {}", snapshot.path.display());
            Ok(())
        }
        FetchOutcome::Empty => {
            println!("No data for {kind} on {}", window.date);
            Ok(())
        }
        FetchOutcome::Failed(e) => bail!("no snapshot saved for {kind} on {}: {e}", window.date),
    }
}

fn run_train_cmd(config: &PipelineConfig, json: bool) -> Result<()> {
    let db_path = database_path(config)?;
    let spec = FrameSpec::from_config(&config.training);
    let frame = with_store(&db_path, |store| -> Result<_> { Ok(build_training_frame(store, &spec)?) })?;
    if frame.height() == 0 {
        bail!(
            "training frame is empty; load candles into '{}' and statistics into '{}' first",
            spec.kline_table,
            spec.daily_table
        );
    }

    let report = select_best(&frame, &SelectionOptions::from_config(config))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn run_predict_cmd(config: &PipelineConfig, json: bool) -> Result<()> {
    let db_path = database_path(config)?;
    let spec = FrameSpec::from_config(&config.training);
    let frame = with_store(&db_path, |store| -> Result<_> { Ok(build_training_frame(store, &spec)?) })?;
    let prediction = predict_latest(&config.model_dir, &frame)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else {
        println!("{prediction}");
    }
    Ok(())
}

fn run_status_cmd(config: &PipelineConfig) -> Result<()> {
    let db_path = database_path(config)?;
    let counts = with_store(&db_path, |store| -> Result<_> { Ok(table_counts(store)?) })?;

    println!("Database: {}", db_path.display());
    for (table, rows) in counts {
        println!("  {table:<14} {rows:>10} rows");
    }
    Ok(())
}

fn print_report(report: &SelectionReport) {
    println!("Objective: {:?}", report.objective);
    println!(
        "Rows: {} train, {} test",
        report.train_rows, report.test_rows
    );
    for c in &report.candidates {
        let marker = if c.kind == report.best { "*" } else { " " };
        println!("{marker} {:<24} cv {:>10.6}", c.kind.name(), c.cv_score);
    }
    println!("Best model: {}", report.best_name());
    println!("Held-out MSE: {:.6}", report.test_mse);
    println!("Held-out accuracy: {:.2}%", report.test_accuracy * 100.0);
    if let Some(ll) = report.test_log_loss {
        println!("Held-out log-loss: {ll:.6}");
    }
    println!("Artifacts saved to: {}", report.model_dir.display());
}

/// Print the run summary and exit non-zero when any file failed.
fn finish(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{summary}");
    }
    if !summary.all_succeeded() {
        for outcome in summary.failures() {
            eprintln!("Failed: {} ({:?})", outcome.file_name(), outcome.status);
        }
        std::process::exit(1);
    }
    Ok(())
}
