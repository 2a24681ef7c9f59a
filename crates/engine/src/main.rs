// crates/engine/src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::Error;
use common::config::AppConfig;
use engine::{AggregateRequest, FileSnapshotStore, RunMode, RunOptions, RunOutcome, SnapshotStore};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use universe::AssetWhitelist;

/// Crypto sentiment aggregation and daily scoring
#[derive(Parser, Debug)]
#[command(name = "sentiment", version, about, long_about = None)]
struct Cli {
    /// Config file (default: config/sentiment.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daily pipeline and persist snapshots
    Run {
        #[arg(long, value_enum, default_value_t = Mode::Overwrite)]
        mode: Mode,

        /// Report date as YYYY-MM-DD (default: today, UTC)
        #[arg(long)]
        date: Option<String>,

        /// Comma-separated tickers
        #[arg(long, value_delimiter = ',')]
        universe: Option<Vec<String>>,

        /// Only entries at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,

        /// Dump Prometheus metrics after the run
        #[arg(long)]
        print_metrics: bool,
    },
    /// Print the aggregated report without persisting
    Aggregate {
        #[arg(long, value_delimiter = ',')]
        universe: Option<Vec<String>>,

        #[arg(long)]
        since: Option<String>,
    },
    /// Print the most recent snapshot
    Latest {
        #[arg(long, default_value = "de")]
        locale: String,
    },
    /// Print recent snapshots, newest first
    History {
        #[arg(long, default_value = "de")]
        locale: String,

        #[arg(long, default_value_t = 7)]
        limit: usize,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Overwrite,
    Skip,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Overwrite => RunMode::Overwrite,
            Mode::Skip => RunMode::Skip,
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;
    common::telemetry::describe();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Run {
            mode,
            date,
            universe,
            since,
            print_metrics,
        } => {
            let runner = engine::build_runner(&config)?;
            let outcome = runner
                .run(RunOptions {
                    mode: mode.into(),
                    date,
                    universe,
                    since,
                })
                .await?;

            if let RunOutcome::Completed(report) = &outcome {
                for warning in &report.warnings {
                    tracing::warn!("{}", warning);
                }
            }
            print_json(&outcome)?;

            if print_metrics {
                eprintln!("{}", prometheus.render());
            }
        }
        Command::Aggregate { universe, since } => {
            let aggregator = engine::build_aggregator(&config)?;
            let aggregation = aggregator
                .aggregate(&AggregateRequest {
                    universe,
                    since,
                    date: None,
                })
                .await;
            for warning in &aggregation.warnings {
                tracing::warn!("{}", warning);
            }
            print_json(&aggregation.report)?;
        }
        Command::Latest { locale } => {
            let store = FileSnapshotStore::new(&config.snapshots.dir);
            let whitelist = AssetWhitelist::from_definitions(&config.assets);
            let snapshot = store
                .latest(&locale)
                .await?
                .ok_or_else(|| Error::NotFound(format!("snapshot for locale {}", locale)))?;
            print_json(&whitelist.restrict_snapshot(snapshot))?;
        }
        Command::History { locale, limit } => {
            let store = FileSnapshotStore::new(&config.snapshots.dir);
            let whitelist = AssetWhitelist::from_definitions(&config.assets);
            let snapshots: Vec<_> = store
                .list_recent(&locale, limit)
                .await?
                .into_iter()
                .map(|snapshot| whitelist.restrict_snapshot(snapshot))
                .collect();
            print_json(&snapshots)?;
        }
    }

    Ok(())
}
