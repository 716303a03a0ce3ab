//! Backtest CLI
//!
//! Usage:
//!   backtest run --ticker BTC-USD --strategy kalman
//!   backtest rolling --ticker BTC-USD --config rolling.json --csv windows.csv
//!   backtest strategies
//!   backtest catalog README.md --root ../README.md

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rolling_backtest::backtest::data::load_ticker;
use rolling_backtest::backtest::rolling::WindowScheme;
use rolling_backtest::catalog::{compare, validate, Catalog};
use rolling_backtest::{run_backtest, run_rolling_backtest, BrokerConfig, PriceSeries, RollingConfig, StrategyConfig};

#[derive(Parser)]
#[command(name = "backtest")]
#[command(about = "Rolling-window strategy backtests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest one strategy over one date range
    Run {
        #[arg(short, long)]
        ticker: String,

        /// Directory holding {ticker}.parquet or {ticker}.csv
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Strategy name (see `backtest strategies`)
        #[arg(short, long, default_value = "vsa")]
        strategy: String,

        /// JSON strategy config; overrides --strategy
        #[arg(long)]
        params: Option<PathBuf>,

        #[arg(long)]
        start: Option<NaiveDate>,

        /// Exclusive end date
        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(long, default_value = "100000")]
        cash: f64,

        #[arg(long, default_value = "0.001")]
        commission: f64,

        /// Print trades and the equity curve as well as the summary
        #[arg(long)]
        full: bool,
    },

    /// Backtest successive windows and summarize them
    Rolling {
        #[arg(short, long)]
        ticker: String,

        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// JSON rolling config
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Strategy name; overrides the config file's strategy
        #[arg(short, long)]
        strategy: Option<String>,

        /// Calendar window length; overrides the config file's scheme
        #[arg(long)]
        months: Option<u32>,

        /// Also write one CSV row per window
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// List strategies with their default parameters
    Strategies,

    /// Check a markdown link index
    Catalog {
        path: PathBuf,

        /// Root index every entry of PATH must also appear in
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary<'a> {
    ticker: &'a str,
    strategy: &'a str,
    start_value: f64,
    end_value: f64,
    return_pct: f64,
    metrics: &'a rolling_backtest::backtest::BacktestMetrics,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn load(data_dir: &Path, ticker: &str) -> Result<PriceSeries> {
    load_ticker(data_dir, ticker).with_context(|| format!("failed to load {ticker} from {}", data_dir.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    match Cli::parse().command {
        Commands::Run { ticker, data_dir, strategy, params, start, end, cash, commission, full } => {
            let config = match params {
                Some(path) => {
                    let json = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    serde_json::from_str::<StrategyConfig>(&json)
                        .with_context(|| format!("invalid strategy config in {}", path.display()))?
                }
                None => StrategyConfig::from_name(&strategy)?,
            };
            let broker = BrokerConfig { cash, commission, ..Default::default() };

            let mut series = load(&data_dir, &ticker)?;
            if start.is_some() || end.is_some() {
                let from = start.or(series.first_date()).context("empty price series")?;
                let to = end.or(series.last_date().and_then(|d| d.succ_opt())).context("empty price series")?;
                series = series.slice_dates(from, to);
            }

            let result = run_backtest(&series, &config, &broker, 0)?;
            if full {
                print_json(&result)?;
            } else {
                print_json(&RunSummary {
                    ticker: &ticker,
                    strategy: &result.strategy,
                    start_value: result.start_value,
                    end_value: result.end_value,
                    return_pct: result.return_pct,
                    metrics: &result.metrics,
                })?;
            }
        }

        Commands::Rolling { ticker, data_dir, config, strategy, months, csv } => {
            let mut rolling = match config {
                Some(path) => RollingConfig::from_file(&path)
                    .with_context(|| format!("failed to load rolling config {}", path.display()))?,
                None => RollingConfig::default(),
            };
            if let Some(name) = strategy {
                rolling.strategy = StrategyConfig::from_name(&name)?;
            }
            if let Some(months) = months {
                rolling.scheme = WindowScheme::Calendar { months, clip_last: false };
            }

            let series = load(&data_dir, &ticker)?;
            let report = run_rolling_backtest(&series, &rolling)?;

            if let Some(path) = csv {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                report.write_csv(file)?;
                info!(path = %path.display(), windows = report.windows.len(), "wrote window results");
            }
            print_json(&report)?;
        }

        Commands::Strategies => {
            let list: Vec<serde_json::Value> = StrategyConfig::all()
                .iter()
                .map(|config| {
                    serde_json::json!({
                        "name": config.name(),
                        "description": config.description(),
                        "defaults": config,
                    })
                })
                .collect();
            print_json(&list)?;
        }

        Commands::Catalog { path, root } => {
            let catalog = Catalog::from_file(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let mut issues = validate(&catalog);

            let consistency = match root {
                Some(root_path) => {
                    let root_catalog = Catalog::from_file(&root_path)
                        .with_context(|| format!("failed to read {}", root_path.display()))?;
                    let report = compare(&root_catalog, &catalog);
                    issues.extend(report.issues());
                    Some(report)
                }
                None => None,
            };

            print_json(&serde_json::json!({
                "entries": catalog.entries.len(),
                "issues": issues,
                "consistency": consistency,
            }))?;

            if !issues.is_empty() {
                bail!("{} issue(s) in {}", issues.len(), path.display());
            }
        }
    }

    Ok(())
}
