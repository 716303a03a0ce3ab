//! Backtest HTTP server
//!
//! Serves price data from a local directory and runs single and rolling
//! backtests on request.
//!
//! Run: BACKTEST_DATA_DIR=./data cargo run --release --bin backtest_server

use axum::{routing::{get, post}, Router, Json, extract::{Path, State, Query, DefaultBodyLimit}};
use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rolling_backtest::backtest::data::{list_tickers as scan_tickers, load_ticker};
use rolling_backtest::backtest::{BacktestMetrics, EquityPoint, Trade};
use rolling_backtest::catalog::{compare, parse_catalog, validate, CatalogEntry, CatalogIssue, ConsistencyReport};
use rolling_backtest::{
    run_backtest, run_rolling_backtest, BacktestError, BrokerConfig, PriceSeries, RollingConfig, RollingReport,
    StrategyConfig,
};

// ============================================================================
// State & Config
// ============================================================================

struct AppState {
    data_dir: PathBuf,
}

type ApiError = (StatusCode, String);

fn api_error(e: BacktestError) -> ApiError {
    let status = match e {
        BacktestError::NoData(_) | BacktestError::UnknownStrategy(_) => StatusCode::NOT_FOUND,
        BacktestError::InvalidConfig(_) | BacktestError::InsufficientData { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "request failed");
    }
    (status, e.to_string())
}

/// Load a ticker and run `job` on the blocking pool
async fn with_series<T, F>(state: &AppState, ticker: String, job: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(PriceSeries) -> rolling_backtest::Result<T> + Send + 'static,
{
    let data_dir = state.data_dir.clone();
    tokio::task::spawn_blocking(move || load_ticker(&data_dir, &ticker).and_then(job))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("backtest task failed: {e}")))?
        .map_err(api_error)
}

// ============================================================================
// Data Endpoints
// ============================================================================

#[derive(Serialize)]
struct StrategyInfo {
    name: &'static str,
    description: &'static str,
    defaults: StrategyConfig,
}

async fn list_strategies() -> Json<Vec<StrategyInfo>> {
    Json(
        StrategyConfig::all()
            .into_iter()
            .map(|config| StrategyInfo { name: config.name(), description: config.description(), defaults: config })
            .collect(),
    )
}

#[derive(Serialize)]
struct TickersResponse {
    tickers: Vec<String>,
}

async fn list_tickers(State(state): State<Arc<AppState>>) -> Result<Json<TickersResponse>, ApiError> {
    let tickers = scan_tickers(&state.data_dir).map_err(api_error)?;
    Ok(Json(TickersResponse { tickers }))
}

#[derive(Deserialize)]
struct CandlesQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct TickerCandle {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Serialize)]
struct CandlesResponse {
    ticker: String,
    candles: Vec<TickerCandle>,
}

async fn get_candles(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Query(query): Query<CandlesQuery>,
) -> Result<Json<CandlesResponse>, ApiError> {
    let limit = query.limit.unwrap_or(usize::MAX);
    let candles = with_series(&state, ticker.clone(), move |series| {
        let len = series.len();
        Ok((len.saturating_sub(limit)..len)
            .filter_map(|i| series.bar(i))
            .map(|bar| TickerCandle {
                date: bar.date,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
            })
            .collect())
    })
    .await?;

    Ok(Json(CandlesResponse { ticker, candles }))
}

// ============================================================================
// Backtest Endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BacktestRequest {
    ticker: String,
    #[serde(default)]
    strategy: StrategyConfig,
    #[serde(default)]
    broker: BrokerConfig,
    start: Option<NaiveDate>,
    /// Exclusive
    end: Option<NaiveDate>,
    #[serde(default)]
    include_equity: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BacktestResponse {
    ticker: String,
    strategy: String,
    start_value: f64,
    end_value: f64,
    return_pct: f64,
    metrics: BacktestMetrics,
    trades: Vec<Trade>,
    #[serde(skip_serializing_if = "Option::is_none")]
    equity_curve: Option<Vec<EquityPoint>>,
    compute_ms: f64,
}

async fn run_single_backtest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BacktestRequest>,
) -> Result<Json<BacktestResponse>, ApiError> {
    let started = Instant::now();
    let BacktestRequest { ticker, strategy, broker, start, end, include_equity } = req;

    let result = with_series(&state, ticker.clone(), move |series| {
        let series = match (start.or(series.first_date()), end.or(series.last_date().and_then(|d| d.succ_opt()))) {
            (Some(from), Some(to)) => series.slice_dates(from, to),
            _ => series,
        };
        run_backtest(&series, &strategy, &broker, 0)
    })
    .await?;

    let compute_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(%ticker, strategy = %result.strategy, compute_ms, "backtest request");

    Ok(Json(BacktestResponse {
        ticker,
        strategy: result.strategy,
        start_value: result.start_value,
        end_value: result.end_value,
        return_pct: result.return_pct,
        metrics: result.metrics,
        trades: result.trades,
        equity_curve: include_equity.then_some(result.equity_curve),
        compute_ms,
    }))
}

#[derive(Deserialize)]
struct RollingRequest {
    ticker: String,
    #[serde(default)]
    config: RollingConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RollingResponse {
    ticker: String,
    #[serde(flatten)]
    report: RollingReport,
    compute_ms: f64,
}

async fn run_rolling(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RollingRequest>,
) -> Result<Json<RollingResponse>, ApiError> {
    let started = Instant::now();
    let RollingRequest { ticker, config } = req;

    let report = with_series(&state, ticker.clone(), move |series| run_rolling_backtest(&series, &config)).await?;

    let compute_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(%ticker, windows = report.windows.len(), skipped = report.skipped.len(), compute_ms, "rolling request");

    Ok(Json(RollingResponse { ticker, report, compute_ms }))
}

// ============================================================================
// Catalog Endpoint
// ============================================================================

#[derive(Deserialize)]
struct CatalogCheckRequest {
    markdown: String,
    /// Root index the document's entries must also appear in
    root: Option<String>,
}

#[derive(Serialize)]
struct CatalogCheckResponse {
    entries: Vec<CatalogEntry>,
    issues: Vec<CatalogIssue>,
    consistency: Option<ConsistencyReport>,
}

async fn check_catalog(Json(req): Json<CatalogCheckRequest>) -> Json<CatalogCheckResponse> {
    let catalog = parse_catalog(&req.markdown);
    let mut issues = validate(&catalog);
    let consistency = req.root.map(|root| compare(&parse_catalog(&root), &catalog));
    if let Some(report) = &consistency {
        issues.extend(report.issues());
    }
    Json(CatalogCheckResponse { entries: catalog.entries, issues, consistency })
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let data_dir = std::env::var("BACKTEST_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let addr: SocketAddr = match std::env::var("BACKTEST_ADDR") {
        Ok(value) => match value.parse() {
            Ok(addr) => addr,
            Err(e) => {
                error!(%value, error = %e, "invalid BACKTEST_ADDR");
                std::process::exit(2);
            }
        },
        Err(_) => SocketAddr::from(([127, 0, 0, 1], 3030)),
    };

    let state = Arc::new(AppState { data_dir: PathBuf::from(&data_dir) });

    let app = Router::new()
        .route("/strategies", get(list_strategies))
        .route("/tickers", get(list_tickers))
        .route("/candles/{ticker}", get(get_candles))
        .route("/api/backtest", post(run_single_backtest))
        .route("/api/rolling", post(run_rolling))
        .route("/api/catalog/check", post(check_catalog))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .with_state(state);

    info!(%data_dir, "data directory");
    info!("backtest server on http://{addr}");
    info!("  GET  /strategies          - strategies and default parameters");
    info!("  GET  /tickers             - list tickers");
    info!("  GET  /candles/:ticker     - OHLCV data");
    info!("  POST /api/backtest        - single backtest");
    info!("  POST /api/rolling         - rolling-window backtest");
    info!("  POST /api/catalog/check   - validate a markdown link index");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
    }
}
