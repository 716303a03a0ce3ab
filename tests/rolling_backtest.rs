//! End-to-end rolling backtests on synthetic market data
//!
//! Run with: cargo test --test rolling_backtest

use std::fmt::Write as _;
use std::path::Path;

use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate};
use rolling_backtest::backtest::data::{list_tickers, load_ticker};
use rolling_backtest::backtest::rolling::{cumulative_returns, generate_windows};
use rolling_backtest::{
    run_backtest, run_rolling_backtest, BacktestError, BrokerConfig, RollingConfig, StrategyConfig, WindowScheme,
};
use tempfile::TempDir;

/// Two years of daily bars: trending legs, a volume spike every 45 bars and
/// a shock every 120 bars so every strategy has something to react to.
fn write_ticker(dir: &Path, ticker: &str, days: usize) {
    let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
    let mut state = 42u64;
    let mut uniform = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };

    let mut csv = String::from("Date,Open,High,Low,Close,Adj Close,Volume\n");
    let mut close = 100.0_f64;
    for i in 0..days {
        let open = close;
        let drift = 0.004 * (2.0 * std::f64::consts::PI * i as f64 / 150.0).sin();
        let shock = if i % 120 == 60 { 0.09 } else if i % 120 == 100 { -0.08 } else { 0.0 };
        close = open * (1.0 + drift + shock + (uniform() - 0.5) * 0.02);
        let high = open.max(close) * (1.0 + uniform() * 0.01);
        let low = open.min(close) * (1.0 - uniform() * 0.01);
        let volume = if i % 45 == 0 { 4_000.0 } else { 800.0 + 400.0 * uniform() };
        let date = start + Duration::days(i as i64);
        writeln!(csv, "{date},{open:.4},{high:.4},{low:.4},{close:.4},{close:.4},{volume:.0}").unwrap();
    }
    std::fs::write(dir.join(format!("{ticker}.csv")), csv).unwrap();
}

fn data_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_ticker(dir.path(), "SYNTH", 730);
    dir
}

#[test]
fn test_every_strategy_completes_a_rolling_run() {
    let dir = data_dir();
    let series = load_ticker(dir.path(), "SYNTH").unwrap();
    assert_eq!(series.len(), 730);

    for strategy in StrategyConfig::all() {
        let config = RollingConfig { strategy: strategy.clone(), ..Default::default() };
        let report = run_rolling_backtest(&series, &config).unwrap();
        let windows = generate_windows(
            &config.scheme,
            series.first_date().unwrap(),
            series.last_date().unwrap().succ_opt().unwrap(),
        );

        assert_eq!(report.strategy, strategy.name());
        assert_eq!(report.windows.len() + report.skipped.len(), windows.len(), "{}", strategy.name());
        for w in &report.windows {
            assert!(w.final_value > 0.0, "{}", strategy.name());
            assert_relative_eq!(w.final_value, 100_000.0 * (1.0 + w.return_pct / 100.0), epsilon = 1e-6);
            assert!(w.metrics.max_drawdown <= 0.0);
        }

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["chart"]["histogram"]["counts"].is_array());
    }
}

#[test]
fn test_windows_are_independent() {
    let dir = data_dir();
    let series = load_ticker(dir.path(), "SYNTH").unwrap();
    let config = RollingConfig { strategy: StrategyConfig::from_name("kalman").unwrap(), ..Default::default() };
    let report = run_rolling_backtest(&series, &config).unwrap();

    // Re-running a single window on its own slice gives the same result
    let w = &report.windows[2];
    let single = run_backtest(&series.slice_dates(w.start, w.end), &config.strategy, &BrokerConfig::default(), 0)
        .unwrap();
    assert_relative_eq!(single.return_pct, w.return_pct, epsilon = 1e-9);
    assert_eq!(single.metrics.trade_count, w.metrics.trade_count);
}

#[test]
fn test_cumulative_chart_matches_window_returns() {
    let dir = data_dir();
    let series = load_ticker(dir.path(), "SYNTH").unwrap();
    let config = RollingConfig {
        strategy: StrategyConfig::from_name("butterworth").unwrap(),
        scheme: WindowScheme::Calendar { months: 6, clip_last: true },
        ..Default::default()
    };
    let report = run_rolling_backtest(&series, &config).unwrap();

    assert_eq!(report.chart.cumulative_returns, cumulative_returns(&report.returns()));
    assert_eq!(report.chart.rolling_sharpe.len(), report.windows.len());
    if let Some(stats) = report.stats {
        assert!(stats.min <= stats.mean && stats.mean <= stats.max);
    }
}

#[test]
fn test_walk_forward_from_config_file() {
    let dir = data_dir();
    let config_path = dir.path().join("rolling.json");
    std::fs::write(
        &config_path,
        r#"{
            "strategy": { "strategy": "ou_reversion", "lookback": 40 },
            "scheme": { "scheme": "walkForward", "trainDays": 90, "testDays": 60 },
            "start": "2019-04-01"
        }"#,
    )
    .unwrap();

    let config = RollingConfig::from_file(&config_path).unwrap();
    let series = load_ticker(dir.path(), "SYNTH").unwrap();
    let report = run_rolling_backtest(&series, &config).unwrap();

    assert!(!report.windows.is_empty());
    assert_eq!(report.windows[0].start, NaiveDate::from_ymd_opt(2019, 4, 1).unwrap());
    for w in &report.windows {
        assert_eq!(w.bars, 60);
    }
}

#[test]
fn test_data_directory_errors() {
    let dir = data_dir();
    assert_eq!(list_tickers(dir.path()).unwrap(), vec!["SYNTH".to_string()]);
    assert!(matches!(load_ticker(dir.path(), "MISSING"), Err(BacktestError::NoData(_))));
}
