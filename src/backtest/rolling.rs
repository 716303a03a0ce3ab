// src/backtest/rolling.rs
// Rolling-window driver: cut the history into windows, backtest each one
// independently, then summarize the per-window returns

use std::io::Write;

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backtest::context::PriceSeries;
use crate::backtest::runner::run_backtest_annualized;
use crate::backtest::types::BacktestMetrics;
use crate::common::{max, mean, median, min, population_std, sample_std};
use crate::config::RollingConfig;
use crate::error::{BacktestError, Result};

// ============================================================================
// Windows
// ============================================================================

/// How the history is cut into backtest windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WindowScheme {
    /// Back-to-back windows of `months` calendar months. With `clip_last`
    /// a final partial window ending at the overall end is kept.
    Calendar {
        months: u32,
        #[serde(default)]
        clip_last: bool,
    },
    /// Test windows of `test_days`, each preceded by `train_days` of history
    /// the strategy sees but does not trade on.
    WalkForward { train_days: u32, test_days: u32 },
}

impl Default for WindowScheme {
    fn default() -> Self {
        WindowScheme::Calendar { months: 3, clip_last: false }
    }
}

impl WindowScheme {
    pub fn validate(&self) -> Result<()> {
        match *self {
            WindowScheme::Calendar { months, .. } if months == 0 => {
                Err(BacktestError::invalid_config("calendar months must be at least 1"))
            }
            WindowScheme::WalkForward { test_days, .. } if test_days == 0 => {
                Err(BacktestError::invalid_config("walk-forward testDays must be at least 1"))
            }
            _ => Ok(()),
        }
    }
}

/// One backtest window. Bars in `[warmup_start, start)` only warm the
/// strategy up; trading and metrics cover `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub warmup_start: NaiveDate,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Windows covering `[start, end)` under `scheme`
pub fn generate_windows(scheme: &WindowScheme, start: NaiveDate, end: NaiveDate) -> Vec<Window> {
    let mut windows = Vec::new();
    let mut current = start;

    match *scheme {
        WindowScheme::Calendar { months, clip_last } => {
            if months == 0 {
                return windows;
            }
            while current < end {
                let Some(next) = current.checked_add_months(Months::new(months)) else { break };
                if next > end {
                    if clip_last {
                        windows.push(Window { warmup_start: current, start: current, end });
                    }
                    break;
                }
                windows.push(Window { warmup_start: current, start: current, end: next });
                current = next;
            }
        }
        WindowScheme::WalkForward { train_days, test_days } => {
            if test_days == 0 {
                return windows;
            }
            while let Some(next) = current.checked_add_days(Days::new(u64::from(test_days))) {
                if next > end {
                    break;
                }
                let warmup_start = current.checked_sub_days(Days::new(u64::from(train_days))).unwrap_or(current);
                windows.push(Window { warmup_start, start: current, end: next });
                current = next;
            }
        }
    }

    windows
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowResult {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub bars: usize,
    pub return_pct: f64,
    pub final_value: f64,
    pub metrics: BacktestMetrics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub bars: usize,
    pub reason: String,
}

/// Summary of the per-window returns (in percent)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// mean / std; undefined for a zero spread
    pub sharpe: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Histogram {
    /// `counts.len() + 1` bin edges
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
    pub mean: Option<f64>,
}

/// Series behind the four report charts, indexed by window
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    pub period_returns: Vec<f64>,
    pub cumulative_returns: Vec<f64>,
    pub sharpe_window: usize,
    pub rolling_sharpe: Vec<Option<f64>>,
    pub histogram: Histogram,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingReport {
    pub strategy: String,
    pub windows: Vec<WindowResult>,
    pub skipped: Vec<SkippedWindow>,
    pub stats: Option<RollingStats>,
    pub chart: ChartData,
}

impl RollingReport {
    pub fn returns(&self) -> Vec<f64> {
        self.windows.iter().map(|w| w.return_pct).collect()
    }

    /// One CSV row per completed window
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for w in &self.windows {
            csv_writer.serialize(CsvRow {
                start: w.start,
                end: w.end,
                bars: w.bars,
                return_pct: w.return_pct,
                final_value: w.final_value,
                trades: w.metrics.trade_count,
                sharpe: w.metrics.sharpe,
                max_drawdown: w.metrics.max_drawdown,
            })?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct CsvRow {
    start: NaiveDate,
    end: NaiveDate,
    bars: usize,
    return_pct: f64,
    final_value: f64,
    trades: usize,
    sharpe: f64,
    max_drawdown: f64,
}

// ============================================================================
// Driver
// ============================================================================

/// Backtest every window of `series` with a fresh strategy and broker.
///
/// Windows without enough bars are skipped and listed with the reason; they
/// never abort the run.
pub fn run_rolling_backtest(series: &PriceSeries, config: &RollingConfig) -> Result<RollingReport> {
    config.validate()?;
    let (Some(first), Some(last)) = (series.first_date(), series.last_date()) else {
        return Err(BacktestError::NoData("empty price series".to_string()));
    };

    let start = config.start.unwrap_or(first);
    let end = config.end.unwrap_or_else(|| last.succ_opt().unwrap_or(last));
    let min_bars = config.required_bars()?;
    let windows = generate_windows(&config.scheme, start, end);
    let strategy = config.strategy.name();

    info!(strategy, windows = windows.len(), %start, %end, min_bars, "rolling backtest");

    let mut results = Vec::with_capacity(windows.len());
    let mut skipped = Vec::new();

    for window in &windows {
        let history = series.slice_dates(window.warmup_start, window.end);
        let (trade_from, _) = history.date_range(window.start, window.end);
        let bars = history.len() - trade_from;

        let reason = if bars == 0 {
            Some("no bars in window".to_string())
        } else if history.len() < min_bars {
            Some(format!("{} bars, need at least {min_bars}", history.len()))
        } else {
            None
        };
        if let Some(reason) = reason {
            warn!(strategy, start = %window.start, end = %window.end, %reason, "skipping window");
            skipped.push(SkippedWindow { start: window.start, end: window.end, bars, reason });
            continue;
        }

        let result = match run_backtest_annualized(
            &history,
            &config.strategy,
            &config.broker,
            trade_from,
            config.periods_per_year,
        ) {
            Ok(result) => result,
            Err(BacktestError::InsufficientData { needed, available }) => {
                let reason = format!("{available} bars, need at least {needed}");
                warn!(strategy, start = %window.start, end = %window.end, %reason, "skipping window");
                skipped.push(SkippedWindow { start: window.start, end: window.end, bars, reason });
                continue;
            }
            Err(e) => return Err(e),
        };

        info!(
            strategy,
            start = %window.start,
            end = %window.end,
            bars,
            return_pct = format!("{:.2}", result.return_pct),
            final_value = format!("{:.2}", result.end_value),
            "window complete"
        );

        results.push(WindowResult {
            start: window.start,
            end: window.end,
            bars,
            return_pct: result.return_pct,
            final_value: result.end_value,
            metrics: result.metrics,
        });
    }

    let returns: Vec<f64> = results.iter().map(|w| w.return_pct).collect();
    Ok(RollingReport {
        strategy: strategy.to_string(),
        stats: report_stats(&returns),
        chart: chart_data(&returns, config.sharpe_window),
        windows: results,
        skipped,
    })
}

// ============================================================================
// Statistics
// ============================================================================

pub fn report_stats(returns: &[f64]) -> Option<RollingStats> {
    if returns.is_empty() {
        return None;
    }
    let mean = mean(returns);
    let std = population_std(returns);
    Some(RollingStats {
        mean,
        median: median(returns),
        std,
        min: min(returns),
        max: max(returns),
        sharpe: if std > 0.0 { Some(mean / std) } else { None },
    })
}

/// Compounded return after each window, in percent
pub fn cumulative_returns(returns: &[f64]) -> Vec<f64> {
    let mut growth = 1.0;
    returns
        .iter()
        .map(|r| {
            growth *= 1.0 + r / 100.0;
            growth * 100.0 - 100.0
        })
        .collect()
}

/// mean / sample std over each trailing `window` of returns
pub fn rolling_sharpe(returns: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..returns.len())
        .map(|i| {
            if window < 2 || i + 1 < window {
                return None;
            }
            let slice = &returns[i + 1 - window..=i];
            let std = sample_std(slice);
            if std > 0.0 {
                Some(mean(slice) / std)
            } else {
                None
            }
        })
        .collect()
}

pub fn histogram_bins(n: usize) -> usize {
    (n / 2).clamp(5, 15)
}

/// Equal-width histogram over the value range; the last bin includes its
/// right edge. A zero-width range is widened by 0.5 on each side.
pub fn histogram(values: &[f64]) -> Histogram {
    if values.is_empty() {
        return Histogram { edges: Vec::new(), counts: Vec::new(), mean: None };
    }

    let bins = histogram_bins(values.len());
    let (mut lo, mut hi) = (min(values), max(values));
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;
    let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();

    let mut counts = vec![0; bins];
    for v in values {
        let bin = (((v - lo) / width).floor() as usize).min(bins - 1);
        counts[bin] += 1;
    }

    Histogram { edges, counts, mean: Some(mean(values)) }
}

pub fn chart_data(returns: &[f64], sharpe_window: usize) -> ChartData {
    ChartData {
        period_returns: returns.to_vec(),
        cumulative_returns: cumulative_returns(returns),
        sharpe_window,
        rolling_sharpe: rolling_sharpe(returns, sharpe_window),
        histogram: histogram(returns),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::strategies::test_support::{day, series_from_closes, wave};
    use crate::backtest::strategy::StrategyConfig;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ===== Window Generation Tests =====

    #[test]
    fn test_calendar_windows() {
        let scheme = WindowScheme::Calendar { months: 3, clip_last: false };
        let windows = generate_windows(&scheme, ymd(2020, 1, 1), ymd(2021, 1, 1));
        let ends: Vec<NaiveDate> = windows.iter().map(|w| w.end).collect();
        assert_eq!(ends, vec![ymd(2020, 4, 1), ymd(2020, 7, 1), ymd(2020, 10, 1), ymd(2021, 1, 1)]);
        assert!(windows.iter().all(|w| w.warmup_start == w.start));
    }

    #[test]
    fn test_calendar_last_window_clipping() {
        let (start, end) = (ymd(2020, 1, 1), ymd(2020, 11, 15));

        let dropped = generate_windows(&WindowScheme::Calendar { months: 3, clip_last: false }, start, end);
        assert_eq!(dropped.len(), 3);
        assert_eq!(dropped[2].end, ymd(2020, 10, 1));

        let clipped = generate_windows(&WindowScheme::Calendar { months: 3, clip_last: true }, start, end);
        assert_eq!(clipped.len(), 4);
        assert_eq!(clipped[3].start, ymd(2020, 10, 1));
        assert_eq!(clipped[3].end, end);
    }

    #[test]
    fn test_calendar_month_end_clamps() {
        let scheme = WindowScheme::Calendar { months: 1, clip_last: false };
        let windows = generate_windows(&scheme, ymd(2020, 1, 31), ymd(2020, 6, 1));
        assert_eq!(windows[0].end, ymd(2020, 2, 29));
        assert_eq!(windows[1].end, ymd(2020, 3, 29));
    }

    #[test]
    fn test_walk_forward_windows() {
        let scheme = WindowScheme::WalkForward { train_days: 60, test_days: 30 };
        let windows = generate_windows(&scheme, ymd(2020, 3, 1), ymd(2020, 6, 1));
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].warmup_start, ymd(2020, 1, 1));
        assert_eq!(windows[0].end, ymd(2020, 3, 31));
        assert_eq!(windows[1].start, ymd(2020, 3, 31));
    }

    #[test]
    fn test_empty_range() {
        let scheme = WindowScheme::default();
        assert!(generate_windows(&scheme, ymd(2020, 1, 1), ymd(2020, 1, 1)).is_empty());
        assert!(generate_windows(&scheme, ymd(2020, 1, 1), ymd(2020, 2, 1)).is_empty());
    }

    proptest! {
        #[test]
        fn prop_calendar_windows_tile_the_range(
            offset in 0i64..3000,
            length in 0i64..2000,
            months in 1u32..13,
            clip_last in any::<bool>(),
        ) {
            let start = ymd(2000, 1, 1) + chrono::Duration::days(offset);
            let end = start + chrono::Duration::days(length);
            let windows = generate_windows(&WindowScheme::Calendar { months, clip_last }, start, end);

            if let Some(first) = windows.first() {
                prop_assert_eq!(first.start, start);
            }
            for w in &windows {
                prop_assert!(w.start < w.end);
                prop_assert!(w.end <= end);
            }
            for pair in windows.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
            if clip_last && length > 0 {
                prop_assert_eq!(windows.last().map(|w| w.end), Some(end));
            }
        }

        #[test]
        fn prop_walk_forward_steps_by_test_days(
            length in 0i64..1500,
            train_days in 0u32..400,
            test_days in 1u32..120,
        ) {
            let start = ymd(2010, 6, 15);
            let end = start + chrono::Duration::days(length);
            let windows = generate_windows(&WindowScheme::WalkForward { train_days, test_days }, start, end);

            prop_assert_eq!(windows.len() as i64, length / i64::from(test_days));
            for w in &windows {
                prop_assert_eq!((w.end - w.start).num_days(), i64::from(test_days));
                prop_assert_eq!((w.start - w.warmup_start).num_days(), i64::from(train_days));
                prop_assert!(w.end <= end);
            }
        }

        #[test]
        fn prop_histogram_counts_every_value(values in prop::collection::vec(-50.0f64..50.0, 1..60)) {
            let h = histogram(&values);
            prop_assert_eq!(h.counts.iter().sum::<usize>(), values.len());
            prop_assert_eq!(h.edges.len(), h.counts.len() + 1);
            prop_assert_eq!(h.counts.len(), histogram_bins(values.len()));
        }
    }

    // ===== Statistics Tests =====

    #[test]
    fn test_report_stats() {
        let stats = report_stats(&[4.0, -2.0, 1.0, 3.0]).unwrap();
        assert_relative_eq!(stats.mean, 1.5);
        assert_relative_eq!(stats.median, 2.0);
        assert_relative_eq!(stats.std, 5.25f64.sqrt(), epsilon = 1e-12);
        assert_eq!(stats.min, -2.0);
        assert_eq!(stats.max, 4.0);
        assert_relative_eq!(stats.sharpe.unwrap(), 1.5 / 5.25f64.sqrt(), epsilon = 1e-12);

        assert_eq!(report_stats(&[2.0, 2.0]).unwrap().sharpe, None);
        assert!(report_stats(&[]).is_none());
    }

    #[test]
    fn test_cumulative_returns_compound() {
        let cumulative = cumulative_returns(&[10.0, -10.0, 50.0]);
        assert_relative_eq!(cumulative[0], 10.0, epsilon = 1e-12);
        assert_relative_eq!(cumulative[1], -1.0, epsilon = 1e-12);
        assert_relative_eq!(cumulative[2], 48.5, epsilon = 1e-12);
    }

    #[test]
    fn test_rolling_sharpe_uses_sample_std() {
        let sharpe = rolling_sharpe(&[1.0, 3.0, 2.0, 2.0, 2.0], 2);
        assert_eq!(sharpe[0], None);
        // mean 2, sample std sqrt(2)
        assert_relative_eq!(sharpe[1].unwrap(), 2.0 / 2f64.sqrt(), epsilon = 1e-12);
        assert_eq!(sharpe[4], None);
    }

    #[test]
    fn test_histogram_bins() {
        assert_eq!(histogram_bins(3), 5);
        assert_eq!(histogram_bins(20), 10);
        assert_eq!(histogram_bins(100), 15);

        let h = histogram(&[1.0, 1.0, 1.0]);
        assert_relative_eq!(h.edges[0], 0.5);
        assert_relative_eq!(h.edges[5], 1.5);
        assert_eq!(h.counts, vec![0, 0, 3, 0, 0]);
        assert_eq!(h.mean, Some(1.0));

        let h = histogram(&[0.0, 10.0]);
        assert_eq!(h.counts, vec![1, 0, 0, 0, 1]);
    }

    // ===== Driver Tests =====

    fn year_of_bars() -> PriceSeries {
        series_from_closes(&wave(366, 40.0, 10.0, 0.02))
    }

    fn kalman_config() -> RollingConfig {
        RollingConfig { strategy: StrategyConfig::from_name("kalman").unwrap(), ..Default::default() }
    }

    #[test]
    fn test_calendar_run() {
        let series = year_of_bars();
        let report = run_rolling_backtest(&series, &kalman_config()).unwrap();

        assert_eq!(report.strategy, "kalman");
        assert_eq!(report.windows.len(), 4);
        assert!(report.skipped.is_empty());
        assert_eq!(report.windows[0].start, day(0));
        assert_eq!(report.windows[0].bars, 91);
        assert_eq!(report.chart.period_returns, report.returns());
        assert!(report.stats.is_some());
        for w in &report.windows {
            assert_relative_eq!(w.final_value, 100_000.0 * (1.0 + w.return_pct / 100.0), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_short_windows_are_skipped() {
        let series = year_of_bars();
        let config = RollingConfig { min_bars: Some(100), ..kalman_config() };
        let report = run_rolling_backtest(&series, &config).unwrap();

        assert!(report.windows.is_empty());
        assert_eq!(report.skipped.len(), 4);
        assert!(report.skipped[0].reason.contains("need at least 100"));
        assert!(report.stats.is_none());
    }

    #[test]
    fn test_walk_forward_trades_only_in_test_window() {
        let series = year_of_bars();
        let config = RollingConfig {
            scheme: WindowScheme::WalkForward { train_days: 60, test_days: 60 },
            start: Some(day(60)),
            ..kalman_config()
        };
        let report = run_rolling_backtest(&series, &config).unwrap();

        assert_eq!(report.windows.len(), 5);
        for w in &report.windows {
            assert_eq!(w.bars, 60);
            assert_eq!(w.metrics.start_date, w.start.to_string());
        }
    }

    #[test]
    fn test_empty_series() {
        assert!(matches!(
            run_rolling_backtest(&PriceSeries::new(), &RollingConfig::default()),
            Err(BacktestError::NoData(_))
        ));
    }

    #[test]
    fn test_csv_export() {
        let report = run_rolling_backtest(&year_of_bars(), &kalman_config()).unwrap();
        let mut buf = Vec::new();
        report.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("start,end,bars,return_pct,final_value,trades,sharpe,max_drawdown")
        );
        assert!(lines.next().unwrap_or_default().starts_with("2020-01-01,2020-04-01,91,"));
        assert_eq!(text.lines().count(), 5);
    }
}
