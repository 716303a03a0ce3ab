// src/backtest/metrics.rs
// Performance metrics calculation

use chrono::NaiveDate;

use crate::backtest::types::{BacktestMetrics, Trade};

/// Simple returns between consecutive values; a non-positive base gives 0
pub fn period_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

/// Calculate all backtest metrics for an equity curve.
///
/// `values` and `benchmark_closes` cover the same bars as `dates`. The
/// benchmark is buy-and-hold of the traded instrument.
pub fn calculate_metrics(
    values: &[f64],
    benchmark_closes: &[f64],
    dates: &[NaiveDate],
    trades: &[Trade],
    periods_per_year: f64,
) -> BacktestMetrics {
    let mut metrics = trade_metrics(trades);
    if values.len() < 2 {
        return metrics;
    }

    let returns = period_returns(values);
    let benchmark_returns = period_returns(benchmark_closes);

    metrics.start_date = dates.first().map(|d| d.to_string()).unwrap_or_default();
    metrics.end_date = dates.last().map(|d| d.to_string()).unwrap_or_default();
    metrics.bars = values.len();
    metrics.years = returns.len() as f64 / periods_per_year;

    // Total return
    let growth = if values[0] > 0.0 { values[values.len() - 1] / values[0] } else { 1.0 };
    metrics.total_return = growth - 1.0;

    // CAGR
    metrics.cagr = if metrics.years > 0.0 && growth > 0.0 {
        growth.powf(1.0 / metrics.years) - 1.0
    } else {
        0.0
    };

    metrics.volatility = annualized_volatility(&returns, periods_per_year);
    metrics.max_drawdown = calculate_max_drawdown(values);

    metrics.calmar = if metrics.max_drawdown != 0.0 {
        metrics.cagr / metrics.max_drawdown.abs()
    } else {
        0.0
    };

    // Sharpe ratio (assuming risk-free rate of 0)
    metrics.sharpe = if metrics.volatility > 0.0 { metrics.cagr / metrics.volatility } else { 0.0 };

    let downside_vol = downside_deviation(&returns, periods_per_year);
    metrics.sortino = if downside_vol > 0.0 { metrics.cagr / downside_vol } else { 0.0 };

    metrics.beta = calculate_beta(&returns, &benchmark_returns);

    let winning_bars = returns.iter().filter(|&&r| r > 0.0).count();
    metrics.win_rate = winning_bars as f64 / returns.len() as f64;

    let best = returns.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let worst = returns.iter().copied().fold(f64::INFINITY, f64::min);
    metrics.best_bar = if best.is_finite() { best } else { 0.0 };
    metrics.worst_bar = if worst.is_finite() { worst } else { 0.0 };

    metrics.buy_hold_return = match (benchmark_closes.first(), benchmark_closes.last()) {
        (Some(first), Some(last)) if *first > 0.0 => last / first - 1.0,
        _ => 0.0,
    };

    metrics
}

/// Round-trip statistics; a trade wins when its net pnl is positive
fn trade_metrics(trades: &[Trade]) -> BacktestMetrics {
    let winning = trades.iter().filter(|t| t.pnl_net > 0.0).count();
    let total_net: f64 = trades.iter().map(|t| t.pnl_net).sum();
    let count = trades.len();

    BacktestMetrics {
        trade_count: count,
        winning_trades: winning,
        losing_trades: count - winning,
        trade_win_rate: if count > 0 { winning as f64 / count as f64 } else { 0.0 },
        avg_trade_pnl: if count > 0 { total_net / count as f64 } else { 0.0 },
        beta: 1.0,
        ..Default::default()
    }
}

/// Calculate annualized volatility
fn annualized_volatility(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;

    variance.sqrt() * periods_per_year.sqrt()
}

/// Calculate downside deviation (for Sortino ratio)
fn downside_deviation(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| r.powi(2)).sum();
    (sum_sq / returns.len() as f64).sqrt() * periods_per_year.sqrt()
}

/// Maximum peak-to-trough decline, as a negative fraction
pub fn calculate_max_drawdown(values: &[f64]) -> f64 {
    let Some(&first) = values.first() else { return 0.0 };

    let mut peak = first;
    let mut max_dd = 0.0;
    for &value in values {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            max_dd = f64::max(max_dd, (peak - value) / peak);
        }
    }

    -max_dd
}

/// Beta relative to the benchmark; 1 when undefined
fn calculate_beta(returns: &[f64], benchmark: &[f64]) -> f64 {
    if returns.len() != benchmark.len() || returns.is_empty() {
        return 1.0;
    }

    let n = returns.len() as f64;
    let mean_r = returns.iter().sum::<f64>() / n;
    let mean_b = benchmark.iter().sum::<f64>() / n;

    let (covariance, variance_b) = returns
        .iter()
        .zip(benchmark)
        .fold((0.0, 0.0), |(cov, var), (r, b)| {
            let b_diff = b - mean_b;
            (cov + (r - mean_r) * b_diff, var + b_diff * b_diff)
        });

    if variance_b > 0.0 {
        covariance / variance_b
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::types::Side;
    use approx::assert_relative_eq;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
    }

    fn trade(pnl_net: f64) -> Trade {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        Trade {
            side: Side::Buy,
            entry_date: d,
            exit_date: d,
            entry_price: 1.0,
            exit_price: 1.0,
            size: 1.0,
            pnl: pnl_net,
            pnl_net,
            bars_held: 1,
        }
    }

    #[test]
    fn test_max_drawdown() {
        let equity = vec![1.0, 1.1, 1.2, 1.0, 0.8, 1.0, 1.1];
        // 1.2 -> 0.8
        assert_relative_eq!(calculate_max_drawdown(&equity), -1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(calculate_max_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_annualized_vol() {
        let returns = vec![0.01, -0.01, 0.01, -0.01];
        assert_relative_eq!(annualized_volatility(&returns, 252.0), 0.01 * 252f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_beta() {
        let returns = vec![0.02, -0.02, 0.04, -0.04, 0.02];
        let benchmark = vec![0.01, -0.01, 0.02, -0.02, 0.01];
        assert_relative_eq!(calculate_beta(&returns, &benchmark), 2.0, epsilon = 1e-12);
        assert_eq!(calculate_beta(&returns, &benchmark[..2]), 1.0);
    }

    #[test]
    fn test_metrics_for_one_year_doubling() {
        let n = 253;
        let values: Vec<f64> = (0..n).map(|i| 100.0 * 2f64.powf(i as f64 / 252.0)).collect();
        let m = calculate_metrics(&values, &values, &dates(n), &[], 252.0);

        assert_relative_eq!(m.total_return, 1.0, epsilon = 1e-9);
        assert_relative_eq!(m.years, 1.0);
        assert_relative_eq!(m.cagr, 1.0, epsilon = 1e-9);
        assert_eq!(m.max_drawdown, 0.0);
        assert_relative_eq!(m.win_rate, 1.0);
        assert_relative_eq!(m.buy_hold_return, 1.0, epsilon = 1e-9);
        assert_eq!(m.start_date, "2024-01-01");
        assert_eq!(m.bars, n);
    }

    #[test]
    fn test_flat_curve() {
        let values = vec![100.0; 10];
        let closes: Vec<f64> = (0..10).map(|i| 50.0 + i as f64).collect();
        let m = calculate_metrics(&values, &closes, &dates(10), &[], 252.0);
        assert_eq!(m.total_return, 0.0);
        assert_eq!(m.volatility, 0.0);
        assert_eq!(m.sharpe, 0.0);
        assert_eq!(m.beta, 0.0);
        assert_relative_eq!(m.buy_hold_return, 0.18, epsilon = 1e-12);
    }

    #[test]
    fn test_trade_statistics() {
        let trades = vec![trade(10.0), trade(-4.0), trade(6.0), trade(0.0)];
        let m = calculate_metrics(&[100.0], &[1.0], &dates(1), &trades, 252.0);
        assert_eq!(m.trade_count, 4);
        assert_eq!(m.winning_trades, 2);
        assert_eq!(m.losing_trades, 2);
        assert_relative_eq!(m.trade_win_rate, 0.5);
        assert_relative_eq!(m.avg_trade_pnl, 3.0);
    }

    #[test]
    fn test_period_returns_guard() {
        assert_eq!(period_returns(&[0.0, 1.0, 2.0]), vec![0.0, 1.0]);
    }
}
