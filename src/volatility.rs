//! Volatility indicators
//!
//! Indicators that measure the degree of price variation over time.

use crate::common::{has_enough_data, nan_vec, population_std, rolling};
use crate::moving_averages::wilders_ma;

/// True Range
///
/// The greatest of:
/// - Current High - Current Low
/// - |Current High - Previous Close|
/// - |Current Low - Previous Close|
pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len();
    if n != lows.len() || n != closes.len() {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);

    // First value is NaN (needs previous close)
    for i in 1..n {
        let h_l = highs[i] - lows[i];
        let h_c = (highs[i] - closes[i - 1]).abs();
        let l_c = (lows[i] - closes[i - 1]).abs();
        result[i] = h_l.max(h_c).max(l_c);
    }
    result
}

/// ATR - Average True Range
///
/// Wilder's smoothing of the true range. First value lands at index `period`.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let tr = true_range(highs, lows, closes);
    wilders_ma(&tr, period)
}

/// Standard Deviation
///
/// Population standard deviation over rolling window
pub fn std_dev(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if !has_enough_data(n, period) {
        return nan_vec(n);
    }
    rolling(values, period, population_std)
}

/// Simple returns `close[i] / close[i-1] - 1`, NaN at index 0
pub fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut result = nan_vec(values.len());
    for i in 1..values.len() {
        if values[i - 1] != 0.0 {
            result[i] = values[i] / values[i - 1] - 1.0;
        }
    }
    result
}

/// Log returns `ln(close[i] / close[i-1])`, NaN at index 0
pub fn log_returns(values: &[f64]) -> Vec<f64> {
    let mut result = nan_vec(values.len());
    for i in 1..values.len() {
        if values[i - 1] > 0.0 && values[i] > 0.0 {
            result[i] = (values[i] / values[i - 1]).ln();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-10;

    fn assert_approx_eq(a: f64, b: f64) {
        if a.is_nan() && b.is_nan() {
            return;
        }
        assert!((a - b).abs() < EPSILON, "Values differ: {} vs {}", a, b);
    }

    // ===== True Range / ATR Tests =====

    #[test]
    fn test_true_range_gap() {
        let highs = vec![10.0, 12.0, 11.0];
        let lows = vec![9.0, 11.0, 8.0];
        let closes = vec![9.5, 11.5, 9.0];
        let tr = true_range(&highs, &lows, &closes);
        assert!(tr[0].is_nan());
        // gap up: |12 - 9.5| beats 12 - 11
        assert_approx_eq(tr[1], 2.5);
        assert_approx_eq(tr[2], 3.5);
    }

    #[test]
    fn test_true_range_length_mismatch() {
        let tr = true_range(&[1.0, 2.0], &[1.0], &[1.0, 2.0]);
        assert!(tr.iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_atr_constant_range() {
        let highs = vec![11.0; 10];
        let lows = vec![9.0; 10];
        let closes = vec![10.0; 10];
        let result = atr(&highs, &lows, &closes, 3);
        assert!(result[2].is_nan());
        assert_approx_eq(result[3], 2.0);
        assert_approx_eq(result[9], 2.0);
    }

    // ===== Std Dev Tests =====

    #[test]
    fn test_std_dev_population() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let result = std_dev(&values, 8);
        assert_approx_eq(result[7], 2.0);
        assert!(result[6].is_nan());
    }

    // ===== Returns Tests =====

    #[test]
    fn test_pct_change() {
        let result = pct_change(&[100.0, 110.0, 99.0]);
        assert!(result[0].is_nan());
        assert_approx_eq(result[1], 0.1);
        assert_approx_eq(result[2], -0.1);
    }

    #[test]
    fn test_log_returns() {
        let result = log_returns(&[1.0, std::f64::consts::E, 1.0]);
        assert!(result[0].is_nan());
        assert_approx_eq(result[1], 1.0);
        assert_approx_eq(result[2], -1.0);
    }

    #[test]
    fn test_log_returns_non_positive_price() {
        let result = log_returns(&[1.0, 0.0, 1.0]);
        assert!(result[1].is_nan());
        assert!(result[2].is_nan());
    }
}
