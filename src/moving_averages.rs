//! Moving Average Indicators
//!
//! - SMA: Simple Moving Average (volume/spread baselines, trend filters)
//! - EMA: Exponential Moving Average
//! - Wilder's MA: Wilder's Smoothing (used in ATR and ADX)

use crate::common::{has_enough_data, nan_vec};

/// Simple Moving Average (SMA)
///
/// The arithmetic mean of the last `period` values.
///
/// # Formula
/// SMA = (P1 + P2 + ... + Pn) / n
///
/// # Returns
/// Vector of same length as input, with NaN for first `period - 1` values
///
/// # Example
/// ```
/// use rolling_backtest::sma;
/// let prices = vec![2.0, 4.0, 6.0, 8.0, 10.0];
/// let result = sma(&prices, 3);
/// assert_eq!(result[2], 4.0);  // (2+4+6)/3
/// assert_eq!(result[4], 8.0);  // (6+8+10)/3
/// ```
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if !has_enough_data(n, period) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);

    let mut sum: f64 = values[..period].iter().sum();
    result[period - 1] = sum / period as f64;

    // Rolling calculation - add new, subtract old
    for i in period..n {
        sum = sum + values[i] - values[i - period];
        result[i] = sum / period as f64;
    }

    result
}

/// SMA that tolerates a NaN prefix (e.g. an ATR series still warming up).
///
/// The first output lands `period - 1` bars after the first finite input.
pub fn sma_from_first_valid(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let first_valid = values.iter().position(|v| !v.is_nan()).unwrap_or(n);

    let mut result = nan_vec(n);
    let tail = sma(&values[first_valid..], period);
    result[first_valid..].copy_from_slice(&tail);
    result
}

/// Exponential Moving Average (EMA)
///
/// Seeded with the SMA of the first `period` valid values, then
/// `(value - prev) * k + prev` with `k = 2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if !has_enough_data(n, period) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);
    let k = 2.0 / (period as f64 + 1.0);

    let first_valid = values.iter().position(|v| !v.is_nan()).unwrap_or(n);
    if first_valid + period > n {
        return result;
    }

    let start_idx = first_valid + period - 1;
    result[start_idx] = values[first_valid..=start_idx].iter().sum::<f64>() / period as f64;

    for i in (start_idx + 1)..n {
        if values[i].is_nan() {
            continue;
        }
        result[i] = match result[i - 1] {
            prev if prev.is_nan() => values[i],
            prev => (values[i] - prev) * k + prev,
        };
    }

    result
}

/// Wilder's Moving Average (Smoothed Moving Average)
///
/// First value is the SMA of the first `period` valid values, then
/// `prev + (value - prev) / period`. Leading NaN values are skipped.
pub fn wilders_ma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if !has_enough_data(n, period) {
        return nan_vec(n);
    }

    let mut result = nan_vec(n);

    let mut first_valid = 0;
    while first_valid < n && values[first_valid].is_nan() {
        first_valid += 1;
    }

    if first_valid + period > n {
        return result;
    }

    let first_sma: f64 = values[first_valid..(first_valid + period)].iter().sum::<f64>() / period as f64;
    let start_idx = first_valid + period - 1;
    result[start_idx] = first_sma;

    let alpha = 1.0 / period as f64;
    for i in (start_idx + 1)..n {
        if values[i].is_nan() {
            continue;
        }
        if result[i - 1].is_nan() {
            result[i] = values[i];
        } else {
            result[i] = result[i - 1] + alpha * (values[i] - result[i - 1]);
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

    #[test]
    fn test_sma_basic() {
        let prices = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        let result = sma(&prices, 3);

        assert!(result[0].is_nan());
        assert!(result[1].is_nan());
        assert_approx_eq(result[2], 4.0);
        assert_approx_eq(result[3], 6.0);
        assert_approx_eq(result[4], 8.0);
    }

    #[test]
    fn test_sma_empty() {
        assert!(sma(&[], 3).is_empty());
    }

    #[test]
    fn test_sma_period_exceeds_length() {
        let result = sma(&[1.0, 2.0, 3.0], 10);
        assert!(result.iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_sma_from_first_valid_skips_warmup() {
        let values = vec![f64::NAN, f64::NAN, 1.0, 2.0, 3.0, 4.0];
        let result = sma_from_first_valid(&values, 2);
        assert!(result[2].is_nan());
        assert_approx_eq(result[3], 1.5);
        assert_approx_eq(result[5], 3.5);
    }

    #[test]
    fn test_ema_multiplier() {
        // k = 0.5 for period 3, seed = 2.0
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = ema(&values, 3);
        assert!(result[1].is_nan());
        assert_approx_eq(result[2], 2.0);
        assert_approx_eq(result[3], 3.0);
        assert_approx_eq(result[4], 4.0);
    }

    #[test]
    fn test_wilders_ma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = wilders_ma(&values, 3);
        assert_approx_eq(result[2], 2.0);
        // 2 + (4 - 2) / 3
        assert_approx_eq(result[3], 2.0 + 2.0 / 3.0);
    }

    #[test]
    fn test_wilders_ma_leading_nan() {
        let values = vec![f64::NAN, 3.0, 3.0, 3.0, 6.0];
        let result = wilders_ma(&values, 3);
        assert!(result[2].is_nan());
        assert_approx_eq(result[3], 3.0);
        assert_approx_eq(result[4], 4.0);
    }
}
