//! Volume indicators
//!
//! Volume-weighted price levels and bar-shape measures used by the
//! volume spread analysis.

use crate::common::{has_enough_data, nan_vec};

/// Rolling VWAP
///
/// VWAP calculated over a rolling window instead of cumulative
///
/// Formula: Sum(Typical Price * Volume, period) / Sum(Volume, period)
///
/// Windows with zero total volume stay NaN.
pub fn rolling_vwap(highs: &[f64], lows: &[f64], closes: &[f64], volumes: &[f64], period: usize) -> Vec<f64> {
    let n = highs.len();
    if n != lows.len() || n != closes.len() || n != volumes.len() || !has_enough_data(n, period) {
        return nan_vec(n);
    }

    let typical: Vec<f64> = (0..n).map(|i| (highs[i] + lows[i] + closes[i]) / 3.0).collect();
    let mut result = nan_vec(n);

    for i in (period - 1)..n {
        let start = i + 1 - period;
        let (sum_tpv, sum_vol) = (start..=i).fold((0.0, 0.0), |(tpv, vol), j| {
            (tpv + typical[j] * volumes[j], vol + volumes[j])
        });

        if sum_vol > 0.0 {
            result[i] = sum_tpv / sum_vol;
        }
    }
    result
}

/// Bar spread `high - low`
pub fn spread(highs: &[f64], lows: &[f64]) -> Vec<f64> {
    highs.iter().zip(lows).map(|(h, l)| h - l).collect()
}

/// Where the close sits inside the bar's range
///
/// `(close - low) / (high - low)`: 0 at the low, 1 at the high, 0.5 for a
/// bar with no range.
pub fn close_position(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len();
    if n != lows.len() || n != closes.len() {
        return nan_vec(n);
    }

    (0..n)
        .map(|i| {
            let range = highs[i] - lows[i];
            if range > 0.0 {
                (closes[i] - lows[i]) / range
            } else {
                0.5
            }
        })
        .collect()
}
