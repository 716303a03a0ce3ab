//! Momentum indicators
//!
//! Trend strength (ADX) and line-cross detection.

use crate::common::{has_enough_data, mean, nan_vec, safe_div};
use crate::volatility::true_range;

/// ADX - Average Directional Index
///
/// Measures trend strength (not direction)
///
/// Components:
/// - +DM = Current High - Previous High (if positive and > -DM, else 0)
/// - -DM = Previous Low - Current Low (if positive and > +DM, else 0)
/// - +DI = 100 * Smoothed(+DM) / Smoothed(TR)
/// - -DI = 100 * Smoothed(-DM) / Smoothed(TR)
/// - DX = 100 * |+DI - -DI| / (+DI + -DI)
/// - ADX = Smoothed(DX)
///
/// The first ADX value lands at index `2 * period - 1`.
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = highs.len();
    if n != lows.len() || n != closes.len() || !has_enough_data(n, period * 2) {
        return nan_vec(n);
    }

    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    let mut tr = true_range(highs, lows, closes);
    tr[0] = 0.0;

    for i in 1..n {
        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];

        if up_move > 0.0 && up_move > down_move {
            plus_dm[i] = up_move;
        }
        if down_move > 0.0 && down_move > up_move {
            minus_dm[i] = down_move;
        }
    }

    let p = period as f64;
    let mut smoothed_plus_dm = nan_vec(n);
    let mut smoothed_minus_dm = nan_vec(n);
    let mut smoothed_tr = nan_vec(n);

    // One Wilder step is applied to the seed sum before the first output
    let start = period;
    if start < n {
        let seed = |xs: &[f64]| {
            let s: f64 = xs[1..=start].iter().sum();
            s - s / p
        };
        smoothed_plus_dm[start] = seed(&plus_dm);
        smoothed_minus_dm[start] = seed(&minus_dm);
        smoothed_tr[start] = seed(&tr);
    }

    for i in (start + 1)..n {
        smoothed_plus_dm[i] = smoothed_plus_dm[i - 1] - smoothed_plus_dm[i - 1] / p + plus_dm[i];
        smoothed_minus_dm[i] = smoothed_minus_dm[i - 1] - smoothed_minus_dm[i - 1] / p + minus_dm[i];
        smoothed_tr[i] = smoothed_tr[i - 1] - smoothed_tr[i - 1] / p + tr[i];
    }

    let mut dx = nan_vec(n);
    for i in start..n {
        let plus_di = safe_div(smoothed_plus_dm[i], smoothed_tr[i]) * 100.0;
        let minus_di = safe_div(smoothed_minus_dm[i], smoothed_tr[i]) * 100.0;
        let di_sum = plus_di + minus_di;
        if di_sum != 0.0 {
            dx[i] = (plus_di - minus_di).abs() / di_sum * 100.0;
        } else if !di_sum.is_nan() {
            // No directional movement at all
            dx[i] = 0.0;
        }
    }

    let mut result = nan_vec(n);
    let adx_start = start + period;
    if adx_start <= n {
        let first_dx: Vec<f64> = dx[start..adx_start].iter().filter(|x| !x.is_nan()).cloned().collect();
        if !first_dx.is_empty() {
            result[adx_start - 1] = mean(&first_dx);
        }

        for i in adx_start..n {
            if !dx[i].is_nan() && !result[i - 1].is_nan() {
                result[i] = (result[i - 1] * (p - 1.0) + dx[i]) / p;
            }
        }
    }

    result
}

/// Crossover of two lines
///
/// Returns +1.0 on the bar where `fast` crosses above `slow`, -1.0 where it
/// crosses below and 0.0 otherwise. Bars where the lines are equal do not
/// reset the comparison: the sign of the last non-zero difference is used,
/// so touching and then moving through counts as one cross.
/// NaN until both lines are defined.
pub fn crossover(fast: &[f64], slow: &[f64]) -> Vec<f64> {
    let n = fast.len().min(slow.len());
    let mut result = nan_vec(n);
    let mut last_nonzero: Option<f64> = None;

    for i in 0..n {
        let d = fast[i] - slow[i];
        if d.is_nan() {
            continue;
        }
        result[i] = match last_nonzero {
            Some(prev) if prev < 0.0 && d > 0.0 => 1.0,
            Some(prev) if prev > 0.0 && d < 0.0 => -1.0,
            _ => 0.0,
        };
        if d != 0.0 {
            last_nonzero = Some(d);
        }
    }

    result
}
