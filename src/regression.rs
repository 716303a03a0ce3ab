//! Regression-based indicators
//!
//! - Polynomial regression channel over a rolling window
//! - Ornstein-Uhlenbeck parameter estimation for mean reversion
//! - Simple linear regression

use nalgebra::{DMatrix, DVector};

use crate::common::{mean, nan_vec, population_std};

/// Slope and intercept of an ordinary least-squares line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

/// Least-squares fit `y = intercept + slope * x`.
///
/// Returns None for fewer than two points, mismatched lengths or constant `x`.
pub fn linregress(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len();
    if n < 2 || n != y.len() {
        return None;
    }

    let mx = mean(x);
    let my = mean(y);
    let (sxy, sxx) = x.iter().zip(y).fold((0.0, 0.0), |(sxy, sxx), (xi, yi)| {
        (sxy + (xi - mx) * (yi - my), sxx + (xi - mx).powi(2))
    });

    if sxx == 0.0 || !sxx.is_finite() {
        return None;
    }

    let slope = sxy / sxx;
    Some(LinearFit { slope, intercept: my - slope * mx })
}

// ============================================================================
// Polynomial channel
// ============================================================================

/// Upper/lower bands around a polynomial regression line
#[derive(Debug, Clone, Default)]
pub struct PolynomialChannel {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    pub regression: Vec<f64>,
}

/// Fitted values of a degree-`degree` polynomial through `y` at x = 0..n-1.
fn polyfit_values(y: &[f64], degree: usize) -> Option<Vec<f64>> {
    let n = y.len();
    if n == 0 || y.iter().any(|v| !v.is_finite()) {
        return None;
    }

    // Scale x into [0, 1] so high powers stay well conditioned
    let scale = (n.max(2) - 1) as f64;
    let design = DMatrix::from_fn(n, degree + 1, |i, j| (i as f64 / scale).powi(j as i32));
    let target = DVector::from_column_slice(y);

    let coeffs = design.clone().svd(true, true).solve(&target, 1e-12).ok()?;
    let fitted = design * coeffs;
    if fitted.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(fitted.iter().copied().collect())
}

/// Rolling polynomial regression channel.
///
/// For each bar with `lookback` closes available, fits a polynomial of
/// `degree` to that window. The regression value is the fit at the last
/// point and the bands sit `width` population standard deviations of the
/// residuals away. A failed fit repeats the previous bar's values.
pub fn polynomial_channel(closes: &[f64], degree: usize, width: f64, lookback: usize) -> PolynomialChannel {
    let n = closes.len();
    let mut channel = PolynomialChannel {
        upper: nan_vec(n),
        lower: nan_vec(n),
        regression: nan_vec(n),
    };
    if lookback == 0 || n < lookback {
        return channel;
    }

    for i in (lookback - 1)..n {
        let window = &closes[(i + 1 - lookback)..=i];
        match polyfit_values(window, degree) {
            Some(fitted) => {
                let residuals: Vec<f64> = window.iter().zip(&fitted).map(|(y, f)| y - f).collect();
                let band = width * population_std(&residuals);
                let current = fitted[lookback - 1];
                channel.regression[i] = current;
                channel.upper[i] = current + band;
                channel.lower[i] = current - band;
            }
            None if i > 0 => {
                channel.regression[i] = channel.regression[i - 1];
                channel.upper[i] = channel.upper[i - 1];
                channel.lower[i] = channel.lower[i - 1];
            }
            None => {}
        }
    }

    channel
}

// ============================================================================
// Ornstein-Uhlenbeck estimation
// ============================================================================

/// Discrete OU parameters with dt = 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OuParams {
    pub mu: f64,
    pub theta: f64,
    pub sigma: f64,
    pub equilibrium_std: f64,
}

/// Estimate OU parameters by regressing `x[t] - x[t-1]` on `x[t-1]`.
///
/// Needs at least 10 points. When the mean-reversion speed is not
/// meaningfully positive the sample mean and raw sigma are used.
pub fn estimate_ou(log_prices: &[f64]) -> Option<OuParams> {
    const MIN_THETA: f64 = 1e-6;

    if log_prices.len() < 10 {
        return None;
    }

    let x_lag = &log_prices[..log_prices.len() - 1];
    let dx: Vec<f64> = log_prices.windows(2).map(|w| w[1] - w[0]).collect();

    let fit = linregress(x_lag, &dx)?;
    let theta = -fit.slope;
    let mu = if theta > MIN_THETA { fit.intercept / theta } else { mean(log_prices) };

    let residuals: Vec<f64> = x_lag
        .iter()
        .zip(&dx)
        .map(|(x, d)| d - (fit.intercept + fit.slope * x))
        .collect();
    let sigma = population_std(&residuals);
    let equilibrium_std = if theta > MIN_THETA { sigma / (2.0 * theta).sqrt() } else { sigma };

    Some(OuParams { mu, theta, sigma, equilibrium_std })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linregress_exact_line() {
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let y = vec![1.0, 3.0, 5.0, 7.0];
        let fit = linregress(&x, &y).unwrap();
        assert_relative_eq!(fit.slope, 2.0, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_linregress_degenerate() {
        assert!(linregress(&[1.0], &[2.0]).is_none());
        assert!(linregress(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
    }

    // ===== Polynomial Channel Tests =====

    #[test]
    fn test_channel_on_exact_cubic_has_zero_width() {
        let closes: Vec<f64> = (0..40)
            .map(|i| {
                let t = i as f64;
                100.0 + 0.5 * t - 0.02 * t * t + 0.0003 * t * t * t
            })
            .collect();
        let ch = polynomial_channel(&closes, 3, 2.0, 30);

        assert!(ch.regression[28].is_nan());
        for i in 29..40 {
            assert_relative_eq!(ch.regression[i], closes[i], epsilon = 1e-6);
            assert_relative_eq!(ch.upper[i], ch.lower[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_channel_band_width_from_residuals() {
        // Alternating noise around a flat line: degree 0 fit is the mean
        let closes: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 11.0 } else { 9.0 }).collect();
        let ch = polynomial_channel(&closes, 0, 2.0, 10);
        assert_relative_eq!(ch.regression[9], 10.0, epsilon = 1e-9);
        assert_relative_eq!(ch.upper[9], 12.0, epsilon = 1e-9);
        assert_relative_eq!(ch.lower[9], 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_channel_failed_fit_carries_forward() {
        let mut closes: Vec<f64> = (0..12).map(|i| 10.0 + i as f64).collect();
        closes[11] = f64::NAN;
        let ch = polynomial_channel(&closes, 1, 2.0, 5);
        assert_relative_eq!(ch.regression[11], ch.regression[10], epsilon = 1e-12);
        assert_relative_eq!(ch.upper[11], ch.upper[10], epsilon = 1e-12);
    }

    #[test]
    fn test_channel_short_input() {
        let ch = polynomial_channel(&[1.0, 2.0], 3, 2.0, 30);
        assert!(ch.regression.iter().all(|v| v.is_nan()));
    }

    // ===== OU Tests =====

    #[test]
    fn test_estimate_ou_requires_ten_points() {
        assert!(estimate_ou(&[0.0; 9]).is_none());
    }

    /// Small deterministic uniform noise in [-1, 1)
    fn lcg_noise(state: &mut u64) -> f64 {
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((*state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }

    #[test]
    fn test_estimate_ou_mean_reverting_series() {
        let mut seed = 42u64;
        let mut xs = vec![4.8];
        for _ in 1..500 {
            let prev = *xs.last().unwrap();
            xs.push(prev + 0.2 * (4.6 - prev) + 0.01 * lcg_noise(&mut seed));
        }
        let ou = estimate_ou(&xs).unwrap();
        assert!(ou.theta > 0.1 && ou.theta < 0.3, "theta {}", ou.theta);
        assert!((ou.mu - 4.6).abs() < 0.05, "mu {}", ou.mu);
        assert!(ou.equilibrium_std > 0.0);
    }

    #[test]
    fn test_estimate_ou_explosive_falls_back_to_mean() {
        // x grows 5% a step, so the fitted reversion speed is negative
        let xs: Vec<f64> = (0..20).map(|i| 1.05f64.powi(i)).collect();
        let ou = estimate_ou(&xs).unwrap();
        assert!(ou.theta < 0.0);
        assert_relative_eq!(ou.mu, mean(&xs), epsilon = 1e-12);
        assert_relative_eq!(ou.equilibrium_std, ou.sigma, epsilon = 1e-12);
    }
}
