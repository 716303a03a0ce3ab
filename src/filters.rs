//! Signal filters
//!
//! - Butterworth low-pass design (`butter_lowpass`), steady-state initial
//!   conditions (`lfilter_zi`) and a streaming filter that keeps its state
//!   between samples
//! - Adaptive Kalman filter with a constant-velocity model whose noise
//!   covariances follow rolling log-return volatility

use nalgebra::{Complex, DMatrix, DVector, Matrix2, RowVector2, Vector2};
use serde::{Deserialize, Serialize};

use crate::common::nan_vec;
use crate::error::{BacktestError, Result};
use crate::volatility::{log_returns, std_dev};

// ============================================================================
// Butterworth design
// ============================================================================

/// Multiply out `prod(x - r)` and return the real coefficients, highest power first.
fn poly_from_roots(roots: &[Complex<f64>]) -> Vec<f64> {
    let mut coeffs = vec![Complex::new(1.0, 0.0)];
    for root in roots {
        let mut next = coeffs.clone();
        next.push(Complex::new(0.0, 0.0));
        for j in 1..next.len() {
            next[j] -= root * coeffs[j - 1];
        }
        coeffs = next;
    }
    coeffs.iter().map(|c| c.re).collect()
}

/// Digital Butterworth low-pass filter coefficients `(b, a)`.
///
/// `cutoff` is normalized to the Nyquist frequency (0 < cutoff < 1).
/// The analog prototype is pre-warped, mapped with the bilinear transform
/// and expanded into transfer-function form, so `a[0] == 1`.
pub fn butter_lowpass(order: usize, cutoff: f64) -> Result<(Vec<f64>, Vec<f64>)> {
    if order == 0 {
        return Err(BacktestError::invalid_config("filter order must be at least 1"));
    }
    if !(cutoff > 0.0 && cutoff < 1.0) {
        return Err(BacktestError::invalid_config(format!(
            "cutoff must be in (0, 1), got {cutoff}"
        )));
    }

    let n = order as f64;
    // Sampling rate 2 so that cutoff 1.0 is Nyquist
    let fs2 = 4.0;
    let warped = fs2 * (std::f64::consts::PI * cutoff / 2.0).tan();

    // Analog prototype poles on the left half of the unit circle, scaled to `warped`
    let analog_poles: Vec<Complex<f64>> = (0..order)
        .map(|i| {
            let m = -(n - 1.0) + 2.0 * i as f64;
            let theta = std::f64::consts::PI * m / (2.0 * n);
            -Complex::new(0.0, theta).exp() * warped
        })
        .collect();
    let analog_gain = warped.powi(order as i32);

    let fs2c = Complex::new(fs2, 0.0);
    let digital_poles: Vec<Complex<f64>> = analog_poles.iter().map(|p| (fs2c + p) / (fs2c - p)).collect();
    let denom = analog_poles.iter().fold(Complex::new(1.0, 0.0), |acc, p| acc * (fs2c - p));
    let gain = analog_gain / denom.re;

    // All zeros sit at z = -1
    let zeros = vec![Complex::new(-1.0, 0.0); order];
    let b: Vec<f64> = poly_from_roots(&zeros).into_iter().map(|c| c * gain).collect();
    let a = poly_from_roots(&digital_poles);

    Ok((b, a))
}

/// Steady-state filter state for a unit step input.
///
/// Solves `(I - A^T) zi = b[1:] - a[1:] * b[0]` where `A` is the companion
/// matrix of `a`. Scale by the first input to start the filter without a
/// transient.
pub fn lfilter_zi(b: &[f64], a: &[f64]) -> Result<Vec<f64>> {
    let a0 = a.first().copied().unwrap_or(0.0);
    if a0 == 0.0 || b.is_empty() {
        return Err(BacktestError::invalid_config("a[0] must be non-zero"));
    }

    let n = a.len().max(b.len());
    let mut bn: Vec<f64> = b.iter().map(|v| v / a0).collect();
    let mut an: Vec<f64> = a.iter().map(|v| v / a0).collect();
    bn.resize(n, 0.0);
    an.resize(n, 0.0);

    if n < 2 {
        return Ok(vec![]);
    }

    let m = n - 1;
    // companion(a): first row -a[1:], ones on the subdiagonal
    let mut companion = DMatrix::<f64>::zeros(m, m);
    for j in 0..m {
        companion[(0, j)] = -an[j + 1];
    }
    for i in 1..m {
        companion[(i, i - 1)] = 1.0;
    }

    let i_minus_a = DMatrix::<f64>::identity(m, m) - companion.transpose();
    let rhs = DVector::from_iterator(m, (0..m).map(|i| bn[i + 1] - an[i + 1] * bn[0]));

    let zi = i_minus_a
        .lu()
        .solve(&rhs)
        .ok_or_else(|| BacktestError::invalid_config("filter has no steady state"))?;
    Ok(zi.iter().copied().collect())
}

/// One step of a direct form II transposed filter. `state` is updated in place.
fn lfilter_step(b: &[f64], a: &[f64], state: &mut [f64], x: f64) -> f64 {
    let y = b[0] * x + state.first().copied().unwrap_or(0.0);
    let m = state.len();
    for i in 0..m {
        let carry = if i + 1 < m { state[i + 1] } else { 0.0 };
        state[i] = b[i + 1] * x + carry - a[i + 1] * y;
    }
    y
}

/// Streaming Butterworth low-pass filter.
///
/// Emits the raw price until `lookback` prices have been seen. The
/// `lookback`-th price starts the filter with its steady-state for that
/// level, and every later price continues from the carried state.
///
/// The initial state is `lfilter_zi` scaled by that starting price, not the
/// unit-step state, so the first filtered values sit at the price level
/// instead of ramping up from one. A constant series passes through unchanged.
#[derive(Debug, Clone)]
pub struct ButterworthFilter {
    b: Vec<f64>,
    a: Vec<f64>,
    zi_unit: Vec<f64>,
    state: Option<Vec<f64>>,
    lookback: usize,
    seen: usize,
}

impl ButterworthFilter {
    pub fn new(order: usize, cutoff: f64, lookback: usize) -> Result<Self> {
        let (mut b, mut a) = butter_lowpass(order, cutoff)?;
        let zi_unit = lfilter_zi(&b, &a)?;
        let n = a.len().max(b.len());
        b.resize(n, 0.0);
        a.resize(n, 0.0);
        Ok(Self { b, a, zi_unit, state: None, lookback: lookback.max(1), seen: 0 })
    }

    pub fn coefficients(&self) -> (&[f64], &[f64]) {
        (&self.b, &self.a)
    }

    pub fn update(&mut self, price: f64) -> f64 {
        self.seen += 1;
        if self.seen < self.lookback || price.is_nan() {
            return price;
        }

        let state = self
            .state
            .get_or_insert_with(|| self.zi_unit.iter().map(|z| z * price).collect());
        lfilter_step(&self.b, &self.a, state, price)
    }

    /// Run the filter over a whole price series.
    pub fn apply(order: usize, cutoff: f64, lookback: usize, prices: &[f64]) -> Result<Vec<f64>> {
        let mut filter = Self::new(order, cutoff, lookback)?;
        Ok(prices.iter().map(|p| filter.update(*p)).collect())
    }
}

// ============================================================================
// Adaptive Kalman filter
// ============================================================================

/// Tuning for the adaptive Kalman filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KalmanParams {
    pub vol_period: usize,
    pub delta: f64,
    pub r_base: f64,
    pub r_scale: f64,
    pub q_scale_factor: f64,
    pub initial_cov: f64,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            vol_period: 20,
            delta: 1e-4,
            r_base: 0.1,
            r_scale: 1.0,
            q_scale_factor: 0.5,
            initial_cov: 1.0,
        }
    }
}

/// Filter output for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanStep {
    pub level: f64,
    pub velocity: f64,
    pub r: f64,
    pub q0: f64,
    pub q1: f64,
}

/// Two-state `[level, velocity]` Kalman filter with volatility-adaptive noise.
#[derive(Debug, Clone)]
pub struct AdaptiveKalman {
    params: KalmanParams,
    x: Vector2<f64>,
    p: Matrix2<f64>,
    q: Matrix2<f64>,
    r: f64,
    initialized: bool,
}

impl AdaptiveKalman {
    pub fn new(params: KalmanParams) -> Self {
        Self {
            params,
            x: Vector2::zeros(),
            p: Matrix2::identity() * params.initial_cov,
            q: Matrix2::identity() * params.delta,
            r: params.r_base,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Reset the state to `[price, 0]` with the initial covariance.
    pub fn initialize(&mut self, price: f64) {
        self.x = Vector2::new(price, 0.0);
        self.p = Matrix2::identity() * self.params.initial_cov;
        self.initialized = true;
    }

    /// Predict with the previous noise, adapt Q and R to `vol`, then update on `price`.
    pub fn step(&mut self, price: f64, vol: f64) -> KalmanStep {
        let f = Matrix2::new(1.0, 1.0, 0.0, 1.0);
        let h = RowVector2::new(1.0, 0.0);

        self.x = f * self.x;
        self.p = f * self.p * f.transpose() + self.q;

        let vol = vol.max(1e-8);
        self.r = self.params.r_base * (1.0 + self.params.r_scale * vol);
        let qvar = self.params.delta * (1.0 + self.params.q_scale_factor * vol * vol);
        self.q = Matrix2::from_diagonal(&Vector2::new(qvar, qvar));

        let innovation = price - (h * self.x)[0];
        let s = (h * self.p * h.transpose())[0] + self.r;
        let k = self.p * h.transpose() / s;
        self.x += k * innovation;
        self.p = (Matrix2::identity() - k * h) * self.p;

        KalmanStep {
            level: self.x[0],
            velocity: self.x[1],
            r: self.r,
            q0: self.q[(0, 0)],
            q1: self.q[(1, 1)],
        }
    }
}

/// Per-bar Kalman lines, NaN before the filter is initialized
#[derive(Debug, Clone, Default)]
pub struct KalmanLines {
    pub level: Vec<f64>,
    pub velocity: Vec<f64>,
    pub r: Vec<f64>,
    pub q0: Vec<f64>,
    pub q1: Vec<f64>,
}

/// Run the adaptive Kalman filter over closes.
///
/// Volatility is the rolling population std of 1-bar log returns over
/// `vol_period`. The filter initializes on the first bar past `vol_period`
/// with a defined volatility; that bar produces no output. Bars with NaN
/// price or volatility after initialization are skipped.
pub fn adaptive_kalman(closes: &[f64], params: KalmanParams) -> KalmanLines {
    let n = closes.len();
    let vol = std_dev(&log_returns(closes), params.vol_period);
    let mut lines = KalmanLines {
        level: nan_vec(n),
        velocity: nan_vec(n),
        r: nan_vec(n),
        q0: nan_vec(n),
        q1: nan_vec(n),
    };

    let mut kf = AdaptiveKalman::new(params);
    for i in 0..n {
        if !kf.is_initialized() {
            if i >= params.vol_period && !vol[i].is_nan() {
                kf.initialize(closes[i]);
            }
            continue;
        }
        if vol[i].is_nan() || closes[i].is_nan() {
            continue;
        }
        let out = kf.step(closes[i], vol[i]);
        lines.level[i] = out.level;
        lines.velocity[i] = out.velocity;
        lines.r[i] = out.r;
        lines.q0[i] = out.q0;
        lines.q1[i] = out.q1;
    }

    lines
}
