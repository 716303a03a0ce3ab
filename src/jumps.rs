//! Jump-diffusion and trend/volatility confluence indicators
//!
//! A jump is a return that is both large in absolute terms and many rolling
//! standard deviations away from zero. Between jumps the signal decays, and a
//! separate diffusion trend tracks the drift of the last few returns.

use crate::common::{mean, nan_vec};
use crate::momentum::adx;
use crate::volatility::{atr, pct_change, std_dev};

/// Returns averaged into the diffusion trend
const DIFFUSION_WINDOW: usize = 5;

/// Output lines of [`jump_diffusion`]
#[derive(Debug, Clone, Default)]
pub struct JumpDiffusion {
    /// +1/-1 on a jump bar, then multiplied by the decay factor each bar
    pub signal: Vec<f64>,
    /// Absolute return of the last jump, decaying with the signal
    pub magnitude: Vec<f64>,
    /// `tanh(mean(last 5 returns) / vol)`
    pub diffusion_trend: Vec<f64>,
}

/// Detect return jumps against rolling volatility.
///
/// Volatility is the rolling population std of simple returns over
/// `lookback`. A bar is a jump when `|r / vol| > threshold` and
/// `|r| > min_jump`.
pub fn jump_diffusion(closes: &[f64], lookback: usize, threshold: f64, min_jump: f64, decay: f64) -> JumpDiffusion {
    let n = closes.len();
    let returns = pct_change(closes);
    let vol = std_dev(&returns, lookback);

    let mut out = JumpDiffusion {
        signal: nan_vec(n),
        magnitude: nan_vec(n),
        diffusion_trend: nan_vec(n),
    };

    let mut prev_signal = 0.0;
    let mut prev_magnitude = 0.0;
    for i in 0..n {
        let r = returns[i];
        let v = vol[i];
        if r.is_nan() || v.is_nan() {
            continue;
        }

        let z = if v > 0.0 { r / v } else { 0.0 };
        if z.abs() > threshold && r.abs() > min_jump {
            prev_signal = r.signum();
            prev_magnitude = r.abs();
        } else {
            prev_signal *= decay;
            prev_magnitude *= decay;
        }
        out.signal[i] = prev_signal;
        out.magnitude[i] = prev_magnitude;

        if i + 1 >= DIFFUSION_WINDOW && v > 0.0 {
            let recent = mean(&returns[(i + 1 - DIFFUSION_WINDOW)..=i]);
            out.diffusion_trend[i] = (recent / v).tanh();
        }
    }

    out
}

/// Output lines of [`momentum_after_jump`]
#[derive(Debug, Clone, Default)]
pub struct MomentumAfterJump {
    /// Share of the window's returns that agree with the majority side
    pub strength: Vec<f64>,
    /// +1/-1 when strength reaches the threshold, otherwise 0
    pub direction: Vec<f64>,
}

/// Directional agreement of the last `period` returns.
///
/// A missing return counts as flat.
pub fn momentum_after_jump(closes: &[f64], period: usize, threshold: f64) -> MomentumAfterJump {
    let n = closes.len();
    let returns: Vec<f64> = pct_change(closes).into_iter().map(|r| if r.is_nan() { 0.0 } else { r }).collect();

    let mut out = MomentumAfterJump { strength: nan_vec(n), direction: nan_vec(n) };
    if period == 0 {
        return out;
    }

    for i in (period - 1)..n {
        let window = &returns[(i + 1 - period)..=i];
        let ups = window.iter().filter(|r| **r > 0.0).count();
        let downs = window.iter().filter(|r| **r < 0.0).count();

        let strength = ups.max(downs) as f64 / period as f64;
        let direction = if ups > downs { 1.0 } else { -1.0 };
        out.strength[i] = strength;
        out.direction[i] = if strength >= threshold { direction } else { 0.0 };
    }

    out
}

/// Settings for [`trend_volatility_filter`]
#[derive(Debug, Clone, Copy)]
pub struct TrendVolatilityParams {
    pub adx_period: usize,
    pub atr_period: usize,
    pub min_adx_level: f64,
    pub rising_lookback: usize,
    pub min_rising_periods: usize,
}

impl Default for TrendVolatilityParams {
    fn default() -> Self {
        Self {
            adx_period: 7,
            atr_period: 7,
            min_adx_level: 25.0,
            rising_lookback: 7,
            min_rising_periods: 5,
        }
    }
}

/// Sustained-rise flags for ADX and ATR
#[derive(Debug, Clone, Default)]
pub struct TrendVolatility {
    pub adx: Vec<f64>,
    pub atr: Vec<f64>,
    pub adx_rising: Vec<bool>,
    pub atr_rising: Vec<bool>,
}

/// Number of bar-over-bar increases in `window`; NaN never counts.
fn rising_count(window: &[f64]) -> usize {
    window.windows(2).filter(|w| w[1] > w[0]).count()
}

/// Flag bars where trend strength and volatility are both building.
///
/// Over the last `rising_lookback + 1` values, a line is rising when it went
/// up at least `min_rising_periods` times and ends above where the window
/// started. ADX must also be at least `min_adx_level`.
pub fn trend_volatility_filter(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    params: TrendVolatilityParams,
) -> TrendVolatility {
    let n = closes.len();
    let adx_line = adx(highs, lows, closes, params.adx_period);
    let atr_line = atr(highs, lows, closes, params.atr_period);

    let mut adx_rising = vec![false; n];
    let mut atr_rising = vec![false; n];

    for i in 0..n {
        let start = i.saturating_sub(params.rising_lookback);
        let adx_window = &adx_line[start..=i];
        let atr_window = &atr_line[start..=i];

        adx_rising[i] = rising_count(adx_window) >= params.min_rising_periods
            && adx_line[i] >= params.min_adx_level
            && adx_line[i] > adx_window[0];
        atr_rising[i] = rising_count(atr_window) >= params.min_rising_periods && atr_line[i] > atr_window[0];
    }

    TrendVolatility { adx: adx_line, atr: atr_line, adx_rising, atr_rising }
}
