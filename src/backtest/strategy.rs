// src/backtest/strategy.rs
// Strategy trait and the serializable strategy configuration

use serde::{Deserialize, Serialize};

use crate::backtest::broker::Orders;
use crate::backtest::context::{BarContext, PriceSeries};
use crate::backtest::strategies::{
    ButterworthCrossover, ButterworthParams, JumpDiffusionMomentum, JumpDiffusionParams, KalmanStrategy,
    OuReversion, OuReversionParams, PolynomialChannelBreakout, PolynomialChannelParams, VsaParams, VsaStrategy,
    VwapBreakout, VwapBreakoutParams,
};
use crate::backtest::types::OrderEvent;
use crate::error::{BacktestError, Result};
use crate::filters::KalmanParams;

/// A bar-by-bar trading strategy.
///
/// `prepare` sees the whole series once before the run and may precompute
/// indicator lines; indicators must only look backwards. The runner then
/// calls `notify_order` for each order event of a bar, followed by `next`
/// with the bar's context.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Bars needed before the strategy can trade
    fn min_bars(&self) -> usize;

    fn prepare(&mut self, series: &PriceSeries) -> Result<()>;

    fn next(&mut self, ctx: &BarContext, orders: &mut Orders);

    fn notify_order(&mut self, _event: &OrderEvent, _orders: &mut Orders) {}
}

// ============================================================================
// Configuration
// ============================================================================

/// Strategy selection plus parameters, tagged by `strategy`:
///
/// ```json
/// { "strategy": "kalman", "volPeriod": 30 }
/// ```
///
/// Missing parameters take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyConfig {
    Vsa(VsaParams),
    PolynomialChannel(PolynomialChannelParams),
    Kalman(KalmanParams),
    VwapBreakout(VwapBreakoutParams),
    Butterworth(ButterworthParams),
    OuReversion(OuReversionParams),
    JumpDiffusion(JumpDiffusionParams),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Vsa(VsaParams::default())
    }
}

impl StrategyConfig {
    /// Default configuration of every strategy
    pub fn all() -> Vec<StrategyConfig> {
        vec![
            StrategyConfig::Vsa(VsaParams::default()),
            StrategyConfig::PolynomialChannel(PolynomialChannelParams::default()),
            StrategyConfig::Kalman(KalmanParams::default()),
            StrategyConfig::VwapBreakout(VwapBreakoutParams::default()),
            StrategyConfig::Butterworth(ButterworthParams::default()),
            StrategyConfig::OuReversion(OuReversionParams::default()),
            StrategyConfig::JumpDiffusion(JumpDiffusionParams::default()),
        ]
    }

    /// Default configuration for a strategy name such as `vwap_breakout`
    pub fn from_name(name: &str) -> Result<StrategyConfig> {
        let wanted = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::all()
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| BacktestError::UnknownStrategy(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::Vsa(_) => "vsa",
            StrategyConfig::PolynomialChannel(_) => "polynomial_channel",
            StrategyConfig::Kalman(_) => "kalman",
            StrategyConfig::VwapBreakout(_) => "vwap_breakout",
            StrategyConfig::Butterworth(_) => "butterworth",
            StrategyConfig::OuReversion(_) => "ou_reversion",
            StrategyConfig::JumpDiffusion(_) => "jump_diffusion",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StrategyConfig::Vsa(_) => "Volume spread analysis patterns with a percentage trailing stop",
            StrategyConfig::PolynomialChannel(_) => "Polynomial regression channel breakout with an ATR trailing stop",
            StrategyConfig::Kalman(_) => "Adaptive Kalman filter velocity, always in the market",
            StrategyConfig::VwapBreakout(_) => "Range breakout confirmed by VWAP, ADX, volume and ATR expansion",
            StrategyConfig::Butterworth(_) => "Fast/slow Butterworth low-pass crossover",
            StrategyConfig::OuReversion(_) => "Ornstein-Uhlenbeck z-score mean reversion with an SMA trend filter",
            StrategyConfig::JumpDiffusion(_) => "Jump-diffusion momentum behind an ADX/ATR confluence filter",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            StrategyConfig::Vsa(p) => p.validate(),
            StrategyConfig::PolynomialChannel(p) => p.validate(),
            StrategyConfig::Kalman(p) => validate_kalman(p),
            StrategyConfig::VwapBreakout(p) => p.validate(),
            StrategyConfig::Butterworth(p) => p.validate(),
            StrategyConfig::OuReversion(p) => p.validate(),
            StrategyConfig::JumpDiffusion(p) => p.validate(),
        }
    }

    /// Validate and instantiate
    pub fn build(&self) -> Result<Box<dyn Strategy>> {
        self.validate()?;
        let strategy: Box<dyn Strategy> = match self {
            StrategyConfig::Vsa(p) => Box::new(VsaStrategy::new(p.clone())),
            StrategyConfig::PolynomialChannel(p) => Box::new(PolynomialChannelBreakout::new(p.clone())),
            StrategyConfig::Kalman(p) => Box::new(KalmanStrategy::new(*p)),
            StrategyConfig::VwapBreakout(p) => Box::new(VwapBreakout::new(p.clone())),
            StrategyConfig::Butterworth(p) => Box::new(ButterworthCrossover::new(p.clone())),
            StrategyConfig::OuReversion(p) => Box::new(OuReversion::new(p.clone())),
            StrategyConfig::JumpDiffusion(p) => Box::new(JumpDiffusionMomentum::new(p.clone())),
        };
        Ok(strategy)
    }

    /// Warm-up bars of the configured strategy
    pub fn min_bars(&self) -> Result<usize> {
        Ok(self.build()?.min_bars())
    }
}

fn validate_kalman(p: &KalmanParams) -> Result<()> {
    if p.vol_period < 2 {
        return Err(BacktestError::invalid_config("kalman volPeriod must be at least 2"));
    }
    if !(p.delta > 0.0 && p.r_base > 0.0 && p.initial_cov > 0.0) {
        return Err(BacktestError::invalid_config("kalman delta, rBase and initialCov must be positive"));
    }
    if p.r_scale < 0.0 || p.q_scale_factor < 0.0 {
        return Err(BacktestError::invalid_config("kalman scale factors must not be negative"));
    }
    Ok(())
}

/// Shared check for period-like parameters
pub(crate) fn require_period(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(BacktestError::InvalidConfig(format!("{name} must be at least 1")));
    }
    Ok(())
}

pub(crate) fn require_positive(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(BacktestError::InvalidConfig(format!("{name} must be positive")));
    }
    Ok(())
}
