// src/backtest/strategies/ou_reversion.rs
// Ornstein-Uhlenbeck mean reversion with an SMA trend filter

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Direction;
use crate::backtest::broker::Orders;
use crate::backtest::context::{BarContext, PriceSeries};
use crate::backtest::strategy::{require_period, require_positive, Strategy};
use crate::backtest::types::{OrderEvent, OrderId};
use crate::error::{BacktestError, Result};
use crate::moving_averages::sma;
use crate::regression::estimate_ou;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OuReversionParams {
    pub lookback: usize,
    pub sma_period: usize,
    pub entry_threshold: f64,
    pub exit_threshold: f64,
}

impl Default for OuReversionParams {
    fn default() -> Self {
        Self { lookback: 60, sma_period: 30, entry_threshold: 1.5, exit_threshold: 0.5 }
    }
}

impl OuReversionParams {
    pub fn validate(&self) -> Result<()> {
        require_period("ouReversion smaPeriod", self.sma_period)?;
        require_positive("ouReversion entryThreshold", self.entry_threshold)?;
        if self.lookback < 10 {
            return Err(BacktestError::invalid_config("ouReversion lookback must be at least 10"));
        }
        if !(self.exit_threshold >= 0.0 && self.exit_threshold < self.entry_threshold) {
            return Err(BacktestError::invalid_config(
                "ouReversion exitThreshold must be in [0, entryThreshold)",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
    Close,
}

/// Trading decision for one bar's z-score.
///
/// Longs need the price under the OU mean but above its SMA, shorts the
/// reverse. Positions close once the z-score has come back inside the exit
/// band.
pub fn decide(z: f64, close: f64, sma: f64, position: Direction, params: &OuReversionParams) -> Option<Action> {
    match position {
        Direction::Flat if z < -params.entry_threshold && close > sma => Some(Action::Buy),
        Direction::Flat if z > params.entry_threshold && close < sma => Some(Action::Sell),
        Direction::Long if z > -params.exit_threshold => Some(Action::Close),
        Direction::Short if z < params.exit_threshold => Some(Action::Close),
        _ => None,
    }
}

pub struct OuReversion {
    params: OuReversionParams,
    log_closes: Vec<f64>,
    sma: Vec<f64>,
    order: Option<OrderId>,
}

impl OuReversion {
    pub fn new(params: OuReversionParams) -> Self {
        Self { params, log_closes: Vec::new(), sma: Vec::new(), order: None }
    }

    /// z-score of the current log price against the OU fit on the trailing window
    fn z_score(&self, index: usize) -> Option<f64> {
        let start = (index + 1).checked_sub(self.params.lookback)?;
        let window = &self.log_closes[start..=index];
        if window.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let ou = estimate_ou(window)?;
        if !(ou.equilibrium_std > 0.0) {
            return None;
        }
        Some((self.log_closes[index] - ou.mu) / ou.equilibrium_std)
    }
}

impl Strategy for OuReversion {
    fn name(&self) -> &'static str {
        "ou_reversion"
    }

    fn min_bars(&self) -> usize {
        self.params.lookback
    }

    fn prepare(&mut self, series: &PriceSeries) -> Result<()> {
        self.log_closes = series.close.iter().map(|c| if *c > 0.0 { c.ln() } else { f64::NAN }).collect();
        self.sma = sma(&series.close, self.params.sma_period);
        Ok(())
    }

    fn notify_order(&mut self, event: &OrderEvent, _orders: &mut Orders) {
        if self.order == Some(event.id) {
            self.order = None;
        }
    }

    fn next(&mut self, ctx: &BarContext, orders: &mut Orders) {
        let Some(z) = self.z_score(ctx.index) else { return };
        if self.order.is_some() {
            return;
        }

        let close = ctx.close();
        let position = Direction::from_position(ctx.position());
        let Some(action) = decide(z, close, self.sma[ctx.index], position, &self.params) else { return };

        debug!(date = %ctx.date(), close, z, ?action, "ou reversion");
        self.order = Some(match action {
            Action::Buy => orders.buy(),
            Action::Sell => orders.sell(),
            Action::Close => orders.close(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::strategies::test_support::{run, series_from_closes};
    use crate::backtest::strategy::StrategyConfig;

    #[test]
    fn test_decide_entries_need_trend_agreement() {
        let p = OuReversionParams::default();
        assert_eq!(decide(-2.0, 101.0, 100.0, Direction::Flat, &p), Some(Action::Buy));
        assert_eq!(decide(-2.0, 99.0, 100.0, Direction::Flat, &p), None);
        assert_eq!(decide(2.0, 99.0, 100.0, Direction::Flat, &p), Some(Action::Sell));
        assert_eq!(decide(2.0, 101.0, 100.0, Direction::Flat, &p), None);
        assert_eq!(decide(-2.0, 101.0, f64::NAN, Direction::Flat, &p), None);
    }

    #[test]
    fn test_decide_exits() {
        let p = OuReversionParams::default();
        assert_eq!(decide(-1.0, 100.0, 100.0, Direction::Long, &p), None);
        assert_eq!(decide(-0.4, 100.0, 100.0, Direction::Long, &p), Some(Action::Close));
        assert_eq!(decide(0.6, 100.0, 100.0, Direction::Short, &p), None);
        assert_eq!(decide(0.4, 100.0, 100.0, Direction::Short, &p), Some(Action::Close));
    }

    #[test]
    fn test_z_score_needs_full_window() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + ((i * 37) % 11) as f64 - 5.0).collect();
        let mut strategy = OuReversion::new(OuReversionParams::default());
        strategy.prepare(&series_from_closes(&closes)).unwrap();
        assert!(strategy.z_score(58).is_none());
        assert!(strategy.z_score(59).is_some());
    }

    #[test]
    fn test_runs_on_mean_reverting_series() {
        // Pseudo-random mean-reverting noise around 100
        let mut state = 12345u64;
        let mut level = 0.0_f64;
        let closes: Vec<f64> = (0..300)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let u = (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5;
                level = 0.8 * level + 4.0 * u;
                100.0 + level
            })
            .collect();
        let series = series_from_closes(&closes);
        let result = run(StrategyConfig::OuReversion(OuReversionParams::default()), &series);

        for trade in &result.trades {
            assert!(trade.entry_date >= series.dates[60]);
        }
        assert!(result.end_value > 0.0);
    }
}
