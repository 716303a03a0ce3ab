// src/backtest/strategies/jump_diffusion.rs
// Jump-diffusion momentum behind an ADX/ATR trend-volatility filter

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Direction;
use crate::backtest::broker::Orders;
use crate::backtest::context::{BarContext, PriceSeries};
use crate::backtest::strategy::{require_positive, Strategy};
use crate::backtest::types::{OrderEvent, OrderId};
use crate::error::{BacktestError, Result};
use crate::jumps::{
    jump_diffusion, momentum_after_jump, trend_volatility_filter, JumpDiffusion, MomentumAfterJump,
    TrendVolatility, TrendVolatilityParams,
};

const JUMP_LOOKBACK: usize = 20;
const JUMP_DECAY: f64 = 0.9;
const MOMENTUM_PERIOD: usize = 5;
/// Decayed signal still treated as a fresh jump
const JUMP_SIGNAL_LEVEL: f64 = 0.8;
/// Weighted diffusion trend needed to confirm a jump
const DIFFUSION_CONFIRMATION: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JumpDiffusionParams {
    pub jump_threshold: f64,
    pub min_jump_size: f64,
    pub momentum_threshold: f64,
    pub diffusion_weight: f64,
    pub hold_periods: usize,
    pub min_adx_level: f64,
    pub require_adx_rising: bool,
    pub require_atr_rising: bool,
    pub trailing_stop_pct: f64,
    pub stop_loss_pct: f64,
}

impl Default for JumpDiffusionParams {
    fn default() -> Self {
        Self {
            jump_threshold: 2.0,
            min_jump_size: 0.05,
            momentum_threshold: 0.7,
            diffusion_weight: 0.5,
            hold_periods: 7,
            min_adx_level: 20.0,
            require_adx_rising: true,
            require_atr_rising: true,
            trailing_stop_pct: 0.05,
            stop_loss_pct: 0.1,
        }
    }
}

impl JumpDiffusionParams {
    pub fn validate(&self) -> Result<()> {
        require_positive("jumpDiffusion jumpThreshold", self.jump_threshold)?;
        require_positive("jumpDiffusion trailingStopPct", self.trailing_stop_pct)?;
        require_positive("jumpDiffusion stopLossPct", self.stop_loss_pct)?;
        if !(self.momentum_threshold > 0.0 && self.momentum_threshold <= 1.0) {
            return Err(BacktestError::invalid_config("jumpDiffusion momentumThreshold must be in (0, 1]"));
        }
        if self.min_jump_size < 0.0 || self.diffusion_weight < 0.0 {
            return Err(BacktestError::invalid_config(
                "jumpDiffusion minJumpSize and diffusionWeight must not be negative",
            ));
        }
        Ok(())
    }

    fn filter_params(&self) -> TrendVolatilityParams {
        TrendVolatilityParams { min_adx_level: self.min_adx_level, ..Default::default() }
    }
}

pub struct JumpDiffusionMomentum {
    params: JumpDiffusionParams,
    jumps: JumpDiffusion,
    momentum: MomentumAfterJump,
    filter: TrendVolatility,
    order: Option<OrderId>,
    direction: Direction,
    entry_price: f64,
    entry_index: usize,
    /// Best close since entry: highest for longs, lowest for shorts
    extreme: f64,
}

impl JumpDiffusionMomentum {
    pub fn new(params: JumpDiffusionParams) -> Self {
        Self {
            params,
            jumps: JumpDiffusion::default(),
            momentum: MomentumAfterJump::default(),
            filter: TrendVolatility::default(),
            order: None,
            direction: Direction::Flat,
            entry_price: 0.0,
            entry_index: 0,
            extreme: 0.0,
        }
    }

    fn filters_pass(&self, index: usize) -> bool {
        (!self.params.require_adx_rising || self.filter.adx_rising[index])
            && (!self.params.require_atr_rising || self.filter.atr_rising[index])
    }

    fn entry_signal(&self, index: usize) -> Option<Direction> {
        if !self.filters_pass(index) {
            return None;
        }
        let signal = self.jumps.signal[index];
        let diffusion = self.jumps.diffusion_trend[index] * self.params.diffusion_weight;
        let momentum = self.momentum.direction[index];

        if signal > JUMP_SIGNAL_LEVEL && (momentum > 0.0 || diffusion > DIFFUSION_CONFIRMATION) {
            Some(Direction::Long)
        } else if signal < -JUMP_SIGNAL_LEVEL && (momentum < 0.0 || diffusion < -DIFFUSION_CONFIRMATION) {
            Some(Direction::Short)
        } else {
            None
        }
    }

    /// The fixed stop is always live; the trailing stop only once the
    /// minimum holding period has passed.
    fn exit_reason(&mut self, index: usize, close: f64) -> Option<&'static str> {
        let p = &self.params;
        let held = index.saturating_sub(self.entry_index);
        match self.direction {
            Direction::Long => {
                self.extreme = self.extreme.max(close);
                if close <= self.entry_price * (1.0 - p.stop_loss_pct) {
                    Some("stop loss")
                } else if held >= p.hold_periods && close <= self.extreme * (1.0 - p.trailing_stop_pct) {
                    Some("trailing stop")
                } else {
                    None
                }
            }
            Direction::Short => {
                self.extreme = self.extreme.min(close);
                if close >= self.entry_price * (1.0 + p.stop_loss_pct) {
                    Some("stop loss")
                } else if held >= p.hold_periods && close >= self.extreme * (1.0 + p.trailing_stop_pct) {
                    Some("trailing stop")
                } else {
                    None
                }
            }
            Direction::Flat => None,
        }
    }
}

impl Strategy for JumpDiffusionMomentum {
    fn name(&self) -> &'static str {
        "jump_diffusion"
    }

    fn min_bars(&self) -> usize {
        let filter = self.params.filter_params();
        (JUMP_LOOKBACK + 1).max(2 * filter.adx_period + filter.rising_lookback)
    }

    fn prepare(&mut self, series: &PriceSeries) -> Result<()> {
        let p = &self.params;
        self.jumps = jump_diffusion(&series.close, JUMP_LOOKBACK, p.jump_threshold, p.min_jump_size, JUMP_DECAY);
        self.momentum = momentum_after_jump(&series.close, MOMENTUM_PERIOD, p.momentum_threshold);
        self.filter = trend_volatility_filter(&series.high, &series.low, &series.close, p.filter_params());
        Ok(())
    }

    fn notify_order(&mut self, event: &OrderEvent, _orders: &mut Orders) {
        if event.is_completed() {
            self.direction = Direction::from_position(event.position_after);
            if self.direction != Direction::Flat {
                self.entry_price = event.price;
                self.entry_index = event.index;
                self.extreme = event.price;
            }
        }
        if self.order == Some(event.id) {
            self.order = None;
        }
    }

    fn next(&mut self, ctx: &BarContext, orders: &mut Orders) {
        if self.order.is_some() || ctx.bars_seen() < self.min_bars() {
            return;
        }
        let i = ctx.index;
        let close = ctx.close();

        if !ctx.is_flat() {
            if let Some(reason) = self.exit_reason(i, close) {
                debug!(date = %ctx.date(), close, entry = self.entry_price, reason, "jump diffusion: exit");
                self.order = Some(orders.close());
            }
            return;
        }

        match self.entry_signal(i) {
            Some(Direction::Long) => {
                debug!(date = %ctx.date(), close, signal = self.jumps.signal[i], "jump diffusion: buy");
                self.order = Some(orders.buy());
            }
            Some(Direction::Short) => {
                debug!(date = %ctx.date(), close, signal = self.jumps.signal[i], "jump diffusion: sell");
                self.order = Some(orders.sell());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::strategies::test_support::{run, series_from_closes};
    use crate::backtest::strategy::StrategyConfig;
    use crate::backtest::types::Side;

    /// Quiet zigzag, an upside jump at bar 40, more quiet bars, then a slide
    fn jump_then_slide() -> Vec<f64> {
        let mut closes = Vec::new();
        let mut price = 100.0;
        for i in 0..75 {
            price *= match i {
                40 => 1.10,
                60..=62 => 0.955,
                _ if i % 2 == 0 => 1.002,
                _ => 0.999,
            };
            closes.push(price);
        }
        closes
    }

    fn unfiltered() -> JumpDiffusionParams {
        JumpDiffusionParams { require_adx_rising: false, require_atr_rising: false, ..Default::default() }
    }

    #[test]
    fn test_jump_entry_and_stop_exit() {
        let series = series_from_closes(&jump_then_slide());
        let result = run(StrategyConfig::JumpDiffusion(unfiltered()), &series);

        let trade = result.trades.first().expect("a round trip");
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.entry_date, series.dates[41]);
        assert!(trade.exit_date > series.dates[60]);
        assert!(trade.exit_date <= series.dates[63]);
    }

    #[test]
    fn test_no_jump_no_trade() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
        let result = run(StrategyConfig::JumpDiffusion(unfiltered()), &series_from_closes(&closes));
        assert!(result.trades.is_empty());
        assert_eq!(result.end_value, result.start_value);
    }

    #[test]
    fn test_min_bars_covers_filter_warmup() {
        let strategy = JumpDiffusionMomentum::new(JumpDiffusionParams::default());
        assert_eq!(strategy.min_bars(), 21);
    }
}
