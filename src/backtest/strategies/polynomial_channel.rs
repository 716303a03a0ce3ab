// src/backtest/strategies/polynomial_channel.rs
// Polynomial regression channel breakout with an ATR trailing stop

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Direction;
use crate::backtest::broker::Orders;
use crate::backtest::context::{BarContext, PriceSeries};
use crate::backtest::strategy::{require_period, require_positive, Strategy};
use crate::backtest::types::{OrderEvent, OrderId};
use crate::error::{BacktestError, Result};
use crate::regression::{polynomial_channel, PolynomialChannel};
use crate::volatility::atr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolynomialChannelParams {
    pub degree: usize,
    pub channel_width: f64,
    pub lookback: usize,
    pub trail_atr_mult: f64,
    pub atr_period: usize,
    pub use_regression_exit: bool,
}

impl Default for PolynomialChannelParams {
    fn default() -> Self {
        Self {
            degree: 3,
            channel_width: 2.0,
            lookback: 30,
            trail_atr_mult: 3.0,
            atr_period: 14,
            use_regression_exit: false,
        }
    }
}

impl PolynomialChannelParams {
    pub fn validate(&self) -> Result<()> {
        require_period("polynomialChannel atrPeriod", self.atr_period)?;
        require_positive("polynomialChannel channelWidth", self.channel_width)?;
        require_positive("polynomialChannel trailAtrMult", self.trail_atr_mult)?;
        if self.lookback <= self.degree + 1 {
            return Err(BacktestError::invalid_config(
                "polynomialChannel lookback must exceed degree + 1",
            ));
        }
        Ok(())
    }
}

pub struct PolynomialChannelBreakout {
    params: PolynomialChannelParams,
    channel: PolynomialChannel,
    atr: Vec<f64>,
    order: Option<OrderId>,
    direction: Direction,
    trail_stop: Option<f64>,
}

impl PolynomialChannelBreakout {
    pub fn new(params: PolynomialChannelParams) -> Self {
        Self {
            params,
            channel: PolynomialChannel::default(),
            atr: Vec::new(),
            order: None,
            direction: Direction::Flat,
            trail_stop: None,
        }
    }

    /// Move the stop with price, never against the position
    fn update_trailing_stop(&mut self, index: usize, price: f64) {
        let (Some(stop), atr) = (self.trail_stop, self.atr[index]) else { return };
        if atr.is_nan() {
            return;
        }
        let distance = atr * self.params.trail_atr_mult;
        let tightened = match self.direction {
            Direction::Long => (price - distance).max(stop),
            Direction::Short => (price + distance).min(stop),
            Direction::Flat => stop,
        };
        self.trail_stop = Some(tightened);
    }

    fn stop_hit(&self, price: f64) -> bool {
        match (self.direction, self.trail_stop) {
            (Direction::Long, Some(stop)) => price <= stop,
            (Direction::Short, Some(stop)) => price >= stop,
            _ => false,
        }
    }
}

impl Strategy for PolynomialChannelBreakout {
    fn name(&self) -> &'static str {
        "polynomial_channel"
    }

    fn min_bars(&self) -> usize {
        self.params.lookback.max(self.params.atr_period) + 1
    }

    fn prepare(&mut self, series: &PriceSeries) -> Result<()> {
        let p = &self.params;
        self.channel = polynomial_channel(&series.close, p.degree, p.channel_width, p.lookback);
        self.atr = atr(&series.high, &series.low, &series.close, p.atr_period);
        Ok(())
    }

    fn notify_order(&mut self, event: &OrderEvent, _orders: &mut Orders) {
        if event.is_completed() {
            let opened = Direction::from_position(event.position_after);
            let atr = self.atr.get(event.index).copied().unwrap_or(f64::NAN);
            let distance = atr * self.params.trail_atr_mult;
            match opened {
                Direction::Long => self.trail_stop = Some(event.price - distance).filter(|s| s.is_finite()),
                Direction::Short => self.trail_stop = Some(event.price + distance).filter(|s| s.is_finite()),
                Direction::Flat => self.trail_stop = None,
            }
            self.direction = opened;
            if let Some(stop) = self.trail_stop {
                debug!(date = %event.date, price = event.price, stop, "polynomial channel: initial stop");
            }
        }
        if self.order == Some(event.id) {
            self.order = None;
        }
    }

    fn next(&mut self, ctx: &BarContext, orders: &mut Orders) {
        if ctx.bars_seen() < self.min_bars() || self.order.is_some() {
            return;
        }

        let i = ctx.index;
        let (upper, lower, regression) = (self.channel.upper[i], self.channel.lower[i], self.channel.regression[i]);
        if upper.is_nan() || lower.is_nan() || regression.is_nan() || self.atr[i].is_nan() {
            return;
        }

        let price = ctx.close();
        let prev_price = ctx.series.close[i - 1];
        let prev_upper = self.channel.upper[i - 1];
        let prev_lower = self.channel.lower[i - 1];
        let prev_regression = self.channel.regression[i - 1];

        if !ctx.is_flat() {
            self.update_trailing_stop(i, price);
            if self.stop_hit(price) {
                debug!(date = %ctx.date(), price, stop = ?self.trail_stop, "polynomial channel: trailing stop hit");
                self.order = Some(orders.close());
                return;
            }

            if self.params.use_regression_exit {
                let long_exit = self.direction == Direction::Long && price < regression && prev_price >= prev_regression;
                let short_exit =
                    self.direction == Direction::Short && price > regression && prev_price <= prev_regression;
                if long_exit || short_exit {
                    debug!(date = %ctx.date(), price, regression, "polynomial channel: regression exit");
                    self.order = Some(orders.close());
                }
            }
            return;
        }

        if price > upper && prev_price <= prev_upper {
            debug!(date = %ctx.date(), price, upper, "polynomial channel: upside breakout");
            self.order = Some(orders.buy());
        } else if price < lower && prev_price >= prev_lower {
            debug!(date = %ctx.date(), price, lower, "polynomial channel: downside breakout");
            self.order = Some(orders.sell());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::strategies::test_support::{run, series_from_closes};
    use crate::backtest::strategy::StrategyConfig;
    use crate::backtest::types::Side;

    fn config(use_regression_exit: bool) -> StrategyConfig {
        StrategyConfig::PolynomialChannel(PolynomialChannelParams { use_regression_exit, ..Default::default() })
    }

    /// Small zigzag around 100 that no cubic can follow
    fn zigzag(n: usize) -> Vec<f64> {
        (0..n).map(|i| if i % 2 == 0 { 100.01 } else { 99.99 }).collect()
    }

    /// Range-bound base, then a sharp rally, then a collapse
    fn breakout_then_collapse() -> Vec<f64> {
        let mut closes = zigzag(60);
        let mut last = 100.0;
        for _ in 0..15 {
            last *= 1.03;
            closes.push(last);
        }
        for _ in 0..20 {
            last *= 0.95;
            closes.push(last);
        }
        closes
    }

    #[test]
    fn test_breakout_long_then_trailing_exit() {
        let series = series_from_closes(&breakout_then_collapse());
        let result = run(config(false), &series);

        let first = result.trades.first().expect("a completed trade");
        assert_eq!(first.side, Side::Buy);
        assert!(first.entry_date > series.dates[59]);
        assert!(first.exit_date > series.dates[74]);
    }

    #[test]
    fn test_regression_exit_leaves_earlier() {
        let series = series_from_closes(&breakout_then_collapse());
        let trailing = run(config(false), &series);
        let regression = run(config(true), &series);

        let t = trailing.trades.first().unwrap();
        let r = regression.trades.first().unwrap();
        assert!(r.exit_date <= t.exit_date);
    }

    #[test]
    fn test_range_bound_series_never_trades() {
        let series = series_from_closes(&zigzag(80));
        let result = run(config(false), &series);
        assert!(result.trades.is_empty());
    }

    #[test]
    fn test_params_validation() {
        assert!(PolynomialChannelParams::default().validate().is_ok());
        let bad = PolynomialChannelParams { lookback: 3, degree: 3, ..Default::default() };
        assert!(bad.validate().is_err());
    }
}
