// src/backtest/strategies/butterworth.rs
// Fast/slow Butterworth low-pass crossover with trailing and fixed stops

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Direction;
use crate::backtest::broker::Orders;
use crate::backtest::context::{BarContext, PriceSeries};
use crate::backtest::strategy::{require_period, require_positive, Strategy};
use crate::backtest::types::{OrderEvent, OrderId};
use crate::error::{BacktestError, Result};
use crate::filters::ButterworthFilter;
use crate::momentum::crossover;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ButterworthParams {
    pub fast_cutoff: f64,
    pub slow_cutoff: f64,
    pub filter_order: usize,
    pub lookback: usize,
    pub trailing_stop_pct: f64,
    pub stop_loss_pct: f64,
    pub trend_threshold: f64,
}

impl Default for ButterworthParams {
    fn default() -> Self {
        Self {
            fast_cutoff: 0.15,
            slow_cutoff: 0.05,
            filter_order: 2,
            lookback: 50,
            trailing_stop_pct: 0.04,
            stop_loss_pct: 0.08,
            trend_threshold: 0.001,
        }
    }
}

impl ButterworthParams {
    pub fn validate(&self) -> Result<()> {
        require_period("butterworth filterOrder", self.filter_order)?;
        require_period("butterworth lookback", self.lookback)?;
        for (name, cutoff) in [("fastCutoff", self.fast_cutoff), ("slowCutoff", self.slow_cutoff)] {
            if !(cutoff > 0.0 && cutoff < 1.0) {
                return Err(BacktestError::InvalidConfig(format!("butterworth {name} must be in (0, 1)")));
            }
        }
        require_positive("butterworth trailingStopPct", self.trailing_stop_pct)?;
        require_positive("butterworth stopLossPct", self.stop_loss_pct)?;
        if self.trend_threshold < 0.0 {
            return Err(BacktestError::invalid_config("butterworth trendThreshold must not be negative"));
        }
        Ok(())
    }
}

pub struct ButterworthCrossover {
    params: ButterworthParams,
    fast: Vec<f64>,
    slow: Vec<f64>,
    cross: Vec<f64>,
    order: Option<OrderId>,
    last_signal: Direction,
    direction: Direction,
    entry_price: f64,
    trail_stop: f64,
}

impl ButterworthCrossover {
    pub fn new(params: ButterworthParams) -> Self {
        Self {
            params,
            fast: Vec::new(),
            slow: Vec::new(),
            cross: Vec::new(),
            order: None,
            last_signal: Direction::Flat,
            direction: Direction::Flat,
            entry_price: 0.0,
            trail_stop: 0.0,
        }
    }

    fn exit_reason(&mut self, index: usize, close: f64) -> Option<&'static str> {
        let p = &self.params;
        match self.direction {
            Direction::Long => {
                self.trail_stop = self.trail_stop.max(close * (1.0 - p.trailing_stop_pct));
                if self.cross[index] < 0.0 {
                    Some("crossover reversal")
                } else if close <= self.entry_price * (1.0 - p.stop_loss_pct) {
                    Some("stop loss")
                } else if close <= self.trail_stop {
                    Some("trailing stop")
                } else {
                    None
                }
            }
            Direction::Short => {
                self.trail_stop = self.trail_stop.min(close * (1.0 + p.trailing_stop_pct));
                if self.cross[index] > 0.0 {
                    Some("crossover reversal")
                } else if close >= self.entry_price * (1.0 + p.stop_loss_pct) {
                    Some("stop loss")
                } else if close >= self.trail_stop {
                    Some("trailing stop")
                } else {
                    None
                }
            }
            Direction::Flat => None,
        }
    }
}

impl Strategy for ButterworthCrossover {
    fn name(&self) -> &'static str {
        "butterworth"
    }

    fn min_bars(&self) -> usize {
        self.params.lookback * 2
    }

    fn prepare(&mut self, series: &PriceSeries) -> Result<()> {
        let p = &self.params;
        self.fast = ButterworthFilter::apply(p.filter_order, p.fast_cutoff, p.lookback, &series.close)?;
        self.slow = ButterworthFilter::apply(p.filter_order, p.slow_cutoff, p.lookback, &series.close)?;
        self.cross = crossover(&self.fast, &self.slow);
        Ok(())
    }

    fn notify_order(&mut self, event: &OrderEvent, _orders: &mut Orders) {
        if event.is_completed() {
            self.direction = Direction::from_position(event.position_after);
            match self.direction {
                Direction::Long => {
                    self.entry_price = event.price;
                    self.trail_stop = event.price * (1.0 - self.params.trailing_stop_pct);
                }
                Direction::Short => {
                    self.entry_price = event.price;
                    self.trail_stop = event.price * (1.0 + self.params.trailing_stop_pct);
                }
                Direction::Flat => {
                    self.entry_price = 0.0;
                    self.trail_stop = 0.0;
                }
            }
        }
        if self.order == Some(event.id) {
            self.order = None;
        }
    }

    fn next(&mut self, ctx: &BarContext, orders: &mut Orders) {
        if self.order.is_some() {
            return;
        }
        let i = ctx.index;
        let (fast, slow) = (self.fast[i], self.slow[i]);
        if ctx.bars_seen() < self.min_bars() || fast.is_nan() || slow.is_nan() {
            return;
        }

        let close = ctx.close();
        if !ctx.is_flat() {
            if let Some(reason) = self.exit_reason(i, close) {
                debug!(date = %ctx.date(), close, reason, "butterworth: exit");
                self.order = Some(orders.close());
            }
            return;
        }

        let diff_ratio = (fast - slow) / slow.abs();
        let threshold = self.params.trend_threshold;
        if self.cross[i] > 0.0 && diff_ratio > threshold && self.last_signal != Direction::Long {
            debug!(date = %ctx.date(), close, diff_ratio, "butterworth: buy");
            self.order = Some(orders.buy());
            self.last_signal = Direction::Long;
        } else if self.cross[i] < 0.0 && diff_ratio < -threshold && self.last_signal != Direction::Short {
            debug!(date = %ctx.date(), close, diff_ratio, "butterworth: sell");
            self.order = Some(orders.sell());
            self.last_signal = Direction::Short;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::strategies::test_support::{run, series_from_closes, wave};
    use crate::backtest::strategy::StrategyConfig;

    #[test]
    fn test_cycles_produce_alternating_trades_after_warmup() {
        let series = series_from_closes(&wave(400, 80.0, 20.0, 0.0));
        let result = run(StrategyConfig::Butterworth(ButterworthParams::default()), &series);

        assert!(!result.trades.is_empty());
        for trade in &result.trades {
            assert!(trade.entry_date > series.dates[99]);
        }
        for pair in result.trades.windows(2) {
            assert_ne!(pair[0].side, pair[1].side);
        }
    }

    #[test]
    fn test_short_history_never_trades() {
        let series = series_from_closes(&wave(99, 80.0, 20.0, 0.0));
        let result = run(StrategyConfig::Butterworth(ButterworthParams::default()), &series);
        assert_eq!(result.end_value, result.start_value);
    }

    #[test]
    fn test_params_validation() {
        assert!(ButterworthParams::default().validate().is_ok());
        assert!(ButterworthParams { fast_cutoff: 1.2, ..Default::default() }.validate().is_err());
    }
}
