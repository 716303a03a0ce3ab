// src/backtest/strategies/vwap_breakout.rs
// Range breakout confirmed by VWAP alignment, ADX, volume and ATR expansion

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Direction;
use crate::backtest::broker::Orders;
use crate::backtest::context::{BarContext, PriceSeries};
use crate::backtest::strategy::{require_period, require_positive, Strategy};
use crate::backtest::types::{OrderEvent, OrderId};
use crate::common::{highest, lowest, value_ago};
use crate::error::Result;
use crate::momentum::adx;
use crate::moving_averages::{sma, sma_from_first_valid};
use crate::volatility::atr;
use crate::volume::rolling_vwap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VwapBreakoutParams {
    pub vwap_session_length: usize,
    pub vwap_weekly_length: usize,
    pub breakout_lookback: usize,
    pub adx_threshold: f64,
    pub adx_period: usize,
    pub volume_multiplier: f64,
    pub volume_period: usize,
    pub atr_period: usize,
    pub atr_expansion_threshold: f64,
    pub atr_expansion_period: usize,
    pub trailing_stop_atr_multiplier: f64,
    pub initial_stop_atr_multiplier: f64,
}

impl Default for VwapBreakoutParams {
    fn default() -> Self {
        Self {
            vwap_session_length: 7,
            vwap_weekly_length: 28,
            breakout_lookback: 7,
            adx_threshold: 25.0,
            adx_period: 7,
            volume_multiplier: 1.1,
            volume_period: 7,
            atr_period: 14,
            atr_expansion_threshold: 1.1,
            atr_expansion_period: 7,
            trailing_stop_atr_multiplier: 5.0,
            initial_stop_atr_multiplier: 1.0,
        }
    }
}

impl VwapBreakoutParams {
    pub fn validate(&self) -> Result<()> {
        require_period("vwapBreakout vwapSessionLength", self.vwap_session_length)?;
        require_period("vwapBreakout vwapWeeklyLength", self.vwap_weekly_length)?;
        require_period("vwapBreakout breakoutLookback", self.breakout_lookback)?;
        require_period("vwapBreakout adxPeriod", self.adx_period)?;
        require_period("vwapBreakout volumePeriod", self.volume_period)?;
        require_period("vwapBreakout atrPeriod", self.atr_period)?;
        require_period("vwapBreakout atrExpansionPeriod", self.atr_expansion_period)?;
        require_positive("vwapBreakout volumeMultiplier", self.volume_multiplier)?;
        require_positive("vwapBreakout atrExpansionThreshold", self.atr_expansion_threshold)?;
        require_positive("vwapBreakout trailingStopAtrMultiplier", self.trailing_stop_atr_multiplier)?;
        require_positive("vwapBreakout initialStopAtrMultiplier", self.initial_stop_atr_multiplier)?;
        Ok(())
    }

    /// Longest indicator period plus the longest lookback on top of it
    fn warmup(&self) -> usize {
        let required = [
            self.breakout_lookback,
            self.vwap_session_length,
            self.adx_period,
            self.atr_period,
            self.volume_period,
            self.atr_expansion_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        let history = [
            self.vwap_session_length,
            self.vwap_weekly_length,
            self.adx_period,
            self.atr_period,
            self.volume_period,
            self.atr_expansion_period,
            self.breakout_lookback,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        required + history
    }
}

#[derive(Debug, Clone, Default)]
struct VwapLines {
    atr: Vec<f64>,
    atr_sma: Vec<f64>,
    adx: Vec<f64>,
    vwap_session: Vec<f64>,
    vwap_weekly: Vec<f64>,
    volume_sma: Vec<f64>,
    prior_high: Vec<f64>,
    prior_low: Vec<f64>,
}

pub struct VwapBreakout {
    params: VwapBreakoutParams,
    lines: VwapLines,
    order: Option<OrderId>,
    direction: Direction,
    stop_price: Option<f64>,
    trail_price: Option<f64>,
}

impl VwapBreakout {
    pub fn new(params: VwapBreakoutParams) -> Self {
        Self {
            params,
            lines: VwapLines::default(),
            order: None,
            direction: Direction::Flat,
            stop_price: None,
            trail_price: None,
        }
    }

    /// Breakout side when the bar clears the prior bar's range and every
    /// confirmation passes
    fn breakout(&self, ctx: &BarContext) -> Option<Direction> {
        let i = ctx.index;
        let l = &self.lines;
        let prior_high = value_ago(&l.prior_high, i, 1)?;
        let prior_low = value_ago(&l.prior_low, i, 1)?;

        let direction = if ctx.high() > prior_high {
            Direction::Long
        } else if ctx.low() < prior_low {
            Direction::Short
        } else {
            return None;
        };

        let close = ctx.close();
        let vwap_aligned = match direction {
            Direction::Long => close > l.vwap_session[i],
            _ => close < l.vwap_session[i],
        };
        let trending = l.adx[i] > self.params.adx_threshold;
        let volume_confirmed = ctx.volume() > l.volume_sma[i] * self.params.volume_multiplier;
        let atr_expanding = l.atr[i] > l.atr_sma[i] * self.params.atr_expansion_threshold;

        (vwap_aligned && trending && volume_confirmed && atr_expanding).then_some(direction)
    }

    fn update_trailing_stop(&mut self, index: usize, close: f64) {
        let Some(trail) = self.trail_price else { return };
        let distance = self.params.trailing_stop_atr_multiplier * self.lines.atr[index];
        self.trail_price = Some(match self.direction {
            Direction::Long => trail.max(close - distance),
            Direction::Short => trail.min(close + distance),
            Direction::Flat => trail,
        });
    }

    fn exit_reason(&self, index: usize, close: f64) -> Option<&'static str> {
        let long = self.direction == Direction::Long;
        let crossed = |level: Option<f64>| match level {
            Some(level) if long => close <= level,
            Some(level) => close >= level,
            None => false,
        };

        if crossed(self.stop_price) {
            return Some("stop loss");
        }
        if crossed(self.trail_price) {
            return Some("trailing stop");
        }
        let vwap = self.lines.vwap_session[index];
        if (long && close < vwap) || (!long && close > vwap) {
            return Some("vwap reversion");
        }
        None
    }
}

impl Strategy for VwapBreakout {
    fn name(&self) -> &'static str {
        "vwap_breakout"
    }

    fn min_bars(&self) -> usize {
        self.params.warmup()
    }

    fn prepare(&mut self, series: &PriceSeries) -> Result<()> {
        let p = &self.params;
        let (h, l, c, v) = (&series.high, &series.low, &series.close, &series.volume);
        let atr_line = atr(h, l, c, p.atr_period);
        self.lines = VwapLines {
            atr_sma: sma_from_first_valid(&atr_line, p.atr_expansion_period),
            atr: atr_line,
            adx: adx(h, l, c, p.adx_period),
            vwap_session: rolling_vwap(h, l, c, v, p.vwap_session_length),
            vwap_weekly: rolling_vwap(h, l, c, v, p.vwap_weekly_length),
            volume_sma: sma(v, p.volume_period),
            prior_high: highest(h, p.breakout_lookback),
            prior_low: lowest(l, p.breakout_lookback),
        };
        Ok(())
    }

    fn notify_order(&mut self, event: &OrderEvent, _orders: &mut Orders) {
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
            self.direction = Direction::from_position(ctx.position());
            self.update_trailing_stop(i, close);
            if let Some(reason) = self.exit_reason(i, close) {
                debug!(date = %ctx.date(), close, reason, "vwap breakout: exit");
                self.order = Some(orders.close());
                self.direction = Direction::Flat;
                self.stop_price = None;
                self.trail_price = None;
            }
            return;
        }

        let Some(direction) = self.breakout(ctx) else { return };
        let atr = self.lines.atr[i];
        let (initial, trailing) = (self.params.initial_stop_atr_multiplier, self.params.trailing_stop_atr_multiplier);

        debug!(
            date = %ctx.date(),
            close,
            ?direction,
            session_vwap = self.lines.vwap_session[i],
            weekly_vwap = self.lines.vwap_weekly[i],
            adx = self.lines.adx[i],
            "vwap breakout: entry"
        );

        match direction {
            Direction::Long => {
                self.stop_price = Some(close - initial * atr);
                self.trail_price = Some(close - trailing * atr);
                self.order = Some(orders.buy());
            }
            Direction::Short => {
                self.stop_price = Some(close + initial * atr);
                self.trail_price = Some(close + trailing * atr);
                self.order = Some(orders.sell());
            }
            Direction::Flat => return,
        }
        self.direction = direction;
    }
}
