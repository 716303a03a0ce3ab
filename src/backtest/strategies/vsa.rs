// src/backtest/strategies/vsa.rs
// Volume Spread Analysis pattern strategy with a percentage trailing stop

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backtest::broker::Orders;
use crate::backtest::context::{BarContext, PriceSeries};
use crate::backtest::strategy::{require_period, require_positive, Strategy};
use crate::backtest::types::{OrderEvent, OrderId, OrderStatus, Side};
use crate::error::{BacktestError, Result};
use crate::moving_averages::sma;
use crate::volume::{close_position, spread};

/// Prior bars inspected for background context
const CONTEXT_BARS: usize = 5;
/// Bars that must pass between two signals
const SIGNAL_SPACING: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VsaParams {
    pub volume_period: usize,
    pub volume_threshold: f64,
    pub spread_period: usize,
    pub spread_threshold: f64,
    pub trend_period: usize,
    pub climax_volume_mult: f64,
    pub test_volume_mult: f64,
    pub trail_stop_pct: f64,
}

impl Default for VsaParams {
    fn default() -> Self {
        Self {
            volume_period: 7,
            volume_threshold: 1.2,
            spread_period: 7,
            spread_threshold: 1.2,
            trend_period: 30,
            climax_volume_mult: 2.0,
            test_volume_mult: 0.5,
            trail_stop_pct: 0.05,
        }
    }
}

impl VsaParams {
    pub fn validate(&self) -> Result<()> {
        require_period("vsa volumePeriod", self.volume_period)?;
        require_period("vsa spreadPeriod", self.spread_period)?;
        require_period("vsa trendPeriod", self.trend_period)?;
        require_positive("vsa volumeThreshold", self.volume_threshold)?;
        require_positive("vsa spreadThreshold", self.spread_threshold)?;
        require_positive("vsa climaxVolumeMult", self.climax_volume_mult)?;
        require_positive("vsa testVolumeMult", self.test_volume_mult)?;
        if !(self.trail_stop_pct > 0.0 && self.trail_stop_pct < 1.0) {
            return Err(BacktestError::invalid_config("vsa trailStopPct must be in (0, 1)"));
        }
        Ok(())
    }
}

// ============================================================================
// Bar classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeClass {
    Climax,
    High,
    Low,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadClass {
    Wide,
    Narrow,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePlacement {
    High,
    Middle,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Sideways,
}

/// Classified shape of one bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarProfile {
    pub volume: VolumeClass,
    pub spread: SpreadClass,
    pub close: ClosePlacement,
    pub trend: Trend,
    pub up_bar: bool,
    pub down_bar: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VsaPattern {
    StoppingVolume,
    NoSupply,
    Strength,
    EffortUpReversal,
    Climax,
    NoDemand,
    Weakness,
    EffortDownReversal,
}

impl VsaPattern {
    pub fn base_strength(self) -> f64 {
        match self {
            VsaPattern::StoppingVolume | VsaPattern::Climax => 4.0,
            VsaPattern::NoSupply
            | VsaPattern::EffortUpReversal
            | VsaPattern::NoDemand
            | VsaPattern::EffortDownReversal => 3.0,
            VsaPattern::Strength | VsaPattern::Weakness => 2.0,
        }
    }

    pub fn is_bullish(self) -> bool {
        matches!(
            self,
            VsaPattern::StoppingVolume | VsaPattern::NoSupply | VsaPattern::Strength | VsaPattern::EffortUpReversal
        )
    }
}

pub fn classify_volume(volume: f64, volume_ma: f64, params: &VsaParams) -> VolumeClass {
    if volume_ma.is_nan() || volume_ma == 0.0 || volume == 0.0 {
        return VolumeClass::Normal;
    }
    let ratio = volume / volume_ma;
    if ratio >= params.climax_volume_mult {
        VolumeClass::Climax
    } else if ratio >= params.volume_threshold {
        VolumeClass::High
    } else if ratio <= params.test_volume_mult {
        VolumeClass::Low
    } else {
        VolumeClass::Normal
    }
}

pub fn classify_spread(spread: f64, spread_ma: f64, params: &VsaParams) -> SpreadClass {
    if spread_ma.is_nan() || spread_ma == 0.0 || spread == 0.0 {
        return SpreadClass::Normal;
    }
    let ratio = spread / spread_ma;
    if ratio >= params.spread_threshold {
        SpreadClass::Wide
    } else if ratio <= 1.0 / params.spread_threshold {
        SpreadClass::Narrow
    } else {
        SpreadClass::Normal
    }
}

pub fn classify_close(spread: f64, position: f64) -> ClosePlacement {
    if spread == 0.0 {
        ClosePlacement::Middle
    } else if position >= 0.7 {
        ClosePlacement::High
    } else if position <= 0.3 {
        ClosePlacement::Low
    } else {
        ClosePlacement::Middle
    }
}

pub fn trend_direction(close: f64, trend_ma: f64) -> Trend {
    if trend_ma.is_nan() {
        Trend::Sideways
    } else if close > trend_ma {
        Trend::Up
    } else if close < trend_ma {
        Trend::Down
    } else {
        Trend::Sideways
    }
}

/// First matching pattern, bullish ones checked first
pub fn detect_pattern(bar: &BarProfile) -> Option<VsaPattern> {
    use ClosePlacement as C;
    use SpreadClass as S;
    use VolumeClass as V;

    let off_high = matches!(bar.close, C::Middle | C::High);
    let off_low = matches!(bar.close, C::Middle | C::Low);

    let pattern = match (bar.volume, bar.spread, bar.trend) {
        (V::Climax, S::Wide, Trend::Down) if bar.down_bar && off_high => VsaPattern::StoppingVolume,
        (V::Low, S::Narrow, Trend::Up) if bar.down_bar && bar.close == C::High => VsaPattern::NoSupply,
        (V::High, S::Narrow, Trend::Up) if bar.up_bar && bar.close == C::High => VsaPattern::Strength,
        (V::High, S::Narrow, Trend::Down) if bar.up_bar && off_low => VsaPattern::EffortUpReversal,
        (V::Climax, S::Wide, Trend::Up) if bar.up_bar && off_low => VsaPattern::Climax,
        (V::Low, S::Narrow, Trend::Down) if bar.up_bar && bar.close == C::Low => VsaPattern::NoDemand,
        (V::High, S::Narrow, Trend::Down) if bar.down_bar && bar.close == C::Low => VsaPattern::Weakness,
        (V::High, S::Narrow, Trend::Up) if bar.down_bar && off_high => VsaPattern::EffortDownReversal,
        _ => return None,
    };
    Some(pattern)
}

// ============================================================================
// Strategy
// ============================================================================

#[derive(Debug, Clone, Default)]
struct VsaLines {
    spread: Vec<f64>,
    close_position: Vec<f64>,
    volume_ma: Vec<f64>,
    spread_ma: Vec<f64>,
    trend_ma: Vec<f64>,
}

pub struct VsaStrategy {
    params: VsaParams,
    lines: VsaLines,
    order: Option<OrderId>,
    stop_order: Option<OrderId>,
    trail_stop: f64,
    entry_price: f64,
    last_signal_bar: usize,
}

impl VsaStrategy {
    pub fn new(params: VsaParams) -> Self {
        Self {
            params,
            lines: VsaLines::default(),
            order: None,
            stop_order: None,
            trail_stop: 0.0,
            entry_price: 0.0,
            last_signal_bar: 0,
        }
    }

    fn profile(&self, ctx: &BarContext) -> BarProfile {
        let i = ctx.index;
        let (open, close) = (ctx.open(), ctx.close());
        BarProfile {
            volume: classify_volume(ctx.volume(), self.lines.volume_ma[i], &self.params),
            spread: classify_spread(self.lines.spread[i], self.lines.spread_ma[i], &self.params),
            close: classify_close(self.lines.spread[i], self.lines.close_position[i]),
            trend: trend_direction(close, self.lines.trend_ma[i]),
            up_bar: close > open,
            down_bar: close < open,
        }
    }

    /// Half a point per prior bar with heavy volume and per prior bar on the
    /// same side of its trend average as the current bar.
    fn background_score(&self, ctx: &BarContext) -> f64 {
        let i = ctx.index;
        let series = ctx.series;
        let close = ctx.close();
        let trend_now = self.lines.trend_ma[i];

        let mut score = 0.0;
        for ago in 1..=i.min(CONTEXT_BARS) {
            let j = i - ago;
            let vol_ma = self.lines.volume_ma[j];
            if !vol_ma.is_nan() && vol_ma > 0.0 && series.volume[j] / vol_ma > 1.5 {
                score += 0.5;
            }

            let trend_then = self.lines.trend_ma[j];
            if !trend_then.is_nan() {
                let both_up = series.close[j] > trend_then && close > trend_now;
                let both_down = series.close[j] < trend_then && close < trend_now;
                if both_up || both_down {
                    score += 0.5;
                }
            }
        }
        score
    }

    fn replace_stop(&mut self, orders: &mut Orders, side: Side, price: f64) {
        if let Some(id) = self.stop_order.take() {
            orders.cancel(id);
        }
        self.trail_stop = price;
        self.stop_order = Some(match side {
            Side::Sell => orders.stop_sell(price),
            Side::Buy => orders.stop_buy(price),
        });
    }

    fn manage_trailing_stop(&mut self, ctx: &BarContext, orders: &mut Orders) {
        if self.trail_stop <= 0.0 {
            return;
        }
        let price = ctx.close();
        let pct = self.params.trail_stop_pct;

        if ctx.is_long() && price > self.entry_price {
            let candidate = price * (1.0 - pct);
            if candidate > self.trail_stop {
                debug!(date = %ctx.date(), from = self.trail_stop, to = candidate, "vsa: raise long stop");
                self.replace_stop(orders, Side::Sell, candidate);
            }
        } else if ctx.is_short() && price < self.entry_price {
            let candidate = price * (1.0 + pct);
            if candidate < self.trail_stop {
                debug!(date = %ctx.date(), from = self.trail_stop, to = candidate, "vsa: lower short stop");
                self.replace_stop(orders, Side::Buy, candidate);
            }
        }
    }
}

impl Strategy for VsaStrategy {
    fn name(&self) -> &'static str {
        "vsa"
    }

    fn min_bars(&self) -> usize {
        let p = &self.params;
        p.trend_period.max(p.volume_period).max(p.spread_period) + 1
    }

    fn prepare(&mut self, series: &PriceSeries) -> Result<()> {
        let spread_line = spread(&series.high, &series.low);
        self.lines = VsaLines {
            close_position: close_position(&series.high, &series.low, &series.close),
            volume_ma: sma(&series.volume, self.params.volume_period),
            spread_ma: sma(&spread_line, self.params.spread_period),
            trend_ma: sma(&series.close, self.params.trend_period),
            spread: spread_line,
        };
        Ok(())
    }

    fn notify_order(&mut self, event: &OrderEvent, orders: &mut Orders) {
        let is_entry_order = self.order == Some(event.id);
        let is_stop_order = self.stop_order == Some(event.id);

        match event.status {
            OrderStatus::Completed => {
                if is_stop_order {
                    debug!(date = %event.date, price = event.price, "vsa: trailing stop hit");
                    self.stop_order = None;
                    self.trail_stop = 0.0;
                    self.entry_price = 0.0;
                } else if event.side == Side::Buy && event.position_after > 0.0 {
                    self.entry_price = event.price;
                    let stop = event.price * (1.0 - self.params.trail_stop_pct);
                    self.replace_stop(orders, Side::Sell, stop);
                } else if event.side == Side::Sell && event.position_after < 0.0 {
                    self.entry_price = event.price;
                    let stop = event.price * (1.0 + self.params.trail_stop_pct);
                    self.replace_stop(orders, Side::Buy, stop);
                }
            }
            OrderStatus::Cancelled | OrderStatus::Margin => {
                if is_stop_order {
                    self.stop_order = None;
                }
            }
        }

        if is_entry_order {
            self.order = None;
        }
    }

    fn next(&mut self, ctx: &BarContext, orders: &mut Orders) {
        if self.order.is_some() || ctx.bars_seen() < self.min_bars() {
            return;
        }

        self.manage_trailing_stop(ctx, orders);

        let profile = self.profile(ctx);
        let Some(pattern) = detect_pattern(&profile) else { return };
        let strength = pattern.base_strength();
        if strength < 2.0 {
            return;
        }

        let total = strength + self.background_score(ctx);
        if total < 3.0 || ctx.bars_seen() - self.last_signal_bar < SIGNAL_SPACING {
            return;
        }

        let bullish = pattern.is_bullish();
        if !ctx.is_flat() {
            if ctx.is_long() == bullish {
                return;
            }
            debug!(date = %ctx.date(), ?pattern, total, "vsa: opposite signal, closing");
            if let Some(id) = self.stop_order {
                orders.cancel(id);
            }
            self.order = Some(orders.close());
            self.last_signal_bar = ctx.bars_seen();
            self.trail_stop = 0.0;
            self.entry_price = 0.0;
            return;
        }

        if bullish && (total >= 4.0 || matches!(pattern, VsaPattern::StoppingVolume | VsaPattern::NoSupply)) {
            debug!(date = %ctx.date(), ?pattern, total, "vsa: buy");
            self.order = Some(orders.buy());
            self.last_signal_bar = ctx.bars_seen();
        } else if !bullish
            && (total >= 4.0 || matches!(pattern, VsaPattern::Climax | VsaPattern::Weakness | VsaPattern::NoDemand))
        {
            debug!(date = %ctx.date(), ?pattern, total, "vsa: sell");
            self.order = Some(orders.sell());
            self.last_signal_bar = ctx.bars_seen();
        }
    }
}
