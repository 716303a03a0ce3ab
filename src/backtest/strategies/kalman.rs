// src/backtest/strategies/kalman.rs
// Always-in-the-market strategy on the adaptive Kalman filter's velocity

use tracing::debug;

use crate::backtest::broker::Orders;
use crate::backtest::context::{BarContext, PriceSeries};
use crate::backtest::strategy::Strategy;
use crate::error::Result;
use crate::filters::{adaptive_kalman, KalmanLines, KalmanParams};

pub struct KalmanStrategy {
    params: KalmanParams,
    lines: KalmanLines,
}

impl KalmanStrategy {
    pub fn new(params: KalmanParams) -> Self {
        Self { params, lines: KalmanLines::default() }
    }

    pub fn lines(&self) -> &KalmanLines {
        &self.lines
    }
}

impl Strategy for KalmanStrategy {
    fn name(&self) -> &'static str {
        "kalman"
    }

    fn min_bars(&self) -> usize {
        // initialization bar plus the first filtered bar
        self.params.vol_period + 2
    }

    fn prepare(&mut self, series: &PriceSeries) -> Result<()> {
        self.lines = adaptive_kalman(&series.close, self.params);
        Ok(())
    }

    fn next(&mut self, ctx: &BarContext, orders: &mut Orders) {
        let velocity = self.lines.velocity[ctx.index];
        if velocity.is_nan() {
            return;
        }

        if ctx.is_flat() {
            if velocity > 0.0 {
                debug!(date = %ctx.date(), velocity, "kalman: buy");
                orders.buy();
            } else if velocity < 0.0 {
                debug!(date = %ctx.date(), velocity, "kalman: sell short");
                orders.sell();
            }
        } else if (ctx.is_long() && velocity < 0.0) || (ctx.is_short() && velocity > 0.0) {
            debug!(date = %ctx.date(), velocity, position = ctx.position(), "kalman: reverse");
            orders.reverse();
        }
    }
}
