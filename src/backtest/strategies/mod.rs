// src/backtest/strategies/mod.rs
// Strategy implementations

pub mod butterworth;
pub mod jump_diffusion;
pub mod kalman;
pub mod ou_reversion;
pub mod polynomial_channel;
pub mod vsa;
pub mod vwap_breakout;

pub use butterworth::{ButterworthCrossover, ButterworthParams};
pub use jump_diffusion::{JumpDiffusionMomentum, JumpDiffusionParams};
pub use kalman::KalmanStrategy;
pub use ou_reversion::{OuReversion, OuReversionParams};
pub use polynomial_channel::{PolynomialChannelBreakout, PolynomialChannelParams};
pub use vsa::{VsaParams, VsaPattern, VsaStrategy};
pub use vwap_breakout::{VwapBreakout, VwapBreakoutParams};

/// Which way the strategy is positioned, as it last learned from fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Flat,
    Long,
    Short,
}

impl Direction {
    pub fn from_position(position: f64) -> Self {
        if position > 0.0 {
            Direction::Long
        } else if position < 0.0 {
            Direction::Short
        } else {
            Direction::Flat
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDate;

    use crate::backtest::broker::BrokerConfig;
    use crate::backtest::context::PriceSeries;
    use crate::backtest::runner::run_backtest;
    use crate::backtest::strategy::StrategyConfig;
    use crate::backtest::types::{Bar, BacktestResult};

    pub fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(i as i64)
    }

    /// Bars opening at the previous close with a 1% range around the close
    pub fn series_from_closes(closes: &[f64]) -> PriceSeries {
        let mut s = PriceSeries::new();
        for (i, c) in closes.iter().enumerate() {
            let open = if i == 0 { *c } else { closes[i - 1] };
            s.push(Bar {
                date: day(i),
                open,
                high: c.max(open) * 1.005,
                low: c.min(open) * 0.995,
                close: *c,
                volume: 1_000.0,
            });
        }
        s
    }

    /// Slow sine wave around 100 with a linear drift
    pub fn wave(n: usize, period: f64, amplitude: f64, drift: f64) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + drift * i as f64 + amplitude * (2.0 * std::f64::consts::PI * i as f64 / period).sin())
            .collect()
    }

    pub fn run(config: StrategyConfig, series: &PriceSeries) -> BacktestResult {
        run_backtest(series, &config, &BrokerConfig::default(), 0).unwrap()
    }
}
