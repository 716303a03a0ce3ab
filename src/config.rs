//! Run configuration: which strategy, which broker settings and how the
//! history is cut into windows.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::backtest::broker::BrokerConfig;
use crate::backtest::rolling::WindowScheme;
use crate::backtest::runner::TRADING_DAYS_PER_YEAR;
use crate::backtest::strategy::StrategyConfig;
use crate::error::{BacktestError, Result};

/// Rolling backtest configuration, usually read from a JSON file:
///
/// ```json
/// {
///   "strategy": { "strategy": "vsa", "trailStopPct": 0.04 },
///   "broker": { "cash": 50000 },
///   "scheme": { "scheme": "calendar", "months": 6 },
///   "start": "2018-01-01"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RollingConfig {
    pub strategy: StrategyConfig,
    pub broker: BrokerConfig,
    pub scheme: WindowScheme,
    /// First day of the first window; defaults to the first bar
    pub start: Option<NaiveDate>,
    /// Exclusive end of the last window; defaults to the day after the last bar
    pub end: Option<NaiveDate>,
    /// Windows with fewer bars are skipped; defaults to the strategy's own minimum
    pub min_bars: Option<usize>,
    pub periods_per_year: f64,
    pub sharpe_window: usize,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            broker: BrokerConfig::default(),
            scheme: WindowScheme::default(),
            start: None,
            end: None,
            min_bars: None,
            periods_per_year: TRADING_DAYS_PER_YEAR,
            sharpe_window: 4,
        }
    }
}

impl RollingConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RollingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.strategy.validate()?;
        self.broker.validate()?;
        self.scheme.validate()?;

        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                return Err(BacktestError::InvalidConfig(format!("start {start} must be before end {end}")));
            }
        }
        if self.min_bars == Some(0) {
            return Err(BacktestError::invalid_config("minBars must be at least 1"));
        }
        if !(self.periods_per_year > 0.0) {
            return Err(BacktestError::invalid_config("periodsPerYear must be positive"));
        }
        if self.sharpe_window < 2 {
            return Err(BacktestError::invalid_config("sharpeWindow must be at least 2"));
        }
        Ok(())
    }

    /// Bars a window needs before it is worth running
    pub fn required_bars(&self) -> Result<usize> {
        match self.min_bars {
            Some(n) => Ok(n),
            None => self.strategy.min_bars(),
        }
    }
}
