//! # Rolling Backtest
//!
//! Event-driven backtests of indicator strategies, re-run over successive
//! time windows.
//!
//! ## Features
//! - Vectorized indicators (moving averages, ATR, ADX, VWAP, Butterworth and
//!   adaptive Kalman filters, polynomial channels, jump detection)
//! - A single-instrument broker with next-open market orders, stops and
//!   percent sizing
//! - Seven strategies: VSA, polynomial channel breakout, adaptive Kalman,
//!   anchored VWAP breakout, Butterworth crossover, OU mean reversion and
//!   jump-diffusion momentum
//! - Calendar and walk-forward rolling windows with summary statistics and
//!   chart series
//! - A checker for the markdown link index of strategy write-ups
//!
//! ## Example
//! ```
//! use rolling_backtest::sma;
//!
//! let prices = vec![44.0, 44.5, 45.0, 44.5, 45.5, 46.0, 45.5, 46.5];
//! let sma_values = sma(&prices, 3);
//! assert!(sma_values[1].is_nan());
//! assert!((sma_values[2] - 44.5).abs() < 1e-12);
//! ```

pub mod common;
pub mod moving_averages;
pub mod momentum;
pub mod volatility;
pub mod volume;
pub mod filters;
pub mod regression;
pub mod jumps;
pub mod error;
pub mod config;
pub mod catalog;
pub mod backtest;

// Re-export commonly used functions at crate root
pub use moving_averages::{sma, sma_from_first_valid, ema, wilders_ma};
pub use momentum::{adx, crossover};
pub use volatility::{true_range, atr, std_dev, pct_change, log_returns};
pub use volume::{rolling_vwap, spread, close_position};
pub use filters::{adaptive_kalman, butter_lowpass, lfilter_zi, ButterworthFilter, KalmanParams};
pub use regression::{estimate_ou, linregress, polynomial_channel};
pub use jumps::{jump_diffusion, momentum_after_jump, trend_volatility_filter};

pub use error::{BacktestError, Result};
pub use config::RollingConfig;
pub use catalog::{parse_catalog, Catalog, CatalogEntry, CatalogIssue};
pub use backtest::{run_backtest, run_rolling_backtest, BrokerConfig, PriceSeries, RollingReport, StrategyConfig, WindowScheme};
