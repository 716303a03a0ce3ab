// src/backtest/mod.rs
// Event-driven backtest engine and rolling-window driver

pub mod types;
pub mod context;
pub mod data;
pub mod broker;
pub mod strategy;
pub mod strategies;
pub mod metrics;
pub mod runner;
pub mod rolling;

// Re-export main types and functions
pub use types::*;
pub use context::*;
pub use broker::{Broker, BrokerConfig, Orders};
pub use strategy::{Strategy, StrategyConfig};
pub use runner::{run_backtest, run_backtest_annualized};
pub use rolling::{generate_windows, report_stats, run_rolling_backtest, RollingReport, RollingStats, WindowScheme};
