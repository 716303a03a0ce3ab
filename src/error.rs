//! Typed errors for the backtest library.

use thiserror::Error;

/// Errors that can occur while loading data, configuring or running a backtest.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ticker file missing or the series came back empty
    #[error("no data: {0}")]
    NoData(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Fewer bars than the computation needs
    #[error("insufficient data: need {needed} bars, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
}

pub type Result<T> = std::result::Result<T, BacktestError>;

impl BacktestError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
