// src/backtest/types.rs
// Core types shared by the broker, strategies, runner and rolling driver

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Bars
// ============================================================================

/// One OHLCV bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ============================================================================
// Orders
// ============================================================================

/// Identifier assigned when an order is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// How an order executes
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum OrderKind {
    /// Fills at the next bar's open
    Market,
    /// Fills once a later bar trades through `price`
    Stop { price: f64 },
    /// Market order for the whole position at execution time
    Close,
}

/// Final state of an order, reported once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Completed,
    Cancelled,
    /// Not enough cash to open or enlarge a long
    Margin,
}

/// Execution report delivered to the strategy before its `next`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub id: OrderId,
    pub side: Side,
    pub kind: OrderKind,
    pub status: OrderStatus,
    /// Bar index the event happened on
    pub index: usize,
    pub date: NaiveDate,
    /// Executed price (0 unless completed)
    pub price: f64,
    /// Executed size, always positive
    pub size: f64,
    pub commission: f64,
    /// Signed position after the event
    pub position_after: f64,
}

impl OrderEvent {
    pub fn is_completed(&self) -> bool {
        self.status == OrderStatus::Completed
    }
}

/// A completed round trip
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub side: Side,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl: f64,
    /// PnL after entry and exit commissions
    pub pnl_net: f64,
    pub bars_held: usize,
}

// ============================================================================
// Results
// ============================================================================

/// A point on the equity curve
#[derive(Debug, Clone, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Backtest performance metrics
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BacktestMetrics {
    pub start_date: String,
    pub end_date: String,
    pub bars: usize,
    pub years: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub calmar: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub beta: f64,
    pub win_rate: f64,
    pub best_bar: f64,
    pub worst_bar: f64,
    pub trade_count: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub trade_win_rate: f64,
    pub avg_trade_pnl: f64,
    pub buy_hold_return: f64,
}

/// Result of a single backtest run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub strategy: String,
    pub start_value: f64,
    pub end_value: f64,
    pub return_pct: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub metrics: BacktestMetrics,
}
