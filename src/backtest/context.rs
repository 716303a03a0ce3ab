// src/backtest/context.rs
// Price series and the per-bar view handed to strategies

use chrono::NaiveDate;
use serde::Serialize;

use crate::backtest::types::Bar;

// ============================================================================
// Price Series
// ============================================================================

/// Date-ordered OHLCV columns for one instrument
#[derive(Debug, Clone, Default, Serialize)]
pub struct PriceSeries {
    pub dates: Vec<NaiveDate>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl PriceSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bar: Bar) {
        self.dates.push(bar.date);
        self.open.push(bar.open);
        self.high.push(bar.high);
        self.low.push(bar.low);
        self.close.push(bar.close);
        self.volume.push(bar.volume);
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn bar(&self, index: usize) -> Option<Bar> {
        Some(Bar {
            date: *self.dates.get(index)?,
            open: self.open[index],
            high: self.high[index],
            low: self.low[index],
            close: self.close[index],
            volume: self.volume[index],
        })
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Copy of the bars in `[from, to)` by index
    pub fn slice(&self, from: usize, to: usize) -> PriceSeries {
        let to = to.min(self.len());
        let from = from.min(to);
        PriceSeries {
            dates: self.dates[from..to].to_vec(),
            open: self.open[from..to].to_vec(),
            high: self.high[from..to].to_vec(),
            low: self.low[from..to].to_vec(),
            close: self.close[from..to].to_vec(),
            volume: self.volume[from..to].to_vec(),
        }
    }

    /// Index range of bars dated in `[start, end)`
    pub fn date_range(&self, start: NaiveDate, end: NaiveDate) -> (usize, usize) {
        let from = self.dates.partition_point(|d| *d < start);
        let to = self.dates.partition_point(|d| *d < end);
        (from, to.max(from))
    }

    /// Copy of the bars dated in `[start, end)`
    pub fn slice_dates(&self, start: NaiveDate, end: NaiveDate) -> PriceSeries {
        let (from, to) = self.date_range(start, end);
        self.slice(from, to)
    }
}

// ============================================================================
// Bar Context
// ============================================================================

/// Account state as seen by the strategy at the close of a bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountView {
    pub cash: f64,
    pub value: f64,
    /// Signed position size
    pub position: f64,
    /// Average entry price of the open position
    pub entry_price: f64,
    pub pending_orders: usize,
}

/// Everything a strategy sees when deciding on bar `index`
#[derive(Debug, Clone, Copy)]
pub struct BarContext<'a> {
    pub index: usize,
    pub series: &'a PriceSeries,
    pub account: AccountView,
}

impl<'a> BarContext<'a> {
    pub fn date(&self) -> NaiveDate {
        self.series.dates[self.index]
    }

    pub fn open(&self) -> f64 {
        self.series.open[self.index]
    }

    pub fn high(&self) -> f64 {
        self.series.high[self.index]
    }

    pub fn low(&self) -> f64 {
        self.series.low[self.index]
    }

    pub fn close(&self) -> f64 {
        self.series.close[self.index]
    }

    pub fn volume(&self) -> f64 {
        self.series.volume[self.index]
    }

    /// Close `ago` bars back, if there is one
    pub fn close_ago(&self, ago: usize) -> Option<f64> {
        self.index.checked_sub(ago).map(|i| self.series.close[i])
    }

    /// Number of bars seen so far, the current one included
    pub fn bars_seen(&self) -> usize {
        self.index + 1
    }

    pub fn position(&self) -> f64 {
        self.account.position
    }

    pub fn is_flat(&self) -> bool {
        self.account.position == 0.0
    }

    pub fn is_long(&self) -> bool {
        self.account.position > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.account.position < 0.0
    }

    pub fn has_pending_orders(&self) -> bool {
        self.account.pending_orders > 0
    }
}
