// src/backtest/broker.rs
// Single-instrument order execution simulator
//
// Orders requested on bar t execute from bar t+1 on. Market orders fill at
// the open, stops fill at the open when the bar gaps through the stop and at
// the stop price when the range touches it. Events are handed back to the
// runner, which delivers them to the strategy before its next decision.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backtest::context::AccountView;
use crate::backtest::types::{Bar, OrderEvent, OrderId, OrderKind, OrderStatus, Side, Trade};
use crate::error::{BacktestError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Account settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Starting cash
    pub cash: f64,
    /// Commission as a fraction of traded value
    pub commission: f64,
    /// Fraction of cash committed by an opening order
    pub percent_size: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { cash: 100_000.0, commission: 0.001, percent_size: 0.95 }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.cash > 0.0 && self.cash.is_finite()) {
            return Err(BacktestError::invalid_config("cash must be positive"));
        }
        if !(0.0..1.0).contains(&self.commission) {
            return Err(BacktestError::invalid_config("commission must be in [0, 1)"));
        }
        if !(self.percent_size > 0.0 && self.percent_size <= 1.0) {
            return Err(BacktestError::invalid_config("percentSize must be in (0, 1]"));
        }
        Ok(())
    }
}

// ============================================================================
// Order requests
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum OrderRequest {
    Submit { id: OrderId, side: Side, kind: OrderKind, size: f64 },
    Cancel(OrderId),
}

/// Order pad handed to a strategy for one bar.
///
/// Sizes are fixed when the order is requested: flat, an order commits
/// `percent_size` of cash at the current close; in a position, it is the
/// size of that position.
#[derive(Debug)]
pub struct Orders {
    next_id: u64,
    requests: Vec<OrderRequest>,
    cash: f64,
    close: f64,
    position: f64,
    percent_size: f64,
}

impl Orders {
    pub fn new(first_id: u64, cash: f64, close: f64, position: f64, percent_size: f64) -> Self {
        Self { next_id: first_id, requests: Vec::new(), cash, close, position, percent_size }
    }

    /// Size the percent sizer would give a new order right now
    pub fn default_size(&self) -> f64 {
        if self.position != 0.0 {
            self.position.abs()
        } else if self.close > 0.0 && self.close.is_finite() {
            self.cash * self.percent_size / self.close
        } else {
            0.0
        }
    }

    fn submit(&mut self, side: Side, kind: OrderKind, size: f64) -> OrderId {
        let id = OrderId(self.next_id);
        self.next_id += 1;
        self.requests.push(OrderRequest::Submit { id, side, kind, size });
        id
    }

    pub fn buy(&mut self) -> OrderId {
        let size = self.default_size();
        self.submit(Side::Buy, OrderKind::Market, size)
    }

    pub fn sell(&mut self) -> OrderId {
        let size = self.default_size();
        self.submit(Side::Sell, OrderKind::Market, size)
    }

    /// Close whatever position exists when the order executes
    pub fn close(&mut self) -> OrderId {
        let side = if self.position > 0.0 { Side::Sell } else { Side::Buy };
        self.submit(side, OrderKind::Close, 0.0)
    }

    /// Protective stop that buys back a short
    pub fn stop_buy(&mut self, price: f64) -> OrderId {
        let size = self.default_size();
        self.submit(Side::Buy, OrderKind::Stop { price }, size)
    }

    /// Protective stop that sells out a long
    pub fn stop_sell(&mut self, price: f64) -> OrderId {
        let size = self.default_size();
        self.submit(Side::Sell, OrderKind::Stop { price }, size)
    }

    /// Close the position and open the opposite one. None when flat.
    pub fn reverse(&mut self) -> Option<(OrderId, OrderId)> {
        if self.position == 0.0 {
            return None;
        }
        let side = if self.position > 0.0 { Side::Sell } else { Side::Buy };
        let close = self.close();
        let size = self.default_size();
        let open = self.submit(side, OrderKind::Market, size);
        Some((close, open))
    }

    pub fn cancel(&mut self, id: OrderId) {
        self.requests.push(OrderRequest::Cancel(id));
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> &[OrderRequest] {
        &self.requests
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }
}

// ============================================================================
// Broker
// ============================================================================

#[derive(Debug, Clone)]
struct PendingOrder {
    id: OrderId,
    side: Side,
    kind: OrderKind,
    size: f64,
}

/// Running state of the open round trip
#[derive(Debug, Clone)]
struct OpenTrade {
    side: Side,
    entry_date: NaiveDate,
    entry_index: usize,
    peak_size: f64,
    pnl: f64,
    commission: f64,
}

#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    cash: f64,
    position: f64,
    entry_price: f64,
    next_id: u64,
    pending: Vec<PendingOrder>,
    deferred: Vec<OrderEvent>,
    open_trade: Option<OpenTrade>,
    trades: Vec<Trade>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            cash: config.cash,
            config,
            position: 0.0,
            entry_price: 0.0,
            next_id: 1,
            pending: Vec::new(),
            deferred: Vec::new(),
            open_trade: None,
            trades: Vec::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn value(&self, close: f64) -> f64 {
        if self.position == 0.0 {
            self.cash
        } else {
            self.cash + self.position * close
        }
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn into_trades(self) -> Vec<Trade> {
        self.trades
    }

    pub fn account(&self, close: f64) -> AccountView {
        AccountView {
            cash: self.cash,
            value: self.value(close),
            position: self.position,
            entry_price: self.entry_price,
            pending_orders: self.pending.len(),
        }
    }

    /// Fresh order pad for the bar closing at `close`
    pub fn orders(&self, close: f64) -> Orders {
        Orders::new(self.next_id, self.cash, close, self.position, self.config.percent_size)
    }

    /// Queue a strategy's requests. With `accept == false` every new order
    /// is cancelled and reported on the next bar.
    pub fn submit(&mut self, orders: Orders, index: usize, date: NaiveDate, accept: bool) {
        self.next_id = self.next_id.max(orders.next_id);
        for request in orders.requests {
            match request {
                OrderRequest::Submit { id, side, kind, size } => {
                    if accept {
                        self.pending.push(PendingOrder { id, side, kind, size });
                    } else {
                        self.deferred.push(self.event(id, side, kind, OrderStatus::Cancelled, index, date));
                    }
                }
                OrderRequest::Cancel(id) => {
                    if let Some(pos) = self.pending.iter().position(|o| o.id == id) {
                        let order = self.pending.remove(pos);
                        self.deferred
                            .push(self.event(order.id, order.side, order.kind, OrderStatus::Cancelled, index, date));
                    }
                }
            }
        }
    }

    fn event(&self, id: OrderId, side: Side, kind: OrderKind, status: OrderStatus, index: usize, date: NaiveDate) -> OrderEvent {
        OrderEvent {
            id,
            side,
            kind,
            status,
            index,
            date,
            price: 0.0,
            size: 0.0,
            commission: 0.0,
            position_after: self.position,
        }
    }

    /// Execute pending orders against `bar`. Returns deferred notifications
    /// followed by this bar's executions, in order.
    pub fn process_bar(&mut self, index: usize, bar: &Bar) -> Vec<OrderEvent> {
        let mut events = std::mem::take(&mut self.deferred);
        let pending = std::mem::take(&mut self.pending);

        for order in pending {
            match self.try_execute(&order, index, bar) {
                Some(event) => events.push(event),
                None => self.pending.push(order),
            }
        }

        events
    }

    /// None keeps the order pending
    fn try_execute(&mut self, order: &PendingOrder, index: usize, bar: &Bar) -> Option<OrderEvent> {
        let cancelled = |b: &Self| Some(b.event(order.id, order.side, order.kind, OrderStatus::Cancelled, index, bar.date));

        match order.kind {
            OrderKind::Market => {
                if !(bar.open > 0.0) || order.size <= 0.0 {
                    return cancelled(self);
                }
                Some(self.fill(order.id, order.side, order.kind, order.size, bar.open, index, bar.date))
            }
            OrderKind::Close => {
                if self.position == 0.0 || !(bar.open > 0.0) {
                    return cancelled(self);
                }
                let side = if self.position > 0.0 { Side::Sell } else { Side::Buy };
                Some(self.fill(order.id, side, order.kind, self.position.abs(), bar.open, index, bar.date))
            }
            OrderKind::Stop { price } => {
                let reduces = match order.side {
                    Side::Sell => self.position > 0.0,
                    Side::Buy => self.position < 0.0,
                };
                if !reduces {
                    return cancelled(self);
                }

                let fill_price = match order.side {
                    Side::Sell if bar.open <= price => bar.open,
                    Side::Sell if bar.low <= price => price,
                    Side::Buy if bar.open >= price => bar.open,
                    Side::Buy if bar.high >= price => price,
                    _ => return None,
                };
                let size = order.size.min(self.position.abs());
                Some(self.fill(order.id, order.side, order.kind, size, fill_price, index, bar.date))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fill(&mut self, id: OrderId, side: Side, kind: OrderKind, size: f64, price: f64, index: usize, date: NaiveDate) -> OrderEvent {
        let traded_value = size * price;
        let commission = traded_value * self.config.commission;

        let opens_long = side == Side::Buy && self.position >= 0.0;
        if opens_long && traded_value + commission > self.cash {
            debug!(id = id.0, cost = traded_value + commission, cash = self.cash, "order rejected: margin");
            return self.event(id, side, kind, OrderStatus::Margin, index, date);
        }

        match side {
            Side::Buy => self.cash -= traded_value + commission,
            Side::Sell => self.cash += traded_value - commission,
        }
        self.apply_fill(side, size, price, commission, index, date);

        OrderEvent {
            id,
            side,
            kind,
            status: OrderStatus::Completed,
            index,
            date,
            price,
            size,
            commission,
            position_after: self.position,
        }
    }

    /// Update position, average price and round-trip bookkeeping.
    fn apply_fill(&mut self, side: Side, size: f64, price: f64, commission: f64, index: usize, date: NaiveDate) {
        let signed = side.sign() * size;
        let same_direction = self.position == 0.0 || self.position.signum() == signed.signum();

        if same_direction {
            let held = self.position.abs();
            self.entry_price = (held * self.entry_price + size * price) / (held + size);
            self.position += signed;
            let trade = self.open_trade.get_or_insert(OpenTrade {
                side,
                entry_date: date,
                entry_index: index,
                peak_size: 0.0,
                pnl: 0.0,
                commission: 0.0,
            });
            trade.peak_size = trade.peak_size.max(self.position.abs());
            trade.commission += commission;
            return;
        }

        let held = self.position.abs();
        let closing = size.min(held);
        let direction = self.position.signum();
        let closing_commission = commission * closing / size;

        if let Some(trade) = self.open_trade.as_mut() {
            trade.pnl += (price - self.entry_price) * closing * direction;
            trade.commission += closing_commission;
        }

        if closing < held {
            self.position += signed;
            return;
        }

        self.position = 0.0;
        if let Some(trade) = self.open_trade.take() {
            self.trades.push(Trade {
                side: trade.side,
                entry_date: trade.entry_date,
                exit_date: date,
                entry_price: self.entry_price,
                exit_price: price,
                size: trade.peak_size,
                pnl: trade.pnl,
                pnl_net: trade.pnl - trade.commission,
                bars_held: index - trade.entry_index,
            });
        }

        let remainder = size - closing;
        if remainder > 0.0 {
            self.entry_price = 0.0;
            self.apply_fill(side, remainder, price, commission - closing_commission, index, date);
        } else {
            self.entry_price = 0.0;
        }
    }
}
