// src/backtest/runner.rs
// Main backtest runner - drives one strategy through one price series

use tracing::{debug, info};

use crate::backtest::broker::{Broker, BrokerConfig};
use crate::backtest::context::{BarContext, PriceSeries};
use crate::backtest::metrics::calculate_metrics;
use crate::backtest::strategy::{Strategy, StrategyConfig};
use crate::backtest::types::{BacktestResult, EquityPoint};
use crate::error::{BacktestError, Result};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Run a configured strategy over `series`, annualizing with 252 bars a year.
///
/// Bars before `trade_from` are warm-up: the strategy sees them, but every
/// order it requests there is cancelled. Metrics and the equity curve cover
/// `[trade_from, len)`.
pub fn run_backtest(
    series: &PriceSeries,
    config: &StrategyConfig,
    broker: &BrokerConfig,
    trade_from: usize,
) -> Result<BacktestResult> {
    run_backtest_annualized(series, config, broker, trade_from, TRADING_DAYS_PER_YEAR)
}

pub fn run_backtest_annualized(
    series: &PriceSeries,
    config: &StrategyConfig,
    broker: &BrokerConfig,
    trade_from: usize,
    periods_per_year: f64,
) -> Result<BacktestResult> {
    let mut strategy = config.build()?;
    run_strategy(series, strategy.as_mut(), broker, trade_from, periods_per_year)
}

/// Bar loop: execute pending orders, notify, record value, decide, submit.
pub fn run_strategy(
    series: &PriceSeries,
    strategy: &mut dyn Strategy,
    broker_config: &BrokerConfig,
    trade_from: usize,
    periods_per_year: f64,
) -> Result<BacktestResult> {
    broker_config.validate()?;
    if !(periods_per_year > 0.0) {
        return Err(BacktestError::invalid_config("periodsPerYear must be positive"));
    }
    if series.is_empty() {
        return Err(BacktestError::NoData("empty price series".to_string()));
    }
    if trade_from >= series.len() {
        return Err(BacktestError::InsufficientData { needed: trade_from + 1, available: series.len() });
    }

    strategy.prepare(series)?;

    let mut broker = Broker::new(broker_config.clone());
    let mut values = Vec::with_capacity(series.len());

    for index in 0..series.len() {
        let Some(bar) = series.bar(index) else { break };

        let events = broker.process_bar(index, &bar);
        let mut orders = broker.orders(bar.close);
        for event in &events {
            debug!(
                strategy = strategy.name(),
                date = %event.date,
                id = event.id.0,
                status = ?event.status,
                side = ?event.side,
                price = event.price,
                size = event.size,
                "order event"
            );
            strategy.notify_order(event, &mut orders);
        }

        values.push(broker.value(bar.close));

        let ctx = BarContext { index, series, account: broker.account(bar.close) };
        strategy.next(&ctx, &mut orders);
        broker.submit(orders, index, bar.date, index >= trade_from);
    }

    let measured = &values[trade_from..];
    let dates = &series.dates[trade_from..];
    let closes = &series.close[trade_from..];

    let equity_curve: Vec<EquityPoint> =
        dates.iter().zip(measured).map(|(date, value)| EquityPoint { date: *date, value: *value }).collect();

    let start_value = measured.first().copied().unwrap_or(broker_config.cash);
    let end_value = measured.last().copied().unwrap_or(start_value);
    let return_pct = if start_value > 0.0 { (end_value / start_value - 1.0) * 100.0 } else { 0.0 };

    let trades = broker.into_trades();
    let metrics = calculate_metrics(measured, closes, dates, &trades, periods_per_year);

    info!(
        strategy = strategy.name(),
        bars = measured.len(),
        trades = trades.len(),
        return_pct = format!("{return_pct:.2}"),
        "backtest complete"
    );

    Ok(BacktestResult {
        strategy: strategy.name().to_string(),
        start_value,
        end_value,
        return_pct,
        equity_curve,
        trades,
        metrics,
    })
}
