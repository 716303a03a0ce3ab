// src/backtest/data.rs
// Market data loading from local CSV and Parquet files

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayRef, Date32Array, Float64Array, Int64Array, PrimitiveArray, StringArray};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType,
};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{debug, info};

use crate::backtest::context::PriceSeries;
use crate::backtest::types::Bar;
use crate::error::{BacktestError, Result};

/// Parse `YYYY-MM-DD`, ignoring any time-of-day suffix
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn parse_number(raw: &str) -> f64 {
    raw.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Sort by date, keep the first row per date and drop rows without a finite close.
fn finish_series(rows: Vec<Bar>, source: &Path) -> Result<PriceSeries> {
    let total = rows.len();
    let mut by_date: BTreeMap<NaiveDate, Bar> = BTreeMap::new();
    for bar in rows {
        if bar.close.is_finite() {
            by_date.entry(bar.date).or_insert(bar);
        }
    }

    if by_date.is_empty() {
        return Err(BacktestError::NoData(format!("{} has no usable rows", source.display())));
    }

    let mut series = PriceSeries::new();
    for bar in by_date.into_values() {
        series.push(bar);
    }

    debug!(
        path = %source.display(),
        rows = total,
        kept = series.len(),
        "loaded price series"
    );
    Ok(series)
}

// ============================================================================
// CSV
// ============================================================================

/// Load a yfinance-style CSV: `Date,Open,High,Low,Close[,Adj Close],Volume`.
///
/// Header names are matched case-insensitively. A missing Volume column is
/// read as zero volume.
pub fn load_csv(path: &Path) -> Result<PriceSeries> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    let column = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
    let require = |name: &str| {
        column(name).ok_or_else(|| {
            BacktestError::NoData(format!("{}: missing column {name}", path.display()))
        })
    };

    let date_idx = column("date").or_else(|| column("datetime")).ok_or_else(|| {
        BacktestError::NoData(format!("{}: missing column Date", path.display()))
    })?;
    let open_idx = require("open")?;
    let high_idx = require("high")?;
    let low_idx = require("low")?;
    let close_idx = require("close")?;
    let volume_idx = column("volume");

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let raw_date = field(date_idx);
        let date = parse_date(raw_date).ok_or_else(|| {
            BacktestError::NoData(format!(
                "{}: unparseable date {raw_date:?} on row {}",
                path.display(),
                line + 2
            ))
        })?;

        rows.push(Bar {
            date,
            open: parse_number(field(open_idx)),
            high: parse_number(field(high_idx)),
            low: parse_number(field(low_idx)),
            close: parse_number(field(close_idx)),
            volume: volume_idx.map(|i| parse_number(field(i))).filter(|v| v.is_finite()).unwrap_or(0.0),
        });
    }

    finish_series(rows, path)
}

// ============================================================================
// Parquet
// ============================================================================

fn named_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    let idx = batch.schema().index_of(name)?;
    Ok(batch.column(idx))
}

fn float_column(col: &ArrayRef) -> Option<Vec<f64>> {
    match col.data_type() {
        DataType::Float64 => {
            let arr = col.as_any().downcast_ref::<Float64Array>()?;
            Some((0..arr.len()).map(|i| if arr.is_null(i) { f64::NAN } else { arr.value(i) }).collect())
        }
        DataType::Int64 => {
            let arr = col.as_any().downcast_ref::<Int64Array>()?;
            Some((0..arr.len()).map(|i| if arr.is_null(i) { f64::NAN } else { arr.value(i) as f64 }).collect())
        }
        _ => None,
    }
}

fn timestamps<T: ArrowPrimitiveType<Native = i64>>(col: &ArrayRef) -> Option<Vec<Option<i64>>> {
    let arr = col.as_any().downcast_ref::<PrimitiveArray<T>>()?;
    Some((0..arr.len()).map(|i| if arr.is_null(i) { None } else { Some(arr.value(i)) }).collect())
}

fn date_column(col: &ArrayRef) -> Option<Vec<Option<NaiveDate>>> {
    match col.data_type() {
        DataType::Timestamp(unit, _) => {
            let (raw, per_second): (Vec<Option<i64>>, i64) = match unit {
                TimeUnit::Second => (timestamps::<TimestampSecondType>(col)?, 1),
                TimeUnit::Millisecond => (timestamps::<TimestampMillisecondType>(col)?, 1_000),
                TimeUnit::Microsecond => (timestamps::<TimestampMicrosecondType>(col)?, 1_000_000),
                TimeUnit::Nanosecond => (timestamps::<TimestampNanosecondType>(col)?, 1_000_000_000),
            };
            Some(
                raw.into_iter()
                    .map(|v| {
                        let secs = v?.div_euclid(per_second);
                        chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
                    })
                    .collect(),
            )
        }
        DataType::Date32 => {
            let arr = col.as_any().downcast_ref::<Date32Array>()?;
            Some((0..arr.len()).map(|i| if arr.is_null(i) { None } else { arr.value_as_date(i) }).collect())
        }
        DataType::Utf8 => {
            let arr = col.as_any().downcast_ref::<StringArray>()?;
            Some((0..arr.len()).map(|i| if arr.is_null(i) { None } else { parse_date(arr.value(i)) }).collect())
        }
        _ => None,
    }
}

/// Load OHLCV bars from a Parquet file.
///
/// Columns are looked up by name (`Date`, `Open`, `High`, `Low`, `Close`,
/// `Volume`). `Date` may be a timestamp of any unit, a date or a string.
pub fn load_parquet(path: &Path) -> Result<PriceSeries> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let unsupported = |name: &str| BacktestError::NoData(format!("{}: unsupported {name} column", path.display()));

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;

        let dates = date_column(named_column(&batch, "Date")?).ok_or_else(|| unsupported("Date"))?;
        let opens = float_column(named_column(&batch, "Open")?).ok_or_else(|| unsupported("Open"))?;
        let highs = float_column(named_column(&batch, "High")?).ok_or_else(|| unsupported("High"))?;
        let lows = float_column(named_column(&batch, "Low")?).ok_or_else(|| unsupported("Low"))?;
        let closes = float_column(named_column(&batch, "Close")?).ok_or_else(|| unsupported("Close"))?;
        let volumes = match named_column(&batch, "Volume") {
            Ok(col) => float_column(col).ok_or_else(|| unsupported("Volume"))?,
            Err(_) => vec![0.0; batch.num_rows()],
        };

        for i in 0..batch.num_rows() {
            let Some(date) = dates[i] else { continue };
            rows.push(Bar {
                date,
                open: opens[i],
                high: highs[i],
                low: lows[i],
                close: closes[i],
                volume: if volumes[i].is_finite() { volumes[i] } else { 0.0 },
            });
        }
    }

    finish_series(rows, path)
}

// ============================================================================
// Data directory
// ============================================================================

/// A ticker names a file directly inside the data directory: no path
/// separators, no `..` and no leading dot.
pub fn validate_ticker(ticker: &str) -> Result<()> {
    let bad = ticker.is_empty()
        || ticker.starts_with('.')
        || ticker.contains("..")
        || ticker.contains(['/', '\\', '\0']);
    if bad {
        return Err(BacktestError::InvalidConfig(format!("invalid ticker {ticker:?}")));
    }
    Ok(())
}

/// `{ticker}.parquet` if present, else `{ticker}.csv`
pub fn ticker_path(dir: &Path, ticker: &str) -> Result<Option<PathBuf>> {
    validate_ticker(ticker)?;
    Ok(["parquet", "csv"]
        .iter()
        .map(|ext| dir.join(format!("{ticker}.{ext}")))
        .find(|p| p.exists()))
}

/// Load a ticker from the data directory
pub fn load_ticker(dir: &Path, ticker: &str) -> Result<PriceSeries> {
    let path = ticker_path(dir, ticker)?
        .ok_or_else(|| BacktestError::NoData(format!("no data file for ticker {ticker} in {}", dir.display())))?;

    let series = match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => load_parquet(&path)?,
        _ => load_csv(&path)?,
    };
    info!(ticker, bars = series.len(), "loaded ticker");
    Ok(series)
}

/// Tickers with a `.parquet` or `.csv` file in `dir`, sorted and deduplicated
pub fn list_tickers(dir: &Path) -> Result<Vec<String>> {
    let mut tickers = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_data = matches!(path.extension().and_then(|e| e.to_str()), Some("parquet") | Some("csv"));
        if !is_data {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            tickers.push(stem.to_string());
        }
    }
    tickers.sort();
    tickers.dedup();
    Ok(tickers)
}
