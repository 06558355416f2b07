//! CSV candle source for replay.

use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use gridbot_core::error::DataError;
use gridbot_core::types::Candle;
use serde::Deserialize;
use std::path::Path;

/// CSV record format.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(alias = "Date", alias = "date", alias = "timestamp", alias = "Timestamp")]
    date: String,
    #[serde(alias = "Open", alias = "open")]
    open: f64,
    #[serde(alias = "High", alias = "high")]
    high: f64,
    #[serde(alias = "Low", alias = "low")]
    low: f64,
    #[serde(alias = "Close", alias = "close")]
    close: f64,
    #[serde(alias = "Volume", alias = "volume", default)]
    volume: f64,
}

/// Loads candle history from a CSV file, for feeding the simulator.
pub struct CsvCandleSource {
    path: String,
}

impl CsvCandleSource {
    pub fn new(path: &str) -> Result<Self, DataError> {
        if !Path::new(path).exists() {
            return Err(DataError::NoDataAvailable);
        }
        Ok(Self {
            path: path.to_string(),
        })
    }

    /// Load all candles, sorted by open time.
    pub fn load_all(&self) -> Result<Vec<Candle>, DataError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| DataError::ParseError(e.to_string()))?;

        let mut candles = Vec::new();
        for result in reader.deserialize() {
            let record: CsvRecord = result.map_err(|e| DataError::ParseError(e.to_string()))?;
            let open_time = parse_timestamp(&record.date)?;
            candles.push(Candle::new(
                open_time,
                record.open,
                record.high,
                record.low,
                record.close,
                record.volume,
            ));
        }

        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }
}

/// Parse the timestamp column: date, datetime or unix seconds/millis.
fn parse_timestamp(date_str: &str) -> Result<i64, DataError> {
    let formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d", "%Y/%m/%d"];

    for format in formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(date_str, format) {
            return Ok(dt.and_utc().timestamp_millis());
        }
        if let Ok(d) = NaiveDate::parse_from_str(date_str, format) {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return Ok(dt.and_utc().timestamp_millis());
            }
        }
    }

    if let Ok(ts) = date_str.parse::<i64>() {
        // Assume milliseconds if more than 10 digits.
        if ts > 10_000_000_000 {
            return Ok(ts);
        }
        return Ok(ts * 1000);
    }

    Err(DataError::ParseError(format!(
        "could not parse date: {}",
        date_str
    )))
}
