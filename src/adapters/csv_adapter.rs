//! CSV file market data adapter.
//!
//! One file per ticker, `<dir>/<TICKER>.csv`, with the header
//! `timestamp,open,high,low,close,volume`. Rows are returned in file order;
//! ordering problems are reported by the universe loader, not repaired here.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::domain::error::TradesimError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::DataPort;

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, ticker: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", ticker))
    }
}

/// Accepts `YYYY-MM-DD HH:MM[:SS]` or a bare date (midnight).
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        ticker: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<OhlcvBar>, TradesimError> {
        let data_err = |reason: String| TradesimError::Data {
            ticker: ticker.to_string(),
            reason,
        };

        let path = self.csv_path(ticker);
        let content = fs::read_to_string(&path)
            .map_err(|e| data_err(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (line, result) in rdr.deserialize::<CsvRow>().enumerate() {
            let row = result.map_err(|e| data_err(format!("CSV parse error: {}", e)))?;
            let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| {
                data_err(format!(
                    "invalid timestamp '{}' on row {}",
                    row.timestamp,
                    line + 1
                ))
            })?;

            if timestamp < start || timestamp > end {
                continue;
            }

            bars.push(OhlcvBar {
                ticker: ticker.to_string(),
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        Ok(bars)
    }

    fn list_tickers(&self) -> Result<Vec<String>, TradesimError> {
        let entries = fs::read_dir(&self.base_path)?;
        let mut tickers = Vec::new();

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tickers.push(stem.to_string());
            }
        }

        tickers.sort();
        Ok(tickers)
    }
}
