//! Ticker universe: parse the configured list, load each series and drop
//! the ones that cannot be backtested.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use crate::domain::error::DataGap;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::DataPort;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in ticker list")]
    EmptyToken,

    #[error("duplicate ticker: {0}")]
    DuplicateTicker(String),
}

pub fn parse_tickers(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut tickers = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let ticker = trimmed.to_uppercase();
        if !seen.insert(ticker.clone()) {
            return Err(UniverseError::DuplicateTicker(ticker));
        }
        tickers.push(ticker);
    }

    Ok(tickers)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedTicker {
    pub ticker: String,
    pub reason: String,
}

/// Usable series keyed by ticker, plus the tickers that were dropped.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    pub series: BTreeMap<String, Vec<OhlcvBar>>,
    pub excluded: Vec<ExcludedTicker>,
}

impl Universe {
    /// Validate already-loaded series.
    pub fn from_series(series: impl IntoIterator<Item = (String, Vec<OhlcvBar>)>) -> Self {
        let mut universe = Universe::default();
        for (ticker, bars) in series {
            universe.admit(ticker, Ok(bars));
        }
        universe
    }

    pub fn tickers(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }

    pub fn requested(&self) -> usize {
        self.series.len() + self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    fn admit(&mut self, ticker: String, bars: Result<Vec<OhlcvBar>, DataGap>) {
        match bars.and_then(|b| check_series(&b).map(|()| b)) {
            Ok(bars) => {
                info!(ticker = %ticker, bars = bars.len(), "Series loaded");
                self.series.insert(ticker, bars);
            }
            Err(gap) => {
                warn!(ticker = %ticker, reason = %gap, "Excluding ticker");
                self.excluded.push(ExcludedTicker {
                    ticker,
                    reason: gap.to_string(),
                });
            }
        }
    }
}

/// A series is usable when it is non-empty, strictly increasing in time and
/// every bar carries positive finite prices.
pub fn check_series(bars: &[OhlcvBar]) -> Result<(), DataGap> {
    if bars.is_empty() {
        return Err(DataGap::Empty);
    }
    for (index, bar) in bars.iter().enumerate() {
        if !bar.has_valid_prices() {
            return Err(DataGap::InvalidPrice { index });
        }
        if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
            return Err(DataGap::NonMonotonic { index });
        }
    }
    Ok(())
}

pub fn load_universe(
    data_port: &dyn DataPort,
    tickers: &[String],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Universe {
    let mut universe = Universe::default();

    for ticker in tickers {
        let bars = data_port
            .fetch_bars(ticker, start, end)
            .map_err(|e| DataGap::Unavailable {
                reason: e.to_string(),
            });
        universe.admit(ticker.clone(), bars);
    }

    if !universe.excluded.is_empty() {
        info!(
            usable = universe.series.len(),
            requested = universe.requested(),
            "Universe reduced"
        );
    }
    universe
}
