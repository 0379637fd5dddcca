//! Market data access port trait.

use chrono::NaiveDateTime;

use crate::domain::error::TradesimError;
use crate::domain::ohlcv::OhlcvBar;

pub trait DataPort {
    /// Bars for `ticker` with `start <= timestamp <= end`, in source order.
    fn fetch_bars(
        &self,
        ticker: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<OhlcvBar>, TradesimError>;

    fn list_tickers(&self) -> Result<Vec<String>, TradesimError>;
}
