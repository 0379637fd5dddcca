//! Point-in-time indicator view used by the decision cycle.
//!
//! [`IndicatorSnapshot::compute`] only ever looks at bars whose timestamp is
//! at or before `now`, so a snapshot cannot change when later bars are added
//! or removed.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::indicator::{
    atr, bollinger, calculate_atr, calculate_bollinger, calculate_ema, calculate_macd,
    calculate_rsi, calculate_trend, macd, rsi, trend, IndicatorValue,
};
use crate::domain::ohlcv::{visible_len, OhlcvBar};

pub const EMA_FAST_PERIOD: usize = 12;
pub const EMA_SLOW_PERIOD: usize = 26;

/// Where the close sits relative to the Bollinger bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandPosition {
    Above,
    Below,
    #[default]
    Inside,
}

/// Derived indicator values at one timestamp. Fields whose indicator has not
/// warmed up are zero, except `rsi` which is neutral 50.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_mid: f64,
    pub bb_lower: f64,
    pub band_position: BandPosition,
    pub atr: f64,
    pub rsi: f64,
    pub long_trend: f64,
    pub long_trend_proj_1: f64,
    pub long_trend_proj_2: f64,
    /// EMA, MACD, Bollinger, ATR and RSI are all past warmup.
    pub warmed_up: bool,
    /// The long-horizon EMA is past warmup.
    pub trend_ready: bool,
}

impl IndicatorSnapshot {
    /// Neutral snapshot for a ticker with no usable history at `timestamp`.
    pub fn neutral(timestamp: NaiveDateTime, price: f64) -> Self {
        Self {
            timestamp,
            price,
            ema_fast: 0.0,
            ema_slow: 0.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            bb_upper: 0.0,
            bb_mid: 0.0,
            bb_lower: 0.0,
            band_position: BandPosition::Inside,
            atr: 0.0,
            rsi: rsi::NEUTRAL_RSI,
            long_trend: 0.0,
            long_trend_proj_1: 0.0,
            long_trend_proj_2: 0.0,
            warmed_up: false,
            trend_ready: false,
        }
    }

    /// Snapshot at `now` from a time-sorted bar series.
    pub fn compute(bars: &[OhlcvBar], now: NaiveDateTime) -> Self {
        let history = &bars[..visible_len(bars, now)];
        let Some(last) = history.last() else {
            return Self::neutral(now, 0.0);
        };

        let mut snap = Self::neutral(now, last.close);

        let ema_fast = calculate_ema(history, EMA_FAST_PERIOD).last_simple();
        let ema_slow = calculate_ema(history, EMA_SLOW_PERIOD).last_simple();
        snap.ema_fast = ema_fast.unwrap_or(0.0);
        snap.ema_slow = ema_slow.unwrap_or(0.0);

        let macd_series =
            calculate_macd(history, macd::DEFAULT_FAST, macd::DEFAULT_SLOW, macd::DEFAULT_SIGNAL);
        let macd_ready = match macd_series.last_valid() {
            Some(IndicatorValue::Macd {
                line,
                signal,
                histogram,
            }) => {
                snap.macd = *line;
                snap.macd_signal = *signal;
                snap.macd_histogram = *histogram;
                true
            }
            _ => false,
        };

        let bands = calculate_bollinger(
            history,
            bollinger::DEFAULT_PERIOD,
            bollinger::DEFAULT_MULT_X100,
        );
        let bands_ready = match bands.last_valid() {
            Some(IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
            }) => {
                snap.bb_upper = *upper;
                snap.bb_mid = *middle;
                snap.bb_lower = *lower;
                snap.band_position = classify_band(last.close, *upper, *lower);
                true
            }
            _ => false,
        };

        let atr_value = calculate_atr(history, atr::DEFAULT_PERIOD).last_simple();
        snap.atr = atr_value.unwrap_or(0.0);

        let rsi_value = calculate_rsi(history, rsi::DEFAULT_PERIOD).last_simple();
        snap.rsi = rsi_value.unwrap_or(rsi::NEUTRAL_RSI);

        if let Some(IndicatorValue::Trend {
            value,
            proj_1,
            proj_2,
        }) = calculate_trend(history, trend::DEFAULT_PERIOD).last_valid()
        {
            snap.long_trend = *value;
            snap.long_trend_proj_1 = *proj_1;
            snap.long_trend_proj_2 = *proj_2;
            snap.trend_ready = true;
        }

        snap.warmed_up = ema_fast.is_some()
            && ema_slow.is_some()
            && macd_ready
            && bands_ready
            && atr_value.is_some()
            && rsi_value.is_some();
        snap
    }

    /// ATR as a fraction of price; 0 when either is unavailable.
    pub fn atr_ratio(&self) -> f64 {
        if self.price > 0.0 && self.atr > 0.0 {
            self.atr / self.price
        } else {
            0.0
        }
    }
}

fn classify_band(price: f64, upper: f64, lower: f64) -> BandPosition {
    if price > upper {
        BandPosition::Above
    } else if price < lower {
        BandPosition::Below
    } else {
        BandPosition::Inside
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn make_bars(prices: &[f64]) -> Vec<OhlcvBar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| OhlcvBar {
                ticker: "TEST".into(),
                timestamp: start() + chrono::Duration::hours(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    fn wave(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1)
            .collect()
    }

    #[test]
    fn empty_history_is_neutral() {
        let snap = IndicatorSnapshot::compute(&[], start());
        assert!(!snap.warmed_up);
        assert_eq!(snap.rsi, 50.0);
        assert_eq!(snap.atr, 0.0);
        assert_eq!(snap.band_position, BandPosition::Inside);
    }

    #[test]
    fn short_history_is_neutral_but_priced() {
        let bars = make_bars(&[10.0, 11.0, 12.0]);
        let snap = IndicatorSnapshot::compute(&bars, bars[2].timestamp);
        assert!(!snap.warmed_up);
        assert!(!snap.trend_ready);
        assert_eq!(snap.price, 12.0);
        assert_eq!(snap.rsi, 50.0);
        assert_eq!(snap.ema_slow, 0.0);
    }

    #[test]
    fn warms_up_after_macd_signal() {
        let bars = make_bars(&wave(40));
        let before = IndicatorSnapshot::compute(&bars, bars[32].timestamp);
        let after = IndicatorSnapshot::compute(&bars, bars[33].timestamp);
        assert!(!before.warmed_up);
        assert!(after.warmed_up);
        assert!(!after.trend_ready);
    }

    #[test]
    fn trend_ready_at_48_bars() {
        let bars = make_bars(&wave(60));
        assert!(!IndicatorSnapshot::compute(&bars, bars[46].timestamp).trend_ready);
        assert!(IndicatorSnapshot::compute(&bars, bars[47].timestamp).trend_ready);
    }

    #[test]
    fn ignores_bars_after_now() {
        let bars = make_bars(&wave(80));
        let now = bars[50].timestamp;
        let full = IndicatorSnapshot::compute(&bars, now);
        let truncated = IndicatorSnapshot::compute(&bars[..=50], now);
        assert_eq!(full, truncated);
    }

    #[test]
    fn band_position_above_on_spike() {
        let mut prices = vec![100.0; 30];
        prices.push(150.0);
        let bars = make_bars(&prices);
        let snap = IndicatorSnapshot::compute(&bars, bars[30].timestamp);
        assert_eq!(snap.band_position, BandPosition::Above);
    }

    #[test]
    fn band_position_below_on_drop() {
        let mut prices = vec![100.0; 30];
        prices.push(50.0);
        let bars = make_bars(&prices);
        let snap = IndicatorSnapshot::compute(&bars, bars[30].timestamp);
        assert_eq!(snap.band_position, BandPosition::Below);
    }

    #[test]
    fn atr_ratio() {
        let mut snap = IndicatorSnapshot::neutral(start(), 100.0);
        snap.atr = 5.0;
        assert!((snap.atr_ratio() - 0.05).abs() < f64::EPSILON);
        snap.price = 0.0;
        assert_eq!(snap.atr_ratio(), 0.0);
    }
}
