//! Average True Range as a rolling mean of true range.
//!
//! TR[0] = high - low; TR[i] = max(high-low, |high-prev_close|, |low-prev_close|).
//! ATR[i] = mean(TR[i-n+1..=i]). Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::OhlcvBar;

pub const DEFAULT_PERIOD: usize = 14;

pub fn calculate_atr(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    if period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Atr(period),
            values: vec![],
        };
    }

    let tr_values: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                bar.high - bar.low
            } else {
                bar.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let mut window_sum = 0.0;
    let mut values = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        window_sum += tr_values[i];
        if i >= period {
            window_sum -= tr_values[i - period];
        }
        let valid = i + 1 >= period;
        values.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid,
            value: IndicatorValue::Simple(if valid { window_sum / period as f64 } else { 0.0 }),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_bar(hour: u32, high: f64, low: f64, close: f64) -> OhlcvBar {
        OhlcvBar {
            ticker: "TEST".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            open: close,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn atr_warmup() {
        let bars: Vec<OhlcvBar> = (0..5).map(|h| make_bar(h, 110.0, 90.0, 100.0)).collect();
        let series = calculate_atr(&bars, 3);

        assert_eq!(series.values.len(), 5);
        assert!(!series.values[0].valid);
        assert!(!series.values[1].valid);
        assert!(series.values[2].valid);
        assert!(series.values[4].valid);
    }

    #[test]
    fn atr_first_true_range_is_high_minus_low() {
        let bars = vec![make_bar(0, 110.0, 100.0, 105.0)];
        let series = calculate_atr(&bars, 1);
        assert_eq!(series.last_simple(), Some(10.0));
    }

    #[test]
    fn atr_is_rolling_mean() {
        let bars = vec![
            make_bar(0, 110.0, 100.0, 105.0), // TR 10
            make_bar(1, 115.0, 105.0, 110.0), // TR max(10, 10, 0) = 10
            make_bar(2, 130.0, 110.0, 112.0), // TR 20
            make_bar(3, 113.0, 111.0, 112.0), // TR 2
        ];
        let series = calculate_atr(&bars, 2);

        let points: Vec<f64> = series
            .values
            .iter()
            .map(|p| match p.value {
                IndicatorValue::Simple(v) => v,
                _ => panic!("Expected Simple value"),
            })
            .collect();
        assert!((points[1] - 10.0).abs() < 1e-10);
        assert!((points[2] - 15.0).abs() < 1e-10);
        assert!((points[3] - 11.0).abs() < 1e-10);
    }

    #[test]
    fn atr_gap_uses_previous_close() {
        let bars = vec![
            make_bar(0, 101.0, 99.0, 100.0),
            make_bar(1, 121.0, 119.0, 120.0), // |121 - 100| = 21
        ];
        let series = calculate_atr(&bars, 1);
        assert_eq!(series.last_simple(), Some(21.0));
    }

    #[test]
    fn atr_zero_period_is_empty() {
        let bars = vec![make_bar(0, 110.0, 100.0, 105.0)];
        assert!(calculate_atr(&bars, 0).values.is_empty());
    }
}
