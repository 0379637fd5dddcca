//! Bollinger Bands: an SMA of closes with bands at ± k sample standard
//! deviations. Points before the first full window are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::OhlcvBar;

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_MULT_X100: u32 = 200;

pub fn calculate_bollinger(
    bars: &[OhlcvBar],
    period: usize,
    stddev_mult_x100: u32,
) -> IndicatorSeries {
    let mult = stddev_mult_x100 as f64 / 100.0;

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let bands = (period > 0 && i + 1 >= period)
                .then(|| band_at(&bars[i + 1 - period..=i], mult));
            let (upper, middle, lower) = bands.unwrap_or((0.0, 0.0, 0.0));
            IndicatorPoint {
                timestamp: bar.timestamp,
                valid: bands.is_some(),
                value: IndicatorValue::Bollinger {
                    upper,
                    middle,
                    lower,
                },
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Bollinger {
            period,
            stddev_mult_x100,
        },
        values,
    }
}

/// (upper, middle, lower) over one full window.
fn band_at(window: &[OhlcvBar], mult: f64) -> (f64, f64, f64) {
    let n = window.len() as f64;
    let mean = window.iter().map(|b| b.close).sum::<f64>() / n;
    let stddev = if window.len() < 2 {
        0.0
    } else {
        let sum_sq: f64 = window.iter().map(|b| (b.close - mean).powi(2)).sum();
        (sum_sq / (n - 1.0)).sqrt()
    };
    (mean + mult * stddev, mean, mean - mult * stddev)
}
