//! Long-horizon trend: EMA(n) plus a two-step linear projection.
//!
//! avg_delta = mean of the last two EMA deltas
//! proj_1 = ema + avg_delta, proj_2 = proj_1 + avg_delta
//!
//! With fewer than three EMA values the projections equal the EMA.

use crate::domain::indicator::ema::ema_of;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::OhlcvBar;

pub const DEFAULT_PERIOD: usize = 48;

pub fn calculate_trend(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema = ema_of(&closes, period);

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let value = match ema[i] {
                Some(current) => {
                    let avg_delta = match (i.checked_sub(1), i.checked_sub(2)) {
                        (Some(p1), Some(p2)) => match (ema[p1], ema[p2]) {
                            (Some(e1), Some(e2)) => ((current - e1) + (e1 - e2)) / 2.0,
                            _ => 0.0,
                        },
                        _ => 0.0,
                    };
                    IndicatorValue::Trend {
                        value: current,
                        proj_1: current + avg_delta,
                        proj_2: current + 2.0 * avg_delta,
                    }
                }
                None => IndicatorValue::Trend {
                    value: 0.0,
                    proj_1: 0.0,
                    proj_2: 0.0,
                },
            };
            IndicatorPoint {
                timestamp: bar.timestamp,
                valid: ema[i].is_some(),
                value,
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Trend(period),
        values,
    }
}
