//! Rule-based decision sources built from the indicator snapshot.
//!
//! These let a run go end to end without an external collaborator, either
//! alone or as a consensus team. Every profile holds while the indicators
//! are still warming up.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::domain::decision::{Action, Decision, DecisionRequest};
use crate::domain::error::{DecisionError, DecisionSourceError};
use crate::domain::indicator::BandPosition;
use crate::ports::decision_port::DecisionSource;

/// Unrealized gain, in percent, at which the momentum profile banks profit.
const MOMENTUM_TAKE_PCT: f64 = 3.0;
const MOMENTUM_MAX_RSI: f64 = 80.0;
const MOMENTUM_EXIT_RSI: f64 = 75.0;
const OVERSOLD_RSI: f64 = 35.0;
const OVERBOUGHT_RSI: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    TrendFollowing,
    Momentum,
    MeanReversion,
}

impl Profile {
    pub const ALL: [Profile; 3] = [
        Profile::TrendFollowing,
        Profile::Momentum,
        Profile::MeanReversion,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Profile::TrendFollowing => "trend_following",
            Profile::Momentum => "momentum",
            Profile::MeanReversion => "mean_reversion",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Profile::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Profile::ALL.iter().map(|p| p.name()).collect();
                format!("unknown source '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

pub struct TechnicalDecisionSource {
    id: String,
    profile: Profile,
}

impl TechnicalDecisionSource {
    pub fn new(profile: Profile) -> Self {
        Self {
            id: profile.name().to_string(),
            profile,
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn decide(&self, request: &DecisionRequest) -> Result<Decision, DecisionError> {
        let snap = &request.snapshot;
        if !snap.warmed_up {
            return Ok(Decision::hold(self.id.as_str(), "Indicators warming up"));
        }

        let holding = request.portfolio.position.is_some();
        let budget = request.portfolio.max_investment;
        let tag = self.profile.name();
        let decision = |action, amount, reason: &str, confidence| {
            Decision::new(self.id.as_str(), action, amount, reason, confidence, tag)
        };

        match self.profile {
            Profile::TrendFollowing => {
                let above_trend = !snap.trend_ready || snap.price > snap.long_trend;
                let rising = snap.ema_fast > snap.ema_slow;
                if !holding && rising && above_trend && snap.macd_histogram > 0.0 {
                    decision(
                        Action::Buy,
                        budget,
                        "Fast EMA above slow, price above long trend",
                        0.7,
                    )
                } else if holding && !rising {
                    decision(Action::Sell, 100.0, "Fast EMA crossed below slow", 0.7)
                } else {
                    decision(Action::Hold, 0.0, "No trend change", 0.5)
                }
            }
            Profile::Momentum => {
                let market = &request.market;
                let pnl_pct = request
                    .portfolio
                    .position
                    .as_ref()
                    .map(|p| p.pnl_pct)
                    .unwrap_or(0.0);
                if holding
                    && (snap.macd < snap.macd_signal
                        || snap.rsi > MOMENTUM_EXIT_RSI
                        || pnl_pct > MOMENTUM_TAKE_PCT)
                {
                    decision(Action::Sell, 100.0, "Momentum fading or gain secured", 0.8)
                } else if !holding
                    && snap.macd > snap.macd_signal
                    && market.price_change_1 > 0.0
                    && market.volume_ratio >= 1.0
                    && snap.rsi < MOMENTUM_MAX_RSI
                {
                    decision(Action::Buy, budget, "MACD above signal on rising volume", 0.8)
                } else {
                    decision(Action::Hold, 0.0, "No momentum signal", 0.4)
                }
            }
            Profile::MeanReversion => {
                if !holding && snap.band_position == BandPosition::Below && snap.rsi < OVERSOLD_RSI
                {
                    decision(Action::Buy, budget, "Price below lower band, oversold", 0.6)
                } else if holding
                    && (snap.band_position == BandPosition::Above || snap.rsi > OVERBOUGHT_RSI)
                {
                    decision(Action::Sell, 100.0, "Price stretched above mean", 0.6)
                } else {
                    decision(Action::Hold, 0.0, "Price near mean", 0.5)
                }
            }
        }
    }
}

#[async_trait]
impl DecisionSource for TechnicalDecisionSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_decision(
        &self,
        request: &DecisionRequest,
    ) -> Result<Decision, DecisionSourceError> {
        Ok(self.decide(request)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{MarketContext, PortfolioState, PositionView};
    use crate::domain::indicator::IndicatorSnapshot;
    use chrono::NaiveDate;

    fn request(configure: impl FnOnce(&mut IndicatorSnapshot), holding: bool) -> DecisionRequest {
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut snapshot = IndicatorSnapshot::neutral(at, 100.0);
        snapshot.warmed_up = true;
        configure(&mut snapshot);

        DecisionRequest {
            ticker: "BTC".into(),
            timestamp: at,
            snapshot,
            portfolio: PortfolioState {
                cash: 10_000.0,
                total_value: 10_000.0,
                max_investment: 4_000.0,
                position: holding.then(|| PositionView {
                    shares: 10.0,
                    average_cost: 100.0,
                    unrealized_pnl: 0.0,
                    pnl_pct: 0.0,
                }),
            },
            market: MarketContext {
                price: 100.0,
                high: 101.0,
                low: 99.0,
                volume: 1_000.0,
                price_change_1: 0.5,
                price_change_4: 1.0,
                volume_ratio: 1.2,
            },
        }
    }

    fn action(profile: Profile, req: &DecisionRequest) -> Action {
        TechnicalDecisionSource::new(profile).decide(req).unwrap().action()
    }

    #[test]
    fn profile_names_round_trip() {
        for profile in Profile::ALL {
            assert_eq!(profile.name().parse::<Profile>().unwrap(), profile);
        }
        assert_eq!(" Momentum ".parse::<Profile>().unwrap(), Profile::Momentum);
        assert!("llm".parse::<Profile>().is_err());
    }

    #[test]
    fn cold_snapshot_holds() {
        let req = request(|s| s.warmed_up = false, false);
        for profile in Profile::ALL {
            let d = TechnicalDecisionSource::new(profile).decide(&req).unwrap();
            assert_eq!(d.action(), Action::Hold);
            assert_eq!(d.source_id(), profile.name());
        }
    }

    #[test]
    fn trend_following_buys_uptrend_with_budget() {
        let req = request(
            |s| {
                s.ema_fast = 101.0;
                s.ema_slow = 99.0;
                s.macd_histogram = 0.2;
                s.long_trend = 95.0;
                s.trend_ready = true;
            },
            false,
        );
        let d = TechnicalDecisionSource::new(Profile::TrendFollowing)
            .decide(&req)
            .unwrap();
        assert_eq!(d.action(), Action::Buy);
        assert!((d.amount() - 4_000.0).abs() < f64::EPSILON);
        assert_eq!(d.strategy(), "trend_following");
    }

    #[test]
    fn trend_following_exits_on_cross_down() {
        let req = request(
            |s| {
                s.ema_fast = 98.0;
                s.ema_slow = 99.0;
            },
            true,
        );
        assert_eq!(action(Profile::TrendFollowing, &req), Action::Sell);
    }

    #[test]
    fn momentum_buys_on_rising_macd() {
        let req = request(
            |s| {
                s.macd = 1.0;
                s.macd_signal = 0.5;
                s.rsi = 60.0;
            },
            false,
        );
        assert_eq!(action(Profile::Momentum, &req), Action::Buy);
    }

    #[test]
    fn momentum_skips_extreme_rsi() {
        let req = request(
            |s| {
                s.macd = 1.0;
                s.macd_signal = 0.5;
                s.rsi = 85.0;
            },
            false,
        );
        assert_eq!(action(Profile::Momentum, &req), Action::Hold);
    }

    #[test]
    fn mean_reversion_buys_oversold_below_band() {
        let req = request(
            |s| {
                s.band_position = BandPosition::Below;
                s.rsi = 25.0;
            },
            false,
        );
        assert_eq!(action(Profile::MeanReversion, &req), Action::Buy);
    }

    #[test]
    fn mean_reversion_sells_above_band() {
        let req = request(|s| s.band_position = BandPosition::Above, true);
        assert_eq!(action(Profile::MeanReversion, &req), Action::Sell);
    }

    #[tokio::test]
    async fn source_trait_delegates() {
        let source = TechnicalDecisionSource::new(Profile::MeanReversion);
        let req = request(|_| {}, false);
        let d = source.get_decision(&req).await.unwrap();
        assert_eq!(d.action(), Action::Hold);
        assert_eq!(source.id(), "mean_reversion");
    }
}
