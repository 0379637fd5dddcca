//! Turn a decision's amount into a share count.
//!
//! BUY amounts are currency and are capped at a fraction of cash that
//! shrinks as volatility (ATR / price) rises. SELL amounts are a percentage
//! of the held position.

use serde::{Deserialize, Serialize};

use crate::domain::ledger::SHARE_EPSILON;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityTier {
    /// Applies when ATR / price is strictly above this.
    pub min_atr_ratio: f64,
    pub max_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Checked from the highest threshold down.
    pub tiers: Vec<VolatilityTier>,
    /// Cap used when no tier applies.
    pub base_fraction: f64,
    /// Orders worth less than this are skipped.
    pub min_trade_value: f64,
    pub fractional_shares: bool,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                VolatilityTier {
                    min_atr_ratio: 0.05,
                    max_fraction: 0.20,
                },
                VolatilityTier {
                    min_atr_ratio: 0.03,
                    max_fraction: 0.30,
                },
            ],
            base_fraction: 0.40,
            min_trade_value: 1.0,
            fractional_shares: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizedOrder {
    Buy { shares: f64 },
    Sell { shares: f64 },
    Skip { reason: String },
}

impl SizingConfig {
    /// Largest fraction of cash a single BUY may use at this volatility.
    pub fn max_fraction(&self, atr_ratio: f64) -> f64 {
        let mut tiers = self.tiers.clone();
        tiers.sort_by(|a, b| b.min_atr_ratio.total_cmp(&a.min_atr_ratio));
        tiers
            .iter()
            .find(|t| atr_ratio > t.min_atr_ratio)
            .map(|t| t.max_fraction)
            .unwrap_or(self.base_fraction)
    }

    pub fn max_investment(&self, cash: f64, atr_ratio: f64) -> f64 {
        (cash * self.max_fraction(atr_ratio)).max(0.0)
    }

    pub fn size_buy(
        &self,
        amount: f64,
        price: f64,
        cash: f64,
        atr_ratio: f64,
        fee_rate: f64,
    ) -> SizedOrder {
        if amount <= 0.0 {
            return skip("BUY amount is zero");
        }
        if price <= 0.0 {
            return skip("no valid price");
        }

        let value = amount
            .min(self.max_investment(cash, atr_ratio))
            .min(cash / (1.0 + fee_rate));
        let mut shares = value / price;
        if !self.fractional_shares {
            shares = shares.floor();
        }

        if shares < SHARE_EPSILON || shares * price < self.min_trade_value {
            return skip(&format!(
                "BUY value {:.2} below minimum {:.2}",
                shares * price,
                self.min_trade_value
            ));
        }
        SizedOrder::Buy { shares }
    }

    /// `percent` of `held`; 0 means the whole position.
    pub fn size_sell(&self, percent: f64, held: Option<f64>, price: f64) -> SizedOrder {
        let Some(held) = held.filter(|h| *h > 0.0) else {
            return skip("no open position to sell");
        };

        let pct = if percent <= 0.0 { 100.0 } else { percent.min(100.0) };
        let mut shares = held * pct / 100.0;
        if pct < 100.0 && !self.fractional_shares {
            shares = shares.floor();
        }

        if shares < SHARE_EPSILON {
            return skip("SELL size rounds to zero");
        }
        if pct < 100.0 && shares * price < self.min_trade_value {
            return skip(&format!(
                "SELL value {:.2} below minimum {:.2}",
                shares * price,
                self.min_trade_value
            ));
        }
        SizedOrder::Sell { shares }
    }
}

fn skip(reason: &str) -> SizedOrder {
    SizedOrder::Skip {
        reason: reason.to_string(),
    }
}
