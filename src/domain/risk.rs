//! Forced stop-loss / take-profit exits.
//!
//! Runs once per tick before the decision cycle. A position is fully
//! liquidated when its return from average cost crosses either threshold,
//! or when the price crosses an armed bracket level.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::domain::error::LedgerError;
use crate::domain::ledger::{Ledger, Position, Trade, TradeReason};

const PCT_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Loss from average cost that forces an exit (0.03 = 3%).
    pub stop_loss_pct: f64,
    /// Gain from average cost that forces an exit (0.05 = 5%).
    pub take_profit_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.03,
            take_profit_pct: 0.05,
        }
    }
}

impl RiskConfig {
    /// Bracket levels for a position opened at `average_cost`.
    pub fn bracket_for(&self, average_cost: f64) -> (Option<f64>, Option<f64>) {
        let stop = (self.stop_loss_pct > 0.0).then(|| average_cost * (1.0 - self.stop_loss_pct));
        let take =
            (self.take_profit_pct > 0.0).then(|| average_cost * (1.0 + self.take_profit_pct));
        (stop, take)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitKind {
    StopLoss,
    TakeProfit,
}

impl From<ExitKind> for TradeReason {
    fn from(kind: ExitKind) -> Self {
        match kind {
            ExitKind::StopLoss => TradeReason::StopLoss,
            ExitKind::TakeProfit => TradeReason::TakeProfit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskExit {
    pub ticker: String,
    pub kind: ExitKind,
    pub pnl_pct: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskMonitor {
    config: RiskConfig,
}

impl RiskMonitor {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Evaluate one position. Stop-loss wins when both would fire.
    pub fn evaluate(&self, position: &Position, price: f64) -> Option<ExitKind> {
        let pnl_pct = position.pnl_pct(price);
        let stop_hit = (self.config.stop_loss_pct > 0.0
            && pnl_pct <= -self.config.stop_loss_pct + PCT_EPSILON)
            || position.stop_loss.is_some_and(|level| price <= level);
        if stop_hit {
            return Some(ExitKind::StopLoss);
        }
        let take_hit = (self.config.take_profit_pct > 0.0
            && pnl_pct >= self.config.take_profit_pct - PCT_EPSILON)
            || position.take_profit.is_some_and(|level| price >= level);
        take_hit.then_some(ExitKind::TakeProfit)
    }

    /// Positions that must be closed at `prices`, in ticker order.
    pub fn scan(&self, ledger: &Ledger, prices: &HashMap<String, f64>) -> Vec<RiskExit> {
        ledger
            .positions()
            .filter_map(|pos| {
                let price = *prices.get(&pos.ticker)?;
                let kind = self.evaluate(pos, price)?;
                Some(RiskExit {
                    ticker: pos.ticker.clone(),
                    kind,
                    pnl_pct: pos.pnl_pct(price),
                    price,
                })
            })
            .collect()
    }

    /// Scan and liquidate every triggered position.
    pub fn enforce(
        &self,
        ledger: &mut Ledger,
        at: NaiveDateTime,
        prices: &HashMap<String, f64>,
        fee_rate: f64,
    ) -> Result<Vec<Trade>, LedgerError> {
        let exits = self.scan(ledger, prices);
        let mut trades = Vec::with_capacity(exits.len());

        for exit in exits {
            match exit.kind {
                ExitKind::StopLoss => {
                    info!(
                        ticker = %exit.ticker,
                        pnl_pct = exit.pnl_pct,
                        price = exit.price,
                        "Stop-loss triggered"
                    )
                }
                ExitKind::TakeProfit => {
                    info!(
                        ticker = %exit.ticker,
                        pnl_pct = exit.pnl_pct,
                        price = exit.price,
                        "Take-profit triggered"
                    )
                }
            }
            let trade =
                ledger.close_position(at, &exit.ticker, exit.price, fee_rate, exit.kind.into())?;
            trades.push(trade);
        }

        Ok(trades)
    }
}
