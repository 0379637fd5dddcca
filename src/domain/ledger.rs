//! Cash, positions and the append-only trade log.
//!
//! The ledger is the only place shares and cash change. Every accepted
//! order produces exactly one [`Trade`]; a rejected order leaves the ledger
//! untouched. Fees are charged on the unrounded notional and are not folded
//! into `average_cost`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::domain::error::LedgerError;

/// Residual share counts below this are treated as a closed position.
pub const SHARE_EPSILON: f64 = 1e-8;

/// Tolerance on cash comparisons for float round-off.
pub const CASH_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeReason {
    Decision(String),
    StopLoss,
    TakeProfit,
    Liquidation,
}

impl TradeReason {
    pub fn is_forced(&self) -> bool {
        !matches!(self, TradeReason::Decision(_))
    }
}

impl fmt::Display for TradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeReason::Decision(reason) => write!(f, "{}", reason),
            TradeReason::StopLoss => write!(f, "STOP_LOSS"),
            TradeReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            TradeReason::Liquidation => write!(f, "LIQUIDATION"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: NaiveDateTime,
    pub ticker: String,
    pub action: TradeAction,
    pub shares: f64,
    pub price: f64,
    pub fee: f64,
    /// Set on SELL only: (price - average_cost) * shares, before fees.
    pub realized_pnl: Option<f64>,
    pub reason: TradeReason,
}

impl Trade {
    pub fn notional(&self) -> f64 {
        self.shares * self.price
    }

    /// Net cash movement: negative for BUY, positive for SELL.
    pub fn cash_delta(&self) -> f64 {
        match self.action {
            TradeAction::Buy => -(self.notional() + self.fee),
            TradeAction::Sell => self.notional() - self.fee,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub shares: f64,
    pub average_cost: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub last_price: f64,
    pub unrealized_pnl: f64,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.shares * price
    }

    /// (price - average_cost) / average_cost
    pub fn pnl_pct(&self, price: f64) -> f64 {
        (price - self.average_cost) / self.average_cost
    }

    fn bracket_violation(&self) -> Option<String> {
        if let Some(sl) = self.stop_loss {
            if sl >= self.average_cost {
                return Some(format!(
                    "{}: stop_loss {} not below average_cost {}",
                    self.ticker, sl, self.average_cost
                ));
            }
        }
        if let Some(tp) = self.take_profit {
            if tp <= self.average_cost {
                return Some(format!(
                    "{}: take_profit {} not above average_cost {}",
                    self.ticker, tp, self.average_cost
                ));
            }
        }
        None
    }
}

/// Portfolio value recorded once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub total_value: f64,
    pub cash: f64,
}

/// Serializable copy of ledger state, attached to fatal errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub cash: f64,
    pub initial_cash: f64,
    pub positions: Vec<Position>,
    pub trade_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    cash: f64,
    initial_cash: f64,
    positions: BTreeMap<String, Position>,
    trade_log: Vec<Trade>,
}

impl Ledger {
    pub fn new(initial_cash: f64) -> Self {
        Ledger {
            cash: initial_cash,
            initial_cash,
            positions: BTreeMap::new(),
            trade_log: Vec::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn has_position(&self, ticker: &str) -> bool {
        self.positions.contains_key(ticker)
    }

    /// Open positions in ticker order.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trade_log
    }

    pub fn into_trades(self) -> Vec<Trade> {
        self.trade_log
    }

    pub fn buy(
        &mut self,
        at: NaiveDateTime,
        ticker: &str,
        shares: f64,
        price: f64,
        fee_rate: f64,
        reason: TradeReason,
    ) -> Result<Trade, LedgerError> {
        validate_order(ticker, shares, price, fee_rate)?;
        self.apply(Trade {
            timestamp: at,
            ticker: ticker.to_string(),
            action: TradeAction::Buy,
            shares,
            price,
            fee: shares * price * fee_rate,
            realized_pnl: None,
            reason,
        })
    }

    pub fn sell(
        &mut self,
        at: NaiveDateTime,
        ticker: &str,
        shares: f64,
        price: f64,
        fee_rate: f64,
        reason: TradeReason,
    ) -> Result<Trade, LedgerError> {
        validate_order(ticker, shares, price, fee_rate)?;
        let held = self
            .positions
            .get(ticker)
            .map(|p| p.shares)
            .ok_or_else(|| LedgerError::NoPosition {
                ticker: ticker.to_string(),
            })?;
        if shares > held + SHARE_EPSILON {
            return Err(LedgerError::OverSell {
                ticker: ticker.to_string(),
                requested: shares,
                held,
            });
        }
        let shares = shares.min(held);
        self.apply(Trade {
            timestamp: at,
            ticker: ticker.to_string(),
            action: TradeAction::Sell,
            shares,
            price,
            fee: shares * price * fee_rate,
            realized_pnl: None,
            reason,
        })
    }

    /// Sell the entire position in `ticker`.
    pub fn close_position(
        &mut self,
        at: NaiveDateTime,
        ticker: &str,
        price: f64,
        fee_rate: f64,
        reason: TradeReason,
    ) -> Result<Trade, LedgerError> {
        let shares = self
            .positions
            .get(ticker)
            .map(|p| p.shares)
            .ok_or_else(|| LedgerError::NoPosition {
                ticker: ticker.to_string(),
            })?;
        self.sell(at, ticker, shares, price, fee_rate, reason)
    }

    /// Apply a fully priced trade. Validation happens before any mutation.
    fn apply(&mut self, mut trade: Trade) -> Result<Trade, LedgerError> {
        match trade.action {
            TradeAction::Buy => {
                let required = trade.notional() + trade.fee;
                if required > self.cash + CASH_EPSILON {
                    return Err(LedgerError::InsufficientFunds {
                        ticker: trade.ticker.clone(),
                        required,
                        available: self.cash,
                    });
                }

                self.cash = (self.cash - required).max(0.0);
                let position = self
                    .positions
                    .entry(trade.ticker.clone())
                    .or_insert_with(|| Position {
                        ticker: trade.ticker.clone(),
                        shares: 0.0,
                        average_cost: trade.price,
                        stop_loss: None,
                        take_profit: None,
                        last_price: trade.price,
                        unrealized_pnl: 0.0,
                    });
                let new_shares = position.shares + trade.shares;
                position.average_cost = (position.shares * position.average_cost
                    + trade.shares * trade.price)
                    / new_shares;
                position.shares = new_shares;
                // Brackets are relative to the old average; callers re-arm them.
                position.stop_loss = None;
                position.take_profit = None;
                position.last_price = trade.price;
                position.unrealized_pnl = (trade.price - position.average_cost) * new_shares;
            }
            TradeAction::Sell => {
                let Some(position) = self.positions.get_mut(&trade.ticker) else {
                    return Err(LedgerError::NoPosition {
                        ticker: trade.ticker.clone(),
                    });
                };
                if trade.shares > position.shares + SHARE_EPSILON {
                    return Err(LedgerError::OverSell {
                        ticker: trade.ticker.clone(),
                        requested: trade.shares,
                        held: position.shares,
                    });
                }

                let realized = (trade.price - position.average_cost) * trade.shares;
                trade.realized_pnl = Some(realized);
                self.cash += trade.notional() - trade.fee;

                let residual = position.shares - trade.shares;
                if residual < SHARE_EPSILON {
                    self.positions.remove(&trade.ticker);
                } else {
                    position.shares = residual;
                    position.last_price = trade.price;
                    position.unrealized_pnl = (trade.price - position.average_cost) * residual;
                }
            }
        }

        self.trade_log.push(trade.clone());
        Ok(trade)
    }

    /// Refresh `last_price` and `unrealized_pnl` from `prices`. Never touches cash.
    pub fn mark_to_market(&mut self, prices: &HashMap<String, f64>) {
        for position in self.positions.values_mut() {
            if let Some(&price) = prices.get(&position.ticker) {
                position.last_price = price;
                position.unrealized_pnl = (price - position.average_cost) * position.shares;
            }
        }
    }

    /// cash + Σ shares·price, falling back to the last marked price.
    pub fn portfolio_value(&self, prices: &HashMap<String, f64>) -> f64 {
        let holdings: f64 = self
            .positions
            .values()
            .map(|p| {
                let price = prices.get(&p.ticker).copied().unwrap_or(p.last_price);
                p.market_value(price)
            })
            .sum();
        self.cash + holdings
    }

    /// Arm stop-loss / take-profit levels on an open position.
    pub fn set_bracket(
        &mut self,
        ticker: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), LedgerError> {
        let position = self
            .positions
            .get(ticker)
            .ok_or_else(|| LedgerError::NoPosition {
                ticker: ticker.to_string(),
            })?;
        let candidate = Position {
            stop_loss,
            take_profit,
            ..position.clone()
        };
        if let Some(reason) = candidate.bracket_violation() {
            return Err(LedgerError::InvariantViolation { reason });
        }
        self.positions.insert(ticker.to_string(), candidate);
        Ok(())
    }

    /// Check every ledger invariant.
    pub fn verify(&self) -> Result<(), LedgerError> {
        if !self.cash.is_finite() || self.cash < 0.0 {
            return Err(LedgerError::InvariantViolation {
                reason: format!("cash is {}", self.cash),
            });
        }
        for position in self.positions.values() {
            if !(position.shares >= SHARE_EPSILON) || !position.shares.is_finite() {
                return Err(LedgerError::InvariantViolation {
                    reason: format!("{}: share count {}", position.ticker, position.shares),
                });
            }
            if !(position.average_cost > 0.0) || !position.average_cost.is_finite() {
                return Err(LedgerError::InvariantViolation {
                    reason: format!(
                        "{}: average_cost {}",
                        position.ticker, position.average_cost
                    ),
                });
            }
            if let Some(reason) = position.bracket_violation() {
                return Err(LedgerError::InvariantViolation { reason });
            }
        }
        Ok(())
    }

    /// Rebuild a ledger from `initial_cash` and a trade log, charging each
    /// trade's recorded fee.
    pub fn replay(initial_cash: f64, trades: &[Trade]) -> Result<Ledger, LedgerError> {
        let mut ledger = Ledger::new(initial_cash);
        for trade in trades {
            ledger.apply(trade.clone())?;
        }
        Ok(ledger)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            cash: self.cash,
            initial_cash: self.initial_cash,
            positions: self.positions.values().cloned().collect(),
            trade_count: self.trade_log.len(),
        }
    }
}

fn validate_order(ticker: &str, shares: f64, price: f64, fee_rate: f64) -> Result<(), LedgerError> {
    let reason = if !shares.is_finite() || shares <= 0.0 {
        format!("share count must be positive, got {}", shares)
    } else if !price.is_finite() || price <= 0.0 {
        format!("price must be positive, got {}", price)
    } else if !fee_rate.is_finite() || !(0.0..1.0).contains(&fee_rate) {
        format!("fee rate must be within [0, 1), got {}", fee_rate)
    } else {
        return Ok(());
    };
    Err(LedgerError::InvalidOrder {
        ticker: ticker.to_string(),
        reason,
    })
}
