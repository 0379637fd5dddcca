//! Performance metrics and statistics.
//!
//! Win/loss statistics are taken over SELL trades only, in log order.
//! Trades that realize exactly zero count toward the SELL total but break
//! neither kind of streak.

use serde::{Deserialize, Serialize};

use crate::domain::ledger::{EquityPoint, Trade, TradeAction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub initial_equity: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Winning SELLs over all SELLs, as a fraction.
    pub win_rate: f64,
    /// Gross profit over gross loss; 0 when there are no losses.
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub total_fees: f64,
    /// Deepest peak-to-trough fall, as a non-positive percentage.
    pub max_drawdown_pct: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    /// Positive for a run of wins, negative for a run of losses.
    pub current_streak: i64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
}

impl Metrics {
    pub fn compute(
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        initial_equity: f64,
        periods_per_year: f64,
    ) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.total_value)
            .unwrap_or(initial_equity);
        let total_return = final_equity - initial_equity;
        let total_return_pct = if initial_equity > 0.0 {
            total_return / initial_equity * 100.0
        } else {
            0.0
        };

        let buy_trades = trades.iter().filter(|t| t.action == TradeAction::Buy).count();
        let sell_pnls: Vec<f64> = trades
            .iter()
            .filter(|t| t.action == TradeAction::Sell)
            .map(|t| t.realized_pnl.unwrap_or(0.0))
            .collect();

        let mut winning_trades = 0usize;
        let mut losing_trades = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;

        for &pnl in &sell_pnls {
            if pnl > 0.0 {
                winning_trades += 1;
                gross_profit += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                losing_trades += 1;
                gross_loss += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            }
        }

        let sell_trades = sell_pnls.len();
        let win_rate = if sell_trades > 0 {
            winning_trades as f64 / sell_trades as f64
        } else {
            0.0
        };
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            0.0
        };
        let avg_win = if winning_trades > 0 {
            gross_profit / winning_trades as f64
        } else {
            0.0
        };
        let avg_loss = if losing_trades > 0 {
            gross_loss / losing_trades as f64
        } else {
            0.0
        };

        let streaks = compute_streaks(&sell_pnls);
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(equity_curve, periods_per_year);

        Metrics {
            initial_equity,
            final_equity,
            total_return,
            total_return_pct,
            total_trades: trades.len(),
            buy_trades,
            sell_trades,
            winning_trades,
            losing_trades,
            win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            total_fees: trades.iter().map(|t| t.fee).sum(),
            max_drawdown_pct: compute_max_drawdown_pct(equity_curve),
            max_consecutive_wins: streaks.max_wins,
            max_consecutive_losses: streaks.max_losses,
            current_streak: streaks.current,
            sharpe_ratio,
            sortino_ratio,
        }
    }
}

/// min over time of (equity - running_max) / running_max, times 100.
pub fn compute_max_drawdown_pct(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;

    for point in equity_curve {
        peak = peak.max(point.total_value);
        if peak > 0.0 {
            worst = worst.min((point.total_value - peak) / peak);
        }
    }

    worst * 100.0
}

#[derive(Debug, Default, PartialEq)]
struct Streaks {
    max_wins: usize,
    max_losses: usize,
    current: i64,
}

fn compute_streaks(pnls: &[f64]) -> Streaks {
    let mut streaks = Streaks::default();

    for &pnl in pnls {
        if pnl > 0.0 {
            streaks.current = if streaks.current > 0 {
                streaks.current + 1
            } else {
                1
            };
            streaks.max_wins = streaks.max_wins.max(streaks.current as usize);
        } else if pnl < 0.0 {
            streaks.current = if streaks.current < 0 {
                streaks.current - 1
            } else {
                -1
            };
            streaks.max_losses = streaks.max_losses.max(streaks.current.unsigned_abs() as usize);
        }
    }

    streaks
}

fn compute_risk_adjusted(equity_curve: &[EquityPoint], periods_per_year: f64) -> (f64, f64) {
    if equity_curve.len() < 2 || periods_per_year <= 0.0 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].total_value;
            if prev > 0.0 {
                (w[1].total_value - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;
    let annualizer = periods_per_year.sqrt();

    let sharpe = if returns.len() > 1 {
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let stddev = variance.sqrt();
        if stddev > 0.0 {
            mean / stddev * annualizer
        } else {
            0.0
        }
    } else {
        0.0
    };

    let downside_sq: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    let downside_stddev = (downside_sq / n).sqrt();
    let sortino = if downside_stddev > 0.0 {
        mean / downside_stddev * annualizer
    } else {
        0.0
    };

    (sharpe, sortino)
}
