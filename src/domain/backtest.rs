//! Backtest driver and its run configuration.
//!
//! A run moves through Loading, Running, Liquidating and Done. Within a
//! tick the order is fixed: mark-to-market, forced risk exits, the decision
//! cycle, then one equity point. Each tick is applied to a scratch copy of
//! the ledger and committed only when it completes, so a run timeout never
//! leaves a partially applied tick behind.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::consensus;
use crate::domain::decision::{
    ask_source, Action, Decision, DecisionRequest, MarketContext, PortfolioState, PositionView,
};
use crate::domain::error::{LedgerError, TradesimError};
use crate::domain::indicator::IndicatorSnapshot;
use crate::domain::ledger::{EquityPoint, Ledger, Trade, TradeReason};
use crate::domain::metrics::Metrics;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::risk::{RiskConfig, RiskMonitor};
use crate::domain::sizing::{SizedOrder, SizingConfig};
use crate::domain::universe::{ExcludedTicker, Universe};
use crate::ports::decision_port::DecisionSource;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_cash: f64,
    /// Fraction of notional charged on every fill (0.001 = 0.1%).
    pub fee_rate: f64,
    /// Decisions are requested every this many ticks.
    pub decision_interval: usize,
    /// Ticks processed before the first decision cycle.
    pub warmup_ticks: usize,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub decision_timeout: Duration,
    pub run_timeout: Option<Duration>,
    /// Query all tickers' sources as concurrent tasks within a tick.
    pub concurrent_sources: bool,
    pub periods_per_year: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            start: NaiveDate::MIN,
            end: NaiveDate::MAX,
            initial_cash: 10_000.0,
            fee_rate: 0.001,
            decision_interval: 1,
            warmup_ticks: 0,
            risk: RiskConfig::default(),
            sizing: SizingConfig::default(),
            decision_timeout: Duration::from_secs(30),
            run_timeout: None,
            concurrent_sources: true,
            periods_per_year: 252.0,
        }
    }
}

impl BacktestConfig {
    /// Inclusive timestamp range covering `start` through the end of `end`.
    pub fn range(&self) -> (NaiveDateTime, NaiveDateTime) {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        (
            self.start.and_time(NaiveTime::MIN),
            self.end.and_time(end_of_day),
        )
    }

    pub fn is_decision_tick(&self, index: usize) -> bool {
        index >= self.warmup_ticks
            && (index - self.warmup_ticks) % self.decision_interval.max(1) == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Loading,
    Running,
    Liquidating,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Loading => write!(f, "LOADING"),
            RunState::Running => write!(f, "RUNNING"),
            RunState::Liquidating => write!(f, "LIQUIDATING"),
            RunState::Done => write!(f, "DONE"),
        }
    }
}

/// What became of the final decision for one ticker at one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Executed(Trade),
    Held,
    Skipped(String),
    Rejected(String),
    VoidedByRiskExit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub timestamp: NaiveDateTime,
    pub ticker: String,
    pub price: f64,
    /// One entry per source, in source order.
    pub decisions: Vec<Decision>,
    #[serde(rename = "final")]
    pub final_decision: Decision,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub tickers: Vec<String>,
    pub excluded: Vec<ExcludedTicker>,
    pub state: RunState,
    pub ticks_processed: usize,
    pub cancelled: bool,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub decisions: Vec<DecisionRecord>,
    pub metrics: Metrics,
    pub final_cash: f64,
}

struct Tick<'a> {
    index: usize,
    at: NaiveDateTime,
    prices: &'a HashMap<String, f64>,
    /// Tickers with a bar stamped exactly at this tick, in ticker order.
    fresh: &'a [String],
    is_final: bool,
}

struct TickOutput {
    records: Vec<DecisionRecord>,
    equity: EquityPoint,
}

pub struct Backtest {
    config: BacktestConfig,
    sources: Vec<Arc<dyn DecisionSource>>,
    risk: RiskMonitor,
}

impl Backtest {
    pub fn new(config: BacktestConfig, sources: Vec<Arc<dyn DecisionSource>>) -> Self {
        let risk = RiskMonitor::new(config.risk);
        Self {
            config,
            sources,
            risk,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub async fn run(&self, universe: Universe) -> Result<BacktestResult, TradesimError> {
        let mut state = RunState::Loading;
        if universe.is_empty() {
            return Err(TradesimError::NoUsableData {
                requested: universe.requested(),
            });
        }
        let tickers = universe.tickers();
        let Universe { series, excluded } = universe;

        let timeline: Vec<NaiveDateTime> = series
            .values()
            .flat_map(|bars| bars.iter().map(|b| b.timestamp))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        info!(
            tickers = tickers.len(),
            excluded = excluded.len(),
            ticks = timeline.len(),
            sources = self.sources.len(),
            initial_cash = self.config.initial_cash,
            "Backtest starting"
        );

        let deadline = self.config.run_timeout.map(|d| Instant::now() + d);
        let mut ledger = Ledger::new(self.config.initial_cash);
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(timeline.len());
        let mut decisions: Vec<DecisionRecord> = Vec::new();
        let mut prices: HashMap<String, f64> = HashMap::new();
        let mut cursors = vec![0usize; series.len()];
        let mut cancelled = false;

        transition(&mut state, RunState::Running);
        for (index, &at) in timeline.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(tick = %at, processed = equity_curve.len(), "Run timeout reached");
                cancelled = true;
                break;
            }

            let mut tick_prices = prices.clone();
            let mut fresh = Vec::new();
            for ((ticker, bars), cursor) in series.iter().zip(cursors.iter_mut()) {
                if let Some(bar) = bars.get(*cursor).filter(|b| b.timestamp == at) {
                    tick_prices.insert(ticker.clone(), bar.close);
                    fresh.push(ticker.clone());
                    *cursor += 1;
                }
            }

            let is_final = index + 1 == timeline.len();
            if is_final {
                transition(&mut state, RunState::Liquidating);
            }
            let tick = Tick {
                index,
                at,
                prices: &tick_prices,
                fresh: &fresh,
                is_final,
            };

            let mut working = ledger.clone();
            let step = self.step(&mut working, &series, &tick);
            let result = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, step).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(tick = %at, processed = equity_curve.len(), "Run timeout reached");
                        cancelled = true;
                        break;
                    }
                },
                None => step.await,
            };

            let output = result.map_err(|e| invariant_violation(e, &ledger))?;
            ledger = working;
            prices = tick_prices;
            decisions.extend(output.records);
            equity_curve.push(output.equity);
            debug!(
                tick = %at,
                cash = ledger.cash(),
                positions = ledger.position_count(),
                "Tick committed"
            );
        }

        if cancelled {
            transition(&mut state, RunState::Liquidating);
            if let Some(last) = equity_curve.last() {
                liquidate(&mut ledger, last.timestamp, &prices, self.config.fee_rate)
                    .map_err(|e| invariant_violation(e, &ledger))?;
            }
        }
        ledger
            .verify()
            .map_err(|e| invariant_violation(e, &ledger))?;
        transition(&mut state, RunState::Done);

        let metrics = Metrics::compute(
            ledger.trades(),
            &equity_curve,
            self.config.initial_cash,
            self.config.periods_per_year,
        );
        info!(
            ticks = equity_curve.len(),
            trades = metrics.total_trades,
            total_return_pct = metrics.total_return_pct,
            max_drawdown_pct = metrics.max_drawdown_pct,
            cancelled,
            "Backtest finished"
        );

        Ok(BacktestResult {
            tickers,
            excluded,
            state,
            ticks_processed: equity_curve.len(),
            cancelled,
            final_cash: ledger.cash(),
            trades: ledger.into_trades(),
            equity_curve,
            decisions,
            metrics,
        })
    }

    async fn step(
        &self,
        ledger: &mut Ledger,
        series: &BTreeMap<String, Vec<OhlcvBar>>,
        tick: &Tick<'_>,
    ) -> Result<TickOutput, LedgerError> {
        let fee_rate = self.config.fee_rate;
        ledger.mark_to_market(tick.prices);

        let forced = self.risk.enforce(ledger, tick.at, tick.prices, fee_rate)?;
        let voided: HashSet<&str> = forced.iter().map(|t| t.ticker.as_str()).collect();

        let mut records = Vec::new();
        if !tick.is_final && !self.sources.is_empty() && self.config.is_decision_tick(tick.index) {
            let requests = self.build_requests(ledger, series, tick);
            let verdicts = self.collect_decisions(&requests).await;

            for (request, decisions) in requests.into_iter().zip(verdicts) {
                let final_decision = match decisions.as_slice() {
                    [single] => single.clone(),
                    many => consensus::aggregate(many),
                };
                let outcome = if voided.contains(request.ticker.as_str()) {
                    debug!(
                        ticker = %request.ticker,
                        tick = %tick.at,
                        "Decision voided by forced exit"
                    );
                    Outcome::VoidedByRiskExit
                } else {
                    self.execute(ledger, &request, &final_decision)?
                };
                records.push(DecisionRecord {
                    timestamp: tick.at,
                    price: request.market.price,
                    ticker: request.ticker,
                    decisions,
                    final_decision,
                    outcome,
                });
            }
        }

        if tick.is_final {
            liquidate(ledger, tick.at, tick.prices, fee_rate)?;
        }
        ledger.verify()?;

        Ok(TickOutput {
            records,
            equity: EquityPoint {
                timestamp: tick.at,
                total_value: ledger.portfolio_value(tick.prices),
                cash: ledger.cash(),
            },
        })
    }

    fn build_requests(
        &self,
        ledger: &Ledger,
        series: &BTreeMap<String, Vec<OhlcvBar>>,
        tick: &Tick<'_>,
    ) -> Vec<DecisionRequest> {
        let total_value = ledger.portfolio_value(tick.prices);

        tick.fresh
            .iter()
            .filter_map(|ticker| {
                let bars = series.get(ticker)?;
                let market = MarketContext::at(bars, tick.at)?;
                let snapshot = IndicatorSnapshot::compute(bars, tick.at);
                let position = ledger.position(ticker).map(|p| PositionView {
                    shares: p.shares,
                    average_cost: p.average_cost,
                    unrealized_pnl: p.unrealized_pnl,
                    pnl_pct: p.pnl_pct(market.price) * 100.0,
                });
                Some(DecisionRequest {
                    ticker: ticker.clone(),
                    timestamp: tick.at,
                    portfolio: PortfolioState {
                        cash: ledger.cash(),
                        total_value,
                        max_investment: self
                            .config
                            .sizing
                            .max_investment(ledger.cash(), snapshot.atr_ratio()),
                        position,
                    },
                    snapshot,
                    market,
                })
            })
            .collect()
    }

    /// One decision per source for every request, in source order. All
    /// calls are joined before this returns.
    async fn collect_decisions(&self, requests: &[DecisionRequest]) -> Vec<Vec<Decision>> {
        let timeout = self.config.decision_timeout;

        if !self.config.concurrent_sources {
            let mut verdicts = Vec::with_capacity(requests.len());
            for request in requests {
                let mut decisions = Vec::with_capacity(self.sources.len());
                for source in &self.sources {
                    decisions.push(ask_source(source.as_ref(), request, timeout).await);
                }
                verdicts.push(decisions);
            }
            return verdicts;
        }

        let mut tasks = JoinSet::new();
        for (ri, request) in requests.iter().enumerate() {
            for (si, source) in self.sources.iter().enumerate() {
                let source = Arc::clone(source);
                let request = request.clone();
                tasks.spawn(async move {
                    let decision = ask_source(source.as_ref(), &request, timeout).await;
                    (ri, si, decision)
                });
            }
        }

        let mut slots: Vec<Vec<Option<Decision>>> =
            vec![vec![None; self.sources.len()]; requests.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ri, si, decision)) => slots[ri][si] = Some(decision),
                Err(e) => warn!(error = %e, "Decision task did not complete"),
            }
        }

        slots
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&self.sources)
                    .map(|(slot, source)| {
                        slot.unwrap_or_else(|| Decision::hold(source.id(), "Error: task aborted"))
                    })
                    .collect()
            })
            .collect()
    }

    fn execute(
        &self,
        ledger: &mut Ledger,
        request: &DecisionRequest,
        decision: &Decision,
    ) -> Result<Outcome, LedgerError> {
        let ticker = request.ticker.as_str();
        let price = request.market.price;
        let fee_rate = self.config.fee_rate;
        let sizing = &self.config.sizing;

        let order = match decision.action() {
            Action::Hold => return Ok(Outcome::Held),
            Action::Buy => sizing.size_buy(
                decision.amount(),
                price,
                ledger.cash(),
                request.snapshot.atr_ratio(),
                fee_rate,
            ),
            Action::Sell => sizing.size_sell(
                decision.amount(),
                ledger.position(ticker).map(|p| p.shares),
                price,
            ),
        };

        let reason = TradeReason::Decision(decision.reason().to_string());
        let at = request.timestamp;
        let filled = match order {
            SizedOrder::Skip { reason } => {
                debug!(ticker, action = %decision.action(), reason = %reason, "Order skipped");
                return Ok(Outcome::Skipped(reason));
            }
            SizedOrder::Buy { shares } => {
                match ledger.buy(at, ticker, shares, price, fee_rate, reason) {
                    Ok(trade) => {
                        self.arm_bracket(ledger, ticker)?;
                        Ok(trade)
                    }
                    Err(e) => Err(e),
                }
            }
            SizedOrder::Sell { shares } => ledger.sell(at, ticker, shares, price, fee_rate, reason),
        };

        match filled {
            Ok(trade) => {
                info!(
                    ticker,
                    action = %trade.action,
                    shares = trade.shares,
                    price = trade.price,
                    fee = trade.fee,
                    "Order filled"
                );
                Ok(Outcome::Executed(trade))
            }
            Err(e @ LedgerError::InvariantViolation { .. }) => Err(e),
            Err(e) => {
                warn!(ticker, error = %e, "Order rejected");
                Ok(Outcome::Rejected(e.to_string()))
            }
        }
    }

    fn arm_bracket(&self, ledger: &mut Ledger, ticker: &str) -> Result<(), LedgerError> {
        let Some(average_cost) = ledger.position(ticker).map(|p| p.average_cost) else {
            return Ok(());
        };
        let (stop_loss, take_profit) = self.risk.config().bracket_for(average_cost);
        ledger.set_bracket(ticker, stop_loss, take_profit)
    }
}

/// Close every open position, in ticker order, at `prices` or the last
/// marked price.
pub fn liquidate(
    ledger: &mut Ledger,
    at: NaiveDateTime,
    prices: &HashMap<String, f64>,
    fee_rate: f64,
) -> Result<Vec<Trade>, LedgerError> {
    let open: Vec<(String, f64)> = ledger
        .positions()
        .map(|p| {
            let price = prices.get(&p.ticker).copied().unwrap_or(p.last_price);
            (p.ticker.clone(), price)
        })
        .collect();

    open.into_iter()
        .map(|(ticker, price)| {
            info!(ticker = %ticker, price, "Liquidating position");
            ledger.close_position(at, &ticker, price, fee_rate, TradeReason::Liquidation)
        })
        .collect()
}

fn transition(state: &mut RunState, next: RunState) {
    if *state != next {
        debug!(from = %state, to = %next, "Run state");
        *state = next;
    }
}

fn invariant_violation(err: LedgerError, committed: &Ledger) -> TradesimError {
    error!(error = %err, cash = committed.cash(), "Ledger invariant violated, aborting");
    TradesimError::InvariantViolation {
        reason: err.to_string(),
        snapshot: Box::new(committed.snapshot()),
    }
}
