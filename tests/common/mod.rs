#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tradesim::domain::backtest::BacktestConfig;
use tradesim::domain::decision::{Action, Decision, DecisionRequest};
use tradesim::domain::error::{DecisionSourceError, TradesimError};
pub use tradesim::domain::ohlcv::OhlcvBar;
use tradesim::domain::risk::RiskConfig;
use tradesim::domain::universe::Universe;
use tradesim::ports::data_port::DataPort;
use tradesim::ports::decision_port::DecisionSource;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<OhlcvBar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, ticker: &str, bars: Vec<OhlcvBar>) -> Self {
        self.data.insert(ticker.to_string(), bars);
        self
    }

    pub fn with_error(mut self, ticker: &str, reason: &str) -> Self {
        self.errors.insert(ticker.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        ticker: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<OhlcvBar>, TradesimError> {
        if let Some(reason) = self.errors.get(ticker) {
            return Err(TradesimError::Data {
                ticker: ticker.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(ticker)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.timestamp >= start && b.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_tickers(&self) -> Result<Vec<String>, TradesimError> {
        let mut tickers: Vec<String> = self.data.keys().cloned().collect();
        tickers.sort();
        Ok(tickers)
    }
}

/// Decision source driven by a closure over the request.
pub struct ScriptedSource<F> {
    id: String,
    script: F,
    pub calls: AtomicUsize,
}

impl<F> ScriptedSource<F>
where
    F: Fn(&DecisionRequest) -> Result<Decision, DecisionSourceError> + Send + Sync,
{
    pub fn new(id: &str, script: F) -> Self {
        Self {
            id: id.to_string(),
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> DecisionSource for ScriptedSource<F>
where
    F: Fn(&DecisionRequest) -> Result<Decision, DecisionSourceError> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_decision(
        &self,
        request: &DecisionRequest,
    ) -> Result<Decision, DecisionSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(request)
    }
}

/// Always returns the same decision.
pub struct FixedSource {
    pub id: String,
    pub action: Action,
    pub amount: f64,
    pub reason: String,
    pub strategy: String,
    pub confidence: f64,
}

impl FixedSource {
    pub fn new(id: &str, action: Action, amount: f64) -> Self {
        Self {
            id: id.to_string(),
            action,
            amount,
            reason: format!("{} {}", id, action),
            strategy: id.to_string(),
            confidence: 0.5,
        }
    }

    pub fn shared(id: &str, action: Action, amount: f64) -> Arc<dyn DecisionSource> {
        Arc::new(Self::new(id, action, amount))
    }
}

#[async_trait]
impl DecisionSource for FixedSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_decision(
        &self,
        _request: &DecisionRequest,
    ) -> Result<Decision, DecisionSourceError> {
        Ok(Decision::new(
            self.id.as_str(),
            self.action,
            self.amount,
            self.reason.as_str(),
            self.confidence,
            self.strategy.as_str(),
        )?)
    }
}

/// Replies with text that does not match the decision schema.
pub struct FailingSource {
    pub id: String,
}

#[async_trait]
impl DecisionSource for FailingSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_decision(
        &self,
        _request: &DecisionRequest,
    ) -> Result<Decision, DecisionSourceError> {
        Decision::from_json(&self.id, "I think you should probably buy")
    }
}

/// Sleeps before answering HOLD.
pub struct SlowSource {
    pub id: String,
    pub delay: Duration,
}

#[async_trait]
impl DecisionSource for SlowSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_decision(
        &self,
        _request: &DecisionRequest,
    ) -> Result<Decision, DecisionSourceError> {
        tokio::time::sleep(self.delay).await;
        Ok(Decision::hold(self.id.as_str(), "slow hold"))
    }
}

pub fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(ticker: &str, at: &str, close: f64) -> OhlcvBar {
    OhlcvBar {
        ticker: ticker.to_string(),
        timestamp: ts(at),
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1_000.0,
    }
}

/// Hourly bars starting at 2024-01-01 00:00, one per close.
pub fn bars_from_closes(ticker: &str, closes: &[f64]) -> Vec<OhlcvBar> {
    let start = ts("2024-01-01 00:00");
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| OhlcvBar {
            ticker: ticker.to_string(),
            timestamp: start + chrono::Duration::hours(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000.0,
        })
        .collect()
}

/// Hourly random-walk-free bars: a sine wave on a drift, so indicators move.
pub fn generate_bars(ticker: &str, count: usize, start_price: f64) -> Vec<OhlcvBar> {
    let start = ts("2024-01-01 00:00");
    (0..count)
        .map(|i| {
            let x = i as f64;
            let close = start_price + x * 0.1 + (x / 5.0).sin() * start_price * 0.04;
            OhlcvBar {
                ticker: ticker.to_string(),
                timestamp: start + chrono::Duration::hours(i as i64),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000.0 + (x / 3.0).cos().abs() * 500.0,
            }
        })
        .collect()
}

pub fn universe_of(series: Vec<(&str, Vec<OhlcvBar>)>) -> Universe {
    Universe::from_series(series.into_iter().map(|(t, bars)| (t.to_string(), bars)))
}

/// Defaults with risk exits disabled, so only scripted decisions trade.
pub fn quiet_config() -> BacktestConfig {
    BacktestConfig {
        risk: RiskConfig {
            stop_loss_pct: 0.0,
            take_profit_pct: 0.0,
        },
        ..BacktestConfig::default()
    }
}
