//! Trade decisions and the validated boundary to decision sources.
//!
//! A [`Decision`] can only be built through [`Decision::new`],
//! [`Decision::hold`] or [`Decision::from_json`], so every instance in the
//! engine satisfies the schema bounds.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::error::{DecisionError, DecisionSourceError};
use crate::domain::indicator::IndicatorSnapshot;
use crate::domain::ohlcv::{visible_len, OhlcvBar};
use crate::ports::decision_port::DecisionSource;

pub const MAX_REASON_LEN: usize = 300;
pub const MAX_STRATEGY_LEN: usize = 100;
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = DecisionSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(Action::Buy),
            "SELL" => Ok(Action::Sell),
            "HOLD" => Ok(Action::Hold),
            other => Err(DecisionSourceError::Malformed {
                reason: format!("unknown action '{}'", other),
            }),
        }
    }
}

/// One source's verdict for one ticker at one tick.
///
/// `amount` is a currency value for BUY, a percentage of the held position
/// for SELL (0 meaning all of it), and always 0 for HOLD.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    action: Action,
    amount: f64,
    reason: String,
    confidence: f64,
    strategy: String,
    source_id: String,
}

impl Decision {
    pub fn new(
        source_id: impl Into<String>,
        action: Action,
        amount: f64,
        reason: impl Into<String>,
        confidence: f64,
        strategy: impl Into<String>,
    ) -> Result<Self, DecisionError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(DecisionError::InvalidAmount(amount));
        }
        if action == Action::Sell && amount > 100.0 {
            return Err(DecisionError::SellPercentOutOfRange(amount));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DecisionError::InvalidConfidence(confidence));
        }
        let reason = reason.into();
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(DecisionError::TooLong {
                field: "reason",
                max: MAX_REASON_LEN,
            });
        }
        let strategy = strategy.into();
        if strategy.chars().count() > MAX_STRATEGY_LEN {
            return Err(DecisionError::TooLong {
                field: "strategy",
                max: MAX_STRATEGY_LEN,
            });
        }

        Ok(Self {
            action,
            amount: if action == Action::Hold { 0.0 } else { amount },
            reason,
            confidence,
            strategy,
            source_id: source_id.into(),
        })
    }

    /// A HOLD with the given reason, truncated to fit.
    pub fn hold(source_id: impl Into<String>, reason: &str) -> Self {
        Self {
            action: Action::Hold,
            amount: 0.0,
            reason: truncate_chars(reason, MAX_REASON_LEN),
            confidence: DEFAULT_CONFIDENCE,
            strategy: String::new(),
            source_id: source_id.into(),
        }
    }

    /// Parse the structured payload
    /// `{"action", "amount", "reason", "strategy", "confidence"}`.
    ///
    /// Text around the outermost JSON object is ignored. Over-long `reason`
    /// and `strategy` values are truncated rather than rejected.
    pub fn from_json(source_id: &str, text: &str) -> Result<Self, DecisionSourceError> {
        let body = extract_object(text).ok_or_else(|| DecisionSourceError::Malformed {
            reason: "no JSON object in response".to_string(),
        })?;
        let raw: RawDecision =
            serde_json::from_str(body).map_err(|e| DecisionSourceError::Malformed {
                reason: e.to_string(),
            })?;

        let action: Action = raw.action.parse()?;
        let decision = Decision::new(
            source_id,
            action,
            raw.amount.unwrap_or(0.0),
            truncate_chars(raw.reason.as_deref().unwrap_or(""), MAX_REASON_LEN),
            raw.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            truncate_chars(raw.strategy.as_deref().unwrap_or(""), MAX_STRATEGY_LEN),
        )?;
        Ok(decision)
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Open position as seen by a decision source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionView {
    pub shares: f64,
    pub average_cost: f64,
    pub unrealized_pnl: f64,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioState {
    pub cash: f64,
    pub total_value: f64,
    /// Largest BUY amount the sizing policy would accept right now.
    pub max_investment: f64,
    pub position: Option<PositionView>,
}

/// Short-horizon market facts at the current bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketContext {
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    /// Percent change over the last bar.
    pub price_change_1: f64,
    /// Percent change over the last four bars.
    pub price_change_4: f64,
    /// Current volume over the mean of the last ten bars.
    pub volume_ratio: f64,
}

pub const VOLUME_WINDOW: usize = 10;

impl MarketContext {
    /// Context at `now`; `None` when no bar is visible yet.
    pub fn at(bars: &[OhlcvBar], now: NaiveDateTime) -> Option<Self> {
        let history = &bars[..visible_len(bars, now)];
        let last = history.last()?;
        let n = history.len();

        let change = |lookback: usize| -> f64 {
            if n > lookback {
                let base = history[n - 1 - lookback].close;
                if base > 0.0 {
                    return (last.close - base) / base * 100.0;
                }
            }
            0.0
        };

        let window = &history[n.saturating_sub(VOLUME_WINDOW)..];
        let mean_volume = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;
        let volume_ratio = if mean_volume > 0.0 {
            last.volume / mean_volume
        } else {
            1.0
        };

        Some(Self {
            price: last.close,
            high: last.high,
            low: last.low,
            volume: last.volume,
            price_change_1: change(1),
            price_change_4: change(4),
            volume_ratio,
        })
    }
}

/// Everything a decision source is given for one ticker at one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRequest {
    pub ticker: String,
    pub timestamp: NaiveDateTime,
    pub snapshot: IndicatorSnapshot,
    pub portfolio: PortfolioState,
    pub market: MarketContext,
}

/// Query one source with a deadline. Any failure degrades to HOLD.
pub async fn ask_source(
    source: &dyn DecisionSource,
    request: &DecisionRequest,
    timeout: Duration,
) -> Decision {
    let outcome = match tokio::time::timeout(timeout, source.get_decision(request)).await {
        Ok(result) => result,
        Err(_) => Err(DecisionSourceError::Timeout {
            millis: timeout.as_millis(),
        }),
    };

    match outcome {
        Ok(decision) => {
            debug!(
                source = source.id(),
                ticker = %request.ticker,
                action = %decision.action(),
                amount = decision.amount(),
                "Decision received"
            );
            decision
        }
        Err(e) => {
            warn!(
                source = source.id(),
                ticker = %request.ticker,
                timestamp = %request.timestamp,
                error = %e,
                "Decision source failed, holding"
            );
            Decision::hold(source.id(), &format!("Error: {}", e))
        }
    }
}
