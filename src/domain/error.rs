//! Domain error types.

use crate::domain::ledger::LedgerSnapshot;

/// Rejection reasons for a single ledger operation. All of these except
/// `InvariantViolation` leave the ledger untouched and are recoverable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds for {ticker}: need {required:.2}, have {available:.2}")]
    InsufficientFunds {
        ticker: String,
        required: f64,
        available: f64,
    },

    #[error("no open position in {ticker}")]
    NoPosition { ticker: String },

    #[error("oversell of {ticker}: requested {requested}, held {held}")]
    OverSell {
        ticker: String,
        requested: f64,
        held: f64,
    },

    #[error("invalid order for {ticker}: {reason}")]
    InvalidOrder { ticker: String, reason: String },

    #[error("ledger invariant violated: {reason}")]
    InvariantViolation { reason: String },
}

/// Schema violations when constructing a [`Decision`](crate::domain::decision::Decision).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecisionError {
    #[error("amount must be a finite non-negative number, got {0}")]
    InvalidAmount(f64),

    #[error("SELL amount is a percentage and must be at most 100, got {0}")]
    SellPercentOutOfRange(f64),

    #[error("confidence must be within [0, 1], got {0}")]
    InvalidConfidence(f64),

    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
}

/// Failure of a decision source call. Never fatal: the driver substitutes HOLD.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecisionSourceError {
    #[error("decision source timed out after {millis} ms")]
    Timeout { millis: u128 },

    #[error("malformed decision payload: {reason}")]
    Malformed { reason: String },

    #[error("decision source unavailable: {reason}")]
    Unavailable { reason: String },

    #[error(transparent)]
    Invalid(#[from] DecisionError),
}

/// Why a ticker's bar series cannot be used for a run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataGap {
    #[error("no bars in range")]
    Empty,

    #[error("timestamps not strictly increasing at bar {index}")]
    NonMonotonic { index: usize },

    #[error("non-positive or non-finite price at bar {index}")]
    InvalidPrice { index: usize },

    #[error("data unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Top-level error type for tradesim.
#[derive(Debug, thiserror::Error)]
pub enum TradesimError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error for {ticker}: {reason}")]
    Data { ticker: String, reason: String },

    #[error("no usable data: all {requested} tickers were excluded")]
    NoUsableData { requested: usize },

    #[error("run aborted, ledger invariant violated: {reason}")]
    InvariantViolation {
        reason: String,
        snapshot: Box<LedgerSnapshot>,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&TradesimError> for std::process::ExitCode {
    fn from(err: &TradesimError) -> Self {
        let code: u8 = match err {
            TradesimError::Io(_) | TradesimError::Json(_) => 1,
            TradesimError::ConfigParse { .. }
            | TradesimError::ConfigMissing { .. }
            | TradesimError::ConfigInvalid { .. } => 2,
            TradesimError::Data { .. } => 3,
            TradesimError::NoUsableData { .. } => 5,
            TradesimError::InvariantViolation { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::ExitCode;

    #[test]
    fn config_errors_share_exit_code() {
        let missing = TradesimError::ConfigMissing {
            section: "backtest".into(),
            key: "tickers".into(),
        };
        let invalid = TradesimError::ConfigInvalid {
            section: "risk".into(),
            key: "stop_loss".into(),
            reason: "must be positive".into(),
        };
        assert_eq!(ExitCode::from(&missing), ExitCode::from(2));
        assert_eq!(ExitCode::from(&invalid), ExitCode::from(2));
    }

    #[test]
    fn no_usable_data_exit_code() {
        let err = TradesimError::NoUsableData { requested: 3 };
        assert_eq!(ExitCode::from(&err), ExitCode::from(5));
        assert_eq!(err.to_string(), "no usable data: all 3 tickers were excluded");
    }

    #[test]
    fn decision_error_converts_into_source_error() {
        let err: DecisionSourceError = DecisionError::InvalidConfidence(1.5).into();
        assert_eq!(
            err.to_string(),
            "confidence must be within [0, 1], got 1.5"
        );
    }

    #[test]
    fn ledger_error_display() {
        let err = LedgerError::OverSell {
            ticker: "BTC".into(),
            requested: 2.0,
            held: 1.0,
        };
        assert_eq!(err.to_string(), "oversell of BTC: requested 2, held 1");
    }
}
