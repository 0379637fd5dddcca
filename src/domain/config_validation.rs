//! Run configuration validation.
//!
//! Every field is checked before a run starts. A key that is present but
//! unparseable is an error rather than a silent fallback to its default.

use chrono::NaiveDate;
use std::time::Duration;

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::TradesimError;
use crate::domain::risk::RiskConfig;
use crate::domain::sizing::{SizingConfig, VolatilityTier};
use crate::domain::universe::parse_tickers;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_DECISION_TIMEOUT_MS: i64 = 30_000;

/// Validate `[backtest]`, `[risk]`, `[sizing]` and the engine keys of
/// `[sources]`, returning the run configuration they describe.
pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, TradesimError> {
    let defaults = BacktestConfig::default();

    let tickers_raw = require(config, "backtest", "tickers")?;
    let tickers =
        parse_tickers(&tickers_raw).map_err(|e| invalid("backtest", "tickers", e.to_string()))?;

    let start = parse_date(config, "start")?;
    let end = parse_date(config, "end")?;
    if start > end {
        return Err(invalid("backtest", "start", "start must not be after end"));
    }

    let initial_cash = read_f64(config, "backtest", "initial_cash", defaults.initial_cash)?;
    if !(initial_cash > 0.0) {
        return Err(invalid("backtest", "initial_cash", "initial_cash must be positive"));
    }

    let fee_rate = read_f64(config, "backtest", "fee_rate", defaults.fee_rate)?;
    if !(0.0..1.0).contains(&fee_rate) {
        return Err(invalid("backtest", "fee_rate", "fee_rate must be in [0, 1)"));
    }

    let decision_interval = read_i64(config, "backtest", "decision_interval", 1)?;
    if decision_interval < 1 {
        return Err(invalid(
            "backtest",
            "decision_interval",
            "decision_interval must be at least 1",
        ));
    }

    let warmup_ticks = read_i64(config, "backtest", "warmup_ticks", 0)?;
    if warmup_ticks < 0 {
        return Err(invalid("backtest", "warmup_ticks", "warmup_ticks must be non-negative"));
    }

    let run_timeout_secs = read_i64(config, "backtest", "run_timeout_secs", 0)?;
    if run_timeout_secs < 0 {
        return Err(invalid(
            "backtest",
            "run_timeout_secs",
            "run_timeout_secs must be non-negative (0 disables it)",
        ));
    }

    let periods_per_year =
        read_f64(config, "backtest", "periods_per_year", defaults.periods_per_year)?;
    if !(periods_per_year > 0.0) {
        return Err(invalid(
            "backtest",
            "periods_per_year",
            "periods_per_year must be positive",
        ));
    }

    let decision_timeout_ms =
        read_i64(config, "sources", "decision_timeout_ms", DEFAULT_DECISION_TIMEOUT_MS)?;
    if decision_timeout_ms < 1 {
        return Err(invalid(
            "sources",
            "decision_timeout_ms",
            "decision_timeout_ms must be at least 1",
        ));
    }

    Ok(BacktestConfig {
        tickers,
        start,
        end,
        initial_cash,
        fee_rate,
        decision_interval: decision_interval as usize,
        warmup_ticks: warmup_ticks as usize,
        risk: validate_risk(config)?,
        sizing: validate_sizing(config)?,
        decision_timeout: Duration::from_millis(decision_timeout_ms as u64),
        run_timeout: (run_timeout_secs > 0).then(|| Duration::from_secs(run_timeout_secs as u64)),
        concurrent_sources: read_bool(
            config,
            "sources",
            "concurrent",
            defaults.concurrent_sources,
        )?,
        periods_per_year,
    })
}

fn validate_risk(config: &dyn ConfigPort) -> Result<RiskConfig, TradesimError> {
    let defaults = RiskConfig::default();

    let stop_loss_pct = read_f64(config, "risk", "stop_loss", defaults.stop_loss_pct)?;
    if !(0.0..1.0).contains(&stop_loss_pct) {
        return Err(invalid("risk", "stop_loss", "stop_loss must be in [0, 1)"));
    }
    let take_profit_pct = read_f64(config, "risk", "take_profit", defaults.take_profit_pct)?;
    if !(take_profit_pct >= 0.0) || !take_profit_pct.is_finite() {
        return Err(invalid("risk", "take_profit", "take_profit must be non-negative"));
    }

    Ok(RiskConfig {
        stop_loss_pct,
        take_profit_pct,
    })
}

fn validate_sizing(config: &dyn ConfigPort) -> Result<SizingConfig, TradesimError> {
    let defaults = SizingConfig::default();

    let tiers = match config.get_string("sizing", "tiers") {
        Some(raw) => parse_tiers(&raw).map_err(|reason| invalid("sizing", "tiers", reason))?,
        None => defaults.tiers,
    };

    let base_fraction = read_f64(config, "sizing", "base_fraction", defaults.base_fraction)?;
    if !(base_fraction > 0.0 && base_fraction <= 1.0) {
        return Err(invalid("sizing", "base_fraction", "base_fraction must be in (0, 1]"));
    }

    let min_trade_value = read_f64(config, "sizing", "min_trade_value", defaults.min_trade_value)?;
    if !(min_trade_value >= 0.0) {
        return Err(invalid(
            "sizing",
            "min_trade_value",
            "min_trade_value must be non-negative",
        ));
    }

    Ok(SizingConfig {
        tiers,
        base_fraction,
        min_trade_value,
        fractional_shares: read_bool(
            config,
            "backtest",
            "fractional_shares",
            defaults.fractional_shares,
        )?,
    })
}

/// `"5:0.20, 3:0.30"`: ATR as a percent of price, then the cash fraction
/// allowed above it.
pub fn parse_tiers(input: &str) -> Result<Vec<VolatilityTier>, String> {
    let mut tiers = Vec::new();
    for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (threshold, fraction) = token
            .split_once(':')
            .ok_or_else(|| format!("tier '{}' must look like ATR_PCT:FRACTION", token))?;
        let threshold: f64 = threshold
            .trim()
            .parse()
            .map_err(|_| format!("invalid ATR percent in '{}'", token))?;
        let fraction: f64 = fraction
            .trim()
            .parse()
            .map_err(|_| format!("invalid fraction in '{}'", token))?;
        if !(threshold >= 0.0) {
            return Err(format!("ATR percent in '{}' must be non-negative", token));
        }
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(format!("fraction in '{}' must be in (0, 1]", token));
        }
        tiers.push(VolatilityTier {
            min_atr_ratio: threshold / 100.0,
            max_fraction: fraction,
        });
    }
    Ok(tiers)
}

/// Comma-separated `[sources] list`; at least one name is required.
pub fn validate_source_list(config: &dyn ConfigPort) -> Result<Vec<String>, TradesimError> {
    let raw = require(config, "sources", "list")?;
    let names: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if names.is_empty() {
        return Err(invalid("sources", "list", "at least one source is required"));
    }
    Ok(names)
}

fn require(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, TradesimError> {
    config
        .get_string(section, key)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| TradesimError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        })
}

fn parse_date(config: &dyn ConfigPort, key: &str) -> Result<NaiveDate, TradesimError> {
    let raw = require(config, "backtest", key)?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        invalid(
            "backtest",
            key,
            format!("invalid {} format, expected YYYY-MM-DD", key),
        )
    })
}

fn read_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, TradesimError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(section, key, format!("'{}' is not a number", raw))),
    }
}

fn read_i64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<i64, TradesimError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(section, key, format!("'{}' is not an integer", raw))),
    }
}

fn read_bool(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: bool,
) -> Result<bool, TradesimError> {
    if config.get_string(section, key).is_none() {
        return Ok(default);
    }
    // Probe with both defaults: an unrecognised value echoes each back.
    let a = config.get_bool(section, key, true);
    let b = config.get_bool(section, key, false);
    if a == b {
        Ok(a)
    } else {
        Err(invalid(section, key, "expected true/false"))
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TradesimError {
    TradesimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}
