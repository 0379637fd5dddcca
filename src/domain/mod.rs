//! Core domain types and logic.

pub mod backtest;
pub mod config_validation;
pub mod consensus;
pub mod decision;
pub mod error;
pub mod indicator;
pub mod ledger;
pub mod metrics;
pub mod ohlcv;
pub mod risk;
pub mod sizing;
pub mod universe;
