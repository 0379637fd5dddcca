//! JSON report adapter implementing ReportPort.
//!
//! Writes the whole run result (trades, equity curve, decision log and
//! metrics) as pretty-printed JSON.

use std::fs;
use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::TradesimError;
use crate::ports::report_port::ReportPort;

#[derive(Debug, Default)]
pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, result: &BacktestResult) -> Result<String, TradesimError> {
        Ok(serde_json::to_string_pretty(result)?)
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, result: &BacktestResult, output_path: &Path) -> Result<(), TradesimError> {
        let json = self.render(result)?;
        fs::write(output_path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::{DecisionRecord, Outcome, RunState};
    use crate::domain::decision::Decision;
    use crate::domain::ledger::{EquityPoint, Trade, TradeAction, TradeReason};
    use crate::domain::metrics::Metrics;
    use crate::domain::universe::ExcludedTicker;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn sample_result() -> BacktestResult {
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let trade = Trade {
            timestamp: at,
            ticker: "BTC".into(),
            action: TradeAction::Sell,
            shares: 10.0,
            price: 48.5,
            fee: 0.485,
            realized_pnl: Some(-15.0),
            reason: TradeReason::StopLoss,
        };
        let equity = vec![EquityPoint {
            timestamp: at,
            total_value: 9_984.5,
            cash: 9_984.5,
        }];
        BacktestResult {
            tickers: vec!["BTC".into()],
            excluded: vec![ExcludedTicker {
                ticker: "ETH".into(),
                reason: "no bars in range".into(),
            }],
            state: RunState::Done,
            ticks_processed: 1,
            cancelled: false,
            metrics: Metrics::compute(std::slice::from_ref(&trade), &equity, 10_000.0, 252.0),
            trades: vec![trade],
            equity_curve: equity,
            decisions: vec![DecisionRecord {
                timestamp: at,
                ticker: "BTC".into(),
                price: 48.5,
                decisions: vec![Decision::hold("momentum", "No momentum signal")],
                final_decision: Decision::hold("momentum", "No momentum signal"),
                outcome: Outcome::VoidedByRiskExit,
            }],
            final_cash: 9_984.5,
        }
    }

    #[test]
    fn render_uses_wire_names() {
        let json = JsonReportAdapter::new().render(&sample_result()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["state"], "DONE");
        assert_eq!(value["trades"][0]["action"], "SELL");
        assert_eq!(value["trades"][0]["reason"]["kind"], "STOP_LOSS");
        assert_eq!(value["decisions"][0]["final"]["action"], "HOLD");
        assert_eq!(value["decisions"][0]["outcome"]["status"], "voided_by_risk_exit");
        assert_eq!(value["excluded"][0]["ticker"], "ETH");
        assert_eq!(value["metrics"]["sell_trades"], 1);
    }

    #[test]
    fn write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.json");

        JsonReportAdapter::new()
            .write(&sample_result(), &path)
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"final_cash\": 9984.5"));
    }

    #[test]
    fn write_to_missing_directory_is_io_error() {
        let result = JsonReportAdapter::new().write(
            &sample_result(),
            Path::new("/nonexistent/dir/result.json"),
        );
        assert!(matches!(result, Err(TradesimError::Io(_))));
    }
}
