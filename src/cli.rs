//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::adapters::technical_source::{Profile, TechnicalDecisionSource};
use crate::domain::backtest::{Backtest, BacktestConfig, BacktestResult};
use crate::domain::config_validation::{validate_backtest_config, validate_source_list};
use crate::domain::error::TradesimError;
use crate::domain::universe::load_universe;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::decision_port::DecisionSource;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "tradesim", about = "Deterministic multi-source trading backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overrides [data] directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Validate a run configuration
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List tickers with CSV data
    ListTickers {
        #[arg(long)]
        data_dir: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            output,
            data_dir,
        } => run_backtest(&config, output.as_deref(), data_dir.as_deref()),
        Command::Validate { config } => run_validate(&config),
        Command::ListTickers { data_dir } => run_list_tickers(&data_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, TradesimError> {
    info!(path = %path.display(), "Loading config");
    FileConfigAdapter::from_file(path)
}

/// Instantiate the named built-in sources, in order.
pub fn build_sources(names: &[String]) -> Result<Vec<Arc<dyn DecisionSource>>, TradesimError> {
    names
        .iter()
        .map(|name| {
            let profile: Profile = name.parse().map_err(|reason| TradesimError::ConfigInvalid {
                section: "sources".into(),
                key: "list".into(),
                reason,
            })?;
            Ok(Arc::new(TechnicalDecisionSource::new(profile)) as Arc<dyn DecisionSource>)
        })
        .collect()
}

pub fn resolve_data_dir(
    data_dir_override: Option<&Path>,
    config: &dyn ConfigPort,
) -> Result<PathBuf, TradesimError> {
    if let Some(dir) = data_dir_override {
        return Ok(dir.to_path_buf());
    }
    config
        .get_string("data", "directory")
        .filter(|s| !s.trim().is_empty())
        .map(|s| PathBuf::from(s.trim()))
        .ok_or_else(|| TradesimError::ConfigMissing {
            section: "data".into(),
            key: "directory".into(),
        })
}

fn run_backtest(
    config_path: &Path,
    output_path: Option<&Path>,
    data_dir_override: Option<&Path>,
) -> Result<(), TradesimError> {
    let adapter = load_config(config_path)?;
    let bt_config = validate_backtest_config(&adapter)?;
    let sources = build_sources(&validate_source_list(&adapter)?)?;
    let data_dir = resolve_data_dir(data_dir_override, &adapter)?;

    let data_port = CsvAdapter::new(data_dir);
    let result = run_backtest_pipeline(&data_port, bt_config, sources)?;

    print_summary(&result);

    if let Some(output) = output_path {
        JsonReportAdapter::new().write(&result, output)?;
        eprintln!("Result written to: {}", output.display());
    }
    Ok(())
}

/// Load the universe through `data_port` and run the engine to completion.
pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    config: BacktestConfig,
    sources: Vec<Arc<dyn DecisionSource>>,
) -> Result<BacktestResult, TradesimError> {
    let (start, end) = config.range();
    let universe = load_universe(data_port, &config.tickers, start, end);
    if universe.is_empty() {
        return Err(TradesimError::NoUsableData {
            requested: universe.requested(),
        });
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let backtest = Backtest::new(config, sources);
    runtime.block_on(backtest.run(universe))
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;

    println!("=== Backtest Results ===");
    println!("Tickers:          {}", result.tickers.join(", "));
    for excluded in &result.excluded {
        println!("Excluded:         {} ({})", excluded.ticker, excluded.reason);
    }
    println!("Ticks:            {}", result.ticks_processed);
    if result.cancelled {
        println!("Status:           cancelled by run timeout");
    }
    println!("Initial Equity:   {:.2}", m.initial_equity);
    println!("Final Equity:     {:.2}", m.final_equity);
    println!("Total Return:     {:.2}%", m.total_return_pct);
    println!("Max Drawdown:     {:.2}%", m.max_drawdown_pct);
    println!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    println!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    println!(
        "Trades:           {} ({} buy / {} sell)",
        m.total_trades, m.buy_trades, m.sell_trades
    );
    println!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    println!("Profit Factor:    {:.2}", m.profit_factor);
    println!("Total Fees:       {:.2}", m.total_fees);
}

fn run_validate(config_path: &Path) -> Result<(), TradesimError> {
    let adapter = load_config(config_path)?;
    let bt_config = validate_backtest_config(&adapter)?;
    let sources = build_sources(&validate_source_list(&adapter)?)?;

    println!("Configuration is valid.");
    println!("  Tickers:  {}", bt_config.tickers.join(", "));
    println!("  Range:    {} to {}", bt_config.start, bt_config.end);
    println!(
        "  Sources:  {}",
        sources.iter().map(|s| s.id()).collect::<Vec<_>>().join(", ")
    );
    Ok(())
}

fn run_list_tickers(data_dir: &Path) -> Result<(), TradesimError> {
    let tickers = CsvAdapter::new(data_dir.to_path_buf()).list_tickers()?;
    if tickers.is_empty() {
        eprintln!("No CSV series found in {}", data_dir.display());
    }
    for ticker in tickers {
        println!("{}", ticker);
    }
    Ok(())
}
