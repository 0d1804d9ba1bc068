use anyhow::Result;
use candlefit::{
    commands::{export_data, fit, scan},
    config::{MlMode, RegressionMode, StrategyConfig},
    external::CommandEstimatorFactory,
};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "strategy.json";
const DEFAULT_EXPORT_DIR: &str = "data";

#[derive(Parser)]
#[command(name = "candlefit")]
#[command(about = "Fit machine-learning trading strategies on candle data and backtest them")]
struct Cli {
    /// Strategy configuration file (JSON)
    #[arg(short, long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Backend to fit (svm, randomforest, adaboost, gradientboosting, extratreesfitting, neural)
    #[arg(long, global = true)]
    ml_mode: Option<MlMode>,
    /// Target encoding (regression or classification)
    #[arg(long, global = true)]
    regression_mode: Option<RegressionMode>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the configured backend once and print the strategy summary
    Fit {
        /// Days between the end of the data window and now (or the last candle on file)
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Re-run the full fit cycle for each offset and print averaged results
    Scan {
        /// Comma or space separated offsets in days (defaults to `offsets` from the config)
        #[arg(value_delimiter = ',', num_args = 0..)]
        offsets: Vec<i64>,
    },
    /// Export raw candles of both configured assets as snapshot files
    ExportData {
        /// Destination directory for the snapshots
        #[arg(short, long = "output", value_name = "DIR", default_value = DEFAULT_EXPORT_DIR)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli {
        config: config_path,
        ml_mode,
        regression_mode,
        command,
    } = Cli::parse();

    let mut config = StrategyConfig::load(&config_path)?;
    if let Some(mode) = ml_mode {
        config.ml_mode = mode;
    }
    if let Some(mode) = regression_mode {
        config.regression_mode = mode;
    }
    info!(
        "Loaded {} (ml_mode={}, regression_mode={})",
        config_path.display(),
        config.ml_mode.key(),
        config.regression_mode.label()
    );

    match command {
        Commands::Fit { offset } => {
            if let Some(offset) = offset {
                config = config.with_offset(offset);
            }
            let factory = CommandEstimatorFactory::from_tools(&config.estimators);
            fit::run(&config, &factory)?;
        }
        Commands::Scan { offsets } => {
            let offsets = if offsets.is_empty() {
                config.offsets.clone()
            } else {
                offsets
            };
            if offsets.is_empty() {
                warn!("No offsets given on the command line or in the config; nothing to scan");
            }
            let factory = CommandEstimatorFactory::from_tools(&config.estimators);
            scan::run(&config, &offsets, &factory)?;
        }
        Commands::ExportData { output } => {
            let written = export_data::run(&config, &output)?;
            for path in written {
                println!("Saved snapshot to {}", path.display());
            }
        }
    }

    Ok(())
}
