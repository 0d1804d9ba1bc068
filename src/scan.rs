use crate::config::{RegressionMode, StrategyConfig};
use crate::estimator::EstimatorFactory;
use crate::features::TrainingVariables;
use crate::fitting::meta_fit;
use crate::models::FittingResult;
use crate::reporting::{
    output_strategy_results, post_process_training_results, EvaluationData, Timer,
};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

/// What one full fit-evaluate cycle hands back to the scan.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub result: FittingResult,
    pub profit_fraction: f64,
}

/// Running totals of an offset scan.
///
/// Errors are averaged over the planned number of offsets while profits are summed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScanTotals {
    pub total_error: f64,
    pub total_profit: f64,
    offsets: usize,
}

impl ScanTotals {
    pub fn new(offsets: usize) -> Self {
        Self {
            total_error: 0.0,
            total_profit: 0.0,
            offsets,
        }
    }

    pub fn record(&mut self, error: f64, profit_fraction: f64) {
        self.total_error += error / self.offsets.max(1) as f64;
        self.total_profit += profit_fraction;
    }

    pub fn average_error(&self) -> f64 {
        self.total_error
    }

    pub fn print(&self) {
        println!("Averages:\n----------------------\n");
        println!("Total profit: {}", self.total_profit);
        println!("Average error: {}", self.average_error());
    }
}

/// One fit on prepared training variables: meta-fit, post-process, report.
pub fn fit_strategy(
    config: &StrategyConfig,
    variables: &TrainingVariables,
    factory: &dyn EstimatorFactory,
) -> Result<CycleOutcome> {
    let timer = Timer::tic();
    let targets =
        variables.targets(config.regression_mode == RegressionMode::Classification);

    let result = meta_fit(&variables.inputs, targets, config, factory)?;
    let report =
        post_process_training_results(config, &result, &EvaluationData::from(variables))?;
    let profit_fraction = output_strategy_results(config, &report, &timer);

    Ok(CycleOutcome {
        result,
        profit_fraction,
    })
}

/// Re-runs `cycle` once per offset, each time on a configuration copy that differs only
/// in `offset` (with output forced on), and prints the aggregate.
///
/// A failing cycle aborts the scan.
pub fn offset_scan_validation<F>(
    config: &StrategyConfig,
    offsets: &[i64],
    mut cycle: F,
) -> Result<ScanTotals>
where
    F: FnMut(&StrategyConfig) -> Result<CycleOutcome>,
{
    let mut totals = ScanTotals::new(offsets.len());
    if offsets.is_empty() {
        warn!("Offset scan requested with no offsets");
    }

    let pb = ProgressBar::new(offsets.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} offsets ({eta})")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );

    for offset in offsets {
        let iteration = StrategyConfig {
            output_flag: true,
            ..config.with_offset(*offset)
        };
        info!("Offset scan: offset {} days", offset);
        let outcome = pb
            .suspend(|| cycle(&iteration))
            .with_context(|| format!("Offset scan failed at offset {}", offset))?;
        totals.record(outcome.result.error, outcome.profit_fraction);
        pb.inc(1);
    }
    pb.finish_and_clear();

    totals.print();
    Ok(totals)
}
