use super::import_data_or_exit;
use crate::config::StrategyConfig;
use crate::estimator::EstimatorFactory;
use crate::features::input_processing;
use crate::scan::{fit_strategy, CycleOutcome};
use anyhow::Result;
use log::info;

pub fn run(config: &StrategyConfig, factory: &dyn EstimatorFactory) -> Result<CycleOutcome> {
    let (data_1, data_2) = import_data_or_exit(config);
    let variables = input_processing(&data_1, &data_2, config)?;
    info!(
        "Prepared {} rows x {} features",
        variables.len(),
        variables.inputs.first().map_or(0, Vec::len)
    );

    let outcome = fit_strategy(config, &variables, factory)?;
    info!(
        "Fit complete: error={:.8} profit_fraction={:.6}",
        outcome.result.error, outcome.profit_fraction
    );
    Ok(outcome)
}
