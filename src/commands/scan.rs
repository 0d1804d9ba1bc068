use super::import_data_or_exit;
use crate::config::StrategyConfig;
use crate::estimator::EstimatorFactory;
use crate::features::input_processing;
use crate::scan::{fit_strategy, offset_scan_validation, ScanTotals};
use anyhow::Result;

/// Full cycle per offset: every offset re-imports its own data window.
pub fn run(
    config: &StrategyConfig,
    offsets: &[i64],
    factory: &dyn EstimatorFactory,
) -> Result<ScanTotals> {
    offset_scan_validation(config, offsets, |iteration| {
        let (data_1, data_2) = import_data_or_exit(iteration);
        let variables = input_processing(&data_1, &data_2, iteration)?;
        fit_strategy(iteration, &variables, factory)
    })
}
