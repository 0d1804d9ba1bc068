use crate::backend::create_backend;
use crate::config::StrategyConfig;
use crate::error::FittingError;
use crate::estimator::EstimatorFactory;
use crate::models::FittingResult;
use crate::partition::train_test_validation_indices;
use anyhow::Result;
use log::info;

/// Fits the backend selected by `config.ml_mode` on one dataset.
///
/// The partition is computed once here and is the one every segment is predicted with;
/// it is returned alongside the predictions together with the training error.
pub fn meta_fit(
    inputs: &[Vec<f64>],
    targets: &[f64],
    config: &StrategyConfig,
    factory: &dyn EstimatorFactory,
) -> Result<FittingResult> {
    if inputs.len() != targets.len() {
        return Err(FittingError::LengthMismatch {
            inputs: inputs.len(),
            targets: targets.len(),
        }
        .into());
    }

    let partition = train_test_validation_indices(inputs.len(), &config.train_test_validation_ratios)?;
    let backend = create_backend(config.ml_mode, config);
    info!(
        "Fitting {} ({}) on {} rows: train={} test={} validation={}",
        backend.name(),
        config.regression_mode.label(),
        inputs.len(),
        partition.train.len(),
        partition.test.len(),
        partition.validation.len()
    );

    let (mut result, error) = backend.fit(inputs, targets, &partition, config, factory)?;
    result.partition = partition;
    result.error = error;
    info!("{} training error: {:.8}", backend.name(), error);
    Ok(result)
}
