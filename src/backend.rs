use crate::config::{MlMode, StrategyConfig};
use crate::error::FittingError;
use crate::estimator::{Estimator, EstimatorFactory, EstimatorFamily, EstimatorKind, EstimatorRequest};
use crate::metrics::mean_squared_error;
use crate::models::{FittingResult, IndexPartition, ModelReference, ParamSet};
use crate::partition::{select_rows, select_values};
use crate::search::{ParameterSpace, RandomizedSearch};
use anyhow::{anyhow, Context, Result};
use log::info;

/// A learning backend selectable through `ml_mode`.
///
/// Implementations train on `partition.train` only and predict every segment with the
/// same fitted estimator. The returned error equals `FittingResult::error`.
pub trait Backend {
    fn name(&self) -> &str;
    fn fit(
        &self,
        inputs: &[Vec<f64>],
        targets: &[f64],
        partition: &IndexPartition,
        config: &StrategyConfig,
        factory: &dyn EstimatorFactory,
    ) -> Result<(FittingResult, f64)>;
}

#[path = "backends/svm.rs"]
pub mod svm;

pub use svm::SvmBackend;

#[path = "backends/random_forest.rs"]
pub mod random_forest;

pub use random_forest::RandomForestBackend;

#[path = "backends/adaboost.rs"]
pub mod adaboost;

pub use adaboost::AdaBoostBackend;

#[path = "backends/gradient_boosting.rs"]
pub mod gradient_boosting;

pub use gradient_boosting::GradientBoostingBackend;

#[path = "backends/extra_trees.rs"]
pub mod extra_trees;

pub use extra_trees::ExtraTreesBackend;

#[path = "backends/neural.rs"]
pub mod neural;

pub use neural::{DenseNetworkBackend, SequenceNetworkBackend};

pub fn create_backend(mode: MlMode, config: &StrategyConfig) -> Box<dyn Backend> {
    match mode {
        MlMode::Svm => Box::new(SvmBackend),
        MlMode::RandomForest => Box::new(RandomForestBackend),
        MlMode::AdaBoost => Box::new(AdaBoostBackend),
        MlMode::GradientBoosting => Box::new(GradientBoostingBackend),
        MlMode::ExtraTrees => Box::new(ExtraTreesBackend),
        MlMode::Neural if config.neural.sequence_flag => Box::new(SequenceNetworkBackend),
        MlMode::Neural => Box::new(DenseNetworkBackend),
    }
}

pub(crate) fn search_for(space: ParameterSpace, config: &StrategyConfig) -> RandomizedSearch {
    let seed = config.search_seed.unwrap_or_else(rand::random);
    RandomizedSearch::new(space)
        .with_iterations(config.search_iterations)
        .with_folds(config.search_folds)
        .with_seed(seed)
        .with_threads(config.worker_threads())
}

/// Runs the randomized search on the training rows, then predicts every segment with
/// the refit winner. The search report becomes the result's model reference.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fit_with_search(
    family: EstimatorFamily,
    space: ParameterSpace,
    base_params: &ParamSet,
    inputs: &[Vec<f64>],
    targets: &[f64],
    partition: &IndexPartition,
    config: &StrategyConfig,
    factory: &dyn EstimatorFactory,
) -> Result<(FittingResult, f64)> {
    if partition.train.is_empty() {
        return Err(FittingError::EmptyTrainingSegment.into());
    }
    let kind = EstimatorKind::from(config.regression_mode);
    let train_inputs = select_rows(inputs, &partition.train);
    let train_targets = select_values(targets, &partition.train);

    let outcome = search_for(space, config)
        .fit(
            factory,
            family,
            kind,
            base_params,
            &train_inputs,
            &train_targets,
        )
        .with_context(|| format!("{} hyperparameter search failed", family.label()))?;

    let mut result = predict_segments(outcome.estimator.as_ref(), inputs, targets, partition)?;
    result.model = ModelReference::Search(outcome.report);
    let error = result.error;
    Ok((result, error))
}

/// Trains one estimator with fixed hyperparameters on the training rows.
pub(crate) fn fit_fixed(
    request: EstimatorRequest,
    inputs: &[Vec<f64>],
    targets: &[f64],
    partition: &IndexPartition,
    factory: &dyn EstimatorFactory,
) -> Result<(FittingResult, f64)> {
    if partition.train.is_empty() {
        return Err(FittingError::EmptyTrainingSegment.into());
    }
    info!(
        "Training {} {} on {} rows",
        request.family.label(),
        request.kind.label(),
        partition.train.len()
    );

    let mut estimator = factory.create(&request)?;
    estimator
        .fit(
            &select_rows(inputs, &partition.train),
            &select_values(targets, &partition.train),
        )
        .with_context(|| format!("{} training failed", request.family.label()))?;

    let mut result = predict_segments(estimator.as_ref(), inputs, targets, partition)?;
    result.model = ModelReference::Fixed {
        family: request.family,
        params: request.params,
    };
    let error = result.error;
    Ok((result, error))
}

/// Predicts the train, test and validation segments with a fitted estimator.
///
/// When the test segment is empty neither test nor validation rows are predicted.
pub fn predict_segments(
    estimator: &dyn Estimator,
    inputs: &[Vec<f64>],
    targets: &[f64],
    partition: &IndexPartition,
) -> Result<FittingResult> {
    let predict = |indices: &[usize]| -> Result<Vec<f64>> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        let predictions = estimator.predict(&select_rows(inputs, indices))?;
        if predictions.len() != indices.len() {
            return Err(anyhow!(
                "estimator returned {} predictions for {} rows",
                predictions.len(),
                indices.len()
            ));
        }
        Ok(predictions)
    };

    let training_strategy_score = predict(&partition.train)?;
    let error = mean_squared_error(
        &select_values(targets, &partition.train),
        &training_strategy_score,
    );

    let (fitted_strategy_score, validation_strategy_score) = if partition.test.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        (predict(&partition.test)?, predict(&partition.validation)?)
    };

    Ok(FittingResult {
        training_strategy_score,
        fitted_strategy_score,
        validation_strategy_score,
        error,
        partition: partition.clone(),
        model: ModelReference::None,
    })
}
