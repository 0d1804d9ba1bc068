use super::{fit_with_search, Backend};
use crate::config::StrategyConfig;
use crate::estimator::{EstimatorFactory, EstimatorFamily};
use crate::models::{FittingResult, IndexPartition, ParamSet};
use crate::search::{ParamDistribution, ParameterSpace};
use anyhow::Result;

use super::random_forest::estimator_count_range;

pub const LEARNING_RATES: [f64; 4] = [0.1, 0.25, 0.5, 1.0];

pub struct AdaBoostBackend;

impl AdaBoostBackend {
    pub fn parameter_space() -> ParameterSpace {
        ParameterSpace::new()
            .with("learning_rate", ParamDistribution::choice(LEARNING_RATES))
            .with("n_estimators", estimator_count_range())
    }
}

impl Backend for AdaBoostBackend {
    fn name(&self) -> &str {
        "adaboost"
    }

    fn fit(
        &self,
        inputs: &[Vec<f64>],
        targets: &[f64],
        partition: &IndexPartition,
        config: &StrategyConfig,
        factory: &dyn EstimatorFactory,
    ) -> Result<(FittingResult, f64)> {
        fit_with_search(
            EstimatorFamily::AdaBoost,
            Self::parameter_space(),
            &ParamSet::new(),
            inputs,
            targets,
            partition,
            config,
            factory,
        )
    }
}
