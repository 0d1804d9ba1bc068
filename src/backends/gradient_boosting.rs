use super::adaboost::LEARNING_RATES;
use super::random_forest::{depth_choices, estimator_count_range};
use super::{fit_with_search, Backend};
use crate::config::StrategyConfig;
use crate::estimator::{EstimatorFactory, EstimatorFamily};
use crate::models::{FittingResult, IndexPartition, ParamSet};
use crate::search::{ParamDistribution, ParameterSpace};
use anyhow::Result;

pub struct GradientBoostingBackend;

impl GradientBoostingBackend {
    pub fn parameter_space() -> ParameterSpace {
        ParameterSpace::new()
            .with("n_estimators", estimator_count_range())
            .with("max_depth", depth_choices())
            .with("learning_rate", ParamDistribution::choice(LEARNING_RATES))
    }
}

impl Backend for GradientBoostingBackend {
    fn name(&self) -> &str {
        "gradientboosting"
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
            EstimatorFamily::GradientBoosting,
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
