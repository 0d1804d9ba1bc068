use super::random_forest::{all_cores, depth_choices, estimator_count_range};
use super::{fit_with_search, Backend};
use crate::config::StrategyConfig;
use crate::estimator::{EstimatorFactory, EstimatorFamily};
use crate::models::{FittingResult, IndexPartition};
use crate::search::ParameterSpace;
use anyhow::Result;

pub struct ExtraTreesBackend;

impl ExtraTreesBackend {
    pub fn parameter_space() -> ParameterSpace {
        ParameterSpace::new()
            .with("n_estimators", estimator_count_range())
            .with("max_depth", depth_choices())
    }
}

impl Backend for ExtraTreesBackend {
    fn name(&self) -> &str {
        "extratreesfitting"
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
            EstimatorFamily::ExtraTrees,
            Self::parameter_space(),
            &all_cores(),
            inputs,
            targets,
            partition,
            config,
            factory,
        )
    }
}
