use super::{fit_with_search, Backend};
use crate::config::StrategyConfig;
use crate::estimator::{EstimatorFactory, EstimatorFamily};
use crate::models::{FittingResult, IndexPartition, ParamSet, ParamValue};
use crate::search::{ParamDistribution, ParameterSpace};
use anyhow::Result;

/// Tree depths tried by the forest and boosting searches; `Unbounded` grows full trees.
pub fn depth_choices() -> ParamDistribution {
    ParamDistribution::Choice(vec![
        ParamValue::Int(1),
        ParamValue::Int(2),
        ParamValue::Int(3),
        ParamValue::Unbounded,
    ])
}

pub fn estimator_count_range() -> ParamDistribution {
    ParamDistribution::IntRange { low: 2, high: 1000 }
}

/// Base parameters for estimators that fit their trees on every core.
pub fn all_cores() -> ParamSet {
    let mut params = ParamSet::new();
    params.insert("n_jobs".to_string(), ParamValue::Int(-1));
    params
}

pub struct RandomForestBackend;

impl RandomForestBackend {
    pub fn parameter_space() -> ParameterSpace {
        ParameterSpace::new()
            .with("n_estimators", estimator_count_range())
            .with("max_depth", depth_choices())
            .with("max_features", ParamDistribution::IntRange { low: 1, high: 5 })
    }
}

impl Backend for RandomForestBackend {
    fn name(&self) -> &str {
        "randomforest"
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
            EstimatorFamily::RandomForest,
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
