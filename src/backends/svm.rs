use super::{fit_with_search, Backend};
use crate::config::StrategyConfig;
use crate::estimator::{EstimatorFactory, EstimatorFamily};
use crate::models::{FittingResult, IndexPartition, ParamSet};
use crate::search::{ParamDistribution, ParameterSpace};
use anyhow::Result;

const EXPONENTIAL_SCALE: f64 = 0.01;

pub struct SvmBackend;

impl SvmBackend {
    pub fn parameter_space() -> ParameterSpace {
        ParameterSpace::new()
            .with(
                "C",
                ParamDistribution::Exponential {
                    scale: EXPONENTIAL_SCALE,
                },
            )
            .with(
                "gamma",
                ParamDistribution::Exponential {
                    scale: EXPONENTIAL_SCALE,
                },
            )
            .with("kernel", ParamDistribution::choice(["rbf"]))
    }
}

impl Backend for SvmBackend {
    fn name(&self) -> &str {
        "svm"
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
            EstimatorFamily::Svm,
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
