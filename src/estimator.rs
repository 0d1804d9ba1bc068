//! The seam between the fitting harness and whatever numerical library trains models.

use crate::config::RegressionMode;
use crate::models::{ParamSet, ParamValue};
use anyhow::Result;
use serde::Serialize;

/// Estimator families the backends know how to request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EstimatorFamily {
    Svm,
    RandomForest,
    AdaBoost,
    GradientBoosting,
    ExtraTrees,
    DenseNetwork,
    SequenceNetwork,
}

impl EstimatorFamily {
    pub fn label(self) -> &'static str {
        match self {
            Self::Svm => "svm",
            Self::RandomForest => "random_forest",
            Self::AdaBoost => "adaboost",
            Self::GradientBoosting => "gradient_boosting",
            Self::ExtraTrees => "extra_trees",
            Self::DenseNetwork => "dnn",
            Self::SequenceNetwork => "lstm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EstimatorKind {
    Regressor,
    Classifier,
}

impl EstimatorKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Regressor => "regressor",
            Self::Classifier => "classifier",
        }
    }
}

impl From<RegressionMode> for EstimatorKind {
    fn from(mode: RegressionMode) -> Self {
        match mode {
            RegressionMode::Regression => Self::Regressor,
            RegressionMode::Classification => Self::Classifier,
        }
    }
}

/// Everything needed to construct one untrained estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorRequest {
    pub family: EstimatorFamily,
    pub kind: EstimatorKind,
    pub params: ParamSet,
}

impl EstimatorRequest {
    pub fn new(family: EstimatorFamily, kind: EstimatorKind) -> Self {
        Self {
            family,
            kind,
            params: ParamSet::new(),
        }
    }

    pub fn with_params(mut self, params: &ParamSet) -> Self {
        for (key, value) in params {
            self.params.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn with_param<V: Into<ParamValue>>(mut self, key: &str, value: V) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }
}

pub trait Estimator: Send {
    fn fit(&mut self, inputs: &[Vec<f64>], targets: &[f64]) -> Result<()>;
    fn predict(&self, inputs: &[Vec<f64>]) -> Result<Vec<f64>>;
}

/// Builds untrained estimators; shared across search worker threads.
pub trait EstimatorFactory: Send + Sync {
    fn create(&self, request: &EstimatorRequest) -> Result<Box<dyn Estimator>>;
}
