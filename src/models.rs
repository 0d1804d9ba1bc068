use crate::estimator::EstimatorFamily;
use crate::search::SearchReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub quote_volume: f64,
    #[serde(default)]
    pub weighted_average: f64,
}

/// Row indices for the train, test and validation segments of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexPartition {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    pub validation: Vec<usize>,
}

impl IndexPartition {
    pub fn assigned_len(&self) -> usize {
        self.train.len() + self.test.len() + self.validation.len()
    }
}

/// A single hyperparameter value handed to an estimator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
    /// No limit, e.g. a tree depth of `None`
    Unbounded,
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(value) => Some(*value as f64),
            ParamValue::Float(value) => Some(*value),
            ParamValue::Text(_) | ParamValue::Unbounded => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(value) => Some(*value),
            ParamValue::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, ParamValue::Unbounded)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(value) => write!(f, "{}", value),
            ParamValue::Float(value) => write!(f, "{}", value),
            ParamValue::Text(value) => f.write_str(value),
            ParamValue::Unbounded => f.write_str("None"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

/// Hyperparameters keyed by name; ordered so that sampling and command lines are stable.
pub type ParamSet = BTreeMap<String, ParamValue>;

pub fn format_params(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// What produced the predictions held by a [`FittingResult`].
#[derive(Debug, Clone, Default)]
pub enum ModelReference {
    #[default]
    None,
    /// The randomized search that selected and refit the estimator
    Search(SearchReport),
    /// A fixed-architecture estimator trained without a search
    Fixed {
        family: EstimatorFamily,
        params: ParamSet,
    },
}

/// Predictions and training error produced by one backend invocation.
#[derive(Debug, Clone, Default)]
pub struct FittingResult {
    pub training_strategy_score: Vec<f64>,
    pub fitted_strategy_score: Vec<f64>,
    pub validation_strategy_score: Vec<f64>,
    pub error: f64,
    pub partition: IndexPartition,
    pub model: ModelReference,
}
