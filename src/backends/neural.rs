use super::{fit_fixed, Backend};
use crate::config::StrategyConfig;
use crate::estimator::{EstimatorFactory, EstimatorFamily, EstimatorKind, EstimatorRequest};
use crate::models::{FittingResult, IndexPartition, ParamValue};
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::io;
use std::path::Path;

pub const DENSE_HIDDEN_LAYERS: u32 = 6;
pub const DENSE_TRAIN_STEPS: i64 = 2000;
const SEQUENCE_TRAIN_BATCH: i64 = 64;
const SEQUENCE_EVAL_BATCH: i64 = 32;
const SEQUENCE_EVAL_EVERY_N_STEPS: i64 = 5;

/// Widths of the dense network's hidden layers, widest first: `2^(5 + layers - i)`.
pub fn dense_hidden_units(layers: u32) -> Vec<u64> {
    (0..layers).map(|i| 1_u64 << (5 + layers - i)).collect()
}

/// Fixed six-layer feed-forward regressor; no hyperparameter search.
pub struct DenseNetworkBackend;

impl DenseNetworkBackend {
    pub fn request() -> EstimatorRequest {
        let hidden_units = dense_hidden_units(DENSE_HIDDEN_LAYERS)
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        EstimatorRequest::new(EstimatorFamily::DenseNetwork, EstimatorKind::Regressor)
            .with_param("hidden_units", hidden_units.as_str())
            .with_param("steps", DENSE_TRAIN_STEPS)
    }
}

impl Backend for DenseNetworkBackend {
    fn name(&self) -> &str {
        "neural"
    }

    fn fit(
        &self,
        inputs: &[Vec<f64>],
        targets: &[f64],
        partition: &IndexPartition,
        _config: &StrategyConfig,
        factory: &dyn EstimatorFactory,
    ) -> Result<(FittingResult, f64)> {
        fit_fixed(Self::request(), inputs, targets, partition, factory)
    }
}

/// Recurrent (LSTM) regressor configured from `config.neural`.
pub struct SequenceNetworkBackend;

impl SequenceNetworkBackend {
    pub fn request(config: &StrategyConfig) -> EstimatorRequest {
        let neural = &config.neural;
        EstimatorRequest::new(EstimatorFamily::SequenceNetwork, EstimatorKind::Regressor)
            .with_param("num_units", i64::from(neural.num_units))
            .with_param("num_layers", i64::from(neural.num_layers))
            .with_param("output_units", i64::from(neural.output_units))
            .with_param("optimizer", "adagrad")
            .with_param("learning_rate", neural.learning_rate)
            .with_param("loss", "mean_squared_error")
            .with_param("train_steps", i64::from(neural.train_steps))
            .with_param("batch_size", SEQUENCE_TRAIN_BATCH)
            .with_param("eval_batch_size", SEQUENCE_EVAL_BATCH)
            .with_param("eval_every_n_steps", SEQUENCE_EVAL_EVERY_N_STEPS)
            .with_param(
                "output_dir",
                ParamValue::Text(neural.output_dir.to_string_lossy().into_owned()),
            )
    }
}

/// Deletes whatever a previous run left in `dir` and recreates it empty.
pub fn reset_output_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Unable to clear model directory {}", dir.display()))
        }
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("Unable to create model directory {}", dir.display()))
}

impl Backend for SequenceNetworkBackend {
    fn name(&self) -> &str {
        "neural-sequence"
    }

    fn fit(
        &self,
        inputs: &[Vec<f64>],
        targets: &[f64],
        partition: &IndexPartition,
        config: &StrategyConfig,
        factory: &dyn EstimatorFactory,
    ) -> Result<(FittingResult, f64)> {
        reset_output_dir(&config.neural.output_dir)?;
        info!(
            "Sequence model checkpoints in {}",
            config.neural.output_dir.display()
        );
        fit_fixed(Self::request(config), inputs, targets, partition, factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_widths_halve_from_2048() {
        assert_eq!(
            dense_hidden_units(DENSE_HIDDEN_LAYERS),
            vec![2048, 1024, 512, 256, 128, 64]
        );
        assert_eq!(
            DenseNetworkBackend::request().param("hidden_units"),
            Some(&ParamValue::Text("2048,1024,512,256,128,64".to_string()))
        );
    }

    #[test]
    fn reset_output_dir_removes_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("model");
        fs::create_dir_all(model_dir.join("checkpoints")).unwrap();
        fs::write(model_dir.join("checkpoints/old.ckpt"), b"stale").unwrap();

        reset_output_dir(&model_dir).unwrap();
        assert!(model_dir.is_dir());
        assert_eq!(fs::read_dir(&model_dir).unwrap().count(), 0);

        let fresh = dir.path().join("fresh");
        reset_output_dir(&fresh).unwrap();
        assert!(fresh.is_dir());
    }

    #[test]
    fn sequence_request_follows_neural_config() {
        let mut config = StrategyConfig::default();
        config.neural.num_units = 12;
        config.neural.learning_rate = 0.05;
        let request = SequenceNetworkBackend::request(&config);
        assert_eq!(request.kind, EstimatorKind::Regressor);
        assert_eq!(request.param("num_units"), Some(&ParamValue::Int(12)));
        assert_eq!(request.param("learning_rate"), Some(&ParamValue::Float(0.05)));
        assert_eq!(request.param("batch_size"), Some(&ParamValue::Int(64)));
        assert_eq!(request.param("train_steps"), Some(&ParamValue::Int(1000)));
    }
}
