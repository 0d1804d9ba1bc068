//! Estimators backed by an external command-line trainer.
//!
//! Datasets are written as libsvm text files to the temp directory and the tool is
//! driven with `key=value` arguments, one process per fit and per predict.

use crate::config::EstimatorTools;
use crate::estimator::{
    Estimator, EstimatorFactory, EstimatorFamily, EstimatorKind, EstimatorRequest,
};
use crate::models::ParamValue;
use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use uuid::Uuid;

/// Leaf budget used when a tree depth is unbounded.
const UNBOUNDED_NUM_LEAVES: i64 = 131_072;
/// Expected share of distinct rows in a bootstrap sample.
const BOOTSTRAP_FRACTION: f64 = 0.632;
const DEFAULT_N_ESTIMATORS: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDialect {
    /// The LightGBM CLI; tree ensembles only
    LightGbm,
    /// A generic trainer taking `family=`, `kind=` and every hyperparameter verbatim
    Bridge,
}

impl CommandDialect {
    pub fn for_family(family: EstimatorFamily) -> Self {
        match family {
            EstimatorFamily::RandomForest
            | EstimatorFamily::GradientBoosting
            | EstimatorFamily::ExtraTrees => Self::LightGbm,
            EstimatorFamily::Svm
            | EstimatorFamily::AdaBoost
            | EstimatorFamily::DenseNetwork
            | EstimatorFamily::SequenceNetwork => Self::Bridge,
        }
    }
}

#[derive(Debug, Clone)]
struct ToolPath {
    configured: String,
    resolved: Option<PathBuf>,
}

impl ToolPath {
    fn resolve(configured: &str) -> Self {
        Self {
            configured: configured.to_string(),
            resolved: resolve_executable(configured),
        }
    }

    fn require(&self) -> Result<PathBuf> {
        self.resolved.clone().ok_or_else(|| {
            anyhow!(
                "estimator executable '{}' not found as a path or in PATH",
                self.configured
            )
        })
    }
}

/// Production [`EstimatorFactory`]: picks the tool for each family and hands out
/// [`CommandEstimator`]s.
#[derive(Debug, Clone)]
pub struct CommandEstimatorFactory {
    lightgbm: ToolPath,
    bridge: ToolPath,
}

impl CommandEstimatorFactory {
    pub fn from_tools(tools: &EstimatorTools) -> Self {
        let factory = Self {
            lightgbm: ToolPath::resolve(&tools.lightgbm),
            bridge: ToolPath::resolve(&tools.bridge),
        };
        for tool in [&factory.lightgbm, &factory.bridge] {
            match &tool.resolved {
                Some(path) => debug!("Estimator tool '{}' -> {}", tool.configured, path.display()),
                None => warn!(
                    "Estimator tool '{}' not found; backends that need it will fail",
                    tool.configured
                ),
            }
        }
        factory
    }

    fn build(&self, request: &EstimatorRequest) -> Result<CommandEstimator> {
        let dialect = CommandDialect::for_family(request.family);
        let executable = match dialect {
            CommandDialect::LightGbm => self.lightgbm.require()?,
            CommandDialect::Bridge => self.bridge.require()?,
        };
        Ok(CommandEstimator {
            executable,
            dialect,
            request: request.clone(),
            model_path: None,
        })
    }
}

impl EstimatorFactory for CommandEstimatorFactory {
    fn create(&self, request: &EstimatorRequest) -> Result<Box<dyn Estimator>> {
        Ok(Box::new(self.build(request)?))
    }
}

/// One untrained or trained model living in a temp file owned by the external tool.
#[derive(Debug)]
pub struct CommandEstimator {
    executable: PathBuf,
    dialect: CommandDialect,
    request: EstimatorRequest,
    model_path: Option<PathBuf>,
}

impl CommandEstimator {
    fn run(&self, args: &[String], action: &str) -> Result<()> {
        debug!("{} {}", self.executable.display(), args.join(" "));
        let output = Command::new(&self.executable)
            .args(args)
            .output()
            .with_context(|| {
                format!(
                    "Failed to spawn {} for {}",
                    self.executable.display(),
                    action
                )
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} {} failed with status {}: {}",
                self.executable.display(),
                action,
                output.status,
                stderr.trim()
            ));
        }
        Ok(())
    }
}

impl Estimator for CommandEstimator {
    fn fit(&mut self, inputs: &[Vec<f64>], targets: &[f64]) -> Result<()> {
        if inputs.is_empty() || inputs.len() != targets.len() {
            return Err(anyhow!(
                "cannot fit {} on {} rows with {} targets",
                self.request.family.label(),
                inputs.len(),
                targets.len()
            ));
        }

        let data_path = temp_path("candlefit_train", "svm");
        let model_path = temp_path("candlefit_model", "txt");
        write_libsvm_dataset(inputs, targets, &data_path)?;

        let n_features = inputs[0].len();
        let args = train_args(self.dialect, &self.request, n_features, &data_path, &model_path);
        let result = self.run(&args, "training");
        let _ = fs::remove_file(&data_path);
        result?;

        if let Some(previous) = self.model_path.replace(model_path) {
            let _ = fs::remove_file(previous);
        }
        Ok(())
    }

    fn predict(&self, inputs: &[Vec<f64>]) -> Result<Vec<f64>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let model_path = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("{} estimator used before fit", self.request.family.label()))?;

        let data_path = temp_path("candlefit_predict", "svm");
        let result_path = temp_path("candlefit_predictions", "txt");
        let placeholder_targets = vec![0.0; inputs.len()];
        write_libsvm_dataset(inputs, &placeholder_targets, &data_path)?;

        let args = predict_args(
            self.dialect,
            &self.request,
            &data_path,
            model_path,
            &result_path,
        );
        let outcome = self
            .run(&args, "prediction")
            .and_then(|_| read_predictions(&result_path));
        let _ = fs::remove_file(&data_path);
        let _ = fs::remove_file(&result_path);
        let raw = outcome?;

        if raw.len() != inputs.len() {
            return Err(anyhow!(
                "{} returned {} predictions for {} rows",
                self.executable.display(),
                raw.len(),
                inputs.len()
            ));
        }

        // LightGBM's binary objective yields probabilities
        let predictions = match (self.dialect, self.request.kind) {
            (CommandDialect::LightGbm, EstimatorKind::Classifier) => raw
                .into_iter()
                .map(|p| if p >= 0.5 { 1.0 } else { 0.0 })
                .collect(),
            _ => raw,
        };
        Ok(predictions)
    }
}

impl Drop for CommandEstimator {
    fn drop(&mut self) {
        if let Some(path) = self.model_path.take() {
            let _ = fs::remove_file(path);
        }
    }
}

fn temp_path(prefix: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}_{}.{}", prefix, Uuid::new_v4(), extension))
}

fn path_arg(key: &str, path: &Path) -> String {
    format!("{}={}", key, path.to_string_lossy())
}

fn train_args(
    dialect: CommandDialect,
    request: &EstimatorRequest,
    n_features: usize,
    data_path: &Path,
    model_path: &Path,
) -> Vec<String> {
    let mut args = vec![String::from("task=train")];
    match dialect {
        CommandDialect::LightGbm => args.extend(lightgbm_params(request, n_features)),
        CommandDialect::Bridge => args.extend(bridge_params(request)),
    }
    args.push(path_arg("data", data_path));
    args.push(path_arg("output_model", model_path));
    args
}

fn predict_args(
    dialect: CommandDialect,
    request: &EstimatorRequest,
    data_path: &Path,
    model_path: &Path,
    result_path: &Path,
) -> Vec<String> {
    let mut args = vec![String::from("task=predict")];
    match dialect {
        CommandDialect::LightGbm => args.push(String::from("verbosity=-1")),
        CommandDialect::Bridge => {
            args.push(format!("family={}", request.family.label()));
            args.push(format!("kind={}", request.kind.label()));
        }
    }
    args.push(path_arg("data", data_path));
    args.push(path_arg("input_model", model_path));
    args.push(path_arg("output_result", result_path));
    args
}

fn bridge_params(request: &EstimatorRequest) -> Vec<String> {
    let mut params = vec![
        format!("family={}", request.family.label()),
        format!("kind={}", request.kind.label()),
    ];
    params.extend(
        request
            .params
            .iter()
            .map(|(key, value)| format!("{}={}", key, value)),
    );
    params
}

/// Translates tree-ensemble hyperparameters into LightGBM's vocabulary.
fn lightgbm_params(request: &EstimatorRequest, n_features: usize) -> Vec<String> {
    let objective = match request.kind {
        EstimatorKind::Regressor => "regression",
        EstimatorKind::Classifier => "binary",
    };
    let boosting = match request.family {
        EstimatorFamily::GradientBoosting => "gbdt",
        _ => "rf",
    };
    let n_estimators = request
        .param("n_estimators")
        .and_then(ParamValue::as_i64)
        .unwrap_or(DEFAULT_N_ESTIMATORS);
    let depth = request.param("max_depth").and_then(ParamValue::as_i64);
    let (max_depth, num_leaves) = match depth {
        Some(depth) if depth > 0 => (depth, 1_i64 << depth.min(17)),
        _ => (-1, UNBOUNDED_NUM_LEAVES),
    };
    // n_jobs=-1 asks for every core; LightGBM spells that num_threads=0
    let num_threads = match request.param("n_jobs").and_then(ParamValue::as_i64) {
        Some(jobs) if jobs < 0 => 0,
        Some(jobs) => jobs,
        None => 1,
    };

    let mut params = vec![
        format!("objective={}", objective),
        format!("boosting={}", boosting),
        format!("num_iterations={}", n_estimators),
        format!("max_depth={}", max_depth),
        format!("num_leaves={}", num_leaves),
        String::from("min_data_in_leaf=1"),
        String::from("min_sum_hessian_in_leaf=0"),
        format!("num_threads={}", num_threads),
        String::from("verbosity=-1"),
    ];

    if let Some(rate) = request.param("learning_rate").and_then(ParamValue::as_f64) {
        params.push(format!("learning_rate={}", rate));
    }
    if boosting == "rf" {
        params.push(String::from("bagging_freq=1"));
        params.push(format!("bagging_fraction={}", BOOTSTRAP_FRACTION));
    }
    if request.family == EstimatorFamily::ExtraTrees {
        params.push(String::from("extra_trees=true"));
    }
    if let Some(max_features) = request.param("max_features").and_then(ParamValue::as_f64) {
        if n_features > 0 {
            let fraction = (max_features / n_features as f64).clamp(0.0, 1.0);
            params.push(format!("feature_fraction_bynode={}", fraction));
        }
    }
    params
}

fn write_libsvm_dataset(inputs: &[Vec<f64>], targets: &[f64], path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Unable to create dataset file {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for (row, target) in inputs.iter().zip(targets) {
        let mut line = format!("{}", target);
        for (idx, value) in row.iter().enumerate() {
            line.push_str(&format!(" {}:{:.10}", idx, value));
        }
        line.push('\n');
        writer.write_all(line.as_bytes())?;
    }

    writer.flush()?;
    Ok(())
}

fn read_predictions(path: &Path) -> Result<Vec<f64>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Unable to read predictions from {}", path.display()))?;
    raw.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|token| {
            token
                .parse::<f64>()
                .with_context(|| format!("Invalid prediction '{}'", token))
        })
        .collect()
}

fn resolve_executable(configured: &str) -> Option<PathBuf> {
    let path = Path::new(configured);
    if path.is_absolute() || path.components().count() > 1 {
        return path.exists().then(|| path.to_path_buf());
    }
    find_in_path(configured)
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_value = std::env::var_os("PATH")?;
    std::env::split_paths(&path_value)
        .map(|entry| entry.join(binary))
        .find(|candidate| candidate.exists())
}
