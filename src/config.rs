use crate::error::FittingError;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Backend selector, keyed by the `ml_mode` configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MlMode {
    Svm,
    RandomForest,
    AdaBoost,
    GradientBoosting,
    ExtraTrees,
    Neural,
}

impl MlMode {
    pub const ALL: [MlMode; 6] = [
        MlMode::Svm,
        MlMode::RandomForest,
        MlMode::AdaBoost,
        MlMode::GradientBoosting,
        MlMode::ExtraTrees,
        MlMode::Neural,
    ];

    pub fn parse(raw: &str) -> Result<Self, FittingError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "svm" => Ok(Self::Svm),
            "randomforest" => Ok(Self::RandomForest),
            "adaboost" => Ok(Self::AdaBoost),
            "gradientboosting" => Ok(Self::GradientBoosting),
            "extratreesfitting" => Ok(Self::ExtraTrees),
            "neural" | "tensorflow" => Ok(Self::Neural),
            other => Err(FittingError::UnknownMlMode(other.to_string())),
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Svm => "svm",
            Self::RandomForest => "randomforest",
            Self::AdaBoost => "adaboost",
            Self::GradientBoosting => "gradientboosting",
            Self::ExtraTrees => "extratreesfitting",
            Self::Neural => "neural",
        }
    }
}

impl FromStr for MlMode {
    type Err = FittingError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for MlMode {
    type Error = FittingError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<MlMode> for String {
    fn from(mode: MlMode) -> Self {
        mode.key().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RegressionMode {
    Regression,
    Classification,
}

impl RegressionMode {
    pub fn parse(raw: &str) -> Result<Self, FittingError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "regression" => Ok(Self::Regression),
            "classification" => Ok(Self::Classification),
            other => Err(FittingError::UnknownRegressionMode(other.to_string())),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Regression => "regression",
            Self::Classification => "classification",
        }
    }
}

impl FromStr for RegressionMode {
    type Err = FittingError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for RegressionMode {
    type Error = FittingError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<RegressionMode> for String {
    fn from(mode: RegressionMode) -> Self {
        mode.label().to_string()
    }
}

/// Train/test/validation ratios, written as a three element array in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct SplitRatios {
    pub train: f64,
    pub test: f64,
    pub validation: f64,
}

impl SplitRatios {
    pub fn new(train: f64, test: f64, validation: f64) -> Self {
        Self {
            train,
            test,
            validation,
        }
    }

    pub fn validate(&self) -> Result<(), FittingError> {
        let parts = [self.train, self.test, self.validation];
        let well_formed = parts.iter().all(|ratio| ratio.is_finite() && *ratio >= 0.0);
        if !well_formed || parts.iter().sum::<f64>() > 1.0 + 1e-9 {
            return Err(FittingError::InvalidSplitRatios {
                train: self.train,
                test: self.test,
                validation: self.validation,
            });
        }
        Ok(())
    }
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self::new(0.5, 0.25, 0.25)
    }
}

impl From<[f64; 3]> for SplitRatios {
    fn from(values: [f64; 3]) -> Self {
        Self::new(values[0], values[1], values[2])
    }
}

impl From<SplitRatios> for [f64; 3] {
    fn from(ratios: SplitRatios) -> Self {
        [ratios.train, ratios.test, ratios.validation]
    }
}

/// Options for the neural backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralConfig {
    pub sequence_flag: bool,
    pub num_units: u32,
    pub num_layers: u32,
    pub output_units: u32,
    pub learning_rate: f64,
    pub train_steps: u32,
    pub output_dir: PathBuf,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            sequence_flag: false,
            num_units: 7,
            num_layers: 1,
            output_units: 1,
            learning_rate: 0.1,
            train_steps: 1000,
            output_dir: PathBuf::from("/tmp/test"),
        }
    }
}

/// Executables that perform the actual model fitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorTools {
    pub lightgbm: String,
    pub bridge: String,
}

impl Default for EstimatorTools {
    fn default() -> Self {
        Self {
            lightgbm: "lightgbm".to_string(),
            bridge: "estimator-bridge".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub ticker_1: String,
    pub scraper_currency_1: String,
    pub filename1: String,
    pub ticker_2: String,
    pub scraper_currency_2: String,
    pub filename2: String,
    /// Candle width in seconds
    pub candle_size: u64,
    pub web_flag: bool,
    pub n_days: u32,
    /// Days between the end of the data window and now (or the last candle on file)
    pub offset: i64,
    pub offsets: Vec<i64>,
    pub ml_mode: MlMode,
    pub regression_mode: RegressionMode,
    pub train_test_validation_ratios: SplitRatios,
    pub feature_windows: Vec<usize>,
    pub fee_fraction: f64,
    pub allow_short: bool,
    pub output_flag: bool,
    pub search_iterations: usize,
    pub search_folds: usize,
    pub search_seed: Option<u64>,
    /// Worker threads for the search and estimators; -1 uses every core
    pub n_jobs: i32,
    pub neural: NeuralConfig,
    pub estimators: EstimatorTools,
    pub chart_data_url: String,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ticker_1: "ETH".to_string(),
            scraper_currency_1: "BTC".to_string(),
            filename1: "data/eth_btc.json".to_string(),
            ticker_2: "LTC".to_string(),
            scraper_currency_2: "BTC".to_string(),
            filename2: "data/ltc_btc.json".to_string(),
            candle_size: 1800,
            web_flag: false,
            n_days: 10,
            offset: 0,
            offsets: Vec::new(),
            ml_mode: MlMode::Svm,
            regression_mode: RegressionMode::Regression,
            train_test_validation_ratios: SplitRatios::default(),
            feature_windows: vec![10, 20, 50],
            fee_fraction: 0.0025,
            allow_short: false,
            output_flag: true,
            search_iterations: 10,
            search_folds: 5,
            search_seed: None,
            n_jobs: -1,
            neural: NeuralConfig::default(),
            estimators: EstimatorTools::default(),
            chart_data_url: "https://poloniex.com/public".to_string(),
        }
    }
}

impl StrategyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Unable to read strategy config {}", path.display()))?;
        let config: StrategyConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid strategy config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.train_test_validation_ratios.validate()?;
        if self.candle_size == 0 {
            return Err(anyhow!("candle_size must be > 0 seconds"));
        }
        if self.n_days == 0 {
            return Err(anyhow!("n_days must be > 0"));
        }
        if self.feature_windows.is_empty() || self.feature_windows.iter().any(|w| *w < 2) {
            return Err(anyhow!(
                "feature_windows must contain at least one window of 2 or more candles (value: {:?})",
                self.feature_windows
            ));
        }
        if !self.fee_fraction.is_finite() || !(0.0..1.0).contains(&self.fee_fraction) {
            return Err(anyhow!(
                "fee_fraction must be in [0, 1) (value: {})",
                self.fee_fraction
            ));
        }
        if self.search_iterations == 0 {
            return Err(anyhow!("search_iterations must be >= 1"));
        }
        if self.search_folds < 2 {
            return Err(anyhow!(
                "search_folds must be >= 2 (value: {})",
                self.search_folds
            ));
        }
        if self.n_jobs == 0 || self.n_jobs < -1 {
            return Err(anyhow!(
                "n_jobs must be -1 (all cores) or a positive thread count (value: {})",
                self.n_jobs
            ));
        }
        if self.neural.train_steps == 0 {
            return Err(anyhow!("neural.train_steps must be >= 1"));
        }
        if !self.neural.learning_rate.is_finite() || self.neural.learning_rate <= 0.0 {
            return Err(anyhow!(
                "neural.learning_rate must be > 0 (value: {})",
                self.neural.learning_rate
            ));
        }
        Ok(())
    }

    /// Copy of this configuration that differs only in `offset`.
    pub fn with_offset(&self, offset: i64) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    pub fn worker_threads(&self) -> usize {
        if self.n_jobs < 0 {
            num_cpus::get()
        } else {
            self.n_jobs as usize
        }
    }

    /// Candles per year, used to annualize per-candle statistics.
    pub fn periods_per_year(&self) -> f64 {
        365.25 * 24.0 * 60.0 * 60.0 / self.candle_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ml_mode_keys_round_trip_and_reject_unknown() {
        for mode in MlMode::ALL {
            assert_eq!(MlMode::parse(mode.key()).unwrap(), mode);
        }
        assert!(matches!(
            MlMode::parse("knn"),
            Err(FittingError::UnknownMlMode(ref key)) if key == "knn"
        ));
    }

    #[test]
    fn config_file_with_unknown_ml_mode_is_rejected() {
        let raw = r#"{ "ml_mode": "lasso" }"#;
        let err = serde_json::from_str::<StrategyConfig>(raw).unwrap_err();
        assert!(err.to_string().contains("lasso"), "{}", err);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let raw = r#"{
            "ml_mode": "randomforest",
            "regression_mode": "classification",
            "train_test_validation_ratios": [0.6, 0.2, 0.2],
            "neural": { "sequence_flag": true }
        }"#;
        let config: StrategyConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.ml_mode, MlMode::RandomForest);
        assert_eq!(config.regression_mode, RegressionMode::Classification);
        assert_eq!(
            config.train_test_validation_ratios,
            SplitRatios::new(0.6, 0.2, 0.2)
        );
        assert!(config.neural.sequence_flag);
        assert_eq!(config.neural.train_steps, 1000);
        assert_eq!(config.search_folds, 5);
        config.validate().unwrap();
    }

    #[test]
    fn split_ratios_over_one_fail_validation() {
        assert!(SplitRatios::new(0.6, 0.3, 0.2).validate().is_err());
        assert!(SplitRatios::new(-0.1, 0.3, 0.2).validate().is_err());
        assert!(SplitRatios::new(0.7, 0.2, 0.1).validate().is_ok());
    }

    #[test]
    fn with_offset_only_changes_offset() {
        let base = StrategyConfig {
            offset: 3,
            ..StrategyConfig::default()
        };
        let shifted = base.with_offset(9);
        assert_eq!(shifted.offset, 9);
        assert_eq!(base.offset, 3);
        assert_eq!(StrategyConfig { offset: 3, ..shifted }, base);
    }
}
