use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while selecting or driving a fitting backend
#[derive(Error, Debug)]
pub enum FittingError {
    #[error("Unknown ml_mode '{0}' (expected one of: svm, randomforest, adaboost, gradientboosting, extratreesfitting, neural)")]
    UnknownMlMode(String),

    #[error("Unknown regression_mode '{0}' (expected regression or classification)")]
    UnknownRegressionMode(String),

    #[error("Fitting inputs have {inputs} rows but targets have {targets}")]
    LengthMismatch { inputs: usize, targets: usize },

    #[error("Training segment is empty; adjust train_test_validation_ratios")]
    EmptyTrainingSegment,

    #[error("Invalid split ratios {train}/{test}/{validation}: each must be finite, non-negative and sum to at most 1")]
    InvalidSplitRatios {
        train: f64,
        test: f64,
        validation: f64,
    },
}

/// Errors raised by the randomized hyperparameter search
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Cannot run {folds}-fold cross-validation on {samples} training rows")]
    TooFewSamples { folds: usize, samples: usize },

    #[error("No parameter candidate produced a finite cross-validation score ({candidates} tried)")]
    NoValidCandidate { candidates: usize },

    #[error("Invalid parameter distribution for '{name}': {reason}")]
    InvalidDistribution { name: String, reason: String },
}

/// Errors raised while retrieving candle data
#[derive(Error, Debug)]
pub enum DataError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Snapshot decode failed: {0}")]
    SnapshotDecode(#[from] bincode::Error),

    #[error("Unable to read candle file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported candle file extension for {0} (expected .json or .bin)")]
    UnsupportedFormat(PathBuf),

    #[error("Chart data API returned error: {0}")]
    ApiResponseError(String),

    #[error("No candle data available for {ticker}/{currency}")]
    NoData { ticker: String, currency: String },
}
