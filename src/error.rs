use std::path::PathBuf;

use burn::config::ConfigError;
use burn::record::RecorderError;

/// Errors raised while loading data, fitting a model or writing its artifacts.
#[derive(thiserror::Error, Debug)]
pub enum TrainError {
    /// The MNIST split could not be downloaded or decoded.
    #[error("failed to load the MNIST {split} split: {reason}")]
    DatasetLoad { split: &'static str, reason: String },

    /// No examples are available to fit on.
    #[error("the {split} set contains no examples")]
    EmptyDataset { split: &'static str },

    /// The training subset does not cover every digit.
    #[error("expected the ten digit classes in the training subset, found {found:?}")]
    MissingClasses { found: Vec<usize> },

    /// The solver failed.
    #[error("logistic regression fit failed: {0}")]
    Fit(String),

    /// Exported parameters do not match the declared dimensions.
    #[error("expected {expected} values for {name}, got {actual}")]
    Shape {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("i/o error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model record failure: {0}")]
    Recorder(#[from] RecorderError),

    #[error("model config failure: {0}")]
    Config(#[from] ConfigError),
}

impl TrainError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrainError>;
