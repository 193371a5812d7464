use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the autotuner
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Dataset shape errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("Task count mismatch: expected {expected} sequences, got {actual}")]
    TaskCountMismatch { expected: usize, actual: usize },

    #[error("Task {task} has {parameters} parameter vectors but {objectives} objective values")]
    SampleCountMismatch {
        task: usize,
        parameters: usize,
        objectives: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Dataset is incomplete: {message}")]
    Incomplete { message: String },
}

/// Surrogate model errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model has not been trained")]
    NotTrained,

    #[error("Training failed: all {attempted} restarts failed")]
    TrainingFailed {
        attempted: usize,
        failures: Vec<RestartFailure>,
    },

    #[error("No restarts requested")]
    NoRestarts,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Task index {task} out of range ({tasks} tasks)")]
    TaskOutOfRange { task: usize, tasks: usize },
}

/// Numeric failures reported by a regression engine
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineError {
    #[error("Covariance matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("Local optimization did not converge after {iterations} iterations")]
    DidNotConverge { iterations: usize },

    #[error("Non-finite likelihood")]
    NonFinite,

    #[error("Parameter vector has length {actual}, kernel expects {expected}")]
    ParameterLength { expected: usize, actual: usize },

    #[error("No training data")]
    NoData,

    #[error("Optimizer error: {0}")]
    Optimizer(String),
}

/// Worker pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Worker program not found: {path}")]
    ProgramNotFound { path: String },

    #[error("Failed to spawn worker {rank}: {message}")]
    SpawnFailed { rank: usize, message: String },

    #[error("Invalid pool size: {size}")]
    InvalidSize { size: usize },
}

/// One restart's local optimization failed.
///
/// Absorbed by the restart coordinator: logged, recorded, excluded from
/// selection.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("restart {restart} (seed {seed}) failed: {reason}")]
pub struct RestartFailure {
    pub restart: usize,
    pub seed: u64,
    pub reason: String,
}

/// Result type alias for autotuner operations
pub type TuneResult<T> = Result<T, TuneError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DatasetError::SampleCountMismatch {
            task: 2,
            parameters: 5,
            objectives: 4,
        };

        assert!(error.to_string().contains("Task 2"));
        assert!(error.to_string().contains('5'));
        assert!(error.to_string().contains('4'));
    }

    #[test]
    fn test_error_conversion() {
        let model_error = ModelError::NotTrained;
        let tune_error: TuneError = model_error.into();

        match tune_error {
            TuneError::Model(ModelError::NotTrained) => (),
            _ => panic!("Expected NotTrained error"),
        }
    }

    #[test]
    fn test_restart_failure_round_trip() {
        let failure = RestartFailure {
            restart: 3,
            seed: 45,
            reason: "Non-finite likelihood".into(),
        };
        let json = serde_json::to_string(&failure).unwrap();
        let back: RestartFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(failure, back);
        assert!(back.to_string().starts_with("restart 3 (seed 45)"));
    }

    #[test]
    fn test_macros() {
        let validation = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation, TuneError::Validation(_)));
        let internal = internal_error!("Something went wrong");
        assert!(matches!(internal, TuneError::Internal(_)));
        let config = config_error!("Missing required field: {}", "seed");
        assert!(matches!(config, TuneError::Config(_)));
    }
}
