use loglens_core::ConfigError;
use thiserror::Error;

pub type ComputeResult<T> = Result<T, ComputeError>;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid initial partition: {0}")]
    InvalidInitialPartition(String),

    /// A state the training pipeline should never reach. Indicates a bug.
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
