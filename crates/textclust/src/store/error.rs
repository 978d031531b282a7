use thiserror::Error;

use crate::model::ClusterId;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out after {waited_ms}ms waiting for the exclusive cluster lock")]
    LockTimeout { waited_ms: u64 },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("unknown cluster id {0}")]
    UnknownCluster(ClusterId),
}
