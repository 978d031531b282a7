use thiserror::Error;

/// Rejected configuration. Raised eagerly by [`crate::Config::validate`] and
/// by the env loaders when a present value cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("conflicting initial partition sources: set either {0} or {1}, not both")]
    ConflictingSources(&'static str, &'static str),
}
