pub mod config;
pub mod error;
pub mod interval;

pub use config::{ClusteringConfig, Config, ScoringConfig, TrainingConfig};
pub use error::*;
pub use interval::*;
