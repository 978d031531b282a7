//! Mutual-information training and context scoring of message intervals.
//!
//! Training turns a sequence of [`Interval`](loglens_core::Interval)s into a
//! [`Model`]: a pairwise mutual-information matrix over message ids is
//! partitioned by a randomized exchange search, the partition is filtered and
//! the surviving clusters are kept. Scorers then label the messages of new
//! intervals against that model.

pub mod algorithms;
pub mod error;
pub mod model;
pub mod pipeline;

pub use algorithms::filter::{filter_partition, ClusterStatus, FilterConfig, FilteredPartition};
pub use algorithms::iclust::{
    ClusterSummary, InformationObjective, Objective, Partition, PartitionEngine, PartitionParams,
};
pub use algorithms::matrix::DenseMatrix;
pub use algorithms::mutual_info::{MiMode, MutualInfoBuilder, MutualInfoConfig, MutualInformationMatrix};
pub use error::{ComputeError, ComputeResult};
pub use model::{ClusterInfo, Model};
pub use pipeline::scorer::{
    ContextScorer, IntervalCache, IntervalScorer, LabelWeights, MessageLabel, MessageStats,
    UniquifyScorer,
};
pub use pipeline::trainer::{InitialPartition, Trainer, TrainingOutcome};
