//! Online text clustering of log messages.
//!
//! Incoming texts are normalized, tokenized and assigned to the first
//! per-component cluster whose representative is within a word-level edit
//! distance threshold. Cluster ids are allocated from a counter shared by all
//! component models of one [`TextClusterer`]; when a [`ClusterStore`] is
//! linked, new clusters are inserted under a cross-process exclusive lock.

pub mod clusterer;
pub mod distance;
pub mod error;
pub mod model;
pub mod preprocess;
pub mod store;
pub mod threshold;

pub use clusterer::TextClusterer;
pub use distance::{tokenize, word_distance, Tokenization};
pub use error::ClusteringError;
pub use model::{
    AssignmentOutcome, ClusterAssignment, ClusterId, ClusterIdCounter, ModelSettings,
    TextCluster, TextClusteringModel,
};
pub use preprocess::{DefaultPreprocessor, TextPreprocessor};
pub use store::{
    ClusterStore, ClusterTransaction, FileClusterStore, MemoryClusterStore, StoreError,
    StoreResult,
};
pub use threshold::{LinearThreshold, ThresholdSetter};
