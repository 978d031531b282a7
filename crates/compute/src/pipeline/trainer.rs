use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use loglens_core::{ConfigError, Interval, TrainingConfig};

use crate::algorithms::filter::{filter_partition, FilterConfig, FilteredPartition};
use crate::algorithms::iclust::{Partition, PartitionEngine, PartitionParams};
use crate::algorithms::mutual_info::{MutualInfoBuilder, MutualInfoConfig, MutualInformationMatrix};
use crate::error::ComputeResult;
use crate::model::{ClusterInfo, Model};

/// Fewer surviving ids than this skip the partition search.
const MIN_IDS_FOR_SEARCH: usize = 3;

/// Where the partition search starts from.
#[derive(Debug, Clone, Default)]
pub enum InitialPartition {
    /// Shuffled round-robin assignment.
    #[default]
    None,
    /// Explicit cluster per dense matrix index.
    Assignment(Vec<usize>),
    /// Clustering of a previously trained model.
    PreviousModel(Model),
}

impl InitialPartition {
    /// Load the initial partition named by `config`, if any.
    pub fn from_config(config: &TrainingConfig) -> ComputeResult<Self> {
        match (&config.initial_assignment, &config.initial_model) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingSources(
                "TRAIN_INITIAL_ASSIGNMENT",
                "TRAIN_INITIAL_MODEL",
            )
            .into()),
            (Some(path), None) => Self::assignment_from_file(path),
            (None, Some(path)) => Ok(Self::PreviousModel(Model::load(path)?)),
            (None, None) => Ok(Self::None),
        }
    }

    fn assignment_from_file(path: &Path) -> ComputeResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let assignment: Vec<usize> = serde_json::from_str(&json)?;
        debug!(path = %path.display(), entries = assignment.len(), "initial assignment loaded");
        Ok(Self::Assignment(assignment))
    }

    /// Concrete starting labels for `matrix` with `k` clusters.
    fn resolve(self, matrix: &MutualInformationMatrix, k: usize) -> Option<Vec<usize>> {
        match self {
            Self::None => None,
            Self::Assignment(assignment) => Some(assignment),
            Self::PreviousModel(previous) => {
                let mut unseen = 0;
                let labels = matrix
                    .ids()
                    .iter()
                    .map(|&id| match previous.cluster_of(id) {
                        Some(cluster) => cluster % k,
                        None => {
                            unseen += 1;
                            (unseen - 1) % k
                        }
                    })
                    .collect();
                debug!(unseen, clusters = previous.num_clusters(), "initial partition from previous model");
                Some(labels)
            }
        }
    }
}

/// Everything a training run produced.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: Model,
    /// Ids that survived the appearance filter.
    pub matrix_ids: usize,
    /// `None` when too few ids survived for a search.
    pub partition: Option<Partition>,
    pub filtered: Option<FilteredPartition>,
}

pub struct Trainer {
    config: TrainingConfig,
    engine: PartitionEngine,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> ComputeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            engine: PartitionEngine::new(),
        })
    }

    pub fn with_engine(mut self, engine: PartitionEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn train(&self, intervals: &[Interval], initial: InitialPartition) -> ComputeResult<TrainingOutcome> {
        let started = Instant::now();
        let matrix = MutualInfoBuilder::new(MutualInfoConfig::from(&self.config)).build(intervals);
        let n = matrix.len();

        if n < MIN_IDS_FOR_SEARCH {
            let model = singleton_model(&matrix);
            info!(ids = n, "too few ids for clustering, each id is its own cluster");
            return Ok(TrainingOutcome {
                model,
                matrix_ids: n,
                partition: None,
                filtered: None,
            });
        }

        let params = PartitionParams::from(&self.config);
        let k = PartitionEngine::effective_clusters(params.num_clusters, n);
        let initial = initial.resolve(&matrix, k);
        let partition = self.engine.run(&matrix, &params, initial.as_deref())?;
        let filtered = filter_partition(&partition, &matrix, &FilterConfig::from(&self.config))?;

        let mut assignments = BTreeMap::new();
        for (index, used) in filtered.assignment.iter().enumerate() {
            if let Some(cluster) = used {
                assignments.insert(matrix.id(index), *cluster);
            }
        }
        let clusters = filtered
            .used()
            .enumerate()
            .map(|(cluster_id, verdict)| ClusterInfo {
                cluster_id,
                size: verdict.size,
                mean_info: verdict.mean_info,
                raw_index: verdict.raw_index,
            })
            .collect();
        let model = Model::new(
            matrix.total_intervals(),
            assignments,
            matrix.seen_ids().clone(),
            clusters,
        );

        info!(
            model_id = %model.model_id,
            intervals = intervals.len(),
            ids = n,
            clusters = model.num_clusters(),
            clustered_ids = model.assignments.len(),
            objective = partition.objective,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "training complete"
        );
        Ok(TrainingOutcome {
            model,
            matrix_ids: n,
            partition: Some(partition),
            filtered: Some(filtered),
        })
    }
}

/// Every surviving id in its own used cluster, in ascending id order.
fn singleton_model(matrix: &MutualInformationMatrix) -> Model {
    let assignments = matrix
        .ids()
        .iter()
        .enumerate()
        .map(|(cluster, &id)| (id, cluster))
        .collect();
    let clusters = (0..matrix.len())
        .map(|cluster| ClusterInfo {
            cluster_id: cluster,
            size: 1,
            mean_info: 0.0,
            raw_index: cluster,
        })
        .collect();
    Model::new(matrix.total_intervals(), assignments, matrix.seen_ids().clone(), clusters)
}
