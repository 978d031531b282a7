use serde::{Deserialize, Serialize};
use tracing::{error, info};

use loglens_core::TrainingConfig;

use super::iclust::Partition;
use super::mutual_info::MutualInformationMatrix;
use crate::error::{ComputeError, ComputeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterStatus {
    Used,
    TooSmall,
    TooNoisy,
    LowestScore,
    /// Not yet decided. Never survives filtering.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    pub min_cluster_size: usize,
    /// Clusters whose mean information is below `ratio × global mean` are noisy.
    pub min_avg_info_ratio: Option<f64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            min_avg_info_ratio: None,
        }
    }
}

impl From<&TrainingConfig> for FilterConfig {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            min_cluster_size: config.min_cluster_size,
            min_avg_info_ratio: config.min_avg_info_ratio,
        }
    }
}

/// Filtering decision for one raw partition cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterVerdict {
    pub raw_index: usize,
    pub size: usize,
    pub mean_info: f64,
    pub status: ClusterStatus,
    /// Dense renumbered index, set only for [`ClusterStatus::Used`].
    pub used_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredPartition {
    /// One verdict per raw cluster, in raw order.
    pub verdicts: Vec<ClusterVerdict>,
    /// Used cluster of each dense matrix index, `None` when excluded.
    pub assignment: Vec<Option<usize>>,
}

impl FilteredPartition {
    pub fn used_clusters(&self) -> usize {
        self.verdicts.iter().filter(|v| v.status == ClusterStatus::Used).count()
    }

    pub fn count(&self, status: ClusterStatus) -> usize {
        self.verdicts.iter().filter(|v| v.status == status).count()
    }

    /// Verdicts of used clusters in renumbered order.
    pub fn used(&self) -> impl Iterator<Item = &ClusterVerdict> {
        self.verdicts.iter().filter(|v| v.status == ClusterStatus::Used)
    }
}

/// Decide which raw clusters of `partition` are kept.
///
/// Small clusters are [`ClusterStatus::TooSmall`], clusters with low mean
/// information are [`ClusterStatus::TooNoisy`]. The cluster with the lowest
/// partition score is always [`ClusterStatus::LowestScore`], overriding any
/// other status. The rest are used and renumbered from 0.
pub fn filter_partition(
    partition: &Partition,
    matrix: &MutualInformationMatrix,
    config: &FilterConfig,
) -> ComputeResult<FilteredPartition> {
    let global_mean = matrix.global_mean();
    let noise_floor = config.min_avg_info_ratio.map(|ratio| ratio * global_mean);

    let mut verdicts: Vec<ClusterVerdict> = partition
        .clusters
        .iter()
        .enumerate()
        .map(|(raw_index, summary)| ClusterVerdict {
            raw_index,
            size: summary.size,
            mean_info: 0.0,
            status: ClusterStatus::Unknown,
            used_index: None,
        })
        .collect();

    for verdict in &mut verdicts {
        if verdict.size < config.min_cluster_size {
            verdict.status = ClusterStatus::TooSmall;
            continue;
        }
        verdict.mean_info = matrix.mean_pairwise(&partition.members(verdict.raw_index));
        verdict.status = if noise_floor.map_or(false, |floor| verdict.mean_info < floor) {
            ClusterStatus::TooNoisy
        } else {
            ClusterStatus::Used
        };
    }

    let mut lowest: Option<usize> = None;
    for (c, summary) in partition.clusters.iter().enumerate() {
        if lowest.map_or(true, |l| summary.score < partition.clusters[l].score) {
            lowest = Some(c);
        }
    }
    if let Some(lowest) = lowest {
        verdicts[lowest].status = ClusterStatus::LowestScore;
    }

    renumber_used(&mut verdicts)?;

    let assignment = partition
        .assignment
        .iter()
        .map(|&raw| verdicts.get(raw).and_then(|v| v.used_index))
        .collect();

    let filtered = FilteredPartition { verdicts, assignment };
    info!(
        clusters = partition.num_clusters(),
        used = filtered.used_clusters(),
        too_small = filtered.count(ClusterStatus::TooSmall),
        too_noisy = filtered.count(ClusterStatus::TooNoisy),
        global_mean,
        "partition filtered"
    );
    Ok(filtered)
}

/// Give used clusters dense indices in raw order. Every cluster must have
/// been decided by now.
fn renumber_used(verdicts: &mut [ClusterVerdict]) -> ComputeResult<()> {
    let mut next = 0;
    for verdict in verdicts.iter_mut() {
        match verdict.status {
            ClusterStatus::Used => {
                verdict.used_index = Some(next);
                next += 1;
            }
            ClusterStatus::Unknown => {
                error!(raw_index = verdict.raw_index, size = verdict.size, "cluster left undecided by filtering");
                return Err(ComputeError::Invariant(format!(
                    "cluster {} has no status after filtering",
                    verdict.raw_index
                )));
            }
            _ => verdict.used_index = None,
        }
    }
    Ok(())
}
