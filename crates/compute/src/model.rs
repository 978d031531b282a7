use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use loglens_core::MessageId;

use crate::error::ComputeResult;

/// Summary of one used cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: usize,
    pub size: usize,
    /// Mean pairwise information of the members.
    pub mean_info: f64,
    /// Index of the cluster in the unfiltered partition.
    pub raw_index: usize,
}

/// Trained clustering consumed by the scorers.
///
/// Only ids of used clusters are assigned; every other id seen in training is
/// known but unclustered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub model_id: Uuid,
    pub trained_at: DateTime<Utc>,
    /// Number of training intervals, at least 1.
    pub intervals: u64,
    /// Message id → used cluster id.
    pub assignments: BTreeMap<MessageId, usize>,
    /// Every message id seen in training.
    pub seen: BTreeSet<MessageId>,
    /// Indexed by cluster id.
    pub clusters: Vec<ClusterInfo>,
}

impl Model {
    pub fn new(
        intervals: u64,
        assignments: BTreeMap<MessageId, usize>,
        seen: BTreeSet<MessageId>,
        clusters: Vec<ClusterInfo>,
    ) -> Self {
        Self {
            model_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            intervals,
            assignments,
            seen,
            clusters,
        }
    }

    pub fn cluster_of(&self, id: MessageId) -> Option<usize> {
        self.assignments.get(&id).copied()
    }

    pub fn is_seen(&self, id: MessageId) -> bool {
        self.seen.contains(&id)
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn cluster_size(&self, cluster: usize) -> usize {
        self.clusters.get(cluster).map_or(0, |c| c.size)
    }

    /// Member ids of `cluster`, ascending.
    pub fn members(&self, cluster: usize) -> Vec<MessageId> {
        self.assignments
            .iter()
            .filter(|&(_, &c)| c == cluster)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn save(&self, path: &Path) -> ComputeResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), model_id = %self.model_id, clusters = self.clusters.len(), "model saved");
        Ok(())
    }

    pub fn load(path: &Path) -> ComputeResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&json)?;
        info!(path = %path.display(), model_id = %model.model_id, clusters = model.clusters.len(), "model loaded");
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Model {
        let assignments = BTreeMap::from([(10, 0), (11, 0), (20, 1), (21, 1), (22, 1)]);
        let seen = BTreeSet::from([10, 11, 20, 21, 22, 99]);
        let clusters = vec![
            ClusterInfo { cluster_id: 0, size: 2, mean_info: 0.5, raw_index: 0 },
            ClusterInfo { cluster_id: 1, size: 3, mean_info: 0.25, raw_index: 2 },
        ];
        Model::new(12, assignments, seen, clusters)
    }

    #[test]
    fn lookups() {
        let m = sample();
        assert_eq!(m.cluster_of(20), Some(1));
        assert_eq!(m.cluster_of(99), None);
        assert!(m.is_seen(99));
        assert!(!m.is_seen(5));
        assert_eq!(m.members(1), vec![20, 21, 22]);
        assert_eq!(m.cluster_size(1), 3);
        assert_eq!(m.cluster_size(7), 0);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let m = sample();
        m.save(&path).unwrap();
        assert_eq!(Model::load(&path).unwrap(), m);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Model::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, crate::error::ComputeError::Io(_)));
    }
}
