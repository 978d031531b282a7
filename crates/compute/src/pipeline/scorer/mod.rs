//! Context scoring of interval messages against a trained [`Model`].
//!
//! A used cluster *spikes* in an interval when more than one of its members
//! is present and the present share of its members reaches the scorer's
//! context fraction. Messages are labelled, in priority order:
//!
//! | label | condition |
//! |---|---|
//! | `New` | never seen in training |
//! | `Unclustered` | seen, but not in a used cluster |
//! | `InContext` | its cluster spikes in the interval |
//! | `OutOfContext` | its cluster does not spike |

pub mod context;
pub mod uniquify;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use loglens_core::{Interval, IntervalId, MessageId, ScoringConfig};

use crate::model::Model;

pub use context::ContextScorer;
pub use uniquify::UniquifyScorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageLabel {
    New,
    Unclustered,
    InContext,
    OutOfContext,
}

/// Anomaly contribution of each label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelWeights {
    pub new: f64,
    pub unclustered: f64,
    pub out_of_context: f64,
    pub in_context: f64,
}

impl LabelWeights {
    pub fn weight(&self, label: MessageLabel) -> f64 {
        match label {
            MessageLabel::New => self.new,
            MessageLabel::Unclustered => self.unclustered,
            MessageLabel::OutOfContext => self.out_of_context,
            MessageLabel::InContext => self.in_context,
        }
    }
}

impl Default for LabelWeights {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for LabelWeights {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            new: config.new_weight,
            unclustered: config.unclustered_weight,
            out_of_context: config.out_of_context_weight,
            in_context: config.in_context_weight,
        }
    }
}

/// Scoring record of one message in one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStats {
    pub message_id: MessageId,
    pub interval_id: IntervalId,
    pub label: MessageLabel,
    /// Used cluster of the message, if any.
    pub cluster_id: Option<usize>,
    /// First message of its spiking cluster in the interval.
    pub representative: bool,
    pub anomaly: f64,
}

/// Per-interval cluster state, recomputed when the interval changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum IntervalCache {
    #[default]
    Invalid,
    Valid {
        interval_id: IntervalId,
        /// Indexed by cluster id.
        spiking: Vec<bool>,
        /// Clusters whose representative message was already emitted.
        represented: Vec<bool>,
    },
}

impl IntervalCache {
    pub fn is_valid_for(&self, id: IntervalId) -> bool {
        matches!(self, IntervalCache::Valid { interval_id, .. } if *interval_id == id)
    }

    pub fn invalidate(&mut self) {
        *self = IntervalCache::Invalid;
    }
}

pub trait IntervalScorer {
    fn score_message(&mut self, interval: &Interval, message_id: MessageId) -> MessageStats;

    /// Score every message of `interval` in summary order.
    fn score_interval(&mut self, interval: &Interval) -> Vec<MessageStats> {
        let ids: Vec<MessageId> = interval.message_ids().collect();
        ids.into_iter()
            .map(|id| self.score_message(interval, id))
            .collect()
    }
}

/// State shared by the scorer variants: the model and the interval cache.
#[derive(Debug, Clone)]
struct ClusterContext {
    model: Arc<Model>,
    fraction: f64,
    weights: LabelWeights,
    cache: IntervalCache,
}

impl ClusterContext {
    fn new(model: Arc<Model>, fraction: f64) -> Self {
        Self {
            model,
            fraction,
            weights: LabelWeights::default(),
            cache: IntervalCache::Invalid,
        }
    }

    fn refresh(&mut self, interval: &Interval) {
        if self.cache.is_valid_for(interval.id) {
            return;
        }
        let clusters = self.model.num_clusters();
        let mut present = vec![0usize; clusters];
        let mut counted = HashSet::new();
        for id in interval.message_ids() {
            if !counted.insert(id) {
                continue;
            }
            if let Some(cluster) = self.model.cluster_of(id) {
                if cluster < clusters {
                    present[cluster] += 1;
                }
            }
        }
        let spiking: Vec<bool> = present
            .iter()
            .enumerate()
            .map(|(cluster, &count)| {
                let size = self.model.cluster_size(cluster);
                count > 1 && size > 0 && count as f64 / size as f64 >= self.fraction
            })
            .collect();
        debug!(
            interval_id = interval.id,
            spiking = spiking.iter().filter(|&&s| s).count(),
            clusters,
            "interval context computed"
        );
        self.cache = IntervalCache::Valid {
            interval_id: interval.id,
            spiking,
            represented: vec![false; clusters],
        };
    }

    fn classify(&self, message_id: MessageId) -> (MessageLabel, Option<usize>) {
        if !self.model.is_seen(message_id) {
            return (MessageLabel::New, None);
        }
        let Some(cluster) = self.model.cluster_of(message_id) else {
            return (MessageLabel::Unclustered, None);
        };
        let spiking = match &self.cache {
            IntervalCache::Valid { spiking, .. } => spiking.get(cluster).copied().unwrap_or(false),
            IntervalCache::Invalid => false,
        };
        let label = if spiking {
            MessageLabel::InContext
        } else {
            MessageLabel::OutOfContext
        };
        (label, Some(cluster))
    }

    /// Mark `cluster` as represented; true the first time per interval.
    fn take_representative(&mut self, cluster: usize) -> bool {
        match &mut self.cache {
            IntervalCache::Valid { represented, .. } => match represented.get_mut(cluster) {
                Some(done) if !*done => {
                    *done = true;
                    true
                }
                _ => false,
            },
            IntervalCache::Invalid => false,
        }
    }

    fn stats(
        &self,
        interval: &Interval,
        message_id: MessageId,
        label: MessageLabel,
        cluster_id: Option<usize>,
        representative: bool,
    ) -> MessageStats {
        MessageStats {
            message_id,
            interval_id: interval.id,
            label,
            cluster_id,
            representative,
            anomaly: self.weights.weight(label),
        }
    }
}
