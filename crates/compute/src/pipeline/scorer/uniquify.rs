use std::sync::Arc;

use loglens_core::{Interval, MessageId, ScoringConfig};

use super::{ClusterContext, IntervalCache, IntervalScorer, LabelWeights, MessageLabel, MessageStats};
use crate::model::Model;

/// Context scorer that collapses each spiking cluster to one representative.
///
/// The first scored message of a spiking cluster is marked representative;
/// later members of the same cluster in the same interval are not.
#[derive(Debug, Clone)]
pub struct UniquifyScorer {
    context: ClusterContext,
}

impl UniquifyScorer {
    pub const DEFAULT_FRACTION: f64 = 0.5;

    pub fn new(model: Arc<Model>, uniquify_fraction: f64) -> Self {
        Self {
            context: ClusterContext::new(model, uniquify_fraction),
        }
    }

    pub fn from_config(model: Arc<Model>, config: &ScoringConfig) -> Self {
        Self::new(model, config.uniquify_fraction).with_weights(LabelWeights::from(config))
    }

    pub fn with_weights(mut self, weights: LabelWeights) -> Self {
        self.context.weights = weights;
        self
    }

    pub fn model(&self) -> &Model {
        &self.context.model
    }

    pub fn cache(&self) -> &IntervalCache {
        &self.context.cache
    }
}

impl IntervalScorer for UniquifyScorer {
    fn score_message(&mut self, interval: &Interval, message_id: MessageId) -> MessageStats {
        self.context.refresh(interval);
        let (label, cluster) = self.context.classify(message_id);
        let representative = match (label, cluster) {
            (MessageLabel::InContext, Some(cluster)) => self.context.take_representative(cluster),
            _ => false,
        };
        self.context.stats(interval, message_id, label, cluster, representative)
    }

    /// Rescoring the same interval starts with no representatives emitted.
    fn score_interval(&mut self, interval: &Interval) -> Vec<MessageStats> {
        self.context.cache.invalidate();
        let ids: Vec<MessageId> = interval.message_ids().collect();
        ids.into_iter()
            .map(|id| self.score_message(interval, id))
            .collect()
    }
}
