use std::sync::Arc;

use loglens_core::{Interval, MessageId, ScoringConfig};

use super::{ClusterContext, IntervalCache, IntervalScorer, LabelWeights, MessageStats};
use crate::model::Model;

/// Labels every message by whether its cluster is active in the interval.
#[derive(Debug, Clone)]
pub struct ContextScorer {
    context: ClusterContext,
}

impl ContextScorer {
    pub const DEFAULT_FRACTION: f64 = 0.2;

    pub fn new(model: Arc<Model>, context_fraction: f64) -> Self {
        Self {
            context: ClusterContext::new(model, context_fraction),
        }
    }

    pub fn from_config(model: Arc<Model>, config: &ScoringConfig) -> Self {
        Self::new(model, config.context_fraction).with_weights(LabelWeights::from(config))
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

impl IntervalScorer for ContextScorer {
    fn score_message(&mut self, interval: &Interval, message_id: MessageId) -> MessageStats {
        self.context.refresh(interval);
        let (label, cluster) = self.context.classify(message_id);
        self.context.stats(interval, message_id, label, cluster, false)
    }
}
