use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal identifier of a message kind (usually a text cluster id).
pub type MessageId = u64;

/// Identity of an aggregation interval. Scorers cache per-interval state by it.
pub type IntervalId = u64;

/// Aggregated activity of one message id inside one interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub message_id: MessageId,
    /// Number of occurrences in the interval.
    pub count: u64,
    /// Sub-interval tick positions the message was seen at, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Vec<u32>>,
}

impl MessageSummary {
    pub fn new(message_id: MessageId, count: u64) -> Self {
        Self {
            message_id,
            count,
            timeline: None,
        }
    }

    pub fn with_timeline(mut self, ticks: Vec<u32>) -> Self {
        self.timeline = Some(ticks);
        self
    }

    /// Fold `other` (same id) into `self`. A summary without a timeline
    /// occupies the whole interval, so it absorbs any timeline.
    pub fn merge(&mut self, other: MessageSummary) {
        self.count += other.count;
        self.timeline = match (self.timeline.take(), other.timeline) {
            (Some(mut ticks), Some(more)) => {
                ticks.extend(more);
                ticks.sort_unstable();
                ticks.dedup();
                Some(ticks)
            }
            _ => None,
        };
    }
}

/// A fixed time window of aggregated message activity.
///
/// Holds at most one summary per distinct message id; [`Interval::push`]
/// merges repeated ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub id: IntervalId,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub summaries: Vec<MessageSummary>,
}

impl Interval {
    pub fn new(id: IntervalId, start: DateTime<Utc>) -> Self {
        Self {
            id,
            start,
            summaries: Vec::new(),
        }
    }

    /// Builder-style helper: record `count` occurrences of `message_id`.
    pub fn with_message(mut self, message_id: MessageId, count: u64) -> Self {
        self.push(MessageSummary::new(message_id, count));
        self
    }

    /// Add a summary, merging counts and timelines if the id is already present.
    pub fn push(&mut self, summary: MessageSummary) {
        match self
            .summaries
            .iter_mut()
            .find(|s| s.message_id == summary.message_id)
        {
            Some(existing) => existing.merge(summary),
            None => self.summaries.push(summary),
        }
    }

    /// Copy with at most one summary per id, in first-seen order.
    ///
    /// Deserialized intervals bypass [`Interval::push`] and may list an id
    /// more than once.
    pub fn merged(&self) -> Interval {
        let mut merged = Interval::new(self.id, self.start);
        for summary in &self.summaries {
            merged.push(summary.clone());
        }
        merged
    }

    pub fn has_duplicate_ids(&self) -> bool {
        let mut ids = std::collections::HashSet::new();
        !self.message_ids().all(|id| ids.insert(id))
    }

    pub fn message_ids(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.summaries.iter().map(|s| s.message_id)
    }

    pub fn contains(&self, message_id: MessageId) -> bool {
        self.summaries.iter().any(|s| s.message_id == message_id)
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_merges_duplicate_ids() {
        let mut interval = Interval::new(0, Utc::now());
        interval.push(MessageSummary::new(7, 2).with_timeline(vec![3, 1]));
        interval.push(MessageSummary::new(7, 1).with_timeline(vec![1, 9]));
        interval.push(MessageSummary::new(8, 1));

        assert_eq!(interval.summaries.len(), 2);
        assert_eq!(interval.summaries[0].count, 3);
        assert_eq!(interval.summaries[0].timeline, Some(vec![1, 3, 9]));
        assert!(interval.contains(8));
        assert!(!interval.contains(9));
    }

    #[test]
    fn untimed_summary_absorbs_timeline() {
        let mut interval = Interval::new(0, Utc::now());
        interval.push(MessageSummary::new(7, 1).with_timeline(vec![4]));
        interval.push(MessageSummary::new(7, 1));
        assert_eq!(interval.summaries[0].count, 2);
        assert_eq!(interval.summaries[0].timeline, None);
    }

    #[test]
    fn merged_collapses_deserialized_duplicates() {
        let json = r#"{"id":2,"start":"2024-03-01T00:00:00Z","summaries":[
            {"message_id":1,"count":2,"timeline":[5]},
            {"message_id":3,"count":1},
            {"message_id":1,"count":1,"timeline":[2,5]}]}"#;
        let interval: Interval = serde_json::from_str(json).unwrap();
        assert!(interval.has_duplicate_ids());

        let merged = interval.merged();
        assert!(!merged.has_duplicate_ids());
        assert_eq!(merged.message_ids().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(merged.summaries[0].count, 3);
        assert_eq!(merged.summaries[0].timeline, Some(vec![2, 5]));
    }

    #[test]
    fn deserializes_without_timeline() {
        let json = r#"{"id":4,"start":"2024-03-01T00:00:00Z","summaries":[{"message_id":1,"count":5}]}"#;
        let interval: Interval = serde_json::from_str(json).unwrap();
        assert_eq!(interval.id, 4);
        assert_eq!(interval.summaries[0].timeline, None);
        assert_eq!(interval.message_ids().collect::<Vec<_>>(), vec![1]);
    }
}
