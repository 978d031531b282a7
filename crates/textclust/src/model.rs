use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::distance::{tokenize, word_distance};
use crate::error::ClusteringError;
use crate::preprocess::TextPreprocessor;
use crate::store::{ClusterStore, StoreError};
use crate::threshold::ThresholdSetter;

/// Cluster identifier, unique across all components of one clusterer.
pub type ClusterId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextCluster {
    pub id: ClusterId,
    pub component: String,
    /// Normalized example text standing in for every member.
    pub representative: String,
    pub last_observed: NaiveDate,
}

impl TextCluster {
    pub fn new(id: ClusterId, component: &str, representative: &str, last_observed: NaiveDate) -> Self {
        Self {
            id,
            component: component.to_string(),
            representative: representative.to_string(),
            last_observed,
        }
    }
}

/// Cluster id source shared by every component model of one clusterer.
#[derive(Debug, Default)]
pub struct ClusterIdCounter {
    next: AtomicU64,
}

impl ClusterIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter whose next allocation follows `max`.
    pub fn starting_after(max: Option<ClusterId>) -> Self {
        Self {
            next: AtomicU64::new(max.map_or(0, |m| m + 1)),
        }
    }

    pub fn allocate(&self) -> ClusterId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Make sure later allocations never reuse `id`.
    pub fn observe(&self, id: ClusterId) {
        self.next.fetch_max(id + 1, Ordering::SeqCst);
    }

    pub fn max_assigned(&self) -> Option<ClusterId> {
        self.next.load(Ordering::SeqCst).checked_sub(1)
    }
}

/// Limits applied by every component model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSettings {
    pub max_text_length: usize,
    pub lock_timeout: Duration,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            max_text_length: 1024,
            lock_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&loglens_core::ClusteringConfig> for ModelSettings {
    fn from(config: &loglens_core::ClusteringConfig) -> Self {
        Self {
            max_text_length: config.max_text_length,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentOutcome {
    Matched,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub cluster_id: ClusterId,
    pub outcome: AssignmentOutcome,
}

impl ClusterAssignment {
    fn matched(cluster_id: ClusterId) -> Self {
        Self {
            cluster_id,
            outcome: AssignmentOutcome::Matched,
        }
    }

    fn created(cluster_id: ClusterId) -> Self {
        Self {
            cluster_id,
            outcome: AssignmentOutcome::Created,
        }
    }
}

/// A text prepared for comparison: its tokens and ordered magic words.
#[derive(Debug, Clone)]
struct Signature {
    tokens: Vec<String>,
    magic: Vec<String>,
}

impl Signature {
    fn of(text: &str, preprocessor: &dyn TextPreprocessor) -> Self {
        let tokens: Vec<String> = tokenize(text, preprocessor.tokenization())
            .into_iter()
            .map(str::to_string)
            .collect();
        let magic = tokens
            .iter()
            .filter(|t| preprocessor.is_magic_word(t))
            .map(|t| t.to_lowercase())
            .collect();
        Self { tokens, magic }
    }

    fn magic_words_match(&self, other: &Signature) -> bool {
        self.magic.is_empty() || other.magic.is_empty() || self.magic == other.magic
    }

    fn is_close(&self, other: &Signature, threshold: &dyn ThresholdSetter) -> bool {
        let limit = threshold.threshold(self.tokens.len(), other.tokens.len());
        word_distance(&self.tokens, &other.tokens, limit) <= limit && self.magic_words_match(other)
    }
}

#[derive(Debug, Clone)]
struct ClusterEntry {
    cluster: TextCluster,
    signature: Signature,
}

/// Text clusters of one component, most recently matched first.
pub struct TextClusteringModel {
    component: String,
    entries: VecDeque<ClusterEntry>,
    known_ids: HashSet<ClusterId>,
    counter: Arc<ClusterIdCounter>,
    preprocessor: Arc<dyn TextPreprocessor>,
    threshold: Arc<dyn ThresholdSetter>,
    settings: ModelSettings,
    /// Store-wide max id this model has caught up with.
    synced_max: Option<ClusterId>,
}

impl TextClusteringModel {
    pub fn new(
        component: &str,
        counter: Arc<ClusterIdCounter>,
        preprocessor: Arc<dyn TextPreprocessor>,
        threshold: Arc<dyn ThresholdSetter>,
        settings: ModelSettings,
    ) -> Self {
        Self {
            component: component.to_string(),
            entries: VecDeque::new(),
            known_ids: HashSet::new(),
            counter,
            preprocessor,
            threshold,
            settings,
            synced_max: None,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clusters in current traversal order.
    pub fn clusters(&self) -> impl Iterator<Item = &TextCluster> {
        self.entries.iter().map(|e| &e.cluster)
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&TextCluster> {
        self.clusters().find(|c| c.id == id)
    }

    pub fn synced_max(&self) -> Option<ClusterId> {
        self.synced_max
    }

    /// Append clusters loaded from a store, skipping ids already known.
    /// Returns how many were added.
    pub fn merge(&mut self, clusters: Vec<TextCluster>) -> usize {
        let mut added = 0;
        for cluster in clusters {
            if !self.known_ids.insert(cluster.id) {
                continue;
            }
            self.counter.observe(cluster.id);
            let signature = Signature::of(&cluster.representative, self.preprocessor.as_ref());
            self.entries.push_back(ClusterEntry { cluster, signature });
            added += 1;
        }
        added
    }

    /// Record that the store has been read up to `max`.
    pub fn mark_synced(&mut self, max: Option<ClusterId>) {
        self.synced_max = self.synced_max.max(max);
    }

    /// Assign `text` to the first close cluster or create a new one.
    ///
    /// With a `store`, new clusters are inserted under the store's exclusive
    /// lock after catching up with clusters other writers may have added.
    pub fn get_or_add_cluster(
        &mut self,
        text: &str,
        timestamp: DateTime<Utc>,
        store: Option<&dyn ClusterStore>,
    ) -> Result<ClusterAssignment, ClusteringError> {
        let day = timestamp.date_naive();
        let normalized = truncate_chars(&self.preprocessor.normalize(text), self.settings.max_text_length);
        let signature = Signature::of(&normalized, self.preprocessor.as_ref());

        if let Some(index) = self.find_close(&signature, 0) {
            return self.record_match(index, day, store);
        }

        match store {
            None => {
                let id = self.counter.allocate();
                self.push_front(TextCluster::new(id, &self.component, &normalized, day), signature);
                debug!(component = %self.component, cluster_id = id, "created local text cluster");
                Ok(ClusterAssignment::created(id))
            }
            Some(store) => self.add_linked(normalized, signature, day, store),
        }
    }

    fn add_linked(
        &mut self,
        normalized: String,
        signature: Signature,
        day: NaiveDate,
        store: &dyn ClusterStore,
    ) -> Result<ClusterAssignment, ClusteringError> {
        let mut txn = store
            .begin_exclusive(self.settings.lock_timeout)
            .map_err(|e| self.store_failure("lock", e))?;

        let store_max = txn
            .max_cluster_id()
            .map_err(|e| self.store_failure("read max id", e))?;

        if store_max > self.synced_max {
            let fresh = txn
                .load_clusters(&self.component, self.synced_max)
                .map_err(|e| self.store_failure("refresh", e))?;
            let first_new = self.entries.len();
            let added = self.merge(fresh);
            self.mark_synced(store_max);

            if let Some(index) = self.find_close(&signature, first_new) {
                txn.commit().map_err(|e| self.store_failure("commit", e))?;
                info!(
                    component = %self.component,
                    cluster_id = self.entries[index].cluster.id,
                    discovered = added,
                    "matched a cluster added by another writer"
                );
                return self.record_match(index, day, Some(store));
            }
        }

        let id = txn
            .insert_cluster(&self.component, &normalized, day)
            .map_err(|e| self.store_failure("insert", e))?;
        if self.known_ids.contains(&id) {
            let message = format!(
                "store assigned id {} already known to component {:?}",
                id, self.component
            );
            error!(
                component = %self.component,
                cluster_id = id,
                clusters = self.entries.len(),
                known_max = ?self.synced_max,
                "{}", message
            );
            return Err(ClusteringError::Invariant(message));
        }
        txn.commit().map_err(|e| self.store_failure("commit", e))?;

        self.counter.observe(id);
        self.mark_synced(Some(id));
        self.push_front(TextCluster::new(id, &self.component, &normalized, day), signature);
        debug!(component = %self.component, cluster_id = id, "stored new text cluster");
        Ok(ClusterAssignment::created(id))
    }

    /// Index of the first close cluster at or after `from` in traversal order.
    fn find_close(&self, signature: &Signature, from: usize) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, entry)| entry.signature.is_close(signature, self.threshold.as_ref()))
            .map(|(index, _)| index)
    }

    fn record_match(
        &mut self,
        index: usize,
        day: NaiveDate,
        store: Option<&dyn ClusterStore>,
    ) -> Result<ClusterAssignment, ClusteringError> {
        let Some(mut entry) = self.entries.remove(index) else {
            return Err(ClusteringError::Invariant(format!(
                "cluster index {} out of range for component {:?}",
                index, self.component
            )));
        };
        let advanced = day > entry.cluster.last_observed;
        if advanced {
            entry.cluster.last_observed = day;
        }
        let id = entry.cluster.id;
        self.entries.push_front(entry);

        if advanced {
            if let Some(store) = store {
                store
                    .touch_cluster(id, day)
                    .map_err(|e| self.store_failure("touch", e))?;
            }
        }
        Ok(ClusterAssignment::matched(id))
    }

    fn push_front(&mut self, cluster: TextCluster, signature: Signature) {
        self.known_ids.insert(cluster.id);
        self.entries.push_front(ClusterEntry { cluster, signature });
    }

    fn store_failure(&self, operation: &'static str, source: StoreError) -> ClusteringError {
        error!(
            component = %self.component,
            operation,
            clusters = self.entries.len(),
            known_max = ?self.synced_max,
            counter_max = ?self.counter.max_assigned(),
            error = %source,
            "cluster store failure"
        );
        ClusteringError::Store {
            component: self.component.clone(),
            operation,
            source,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::DefaultPreprocessor;
    use crate::store::MemoryClusterStore;
    use crate::threshold::LinearThreshold;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn model_with(counter: Arc<ClusterIdCounter>, magic: &[&str]) -> TextClusteringModel {
        TextClusteringModel::new(
            "kernel",
            counter,
            Arc::new(DefaultPreprocessor::new(magic.iter().copied())),
            Arc::new(LinearThreshold::default()),
            ModelSettings::default(),
        )
    }

    fn model() -> TextClusteringModel {
        model_with(Arc::new(ClusterIdCounter::new()), &[])
    }

    #[test]
    fn first_text_creates_cluster_zero() {
        let mut m = model();
        let a = m.get_or_add_cluster("disk failure on sda1", ts(1), None).unwrap();
        assert_eq!(a, ClusterAssignment::created(0));
        assert_eq!(m.cluster(0).unwrap().representative, "disk failure on sda1");
    }

    #[test]
    fn close_text_matches_and_bumps_day() {
        let mut m = model();
        m.get_or_add_cluster("disk failure on sda1", ts(1), None).unwrap();
        let a = m.get_or_add_cluster("disk failure on sda2", ts(4), None).unwrap();
        assert_eq!(a, ClusterAssignment::matched(0));
        assert_eq!(m.cluster(0).unwrap().last_observed, ts(4).date_naive());

        // An older timestamp never moves the day back.
        m.get_or_add_cluster("disk failure on sda3", ts(2), None).unwrap();
        assert_eq!(m.cluster(0).unwrap().last_observed, ts(4).date_naive());
    }

    #[test]
    fn distant_text_creates_next_id() {
        let mut m = model();
        m.get_or_add_cluster("disk failure on sda1", ts(1), None).unwrap();
        let a = m.get_or_add_cluster("network interface down", ts(2), None).unwrap();
        assert_eq!(a, ClusterAssignment::created(1));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn matching_is_idempotent() {
        let mut m = model();
        let texts = ["user root logged in", "cron job finished", "link eth0 is flapping"];
        let first: Vec<_> = texts
            .iter()
            .map(|t| m.get_or_add_cluster(t, ts(1), None).unwrap().cluster_id)
            .collect();
        for (text, id) in texts.iter().zip(&first) {
            let again = m.get_or_add_cluster(text, ts(2), None).unwrap();
            assert_eq!(again, ClusterAssignment::matched(*id));
        }
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn magic_words_veto_merge() {
        let mut m = model_with(Arc::new(ClusterIdCounter::new()), &["start", "stop"]);
        let a = m.get_or_add_cluster("Service foo bar START", ts(1), None).unwrap();
        let b = m.get_or_add_cluster("Service foo bar STOP", ts(1), None).unwrap();
        assert_ne!(a.cluster_id, b.cluster_id);

        // Without magic words the same pair is within threshold(4, 4) = 1.
        let mut plain = model();
        let a = plain.get_or_add_cluster("Service foo bar START", ts(1), None).unwrap();
        let b = plain.get_or_add_cluster("Service foo bar STOP", ts(1), None).unwrap();
        assert_eq!(a.cluster_id, b.cluster_id);
    }

    #[test]
    fn magic_words_ignored_when_one_side_has_none() {
        let mut m = model_with(Arc::new(ClusterIdCounter::new()), &["stopped"]);
        let a = m.get_or_add_cluster("worker pool alpha stopped", ts(1), None).unwrap();
        let b = m.get_or_add_cluster("worker pool alpha idle", ts(1), None).unwrap();
        assert_eq!(a.cluster_id, b.cluster_id);
    }

    #[test]
    fn magic_word_order_matters() {
        // Eight tokens: threshold(8, 8) = 2 covers the two swapped words.
        let forward = "service alpha start worker pool beta stop now";
        let reversed = "service alpha stop worker pool beta start now";

        let mut m = model_with(Arc::new(ClusterIdCounter::new()), &["start", "stop"]);
        let a = m.get_or_add_cluster(forward, ts(1), None).unwrap();
        let b = m.get_or_add_cluster(reversed, ts(1), None).unwrap();
        assert_ne!(a.cluster_id, b.cluster_id);

        let mut plain = model();
        let a = plain.get_or_add_cluster(forward, ts(1), None).unwrap();
        let b = plain.get_or_add_cluster(reversed, ts(1), None).unwrap();
        assert_eq!(a.cluster_id, b.cluster_id);
    }

    #[test]
    fn close_pair_merges_in_either_order() {
        let pairs = [
            ("disk failure on sda1", "disk failure on sda2"),
            ("Service foo bar START", "Service foo bar STOP"),
            ("worker pool alpha stopped", "worker pool beta stopped"),
        ];
        for (first, second) in pairs {
            let mut ab = model();
            let a = ab.get_or_add_cluster(first, ts(1), None).unwrap();
            let b = ab.get_or_add_cluster(second, ts(1), None).unwrap();

            let mut ba = model();
            let b2 = ba.get_or_add_cluster(second, ts(1), None).unwrap();
            let a2 = ba.get_or_add_cluster(first, ts(1), None).unwrap();

            assert_eq!(a.cluster_id, b.cluster_id, "{first:?} then {second:?}");
            assert_eq!(b2.cluster_id, a2.cluster_id, "{second:?} then {first:?}");
            assert_eq!(ab.len(), 1);
            assert_eq!(ba.len(), 1);
        }
    }

    #[test]
    fn matched_cluster_moves_to_front() {
        let mut m = model();
        m.get_or_add_cluster("alpha beta gamma delta", ts(1), None).unwrap();
        m.get_or_add_cluster("one two three four", ts(1), None).unwrap();
        let order: Vec<_> = m.clusters().map(|c| c.id).collect();
        assert_eq!(order, vec![1, 0]);

        m.get_or_add_cluster("alpha beta gamma epsilon", ts(1), None).unwrap();
        let order: Vec<_> = m.clusters().map(|c| c.id).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn long_texts_are_truncated() {
        let mut m = TextClusteringModel::new(
            "app",
            Arc::new(ClusterIdCounter::new()),
            Arc::new(DefaultPreprocessor::new(Vec::<String>::new())),
            Arc::new(LinearThreshold::default()),
            ModelSettings {
                max_text_length: 10,
                ..ModelSettings::default()
            },
        );
        m.get_or_add_cluster("abcdefghij klmnop", ts(1), None).unwrap();
        assert_eq!(m.cluster(0).unwrap().representative, "abcdefghij");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }

    #[test]
    fn linked_insert_persists_and_touches() {
        let store = MemoryClusterStore::new();
        let mut m = model();
        let a = m.get_or_add_cluster("disk failure on sda1", ts(1), Some(&store)).unwrap();
        assert_eq!(a, ClusterAssignment::created(0));
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(m.synced_max(), Some(0));

        m.get_or_add_cluster("disk failure on sda9", ts(3), Some(&store)).unwrap();
        assert_eq!(store.snapshot().unwrap()[0].last_observed, ts(3).date_naive());
    }

    #[test]
    fn linked_insert_discovers_foreign_cluster() {
        let store = MemoryClusterStore::new();
        let mut writer = model();
        writer.get_or_add_cluster("disk failure on sda1", ts(1), Some(&store)).unwrap();

        // A second model with its own counter stands in for another process.
        let mut late = model();
        let a = late.get_or_add_cluster("disk failure on sda1", ts(2), Some(&store)).unwrap();
        assert_eq!(a, ClusterAssignment::matched(0));
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(late.synced_max(), Some(0));
    }

    #[test]
    fn linked_insert_after_refresh_takes_store_id() {
        let store = MemoryClusterStore::new();
        let mut other = model();
        other.get_or_add_cluster("disk failure on sda1", ts(1), Some(&store)).unwrap();

        let counter = Arc::new(ClusterIdCounter::new());
        let mut m = model_with(counter.clone(), &[]);
        let a = m.get_or_add_cluster("network interface down", ts(1), Some(&store)).unwrap();
        assert_eq!(a, ClusterAssignment::created(1));
        assert_eq!(counter.max_assigned(), Some(1));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn merge_skips_known_ids() {
        let mut m = model();
        let day = ts(1).date_naive();
        let clusters = vec![
            TextCluster::new(3, "kernel", "a b c", day),
            TextCluster::new(5, "kernel", "d e f", day),
        ];
        assert_eq!(m.merge(clusters.clone()), 2);
        assert_eq!(m.merge(clusters), 0);
        // The shared counter moved past the merged ids.
        let a = m.get_or_add_cluster("completely unrelated words here", ts(1), None).unwrap();
        assert_eq!(a.cluster_id, 6);
    }
}
