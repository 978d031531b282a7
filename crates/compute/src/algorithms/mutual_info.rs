//! Pairwise mutual information between message ids across intervals.
//!
//! Each message id is treated as a binary indicator over a sample space:
//! one sample per interval in [`MiMode::Presence`], one sample per
//! (interval, tick) in [`MiMode::Timeline`]. For every pair of ids the 2×2
//! contingency table of their indicators gives
//!
//! ```text
//! I(X;Y) = Σ p(x,y) · ln( p(x,y) / (p(x)·p(y)) )      (nats)
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use loglens_core::{Interval, MessageId, MessageSummary, TrainingConfig};

use super::matrix::DenseMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiMode {
    /// Binary presence per interval.
    Presence,
    /// Presence per sub-interval tick.
    Timeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutualInfoConfig {
    /// Ids appearing in this many intervals or fewer are dropped.
    pub min_appearances: u64,
    pub mode: MiMode,
    /// Ticks per interval in timeline mode.
    pub ticks_per_interval: u32,
}

impl Default for MutualInfoConfig {
    fn default() -> Self {
        Self {
            min_appearances: 1,
            mode: MiMode::Presence,
            ticks_per_interval: 60,
        }
    }
}

impl From<&TrainingConfig> for MutualInfoConfig {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            min_appearances: config.min_appearances,
            mode: if config.timeline {
                MiMode::Timeline
            } else {
                MiMode::Presence
            },
            ticks_per_interval: config.ticks_per_interval,
        }
    }
}

/// Symmetric mutual-information matrix over the ids that survived the
/// appearance filter, indexed densely `0..N` in ascending id order.
#[derive(Debug, Clone)]
pub struct MutualInformationMatrix {
    info: DenseMatrix,
    index_to_id: Vec<MessageId>,
    id_to_index: HashMap<MessageId, usize>,
    /// Intervals each dense index appeared in.
    appearances: Vec<u64>,
    /// Number of training intervals, at least 1.
    intervals: u64,
    /// Every id seen in training, filtered or not.
    seen: BTreeSet<MessageId>,
}

impl MutualInformationMatrix {
    /// Wrap a precomputed information matrix whose dense index `i` is `ids[i]`.
    ///
    /// # Panics
    /// Panics if `ids` and `info` differ in size.
    pub fn from_matrix(ids: Vec<MessageId>, info: DenseMatrix) -> Self {
        assert_eq!(ids.len(), info.len(), "one id per matrix row");
        let id_to_index = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        Self {
            appearances: vec![1; ids.len()],
            seen: ids.iter().copied().collect(),
            info,
            index_to_id: ids,
            id_to_index,
            intervals: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.index_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_to_id.is_empty()
    }

    /// Information between dense indices `i` and `j`. The diagonal is 0.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.info.get(i, j)
    }

    pub fn matrix(&self) -> &DenseMatrix {
        &self.info
    }

    pub fn id(&self, index: usize) -> MessageId {
        self.index_to_id[index]
    }

    pub fn ids(&self) -> &[MessageId] {
        &self.index_to_id
    }

    pub fn index_of(&self, id: MessageId) -> Option<usize> {
        self.id_to_index.get(&id).copied()
    }

    pub fn appearances(&self, index: usize) -> u64 {
        self.appearances[index]
    }

    pub fn total_intervals(&self) -> u64 {
        self.intervals
    }

    pub fn seen_ids(&self) -> &BTreeSet<MessageId> {
        &self.seen
    }

    /// Mean over all off-diagonal cells.
    pub fn global_mean(&self) -> f64 {
        self.info.off_diagonal_mean()
    }

    /// Mean pairwise information among dense indices `members`.
    pub fn mean_pairwise(&self, members: &[usize]) -> f64 {
        self.info.mean_pairwise(members)
    }
}

pub struct MutualInfoBuilder {
    config: MutualInfoConfig,
}

impl MutualInfoBuilder {
    pub fn new(config: MutualInfoConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, intervals: &[Interval]) -> MutualInformationMatrix {
        // ── Pass 1: appearance counts ─────────────────────────
        let mut counts: HashMap<MessageId, u64> = HashMap::new();
        for interval in intervals {
            let distinct: HashSet<MessageId> = interval.message_ids().collect();
            for id in distinct {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        let seen: BTreeSet<MessageId> = counts.keys().copied().collect();

        let required = self.config.min_appearances.saturating_add(1);
        let index_to_id: Vec<MessageId> = seen
            .iter()
            .copied()
            .filter(|id| counts[id] >= required)
            .collect();
        let id_to_index: HashMap<MessageId, usize> = index_to_id
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let appearances: Vec<u64> = index_to_id.iter().map(|id| counts[id]).collect();

        debug!(
            seen = seen.len(),
            kept = index_to_id.len(),
            min_appearances = self.config.min_appearances,
            "appearance filter applied"
        );

        // ── Pass 2: co-occurrence over surviving ids ──────────
        let n = index_to_id.len();
        let ticks = match self.config.mode {
            MiMode::Presence => 1,
            MiMode::Timeline => u64::from(self.config.ticks_per_interval.max(1)),
        };
        let mut cooc = vec![0u64; n * n];
        let mut merged_intervals = 0usize;
        for interval in intervals {
            let merged;
            let interval = if interval.has_duplicate_ids() {
                merged_intervals += 1;
                merged = interval.merged();
                &merged
            } else {
                interval
            };
            let present: Vec<(usize, Occupancy)> = interval
                .summaries
                .iter()
                .filter_map(|s| {
                    id_to_index
                        .get(&s.message_id)
                        .map(|&i| (i, self.occupancy(s)))
                })
                .collect();
            for (a, &(i, ref occ_i)) in present.iter().enumerate() {
                for &(j, ref occ_j) in &present[a..] {
                    let both = occ_i.overlap(occ_j, ticks);
                    cooc[i * n + j] += both;
                    if i != j {
                        cooc[j * n + i] += both;
                    }
                }
            }
        }

        if merged_intervals > 0 {
            warn!(intervals = merged_intervals, "merged repeated message ids within intervals");
        }

        let intervals_seen = (intervals.len() as u64).max(1);
        let samples = intervals_seen * ticks;

        let mut info = DenseMatrix::zeros(n);
        info.par_rows_mut().enumerate().for_each(|(i, row)| {
            let n_i = cooc[i * n + i];
            for (j, cell) in row.iter_mut().enumerate() {
                if i != j {
                    *cell = binary_mutual_information(cooc[i * n + j], n_i, cooc[j * n + j], samples);
                }
            }
        });

        let result = MutualInformationMatrix {
            info,
            index_to_id,
            id_to_index,
            appearances,
            intervals: intervals_seen,
            seen,
        };
        info!(
            ids = result.len(),
            intervals = result.intervals,
            mode = ?self.config.mode,
            global_mean = result.global_mean(),
            "mutual information matrix built"
        );
        result
    }

    fn occupancy(&self, summary: &MessageSummary) -> Occupancy {
        if self.config.mode == MiMode::Presence {
            return Occupancy::All;
        }
        match &summary.timeline {
            Some(ticks) => {
                let mut ticks: Vec<u32> = ticks
                    .iter()
                    .copied()
                    .filter(|&t| t < self.config.ticks_per_interval)
                    .collect();
                ticks.sort_unstable();
                ticks.dedup();
                if ticks.is_empty() {
                    Occupancy::All
                } else {
                    Occupancy::Ticks(ticks)
                }
            }
            None => Occupancy::All,
        }
    }
}

/// Samples of one interval in which a message is present.
#[derive(Debug, Clone)]
enum Occupancy {
    All,
    /// Sorted, deduplicated tick positions.
    Ticks(Vec<u32>),
}

impl Occupancy {
    fn overlap(&self, other: &Occupancy, ticks: u64) -> u64 {
        match (self, other) {
            (Occupancy::All, Occupancy::All) => ticks,
            (Occupancy::All, Occupancy::Ticks(t)) | (Occupancy::Ticks(t), Occupancy::All) => t.len() as u64,
            (Occupancy::Ticks(a), Occupancy::Ticks(b)) => sorted_intersection_len(a, b),
        }
    }
}

fn sorted_intersection_len(a: &[u32], b: &[u32]) -> u64 {
    let (mut i, mut j, mut both) = (0, 0, 0u64);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                both += 1;
                i += 1;
                j += 1;
            }
        }
    }
    both
}

/// Mutual information (nats) of two binary indicators from their joint count
/// `n11`, marginal counts `n_i`, `n_j` and the sample total.
pub fn binary_mutual_information(n11: u64, n_i: u64, n_j: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total_f = total as f64;
    let n11 = n11.min(n_i).min(n_j);
    let n10 = n_i - n11;
    let n01 = n_j - n11;
    let n00 = total.saturating_sub(n_i + n_j - n11);

    let p_i = n_i as f64 / total_f;
    let p_j = n_j as f64 / total_f;
    let cells = [
        (n11, p_i, p_j),
        (n10, p_i, 1.0 - p_j),
        (n01, 1.0 - p_i, p_j),
        (n00, 1.0 - p_i, 1.0 - p_j),
    ];

    let mut mi = 0.0;
    for (count, px, py) in cells {
        if count == 0 {
            continue;
        }
        let pxy = count as f64 / total_f;
        mi += pxy * (pxy / (px * py)).ln();
    }
    // Rounding can leave a tiny negative for independent indicators.
    mi.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn interval(id: u64, messages: &[u64]) -> Interval {
        messages
            .iter()
            .fold(Interval::new(id, Utc::now()), |iv, &m| iv.with_message(m, 1))
    }

    fn presence(min_appearances: u64) -> MutualInfoBuilder {
        MutualInfoBuilder::new(MutualInfoConfig {
            min_appearances,
            ..MutualInfoConfig::default()
        })
    }

    #[test]
    fn perfectly_correlated_pair_has_entropy_information() {
        // Ids 1 and 2 always together, present in half of the intervals.
        let intervals = vec![
            interval(0, &[1, 2]),
            interval(1, &[3]),
            interval(2, &[1, 2]),
            interval(3, &[3]),
        ];
        let m = presence(0).build(&intervals);
        let (a, b) = (m.index_of(1).unwrap(), m.index_of(2).unwrap());
        assert!((m.get(a, b) - std::f64::consts::LN_2).abs() < 1e-10);
        assert_eq!(m.get(a, a), 0.0);
        assert!((m.get(a, b) - m.get(b, a)).abs() < 1e-12);
    }

    #[test]
    fn independent_pair_has_no_information() {
        let intervals = vec![
            interval(0, &[1, 2]),
            interval(1, &[1]),
            interval(2, &[2]),
            interval(3, &[]),
        ];
        let m = presence(0).build(&intervals);
        let (a, b) = (m.index_of(1).unwrap(), m.index_of(2).unwrap());
        assert!(m.get(a, b).abs() < 1e-12);
    }

    #[test]
    fn rare_ids_are_filtered_but_seen() {
        let intervals = vec![interval(0, &[1, 2, 9]), interval(1, &[1, 2]), interval(2, &[1])];
        let m = presence(1).build(&intervals);
        assert_eq!(m.ids(), &[1, 2]);
        assert_eq!(m.index_of(9), None);
        assert!(m.seen_ids().contains(&9));
        assert_eq!(m.appearances(0), 3);
        assert_eq!(m.total_intervals(), 3);
    }

    #[test]
    fn zero_intervals_count_as_one() {
        let m = presence(0).build(&[]);
        assert!(m.is_empty());
        assert_eq!(m.total_intervals(), 1);
        assert_eq!(m.global_mean(), 0.0);
    }

    #[test]
    fn timeline_mode_separates_ticks() {
        // Same intervals, but 1 and 2 never share a tick.
        let mut a = Interval::new(0, Utc::now());
        a.push(MessageSummary::new(1, 1).with_timeline(vec![0]));
        a.push(MessageSummary::new(2, 1).with_timeline(vec![1]));
        let mut b = Interval::new(1, Utc::now());
        b.push(MessageSummary::new(1, 1).with_timeline(vec![2]));
        b.push(MessageSummary::new(2, 1).with_timeline(vec![3]));
        let c = interval(2, &[3]);
        let intervals = vec![a, b, c];

        let presence = presence(0).build(&intervals);
        let timeline = MutualInfoBuilder::new(MutualInfoConfig {
            min_appearances: 0,
            mode: MiMode::Timeline,
            ticks_per_interval: 4,
        })
        .build(&intervals);

        let (i, j) = (presence.index_of(1).unwrap(), presence.index_of(2).unwrap());
        assert!(presence.get(i, j) > 0.5);
        // Disjoint ticks: less shared information than full co-presence.
        assert!(timeline.get(i, j) < presence.get(i, j));
    }

    #[test]
    fn missing_timeline_fills_interval() {
        let full = Occupancy::All;
        let some = Occupancy::Ticks(vec![1, 3]);
        assert_eq!(full.overlap(&some, 10), 2);
        assert_eq!(full.overlap(&full, 10), 10);
        assert_eq!(sorted_intersection_len(&[1, 2, 5, 8], &[2, 3, 8]), 2);
    }

    #[test]
    fn repeated_ids_in_deserialized_interval_are_merged() {
        let json = |first: &str| {
            format!(
                r#"[
                {{"id":0,"start":"2024-03-01T00:00:00Z","summaries":[{first}]}},
                {{"id":1,"start":"2024-03-01T00:01:00Z","summaries":[{{"message_id":1,"count":1}},{{"message_id":2,"count":1}}]}},
                {{"id":2,"start":"2024-03-01T00:02:00Z","summaries":[{{"message_id":3,"count":1}}]}},
                {{"id":3,"start":"2024-03-01T00:03:00Z","summaries":[{{"message_id":3,"count":1}}]}}
                ]"#
            )
        };
        let repeated: Vec<Interval> = serde_json::from_str(&json(
            r#"{"message_id":1,"count":1},{"message_id":2,"count":1},{"message_id":1,"count":2}"#,
        ))
        .unwrap();
        let clean: Vec<Interval> =
            serde_json::from_str(&json(r#"{"message_id":1,"count":3},{"message_id":2,"count":1}"#)).unwrap();

        let a = presence(0).build(&repeated);
        let b = presence(0).build(&clean);
        let (i, j) = (a.index_of(1).unwrap(), a.index_of(2).unwrap());
        assert!((a.get(i, j) - std::f64::consts::LN_2).abs() < 1e-10);
        assert!((a.get(i, j) - b.get(i, j)).abs() < 1e-10);
        assert_eq!(a.appearances(i), 2);
    }

    #[test]
    fn mutual_information_bounds() {
        assert_eq!(binary_mutual_information(0, 0, 0, 0), 0.0);
        // Always present: constant indicator carries no information.
        assert!(binary_mutual_information(4, 4, 2, 4).abs() < 1e-12);
        assert!(binary_mutual_information(2, 2, 2, 4) > 0.0);
    }
}
