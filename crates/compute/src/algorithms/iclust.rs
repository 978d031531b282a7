//! Information-theoretic exchange clustering over a mutual-information matrix.
//!
//! Each run starts from an initial assignment of the `n` elements into `k`
//! bins and repeatedly moves one random element to the cluster that improves
//! the [`Objective`] the most. Runs are independent restarts with derived
//! seeds; the best final objective wins.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use loglens_core::{ConfigError, TrainingConfig};

use super::mutual_info::MutualInformationMatrix;
use crate::error::{ComputeError, ComputeResult};

/// Minimum objective gain for a move to count as an improvement.
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionParams {
    pub num_clusters: usize,
    pub num_runs: usize,
    pub seed: u64,
    /// Weight of the cluster-size entropy penalty.
    pub alpha: f64,
    pub max_trials: usize,
    pub max_idle_trials: usize,
}

impl Default for PartitionParams {
    fn default() -> Self {
        Self::from(&TrainingConfig::default())
    }
}

impl From<&TrainingConfig> for PartitionParams {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            num_clusters: config.num_clusters,
            num_runs: config.num_runs,
            seed: config.seed,
            alpha: config.alpha,
            max_trials: config.max_trials,
            max_idle_trials: config.max_idle_trials,
        }
    }
}

/// Scoring function maximized by the search.
///
/// The objective is a sum of independent per-cluster terms, which lets a
/// move be evaluated from the two clusters it touches.
pub trait Objective: Send + Sync {
    /// Contribution of one cluster with `size` elements whose unordered
    /// intra-cluster pairs sum to `links`, out of `n` elements overall.
    fn cluster_term(&self, size: usize, links: f64, n: usize) -> f64;
}

/// `F = Σ_c p(c)·mean_c − alpha·H(C)` with `p(c) = n_c / n` and `mean_c`
/// the mean pairwise information inside cluster `c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InformationObjective {
    pub alpha: f64,
}

impl Objective for InformationObjective {
    fn cluster_term(&self, size: usize, links: f64, n: usize) -> f64 {
        if size == 0 || n == 0 {
            return 0.0;
        }
        let p = size as f64 / n as f64;
        let mean = if size < 2 {
            0.0
        } else {
            links / (size * (size - 1) / 2) as f64
        };
        // −alpha·H(C) expands to +alpha·Σ p·ln p.
        p * mean + self.alpha * p * p.ln()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub size: usize,
    /// Mean pairwise information of the cluster's members.
    pub score: f64,
}

/// Assignment of every dense matrix index to a non-empty cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Cluster of each dense index.
    pub assignment: Vec<usize>,
    pub clusters: Vec<ClusterSummary>,
    /// Objective value of the partition.
    pub objective: f64,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.assignment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignment.is_empty()
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Dense indices assigned to `cluster`, ascending.
    pub fn members(&self, cluster: usize) -> Vec<usize> {
        self.assignment
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == cluster)
            .map(|(i, _)| i)
            .collect()
    }

    /// Build from a raw assignment, dropping empty clusters and renumbering
    /// the rest in ascending label order.
    fn compact(raw: &[usize], matrix: &MutualInformationMatrix, objective: f64) -> Self {
        let labels = raw.iter().copied().max().map_or(0, |m| m + 1);
        let mut renumber = vec![None; labels];
        let mut next = 0;
        for label in 0..labels {
            if raw.contains(&label) {
                renumber[label] = Some(next);
                next += 1;
            }
        }
        let assignment: Vec<usize> = raw
            .iter()
            .map(|&c| renumber[c].unwrap_or_default())
            .collect();

        let mut partition = Self {
            assignment,
            clusters: Vec::with_capacity(next),
            objective,
        };
        for c in 0..next {
            let members = partition.members(c);
            partition.clusters.push(ClusterSummary {
                size: members.len(),
                score: matrix.mean_pairwise(&members),
            });
        }
        partition
    }
}

/// Randomized multi-restart exchange search.
#[derive(Clone, Default)]
pub struct PartitionEngine {
    objective: Option<Arc<dyn Objective>>,
}

impl PartitionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default [`InformationObjective`]. `alpha` is then unused.
    pub fn with_objective(mut self, objective: Arc<dyn Objective>) -> Self {
        self.objective = Some(objective);
        self
    }

    /// Cluster count actually used for `n` elements: clamped to `n - 1`.
    pub fn effective_clusters(num_clusters: usize, n: usize) -> usize {
        if n > 1 && num_clusters >= n {
            n - 1
        } else {
            num_clusters
        }
    }

    pub fn run(
        &self,
        matrix: &MutualInformationMatrix,
        params: &PartitionParams,
        initial: Option<&[usize]>,
    ) -> ComputeResult<Partition> {
        if params.num_clusters == 0 {
            return Err(ConfigError::OutOfRange {
                field: "num_clusters",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if params.num_runs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "num_runs",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        let n = matrix.len();
        let objective: Arc<dyn Objective> = match &self.objective {
            Some(objective) => objective.clone(),
            None => Arc::new(InformationObjective {
                alpha: params.alpha,
            }),
        };

        if n < 3 {
            // One singleton per element; no search.
            let raw: Vec<usize> = (0..n).collect();
            let value = evaluate(objective.as_ref(), matrix, &raw, n);
            debug!(ids = n, "degenerate partition: singletons");
            return Ok(Partition::compact(&raw, matrix, value));
        }

        let k = Self::effective_clusters(params.num_clusters, n);
        if k != params.num_clusters {
            debug!(requested = params.num_clusters, clamped = k, "clamped cluster count");
        }
        if let Some(initial) = initial {
            validate_initial(initial, n, k)?;
        }

        let runs: Vec<RunResult> = (0..params.num_runs)
            .into_par_iter()
            .map(|run| run_once(objective.as_ref(), matrix, params, k, initial, run))
            .collect();

        let mut best = 0;
        for (run, result) in runs.iter().enumerate() {
            debug!(
                run,
                objective = result.objective,
                trials = result.trials,
                moves = result.moves,
                "partition run finished"
            );
            if result.objective > runs[best].objective {
                best = run;
            }
        }

        let partition = Partition::compact(&runs[best].assignment, matrix, runs[best].objective);
        info!(
            ids = n,
            requested_clusters = k,
            clusters = partition.num_clusters(),
            best_run = best,
            objective = partition.objective,
            "partition search complete"
        );
        Ok(partition)
    }
}

fn validate_initial(initial: &[usize], n: usize, k: usize) -> ComputeResult<()> {
    if initial.len() != n {
        return Err(ComputeError::InvalidInitialPartition(format!(
            "expected {} entries, got {}",
            n,
            initial.len()
        )));
    }
    if let Some((index, &label)) = initial.iter().enumerate().find(|&(_, &c)| c >= k) {
        return Err(ComputeError::InvalidInitialPartition(format!(
            "entry {} assigns cluster {} but only {} clusters are used",
            index, label, k
        )));
    }
    Ok(())
}

/// Seed of restart `run`, decorrelated from neighbouring runs.
fn derive_seed(seed: u64, run: usize) -> u64 {
    seed ^ (run as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

struct RunResult {
    assignment: Vec<usize>,
    objective: f64,
    trials: usize,
    moves: usize,
}

fn run_once(
    objective: &dyn Objective,
    matrix: &MutualInformationMatrix,
    params: &PartitionParams,
    k: usize,
    initial: Option<&[usize]>,
    run: usize,
) -> RunResult {
    let n = matrix.len();
    let mut rng = StdRng::seed_from_u64(derive_seed(params.seed, run));

    let mut assignment = match initial {
        Some(initial) => initial.to_vec(),
        None => {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut rng);
            let mut assignment = vec![0; n];
            for (pos, &element) in order.iter().enumerate() {
                assignment[element] = pos % k;
            }
            assignment
        }
    };

    // links[e * k + c]: summed information between e and the members of c.
    let mut links = vec![0.0; n * k];
    let mut sizes = vec![0usize; k];
    let mut intra = vec![0.0; k];
    for e in 0..n {
        sizes[assignment[e]] += 1;
        for j in 0..n {
            if j != e {
                links[e * k + assignment[j]] += matrix.get(e, j);
            }
        }
    }
    for e in 0..n {
        intra[assignment[e]] += links[e * k + assignment[e]] / 2.0;
    }

    let mut idle = 0;
    let mut trials = 0;
    let mut moves = 0;
    while trials < params.max_trials && idle < params.max_idle_trials {
        trials += 1;
        let e = rng.gen_range(0..n);
        let from = assignment[e];

        let removed = objective.cluster_term(sizes[from] - 1, intra[from] - links[e * k + from], n)
            - objective.cluster_term(sizes[from], intra[from], n);
        let mut best: Option<(usize, f64)> = None;
        for to in (0..k).filter(|&c| c != from) {
            let added = objective.cluster_term(sizes[to] + 1, intra[to] + links[e * k + to], n)
                - objective.cluster_term(sizes[to], intra[to], n);
            let gain = removed + added;
            if best.map_or(true, |(_, g)| gain > g) {
                best = Some((to, gain));
            }
        }

        match best {
            Some((to, gain)) if gain > MIN_GAIN => {
                intra[from] -= links[e * k + from];
                intra[to] += links[e * k + to];
                sizes[from] -= 1;
                sizes[to] += 1;
                for j in (0..n).filter(|&j| j != e) {
                    let w = matrix.get(j, e);
                    links[j * k + from] -= w;
                    links[j * k + to] += w;
                }
                assignment[e] = to;
                moves += 1;
                idle = 0;
            }
            _ => idle += 1,
        }
    }

    // Recomputed from scratch so incremental rounding never decides a tie.
    let value = evaluate(objective, matrix, &assignment, k);
    RunResult {
        assignment,
        objective: value,
        trials,
        moves,
    }
}

/// Objective value of `assignment` with labels below `k`.
fn evaluate(objective: &dyn Objective, matrix: &MutualInformationMatrix, assignment: &[usize], k: usize) -> f64 {
    let n = assignment.len();
    let mut sizes = vec![0usize; k];
    let mut intra = vec![0.0; k];
    for (i, &c) in assignment.iter().enumerate() {
        sizes[c] += 1;
        for j in (i + 1)..n {
            if assignment[j] == c {
                intra[c] += matrix.get(i, j);
            }
        }
    }
    sizes
        .iter()
        .zip(&intra)
        .map(|(&size, &links)| objective.cluster_term(size, links, n))
        .sum()
}
