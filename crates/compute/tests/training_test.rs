/// End-to-end tests: train a model from intervals, persist it, reload it and
/// score fresh intervals with both scorers.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use loglens_compute::{
    ContextScorer, InitialPartition, IntervalScorer, MessageLabel, Model, Trainer, UniquifyScorer,
};
use loglens_core::{Interval, ScoringConfig, TrainingConfig};

// ============================================================================
// Test Helpers
// ============================================================================

fn interval(id: u64, messages: &[u64]) -> Interval {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(id as i64);
    messages
        .iter()
        .fold(Interval::new(id, start), |iv, &m| iv.with_message(m, 1))
}

/// Three groups of four ids, each group toggled by its own bit of the index,
/// plus id 90 which appears in a single interval.
fn training_intervals() -> Vec<Interval> {
    (0..64u64)
        .map(|i| {
            let mut ids = Vec::new();
            if i % 2 == 0 {
                ids.extend([1, 2, 3, 4]);
            }
            if (i / 2) % 2 == 0 {
                ids.extend([11, 12, 13, 14]);
            }
            if (i / 4) % 2 == 0 {
                ids.extend([21, 22, 23, 24]);
            }
            if i == 5 {
                ids.push(90);
            }
            interval(i, &ids)
        })
        .collect()
}

fn training_config() -> TrainingConfig {
    TrainingConfig {
        num_clusters: 3,
        num_runs: 8,
        max_trials: 20_000,
        max_idle_trials: 1_000,
        min_appearances: 2,
        ..TrainingConfig::default()
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_train_save_load_score() {
    let trainer = Trainer::new(training_config()).unwrap();
    let outcome = trainer
        .train(&training_intervals(), InitialPartition::None)
        .unwrap();

    // 90 is below the appearance threshold but still known.
    assert_eq!(outcome.matrix_ids, 12);
    assert!(outcome.model.is_seen(90));
    assert_eq!(outcome.model.cluster_of(90), None);
    assert_eq!(outcome.model.num_clusters(), 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    outcome.model.save(&path).unwrap();
    let model = Arc::new(Model::load(&path).unwrap());
    assert_eq!(*model, outcome.model);

    // Pick a used cluster and light up all of its members.
    let cluster = 0;
    let members = model.members(cluster);
    assert_eq!(members.len(), 4);

    let mut probe: Vec<u64> = members.clone();
    probe.extend([90, 500]);
    let scored = ContextScorer::from_config(model.clone(), &ScoringConfig::default())
        .score_interval(&interval(100, &probe));

    for stats in &scored[..4] {
        assert_eq!(stats.label, MessageLabel::InContext);
        assert_eq!(stats.cluster_id, Some(cluster));
        assert_eq!(stats.anomaly, 0.0);
    }
    assert_eq!(scored[4].label, MessageLabel::Unclustered);
    assert_eq!(scored[5].label, MessageLabel::New);
    assert_eq!(scored[5].anomaly, 1.0);

    let uniq = UniquifyScorer::from_config(model, &ScoringConfig::default())
        .score_interval(&interval(100, &probe));
    let representatives: Vec<u64> = uniq
        .iter()
        .filter(|s| s.representative)
        .map(|s| s.message_id)
        .collect();
    assert_eq!(representatives, vec![members[0]]);
}

#[test]
fn test_lone_member_is_out_of_context() {
    let outcome = Trainer::new(training_config())
        .unwrap()
        .train(&training_intervals(), InitialPartition::None)
        .unwrap();
    let model = Arc::new(outcome.model);
    let member = model.members(0)[0];

    let stats = ContextScorer::new(model, ContextScorer::DEFAULT_FRACTION)
        .score_message(&interval(7, &[member]), member);
    assert_eq!(stats.label, MessageLabel::OutOfContext);
    assert_eq!(stats.anomaly, 0.25);
}

#[test]
fn test_retrain_from_saved_model() {
    let trainer = Trainer::new(training_config()).unwrap();
    let first = trainer
        .train(&training_intervals(), InitialPartition::None)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("previous.json");
    first.model.save(&path).unwrap();

    let config = TrainingConfig {
        initial_model: Some(path),
        ..training_config()
    };
    let initial = InitialPartition::from_config(&config).unwrap();
    assert!(matches!(initial, InitialPartition::PreviousModel(_)));

    let second = Trainer::new(config)
        .unwrap()
        .train(&training_intervals(), initial)
        .unwrap();
    assert_eq!(second.model.num_clusters(), first.model.num_clusters());
    assert_ne!(second.model.model_id, first.model.model_id);
}
