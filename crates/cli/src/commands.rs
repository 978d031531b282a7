use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use loglens_compute::{
    ContextScorer, InitialPartition, IntervalScorer, Model, Trainer, UniquifyScorer,
};
use loglens_core::{Config, Interval};
use loglens_textclust::{AssignmentOutcome, FileClusterStore, TextClusterer};

use crate::cli::{ClusterArgs, ScoreArgs, TrainArgs};

// ── cluster ───────────────────────────────────────────────────

pub fn cluster(config: &Config, args: &ClusterArgs, out: &mut impl Write) -> Result<()> {
    let mut clusterer = TextClusterer::new(&config.clustering);
    let store_dir = args.store_dir.as_ref().or(config.clustering.store_dir.as_ref());
    if let Some(dir) = store_dir {
        let store = FileClusterStore::open(dir)
            .with_context(|| format!("failed to open cluster store at {}", dir.display()))?
            .with_lock_timeout(Duration::from_millis(config.clustering.lock_timeout_ms));
        clusterer = clusterer.with_store(Arc::new(store));
        clusterer
            .load_from_store()
            .context("failed to load clusters from store")?;
    }

    let input = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let (mut lines, mut created, mut skipped) = (0usize, 0usize, 0usize);
    for (number, line) in BufReader::new(input).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", args.input.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let Some((component, timestamp, text)) = parse_line(&line) else {
            warn!(line = number + 1, "skipping malformed input line");
            skipped += 1;
            continue;
        };
        let assignment = clusterer
            .get_or_add_cluster(component, text, timestamp)
            .with_context(|| format!("clustering failed at line {}", number + 1))?;
        let outcome = match assignment.outcome {
            AssignmentOutcome::Matched => "matched",
            AssignmentOutcome::Created => {
                created += 1;
                "created"
            }
        };
        writeln!(out, "{}\t{}\t{}", component, assignment.cluster_id, outcome)?;
        lines += 1;
    }

    info!(
        lines,
        created,
        skipped,
        clusters = clusterer.cluster_count(),
        "clustering finished"
    );
    Ok(())
}

/// Split `component<TAB>timestamp<TAB>text`. The text may contain tabs.
fn parse_line(line: &str) -> Option<(&str, DateTime<Utc>, &str)> {
    let mut parts = line.splitn(3, '\t');
    let component = parts.next()?.trim();
    let timestamp = DateTime::parse_from_rfc3339(parts.next()?.trim()).ok()?;
    let text = parts.next()?;
    if component.is_empty() {
        return None;
    }
    Some((component, timestamp.with_timezone(&Utc), text))
}

// ── train ─────────────────────────────────────────────────────

pub fn train(config: &Config, args: &TrainArgs) -> Result<()> {
    let mut training = config.training.clone();
    if let Some(k) = args.clusters {
        training.num_clusters = k;
    }
    if let Some(seed) = args.seed {
        training.seed = seed;
    }
    if args.initial_model.is_some() || args.initial_assignment.is_some() {
        training.initial_model = args.initial_model.clone();
        training.initial_assignment = args.initial_assignment.clone();
    }

    let intervals = read_intervals(&args.intervals)?;
    let initial = InitialPartition::from_config(&training)
        .context("failed to load initial partition")?;
    let trainer = Trainer::new(training).context("invalid training configuration")?;
    let outcome = trainer
        .train(&intervals, initial)
        .context("training failed")?;

    outcome
        .model
        .save(&args.output)
        .with_context(|| format!("failed to write model to {}", args.output.display()))?;
    info!(
        output = %args.output.display(),
        clusters = outcome.model.num_clusters(),
        ids = outcome.matrix_ids,
        "model written"
    );
    Ok(())
}

// ── score ─────────────────────────────────────────────────────

pub fn score(config: &Config, args: &ScoreArgs, out: &mut impl Write) -> Result<()> {
    let model = Model::load(&args.model)
        .with_context(|| format!("failed to load model from {}", args.model.display()))?;
    let intervals = read_intervals(&args.intervals)?;
    if intervals.is_empty() {
        warn!(path = %args.intervals.display(), "no intervals to score");
    }
    let model = Arc::new(model);

    let mut scorer: Box<dyn IntervalScorer> = if args.uniquify {
        Box::new(UniquifyScorer::from_config(model, &config.scoring))
    } else {
        Box::new(ContextScorer::from_config(model, &config.scoring))
    };

    let mut messages = 0usize;
    let mut anomaly = 0.0;
    for interval in &intervals {
        for stats in scorer.score_interval(interval) {
            anomaly += stats.anomaly;
            messages += 1;
            serde_json::to_writer(&mut *out, &stats)?;
            writeln!(out)?;
        }
    }
    info!(
        intervals = intervals.len(),
        messages,
        total_anomaly = anomaly,
        uniquify = args.uniquify,
        "scoring finished"
    );
    Ok(())
}

fn read_intervals(path: &Path) -> Result<Vec<Interval>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read intervals from {}", path.display()))?;
    let intervals: Vec<Interval> = serde_json::from_str(&json)
        .with_context(|| format!("failed to parse intervals in {}", path.display()))?;
    Ok(intervals)
}
