use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Batch driver for log message clustering, training and scoring.
///
/// Settings come from the environment (and `.env`); flags override them.
#[derive(Parser, Debug)]
#[command(name = "loglens", about = "Log anomaly detection by message co-occurrence")]
pub struct CliArgs {
    /// Config profile, e.g. PROD (overrides LOGLENS_PROFILE)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Assign text clusters to tab-separated log lines
    Cluster(ClusterArgs),
    /// Train a model from a JSON array of intervals
    Train(TrainArgs),
    /// Score intervals against a trained model, one JSON line per message
    Score(ScoreArgs),
}

#[derive(Args, Debug)]
pub struct ClusterArgs {
    /// Lines of `component<TAB>RFC3339 timestamp<TAB>text`
    #[arg(long)]
    pub input: PathBuf,

    /// File-backed cluster store directory (overrides CLUSTER_STORE_DIR)
    #[arg(long)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long)]
    pub intervals: PathBuf,

    /// Where the trained model is written
    #[arg(long)]
    pub output: PathBuf,

    /// Previously trained model seeding the search
    #[arg(long, conflicts_with = "initial_assignment")]
    pub initial_model: Option<PathBuf>,

    /// JSON array with one starting cluster per surviving id
    #[arg(long)]
    pub initial_assignment: Option<PathBuf>,

    /// Number of clusters (overrides TRAIN_NUM_CLUSTERS)
    #[arg(long)]
    pub clusters: Option<usize>,

    /// Search seed (overrides TRAIN_SEED)
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ScoreArgs {
    #[arg(long)]
    pub model: PathBuf,

    #[arg(long)]
    pub intervals: PathBuf,

    /// Mark one representative per spiking cluster
    #[arg(long)]
    pub uniquify: bool,
}
