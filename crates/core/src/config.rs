use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

/// Parse a profiled env var. A present but unparsable value is an error,
/// never a silent fallback to the default.
fn profiled_env_parse<T>(profile: &str, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match profiled_env_opt(profile, key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn profiled_env_parse_opt<T>(profile: &str, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    profiled_env_opt(profile, key)
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> Result<bool, ConfigError> {
    match profiled_env_opt(profile, key) {
        Some(raw) => {
            let normalized = raw.trim().to_ascii_lowercase();
            match normalized.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                    reason: "expected a boolean".to_string(),
                }),
            }
        }
        None => Ok(default),
    }
}

fn profiled_env_list(profile: &str, key: &str, default: &[&str]) -> Vec<String> {
    match profiled_env_opt(profile, key) {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub clustering: ClusteringConfig,
    pub training: TrainingConfig,
    pub scoring: ScoringConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LOGLENS_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile = env_opt("LOGLENS_PROFILE").unwrap_or_default().to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build and validate config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, ConfigError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let config = Self {
            profile: p.to_string(),
            clustering: ClusteringConfig::from_env_profiled(p)?,
            training: TrainingConfig::from_env_profiled(p)?,
            scoring: ScoringConfig::from_env_profiled(p)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clustering.validate()?;
        self.training.validate()?;
        self.scoring.validate()
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  clustering:  max_len={}, delta={}, factor={}, magic_words={}, lock_timeout={}ms, store={}",
            self.clustering.max_text_length,
            self.clustering.threshold_delta,
            self.clustering.threshold_factor,
            self.clustering.magic_words.len(),
            self.clustering.lock_timeout_ms,
            self.clustering
                .store_dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        );
        tracing::info!(
            "  training:    k={}, runs={}, seed={}, alpha={}, min_appearances={}, timeline={}",
            self.training.num_clusters,
            self.training.num_runs,
            self.training.seed,
            self.training.alpha,
            self.training.min_appearances,
            self.training.timeline
        );
        tracing::info!(
            "  scoring:     context_fraction={}, uniquify_fraction={}",
            self.scoring.context_fraction,
            self.scoring.uniquify_fraction
        );
    }
}

fn require(cond: bool, field: &'static str, reason: impl Into<String>) -> Result<(), ConfigError> {
    if cond {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            reason: reason.into(),
        })
    }
}

fn require_fraction(value: f64, field: &'static str) -> Result<(), ConfigError> {
    require(
        value > 0.0 && value <= 1.0,
        field,
        format!("must be in (0, 1], got {}", value),
    )
}

// ── Text clustering ───────────────────────────────────────────

/// Words whose presence decides similarity regardless of edit distance.
pub const DEFAULT_MAGIC_WORDS: &[&str] = &[
    "start",
    "started",
    "stop",
    "stopped",
    "up",
    "down",
    "open",
    "opened",
    "close",
    "closed",
    "accepted",
    "rejected",
    "failed",
    "succeeded",
    "enabled",
    "disabled",
    "connected",
    "disconnected",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Normalized texts are truncated to this many characters.
    pub max_text_length: usize,
    pub threshold_delta: f64,
    pub threshold_factor: f64,
    pub magic_words: Vec<String>,
    /// Components whose texts are compared as one opaque token.
    pub whole_string_components: Vec<String>,
    pub lock_timeout_ms: u64,
    /// Directory of the file-backed cluster store; `None` = in-memory only.
    pub store_dir: Option<PathBuf>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            max_text_length: 1024,
            threshold_delta: 1.0,
            threshold_factor: 3.0,
            magic_words: DEFAULT_MAGIC_WORDS.iter().map(|s| s.to_string()).collect(),
            whole_string_components: Vec::new(),
            lock_timeout_ms: 30_000,
            store_dir: None,
        }
    }
}

impl ClusteringConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            max_text_length: profiled_env_parse(p, "CLUSTER_MAX_TEXT_LENGTH", d.max_text_length)?,
            threshold_delta: profiled_env_parse(p, "CLUSTER_THRESHOLD_DELTA", d.threshold_delta)?,
            threshold_factor: profiled_env_parse(p, "CLUSTER_THRESHOLD_FACTOR", d.threshold_factor)?,
            magic_words: profiled_env_list(p, "CLUSTER_MAGIC_WORDS", DEFAULT_MAGIC_WORDS),
            whole_string_components: profiled_env_list(p, "CLUSTER_WHOLE_STRING_COMPONENTS", &[]),
            lock_timeout_ms: profiled_env_parse(p, "CLUSTER_LOCK_TIMEOUT_MS", d.lock_timeout_ms)?,
            store_dir: profiled_env_opt(p, "CLUSTER_STORE_DIR").map(PathBuf::from),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require(self.max_text_length > 0, "max_text_length", "must be positive")?;
        require(
            self.threshold_factor > 0.0 && self.threshold_factor.is_finite(),
            "threshold_factor",
            format!("must be a positive number, got {}", self.threshold_factor),
        )?;
        require(
            self.threshold_delta.is_finite(),
            "threshold_delta",
            "must be finite",
        )?;
        require(self.lock_timeout_ms > 0, "lock_timeout_ms", "must be positive")
    }
}

// ── Training ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Ids seen in `min_appearances` intervals or fewer are dropped before clustering.
    pub min_appearances: u64,
    /// Use sub-interval timelines when computing co-occurrence.
    pub timeline: bool,
    pub ticks_per_interval: u32,
    pub num_clusters: usize,
    pub num_runs: usize,
    pub seed: u64,
    pub alpha: f64,
    pub max_trials: usize,
    pub max_idle_trials: usize,
    pub min_cluster_size: usize,
    pub min_avg_info_ratio: Option<f64>,
    /// JSON file with an explicit initial assignment (dense index -> cluster).
    pub initial_assignment: Option<PathBuf>,
    /// Previously trained model whose clustering seeds the search.
    pub initial_model: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_appearances: 1,
            timeline: false,
            ticks_per_interval: 60,
            num_clusters: 20,
            num_runs: 10,
            seed: 42,
            alpha: 0.0,
            max_trials: 100_000,
            max_idle_trials: 2_000,
            min_cluster_size: 2,
            min_avg_info_ratio: None,
            initial_assignment: None,
            initial_model: None,
        }
    }
}

impl TrainingConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            min_appearances: profiled_env_parse(p, "TRAIN_MIN_APPEARANCES", d.min_appearances)?,
            timeline: profiled_env_bool(p, "TRAIN_TIMELINE", d.timeline)?,
            ticks_per_interval: profiled_env_parse(p, "TRAIN_TICKS_PER_INTERVAL", d.ticks_per_interval)?,
            num_clusters: profiled_env_parse(p, "TRAIN_NUM_CLUSTERS", d.num_clusters)?,
            num_runs: profiled_env_parse(p, "TRAIN_NUM_RUNS", d.num_runs)?,
            seed: profiled_env_parse(p, "TRAIN_SEED", d.seed)?,
            alpha: profiled_env_parse(p, "TRAIN_ALPHA", d.alpha)?,
            max_trials: profiled_env_parse(p, "TRAIN_MAX_TRIALS", d.max_trials)?,
            max_idle_trials: profiled_env_parse(p, "TRAIN_MAX_IDLE_TRIALS", d.max_idle_trials)?,
            min_cluster_size: profiled_env_parse(p, "TRAIN_MIN_CLUSTER_SIZE", d.min_cluster_size)?,
            min_avg_info_ratio: profiled_env_parse_opt(p, "TRAIN_MIN_AVG_INFO_RATIO")?,
            initial_assignment: profiled_env_opt(p, "TRAIN_INITIAL_ASSIGNMENT").map(PathBuf::from),
            initial_model: profiled_env_opt(p, "TRAIN_INITIAL_MODEL").map(PathBuf::from),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_assignment.is_some() && self.initial_model.is_some() {
            return Err(ConfigError::ConflictingSources(
                "TRAIN_INITIAL_ASSIGNMENT",
                "TRAIN_INITIAL_MODEL",
            ));
        }
        require(self.num_clusters >= 1, "num_clusters", "must be at least 1")?;
        require(self.num_runs >= 1, "num_runs", "must be at least 1")?;
        require(self.max_trials >= 1, "max_trials", "must be at least 1")?;
        require(self.max_idle_trials >= 1, "max_idle_trials", "must be at least 1")?;
        require(self.min_cluster_size >= 1, "min_cluster_size", "must be at least 1")?;
        require(self.alpha.is_finite(), "alpha", "must be finite")?;
        require(
            !self.timeline || self.ticks_per_interval >= 1,
            "ticks_per_interval",
            "must be at least 1 in timeline mode",
        )?;
        if let Some(ratio) = self.min_avg_info_ratio {
            require(
                ratio >= 0.0 && ratio.is_finite(),
                "min_avg_info_ratio",
                format!("must be a non-negative number, got {}", ratio),
            )?;
        }
        Ok(())
    }
}

// ── Scoring ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub context_fraction: f64,
    pub uniquify_fraction: f64,
    pub new_weight: f64,
    pub unclustered_weight: f64,
    pub out_of_context_weight: f64,
    pub in_context_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            context_fraction: 0.2,
            uniquify_fraction: 0.5,
            new_weight: 1.0,
            unclustered_weight: 0.5,
            out_of_context_weight: 0.25,
            in_context_weight: 0.0,
        }
    }
}

impl ScoringConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            context_fraction: profiled_env_parse(p, "SCORE_CONTEXT_FRACTION", d.context_fraction)?,
            uniquify_fraction: profiled_env_parse(p, "SCORE_UNIQUIFY_FRACTION", d.uniquify_fraction)?,
            ..d
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_fraction(self.context_fraction, "context_fraction")?;
        require_fraction(self.uniquify_fraction, "uniquify_fraction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn both_initial_sources_rejected() {
        let mut training = TrainingConfig::default();
        training.initial_assignment = Some(PathBuf::from("a.json"));
        training.initial_model = Some(PathBuf::from("m.json"));
        assert!(matches!(
            training.validate(),
            Err(ConfigError::ConflictingSources(_, _))
        ));
    }

    #[test]
    fn fraction_out_of_range_rejected() {
        let scoring = ScoringConfig {
            context_fraction: 1.5,
            ..ScoringConfig::default()
        };
        let err = scoring.validate().unwrap_err();
        assert!(err.to_string().contains("context_fraction"));
    }

    #[test]
    fn zero_factor_rejected() {
        let clustering = ClusteringConfig {
            threshold_factor: 0.0,
            ..ClusteringConfig::default()
        };
        assert!(clustering.validate().is_err());
    }

    #[test]
    fn profiled_key_wins_and_bad_values_error() {
        // Keys are unique to this test so parallel tests do not interfere.
        env::set_var("LLTEST_TRAIN_NUM_CLUSTERS", "7");
        let training = TrainingConfig::from_env_profiled("LLTEST").unwrap();
        assert_eq!(training.num_clusters, 7);

        env::set_var("LLBAD_TRAIN_SEED", "not-a-number");
        let err = TrainingConfig::from_env_profiled("LLBAD").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        env::remove_var("LLTEST_TRAIN_NUM_CLUSTERS");
        env::remove_var("LLBAD_TRAIN_SEED");
    }
}
