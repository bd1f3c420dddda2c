// src/config.rs
// Process-wide configuration, read once from the environment at startup.

use log::{debug, warn};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 600;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 1;
pub const DEFAULT_BATCH_FLUSH_SIZE: usize = 500;

pub const DEFAULT_AUTO_THRESHOLD: f64 = 95.0;
pub const DEFAULT_REVIEW_THRESHOLD: f64 = 60.0;
pub const DEFAULT_AMBIGUITY_FREE_CANDIDATES: i64 = 2;
pub const DEFAULT_AMBIGUITY_PENALTY: f64 = 2.0;
pub const WEAK_NAME_SCORE_CAP: f64 = 50.0;

fn env_parse<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}, using default {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

/// Worker loop and queue tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle sleep between claim attempts.
    pub poll_interval: Duration,
    /// Age above which a `processing` job is considered abandoned.
    pub stale_threshold: Duration,
    /// Attempts before a job fails permanently.
    pub max_attempts: i32,
    /// Rows per multi-row transaction insert.
    pub batch_flush_size: usize,
    /// Rows between batch counter updates.
    pub progress_every: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            stale_threshold: Duration::from_secs(DEFAULT_STALE_THRESHOLD_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch_flush_size: DEFAULT_BATCH_FLUSH_SIZE,
            progress_every: DEFAULT_BATCH_FLUSH_SIZE,
        }
    }
}

impl WorkerConfig {
    /// Reads POLL_INTERVAL_MS, STALE_THRESHOLD (seconds), MAX_ATTEMPTS,
    /// BATCH_FLUSH_SIZE and PROGRESS_EVERY. PROGRESS_EVERY defaults to the
    /// flush size so counters move once per flush.
    pub fn from_env() -> Self {
        let poll_ms = env_parse("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS);
        let stale_secs = env_parse("STALE_THRESHOLD", DEFAULT_STALE_THRESHOLD_SECS);
        let max_attempts = env_parse("MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS);
        let batch_flush_size = env_parse("BATCH_FLUSH_SIZE", DEFAULT_BATCH_FLUSH_SIZE);
        let progress_every = env_parse("PROGRESS_EVERY", batch_flush_size);

        let config = WorkerConfig {
            poll_interval: Duration::from_millis(poll_ms),
            stale_threshold: Duration::from_secs(stale_secs),
            max_attempts,
            batch_flush_size,
            progress_every,
        };
        debug!("Worker config: {:?}", config);
        config
    }
}

/// Matcher calibration. Fixed for the life of the process; the matcher never
/// derives thresholds from call-site input.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Score at or above which a decision is auto_matched.
    pub auto_threshold: f64,
    /// Score at or above which a decision is needs_review.
    pub review_threshold: f64,
    /// Candidate count at which the ambiguity penalty starts.
    pub ambiguity_free_candidates: i64,
    /// Points deducted per candidate beyond the free count.
    pub ambiguity_penalty_per_extra: f64,
    /// Cap applied to the name score when the extracted name is too short.
    pub weak_name_cap: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            auto_threshold: DEFAULT_AUTO_THRESHOLD,
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
            ambiguity_free_candidates: DEFAULT_AMBIGUITY_FREE_CANDIDATES,
            ambiguity_penalty_per_extra: DEFAULT_AMBIGUITY_PENALTY,
            weak_name_cap: WEAK_NAME_SCORE_CAP,
        }
    }
}

impl MatcherConfig {
    /// Reads T_AUTO, T_REVIEW, AMBIG_A and AMBIG_P.
    pub fn from_env() -> Self {
        let config = MatcherConfig {
            auto_threshold: env_parse("T_AUTO", DEFAULT_AUTO_THRESHOLD),
            review_threshold: env_parse("T_REVIEW", DEFAULT_REVIEW_THRESHOLD),
            ambiguity_free_candidates: env_parse("AMBIG_A", DEFAULT_AMBIGUITY_FREE_CANDIDATES),
            ambiguity_penalty_per_extra: env_parse("AMBIG_P", DEFAULT_AMBIGUITY_PENALTY),
            weak_name_cap: WEAK_NAME_SCORE_CAP,
        };
        debug!("Matcher config: {:?}", config);
        config
    }
}
