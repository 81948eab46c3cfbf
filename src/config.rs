//! Run and engine configuration.
//!
//! Plain structs with public fields and sensible defaults. `from_env()`
//! starts from the defaults and overrides whatever `IRONCRUNCH_*` variables
//! are set and parse; malformed values are ignored.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Coordinator-side settings for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory under which each run creates its own scratch directory.
    pub temp_root: PathBuf,
    /// Delay between polling rounds when no stage made progress.
    pub poll_interval: Duration,
    /// Upper bound on stages submitted to the engine at once.
    pub max_in_flight: usize,
    /// Remove non-target, non-explicit intermediates after a successful run.
    pub cleanup_intermediates: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_root: env::temp_dir(),
            poll_interval: Duration::from_millis(5),
            max_in_flight: 2 * num_cpus::get().max(2),
            cleanup_intermediates: true,
        }
    }
}

impl PipelineConfig {
    /// Environment variables:
    /// - `IRONCRUNCH_TEMP_DIR`: scratch root
    /// - `IRONCRUNCH_POLL_MS`: poll interval in milliseconds
    /// - `IRONCRUNCH_MAX_IN_FLIGHT`: concurrent stage submissions
    /// - `IRONCRUNCH_KEEP_INTERMEDIATES`: `1`/`true` disables cleanup
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = env::var("IRONCRUNCH_TEMP_DIR")
            && !s.is_empty()
        {
            cfg.temp_root = PathBuf::from(s);
        }

        if let Some(ms) = parse_var::<u64>("IRONCRUNCH_POLL_MS") {
            cfg.poll_interval = Duration::from_millis(ms);
        }

        if let Some(v) = parse_var::<usize>("IRONCRUNCH_MAX_IN_FLIGHT") {
            cfg.max_in_flight = v.max(1);
        }

        if let Some(keep) = parse_flag("IRONCRUNCH_KEEP_INTERMEDIATES") {
            cfg.cleanup_intermediates = !keep;
        }

        cfg
    }
}

/// Settings for the in-process [`LocalEngine`](crate::engine::LocalEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEngineConfig {
    /// Worker threads; `None` uses the number of CPUs.
    pub threads: Option<usize>,
    /// Map-side partitions per job input.
    pub partitions: usize,
    /// Use a sort-based shuffle; keys must then support ordering.
    pub sort_shuffle: bool,
    /// Attempts per job before it is reported failed.
    pub max_attempts: usize,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            threads: None,
            partitions: 2 * num_cpus::get().max(2),
            sort_shuffle: false,
            max_attempts: 1,
        }
    }
}

impl LocalEngineConfig {
    /// Environment variables:
    /// - `IRONCRUNCH_THREADS`
    /// - `IRONCRUNCH_PARTITIONS`
    /// - `IRONCRUNCH_SORT_SHUFFLE`: `1`/`true` enables the sort shuffle
    /// - `IRONCRUNCH_MAX_ATTEMPTS`
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = parse_var::<usize>("IRONCRUNCH_THREADS") {
            cfg.threads = Some(v.max(1));
        }

        if let Some(v) = parse_var::<usize>("IRONCRUNCH_PARTITIONS") {
            cfg.partitions = v.max(1);
        }

        if let Some(v) = parse_flag("IRONCRUNCH_SORT_SHUFFLE") {
            cfg.sort_shuffle = v;
        }

        if let Some(v) = parse_var::<usize>("IRONCRUNCH_MAX_ATTEMPTS") {
            cfg.max_attempts = v.max(1);
        }

        cfg
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_flag(name: &str) -> Option<bool> {
    let s = env::var(name).ok()?;
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
