//! Runtime configuration, read from `SPOTBOOK_*` environment variables.

use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_WAL_FILE: &str = "spotbook.wal";
const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the log.
    pub data_dir: PathBuf,
    /// Log file name inside `data_dir`.
    pub wal_file: String,
    /// Prometheus listener port; metrics are off when unset.
    pub metrics_port: Option<u16>,
    /// Log entries written since the last compaction before compacting again.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            wal_file: DEFAULT_WAL_FILE.into(),
            metrics_port: None,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SPOTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            wal_file: lookup("SPOTBOOK_WAL_FILE").unwrap_or(defaults.wal_file),
            metrics_port: lookup("SPOTBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("SPOTBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }
}
