//! Engine Configuration
//!
//! `HierarchyConfig` carries the database location and the concurrency knobs
//! (busy timeout, retry policy). Values come from `Default` or from
//! `SYNERGIA_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

const ENV_DB_PATH: &str = "SYNERGIA_DB_PATH";
const ENV_BUSY_TIMEOUT_MS: &str = "SYNERGIA_BUSY_TIMEOUT_MS";
const ENV_MAX_RETRIES: &str = "SYNERGIA_MAX_RETRIES";
const ENV_RETRY_BACKOFF_MS: &str = "SYNERGIA_RETRY_BACKOFF_MS";

/// Configuration for the database and hierarchy engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyConfig {
    /// Database file, created along with its parent directory if missing
    pub db_path: PathBuf,

    /// How long a connection waits on a held write lock before failing
    pub busy_timeout: Duration,

    /// Extra attempts after a `ConcurrentModification` failure
    pub max_retries: u32,

    /// Base delay between attempts; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/synergia.db"),
            busy_timeout: Duration::from_millis(5000),
            max_retries: 3,
            retry_backoff: Duration::from_millis(25),
        }
    }
}

impl HierarchyConfig {
    /// Config for a specific database file, other fields defaulted
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (unparseable values keep defaults)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.trim().is_empty()) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_BUSY_TIMEOUT_MS) {
            config.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var::<u32>(&lookup, ENV_MAX_RETRIES) {
            config.max_retries = retries;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_RETRY_BACKOFF_MS) {
            config.retry_backoff = Duration::from_millis(ms);
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}='{}', using default", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = HierarchyConfig::from_lookup(|_| None);
        assert_eq!(config, HierarchyConfig::default());
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_reads_all_variables() {
        let config = HierarchyConfig::from_lookup(lookup_from(&[
            ("SYNERGIA_DB_PATH", "/var/lib/synergia/tree.db"),
            ("SYNERGIA_BUSY_TIMEOUT_MS", "250"),
            ("SYNERGIA_MAX_RETRIES", "7"),
            ("SYNERGIA_RETRY_BACKOFF_MS", "10"),
        ]));

        assert_eq!(config.db_path, PathBuf::from("/var/lib/synergia/tree.db"));
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.retry_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_bad_values_fall_back_to_defaults() {
        let config = HierarchyConfig::from_lookup(lookup_from(&[
            ("SYNERGIA_DB_PATH", "  "),
            ("SYNERGIA_MAX_RETRIES", "many"),
        ]));

        assert_eq!(config.db_path, HierarchyConfig::default().db_path);
        assert_eq!(config.max_retries, 3);
    }
}
