//! Engine configuration.
//!
//! Loaded from the environment (and a `.env` file, if present):
//!
//! | Variable                  | Default              |
//! |---------------------------|----------------------|
//! | `DIET_CSV_PATH`           | `data/All_Diets.csv` |
//! | `DIET_POLL_INTERVAL_SECS` | `5`                  |
//! | `DIET_STATS_TTL_SECS`     | `3600`               |
//! | `DIET_CACHE_DIR`          | unset (no mirror)    |
//! | `DIET_WATCH_EVENTS`       | `true`               |
//! | `PORT`                    | `3000`               |
//!
//! Malformed values fall back to the default with a warning.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CSV_PATH: &str = "data/All_Diets.csv";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_STATS_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Raw CSV source.
    pub source: PathBuf,
    /// Watcher tick interval.
    pub poll_interval: Duration,
    /// Statistics time-to-live.
    pub stats_ttl: Duration,
    /// Disk mirror directory; `None` keeps everything in-process.
    pub cache_dir: Option<PathBuf>,
    /// Subscribe to file-system events for the source.
    pub watch_events: bool,
    /// HTTP port for `serve`.
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from(DEFAULT_CSV_PATH),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stats_ttl: DEFAULT_STATS_TTL,
            cache_dir: None,
            watch_events: true,
            port: DEFAULT_PORT,
        }
    }
}

impl EngineConfig {
    /// Configuration for `source` with every other setting at its default.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self::default().with_source(source)
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through `lookup` (the environment, or a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            parsed::<u64>(&lookup, key)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            source: lookup("DIET_CSV_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.source),
            poll_interval: secs("DIET_POLL_INTERVAL_SECS", defaults.poll_interval),
            stats_ttl: secs("DIET_STATS_TTL_SECS", defaults.stats_ttl),
            cache_dir: lookup("DIET_CACHE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            watch_events: parsed_bool(&lookup, "DIET_WATCH_EVENTS").unwrap_or(defaults.watch_events),
            port: parsed::<u16>(&lookup, "PORT").unwrap_or(defaults.port),
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stats_ttl(mut self, ttl: Duration) -> Self {
        self.stats_ttl = ttl;
        self
    }

    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    pub fn with_watch_events(mut self, enabled: bool) -> Self {
        self.watch_events = enabled;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring malformed setting, using default");
            None
        }
    }
}

fn parsed_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring malformed setting, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.source, PathBuf::from("data/All_Diets.csv"));
        assert_eq!(config.stats_ttl, Duration::from_secs(3600));
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_values_from_env() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DIET_CSV_PATH", "/srv/diets.csv"),
            ("DIET_POLL_INTERVAL_SECS", "30"),
            ("DIET_STATS_TTL_SECS", "60"),
            ("DIET_CACHE_DIR", "/var/cache/diet"),
            ("DIET_WATCH_EVENTS", "off"),
            ("PORT", "8080"),
        ]));

        assert_eq!(config.source, PathBuf::from("/srv/diets.csv"));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.stats_ttl, Duration::from_secs(60));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/diet")));
        assert!(!config.watch_events);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DIET_POLL_INTERVAL_SECS", "often"),
            ("DIET_STATS_TTL_SECS", "-1"),
            ("DIET_WATCH_EVENTS", "maybe"),
            ("DIET_CACHE_DIR", "  "),
        ]));

        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.stats_ttl, DEFAULT_STATS_TTL);
        assert!(config.watch_events);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new("x.csv")
            .with_poll_interval(Duration::from_millis(50))
            .with_stats_ttl(Duration::ZERO)
            .with_cache_dir(Some(PathBuf::from("mirror")))
            .with_watch_events(false);

        assert_eq!(config.source, PathBuf::from("x.csv"));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.stats_ttl, Duration::ZERO);
        assert!(!config.watch_events);
    }
}
