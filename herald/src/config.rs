//! Configuration file handling.
//!
//! Everything has a default, so an empty file (or none at all) yields a
//! working single-node setup with a file-backed queue under `./queue`.
//!
//! ```toml
//! [queue]
//! backend = "file"
//! path = "/var/lib/herald/queue"
//!
//! [workers]
//! concurrency = 8
//! max_attempts = 3
//! backoff_schedule_secs = [30, 120, 600]
//!
//! [rate_limit]
//! rate_limit_max = 100
//! rate_limit_window_secs = 60
//! ```

use std::path::{Path, PathBuf};

use herald_dispatch::{RateLimitConfig, WorkerConfig};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which persistence backend the queue uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Nothing survives a restart; for tests and ephemeral runs.
    Memory,
    /// One bincode file per job under [`QueueConfig::path`].
    File,
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("./queue")
}

/// Durable queue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_backend")]
    pub backend: QueueBackend,

    /// Directory for the file backend; ignored by the memory backend.
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
}

const fn default_queue_backend() -> QueueBackend {
    QueueBackend::File
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            path: default_queue_path(),
        }
    }
}

/// Root configuration for the engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl HeraldConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_yields_defaults() {
        let config: HeraldConfig = toml::from_str("").unwrap();
        assert_eq!(config.queue.backend, QueueBackend::File);
        assert_eq!(config.workers.concurrency, 4);
        assert_eq!(config.workers.max_attempts, 3);
        assert_eq!(config.workers.backoff_schedule_secs, vec![30, 120, 600]);
        assert_eq!(config.rate_limit.rate_limit_max, 100);
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config: HeraldConfig = toml::from_str(
            r#"
            [queue]
            backend = "memory"

            [workers]
            concurrency = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.workers.concurrency, 16);
        // Untouched knobs keep their defaults.
        assert_eq!(config.workers.max_attempts, 3);
        assert_eq!(config.rate_limit.rate_limit_window_secs, 60);
    }

    #[test]
    fn scope_overrides_parse() {
        let config: HeraldConfig = toml::from_str(
            r#"
            [rate_limit]
            rate_limit_max = 50

            [rate_limit.scope_limits.bulk]
            rate_limit_max = 500
            rate_limit_window_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.rate_limit_max, 50);
        let bulk = config.rate_limit.scope_limits.get("bulk").unwrap();
        assert_eq!(bulk.rate_limit_max, 500);
    }

    #[test]
    fn from_path_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.toml");
        std::fs::write(&path, "[workers]\nconcurrency = 2\n").unwrap();

        let config = HeraldConfig::from_path(&path).unwrap();
        assert_eq!(config.workers.concurrency, 2);

        assert!(HeraldConfig::from_path(&dir.path().join("missing.toml")).is_err());
    }
}
