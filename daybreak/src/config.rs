//! Daybreak configuration.
//!
//! Loaded from a TOML file; every section and field has a default, so an
//! empty file is a valid (if task-less) configuration. Relative paths are
//! resolved against the directory holding the config file.
//!
//! ```toml
//! [paths]
//! cache_dir = "state/cache"
//!
//! [retry]
//! max_attempts = 4
//!
//! [[tasks]]
//! key = "featured_hike"
//! kind = "date_deterministic"
//! url = "https://example.test/hike"
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{DaybreakError, Result};
use crate::pipeline::{OrchestratorConfig, RetryPolicy};
use crate::sources::SourceSpec;
use crate::utils::{Clock, SystemClock};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaybreakConfig {
    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Retry policy applied to every fetch.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Concurrency and latency limits.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Process lock settings.
    #[serde(default)]
    pub lock: LockConfig,
    /// Run report settings.
    #[serde(default)]
    pub report: ReportConfig,
    /// Cache retention.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Calendar-day settings.
    #[serde(default)]
    pub clock: ClockConfig,
    /// Configured sources.
    #[serde(default)]
    pub tasks: Vec<SourceSpec>,
}

/// `[paths]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the last-known-good cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Process lock file.
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
    /// Run status file.
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    /// Where the digest is written for the renderer.
    #[serde(default = "default_digest_file")]
    pub digest_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            lock_file: default_lock_file(),
            status_file: default_status_file(),
            digest_file: default_digest_file(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".daybreak/cache")
}
fn default_lock_file() -> PathBuf {
    PathBuf::from(".daybreak/daybreak.lock")
}
fn default_status_file() -> PathBuf {
    PathBuf::from(".daybreak/status.json")
}
fn default_digest_file() -> PathBuf {
    PathBuf::from(".daybreak/digest.json")
}

/// `[lock]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Age after which a lock is considered abandoned.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
        }
    }
}

impl LockConfig {
    /// Staleness threshold as a duration.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

fn default_stale_after() -> u64 {
    2 * 60 * 60
}

/// `[report]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Days of run records kept in the status file.
    #[serde(default = "default_history_days")]
    pub history_days: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            history_days: default_history_days(),
        }
    }
}

fn default_history_days() -> u32 {
    7
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Days of cache entries kept; older entries are pruned after each run.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> u32 {
    7
}

/// `[clock]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Fixed UTC offset for the calendar day, applied all year (no DST);
    /// host-local time, DST included, when absent.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

impl DaybreakConfig {
    /// Loads, resolves and validates a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DaybreakError::Config(format!("{}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without validating.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| DaybreakError::Config(e.to_string()))
    }

    /// Makes every relative path relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.paths.cache_dir,
            &mut self.paths.lock_file,
            &mut self.paths.status_file,
            &mut self.paths.digest_file,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Checks task keys and policy sanity.
    pub fn validate(&self) -> Result<()> {
        let key_pattern = Regex::new(r"^[a-z0-9_-]+$")
            .map_err(|e| DaybreakError::Internal(e.to_string()))?;
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !key_pattern.is_match(&task.key) {
                return Err(invalid(format!(
                    "task key '{}' must be non-empty and use only [a-z0-9_-]",
                    task.key
                )));
            }
            if !seen.insert(task.key.as_str()) {
                return Err(invalid(format!("duplicate task key '{}'", task.key)));
            }
            if task.url.trim().is_empty() {
                return Err(invalid(format!("task '{}' has an empty url", task.key)));
            }
            task.timeout()?;
        }

        if self.retry.max_attempts < 1 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier must be at least 1.0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.base_delay_ms must not exceed retry.max_delay_ms"));
        }
        self.orchestrator
            .validate()
            .map_err(|e| invalid(format!("orchestrator: {e}")))?;
        if let Some(minutes) = self.clock.utc_offset_minutes {
            if SystemClock::with_offset_minutes(minutes).is_none() {
                return Err(invalid(format!("clock.utc_offset_minutes {minutes} is out of range")));
            }
        }
        Ok(())
    }

    /// Builds the clock defining "today".
    pub fn build_clock(&self) -> Result<Arc<dyn Clock>> {
        match self.clock.utc_offset_minutes {
            Some(minutes) => SystemClock::with_offset_minutes(minutes)
                .map(|clock| Arc::new(clock) as Arc<dyn Clock>)
                .ok_or_else(|| invalid(format!("clock.utc_offset_minutes {minutes} is out of range"))),
            None => Ok(Arc::new(SystemClock::new())),
        }
    }
}

fn invalid(message: impl Into<String>) -> DaybreakError {
    DaybreakError::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskKind;
    use crate::pipeline::JitterStrategy;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DaybreakConfig::from_toml_str("").unwrap();

        assert_eq!(config, DaybreakConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.retry.jitter, JitterStrategy::Equal);
        assert_eq!(config.orchestrator.workers, 8);
        assert_eq!(config.lock.stale_after(), Duration::from_secs(7200));
        assert_eq!(config.report.history_days, 7);
        assert_eq!(config.cache.retention_days, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config_parses() {
        let config = DaybreakConfig::from_toml_str(
            r#"
            [retry]
            max_attempts = 5
            base_delay_ms = 100
            jitter = "none"

            [orchestrator]
            workers = 2
            task_timeout_secs = 45.0

            [clock]
            utc_offset_minutes = -420

            [[tasks]]
            key = "featured_hike"
            kind = "date_deterministic"
            url = "https://example.test/hike"

            [[tasks]]
            key = "weather"
            url = "https://example.test/weather"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_delay_ms, 30000);
        assert_eq!(config.orchestrator.task_timeout_secs, Some(45.0));
        assert_eq!(config.clock.utc_offset_minutes, Some(-420));
        assert_eq!(config.tasks[0].kind, TaskKind::DateDeterministic);
        assert_eq!(config.tasks[1].kind, TaskKind::Dynamic);
    }

    #[test]
    fn test_validate_rejects_bad_keys() {
        for key in ["", "Weather", "has space", "a/b"] {
            let mut config = DaybreakConfig::default();
            config
                .tasks
                .push(SourceSpec::new(key, TaskKind::Dynamic, "https://example.test"));
            assert!(config.validate().is_err(), "key {key:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_rejects_duplicate_keys() {
        let mut config = DaybreakConfig::default();
        for _ in 0..2 {
            config
                .tasks
                .push(SourceSpec::new("weather", TaskKind::Dynamic, "https://example.test"));
        }
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate task key"));
    }

    #[test]
    fn test_validate_rejects_bad_policy() {
        let mut config = DaybreakConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = DaybreakConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = DaybreakConfig::default();
        config.orchestrator.workers = 0;
        assert!(config.validate().is_err());

        let mut config = DaybreakConfig::default();
        config.clock.utc_offset_minutes = Some(24 * 60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unusable_task_timeout() {
        let config = DaybreakConfig::from_toml_str(
            r#"
            [[tasks]]
            key = "weather"
            url = "https://example.test"
            timeout_seconds = inf
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DaybreakError::Config(_)));
        assert!(err.to_string().contains("timeout_seconds"));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daybreak.toml");
        std::fs::write(&path, "[paths]\ncache_dir = \"state/cache\"\nlock_file = \"/tmp/abs.lock\"\n").unwrap();

        let config = DaybreakConfig::load(&path).unwrap();

        assert_eq!(config.paths.cache_dir, dir.path().join("state/cache"));
        assert_eq!(config.paths.lock_file, PathBuf::from("/tmp/abs.lock"));
        assert_eq!(config.paths.status_file, dir.path().join(".daybreak/status.json"));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = DaybreakConfig::load(Path::new("/nonexistent/daybreak.toml")).unwrap_err();
        assert!(matches!(err, DaybreakError::Config(_)));
    }

    #[test]
    fn test_build_clock_with_offset() {
        let mut config = DaybreakConfig::default();
        config.clock.utc_offset_minutes = Some(-420);
        assert!(config.build_clock().is_ok());
    }
}
