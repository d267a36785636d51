//! Task classification, task status and run outcome enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a task's result behaves over a calendar day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Same correct result for the whole day (e.g., a once-daily featured item).
    /// The cache is checked first and a hit skips the fetch entirely.
    #[serde(alias = "deterministic")]
    DateDeterministic,
    /// May legitimately change within a day (e.g., live weather).
    /// Always fetched; the cache is only a fallback.
    #[default]
    Dynamic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DateDeterministic => write!(f, "date_deterministic"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Per-task outcome of one collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Fetched fresh this run.
    Success,
    /// Satisfied from today's cache entry without fetching.
    SkippedCached,
    /// Fetch failed; a previously cached payload stands in.
    CacheFallback,
    /// Fetch failed and no cached payload exists; the digest holds a placeholder.
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::SkippedCached => write!(f, "skipped_cached"),
            Self::CacheFallback => write!(f, "cache_fallback"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl TaskStatus {
    /// Returns true if the digest carries a current value for the task.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Success | Self::SkippedCached)
    }

    /// Returns true if the digest carries any payload for the task.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Overall outcome of a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every task produced a current value.
    Success,
    /// Some tasks fell back to stale data or failed.
    Partial,
    /// Every task failed.
    Failure,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

impl RunOutcome {
    /// Derives the run outcome from per-task statuses.
    ///
    /// An empty run counts as a success.
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut total = 0;
        let mut failed = 0;
        let mut degraded = 0;
        for status in statuses {
            total += 1;
            match status {
                TaskStatus::Failed => failed += 1,
                TaskStatus::CacheFallback => degraded += 1,
                TaskStatus::Success | TaskStatus::SkippedCached => {}
            }
        }

        if total > 0 && failed == total {
            Self::Failure
        } else if failed > 0 || degraded > 0 {
            Self::Partial
        } else {
            Self::Success
        }
    }

    /// Returns true if the run fully succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_display_and_serde() {
        assert_eq!(TaskKind::DateDeterministic.to_string(), "date_deterministic");
        assert_eq!(TaskKind::Dynamic.to_string(), "dynamic");

        let parsed: TaskKind = serde_json::from_str("\"deterministic\"").unwrap();
        assert_eq!(parsed, TaskKind::DateDeterministic);
        assert_eq!(TaskKind::default(), TaskKind::Dynamic);
    }

    #[test]
    fn test_task_status_display() {
        assert_eq!(TaskStatus::Success.to_string(), "success");
        assert_eq!(TaskStatus::SkippedCached.to_string(), "skipped_cached");
        assert_eq!(TaskStatus::CacheFallback.to_string(), "cache_fallback");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_task_status_helpers() {
        assert!(TaskStatus::SkippedCached.is_healthy());
        assert!(!TaskStatus::CacheFallback.is_healthy());
        assert!(TaskStatus::CacheFallback.has_payload());
        assert!(!TaskStatus::Failed.has_payload());
    }

    #[test]
    fn test_run_outcome_from_statuses() {
        use TaskStatus::*;

        assert_eq!(RunOutcome::from_statuses([]), RunOutcome::Success);
        assert_eq!(
            RunOutcome::from_statuses([Success, SkippedCached]),
            RunOutcome::Success
        );
        assert_eq!(
            RunOutcome::from_statuses([Success, CacheFallback]),
            RunOutcome::Partial
        );
        assert_eq!(RunOutcome::from_statuses([Success, Failed]), RunOutcome::Partial);
        assert_eq!(RunOutcome::from_statuses([Failed, Failed]), RunOutcome::Failure);
    }
}
