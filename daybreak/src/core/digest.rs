//! The aggregated product of one collection run.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{RunOutcome, TaskKind, TaskStatus};
use crate::errors::{CacheMiss, TaskFailure};

/// One section of the digest: a payload or an explicit placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Section {
    /// A fresh or cached payload.
    Payload(serde_json::Value),
    /// The task failed and nothing was cached; renderers show a placeholder.
    Placeholder,
}

impl Section {
    /// Returns the payload, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Payload(value) => Some(value),
            Self::Placeholder => None,
        }
    }

    /// Returns true for a placeholder.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder)
    }
}

/// Outcome and timing of one task within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task key.
    pub key: String,
    /// Task classification.
    pub kind: TaskKind,
    /// Final status.
    pub status: TaskStatus,
    /// Fetch attempts made (0 when served from cache).
    pub attempts: usize,
    /// Wall time spent on the task in milliseconds.
    pub duration_ms: u64,
    /// Date of the cached payload used, for cache hits and fallbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_date: Option<NaiveDate>,
    /// Why no fresh value was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
}

impl TaskReport {
    /// Human-readable error detail for reports.
    #[must_use]
    pub fn error_detail(&self) -> Option<String> {
        let failure = self.failure.as_ref()?;
        Some(match self.status {
            TaskStatus::Failed => format!("{failure}; {}", CacheMiss::new(&self.key)),
            TaskStatus::CacheFallback => match self.cache_date {
                Some(date) => format!("{failure}; served cached value from {date}"),
                None => failure.to_string(),
            },
            TaskStatus::Success | TaskStatus::SkippedCached => failure.to_string(),
        })
    }
}

/// Counts of task statuses within a digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestSummary {
    /// Number of tasks.
    pub total: usize,
    /// Fetched fresh.
    pub fresh: usize,
    /// Served from today's cache.
    pub cached: usize,
    /// Fell back to an older cached value.
    pub fallback: usize,
    /// Produced a placeholder.
    pub failed: usize,
}

/// The digest handed to downstream rendering and delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    /// Identifier of the run that produced the digest.
    pub run_id: String,
    /// Calendar day the digest is for.
    pub date: NaiveDate,
    /// When collection finished.
    pub generated_at: DateTime<Utc>,
    /// Payload or placeholder per task key.
    pub sections: BTreeMap<String, Section>,
    /// Per-task reports in registration order.
    pub reports: Vec<TaskReport>,
}

impl Digest {
    /// Returns the section for a key.
    #[must_use]
    pub fn section(&self, key: &str) -> Option<&Section> {
        self.sections.get(key)
    }

    /// Returns the payload for a key, `None` for placeholders and unknown keys.
    #[must_use]
    pub fn payload(&self, key: &str) -> Option<&serde_json::Value> {
        self.section(key).and_then(Section::payload)
    }

    /// Returns the report for a key.
    #[must_use]
    pub fn report(&self, key: &str) -> Option<&TaskReport> {
        self.reports.iter().find(|r| r.key == key)
    }

    /// Returns the status for a key.
    #[must_use]
    pub fn status(&self, key: &str) -> Option<TaskStatus> {
        self.report(key).map(|r| r.status)
    }

    /// Statuses in registration order.
    #[must_use]
    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.reports.iter().map(|r| r.status).collect()
    }

    /// Overall outcome derived from the task statuses.
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        RunOutcome::from_statuses(self.statuses())
    }

    /// Counts tasks per status.
    #[must_use]
    pub fn summary(&self) -> DigestSummary {
        let mut summary = DigestSummary {
            total: self.reports.len(),
            ..DigestSummary::default()
        };
        for report in &self.reports {
            match report.status {
                TaskStatus::Success => summary.fresh += 1,
                TaskStatus::SkippedCached => summary.cached += 1,
                TaskStatus::CacheFallback => summary.fallback += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// Flattens the digest into `key -> payload-or-null` for renderers.
    #[must_use]
    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        self.sections
            .iter()
            .map(|(key, section)| {
                let value = section.payload().cloned().unwrap_or(serde_json::Value::Null);
                (key.clone(), value)
            })
            .collect()
    }
}
