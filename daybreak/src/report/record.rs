//! Persisted run record types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{RunOutcome, TaskReport, TaskStatus};

/// Outcome of one task in the most recent run of the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Final status.
    pub status: TaskStatus,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Fetch attempts made.
    #[serde(default)]
    pub attempts: usize,
    /// Error detail for fallbacks and failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TaskReport> for TaskRecord {
    fn from(report: &TaskReport) -> Self {
        Self {
            status: report.status,
            duration_ms: report.duration_ms,
            attempts: report.attempts,
            error: report.error_detail(),
        }
    }
}

/// Everything known about the runs of one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// The calendar day.
    pub date: NaiveDate,
    /// Id of the most recent run.
    pub run_id: String,
    /// When the first run of the day started recording.
    pub started_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// How many runs have recorded for this day.
    pub attempts: u32,
    /// Per-task outcome of the most recent run.
    pub per_task: BTreeMap<String, TaskRecord>,
    /// Overall outcome of the most recent run.
    pub overall_status: RunOutcome,
    /// Whether the digest has been handed off for this day.
    pub email_sent: bool,
    /// When the digest was handed off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_sent_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Returns true if the day still needs a (re)run.
    #[must_use]
    pub fn needs_retry(&self) -> bool {
        !self.email_sent
    }

    /// Keys of tasks that ended `failed` or `cache_fallback`.
    #[must_use]
    pub fn degraded_tasks(&self) -> Vec<&str> {
        self.per_task
            .iter()
            .filter(|(_, task)| !task.status.is_healthy())
            .map(|(key, _)| key.as_str())
            .collect()
    }
}
