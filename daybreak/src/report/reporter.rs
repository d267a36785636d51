//! File-backed run reporter.

use chrono::{Duration, NaiveDate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::record::{RunRecord, TaskRecord};
use crate::core::{RunOutcome, TaskReport};
use crate::errors::{DaybreakError, Result};
use crate::utils::io::{read_json, write_json};
use crate::utils::Clock;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatusFile {
    runs: Vec<RunRecord>,
}

/// Records run outcomes into a JSON status file.
///
/// Every operation reads the file afresh and every mutation rewrites it
/// atomically before returning, so records written by other processes are
/// never clobbered and a crash mid-run leaves the previous record intact.
#[derive(Debug)]
pub struct RunReporter {
    path: PathBuf,
    history_days: u32,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl RunReporter {
    /// Opens the status file at `path`. A missing file is an empty history.
    pub fn open(path: impl Into<PathBuf>, history_days: u32, clock: Arc<dyn Clock>) -> Result<Self> {
        let reporter = Self {
            path: path.into(),
            history_days: history_days.max(1),
            clock,
            write_lock: Mutex::new(()),
        };
        let records = reporter.load()?;
        debug!(path = %reporter.path.display(), records = records.len(), "Status file opened");
        Ok(reporter)
    }

    /// Returns the status file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records the outcome of a run, creating or updating the day's record.
    ///
    /// Later runs on the same day replace the per-task detail, bump the attempt
    /// counter and keep `email_sent` once it has been set.
    pub fn record(
        &self,
        date: NaiveDate,
        run_id: &str,
        reports: &[TaskReport],
        outcome: RunOutcome,
    ) -> Result<RunRecord> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now();
        let per_task: BTreeMap<String, TaskRecord> = reports
            .iter()
            .map(|report| (report.key.clone(), TaskRecord::from(report)))
            .collect();

        let mut records = self.load()?;
        let record = records
            .entry(date)
            .and_modify(|existing| {
                existing.run_id = run_id.to_string();
                existing.updated_at = now;
                existing.attempts += 1;
                existing.per_task = per_task.clone();
                existing.overall_status = outcome;
            })
            .or_insert_with(|| RunRecord {
                date,
                run_id: run_id.to_string(),
                started_at: now,
                updated_at: now,
                attempts: 1,
                per_task,
                overall_status: outcome,
                email_sent: false,
                email_sent_at: None,
            })
            .clone();

        self.persist(records)?;
        info!(
            %date,
            run_id,
            attempts = record.attempts,
            outcome = %outcome,
            "Run recorded"
        );
        Ok(record)
    }

    /// Marks the digest for `date` as handed off.
    ///
    /// Returns false if there is no record for that day.
    pub fn mark_email_sent(&self, date: NaiveDate) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now();
        let mut records = self.load()?;
        let Some(record) = records.get_mut(&date) else {
            warn!(%date, "No run record to mark as sent");
            return Ok(false);
        };
        record.email_sent = true;
        record.email_sent_at = Some(now);
        record.updated_at = now;

        self.persist(records)?;
        info!(%date, "Digest marked as sent");
        Ok(true)
    }

    /// Returns the record for `date`.
    pub fn get(&self, date: NaiveDate) -> Result<Option<RunRecord>> {
        Ok(self.load()?.remove(&date))
    }

    /// Returns the retained records, newest first.
    pub fn history(&self) -> Result<Vec<RunRecord>> {
        Ok(self.load()?.into_values().rev().collect())
    }

    /// Reads the status file. An unreadable file is logged and treated as
    /// empty, so the retry check sees "no record" and triggers a run.
    fn load(&self) -> Result<BTreeMap<NaiveDate, RunRecord>> {
        match read_json::<StatusFile>(&self.path) {
            Ok(Some(file)) => Ok(file.runs.into_iter().map(|r| (r.date, r)).collect()),
            Ok(None) => Ok(BTreeMap::new()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!(path = %self.path.display(), error = %e, "Unreadable status file; treating as empty");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(report_error(&self.path, &e)),
        }
    }

    fn persist(&self, mut records: BTreeMap<NaiveDate, RunRecord>) -> Result<()> {
        let cutoff = self.clock.today() - Duration::days(i64::from(self.history_days));
        let before = records.len();
        records.retain(|date, _| *date > cutoff);
        if records.len() < before {
            debug!(trimmed = before - records.len(), %cutoff, "Trimmed run history");
        }

        let file = StatusFile {
            runs: records.into_values().collect(),
        };
        write_json(&self.path, &file).map_err(|e| report_error(&self.path, &e))
    }
}

fn report_error(path: &Path, err: &std::io::Error) -> DaybreakError {
    DaybreakError::Report(format!("{}: {err}", path.display()))
}
