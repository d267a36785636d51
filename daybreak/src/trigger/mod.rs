//! Retry-check trigger.
//!
//! Invoked by an external scheduler some time after the primary run. It reads
//! today's run record and re-invokes the daily entry point when the digest has
//! not gone out yet:
//!
//! | Today's record          | Action                     |
//! |-------------------------|----------------------------|
//! | none                    | trigger                    |
//! | present, not sent       | trigger                    |
//! | present, sent           | no-op                      |
//! | trigger hits the lock   | no-op, reported as healthy |

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::{DigestSummary, RunOutcome};
use crate::errors::Result;
use crate::report::RunReporter;
use crate::utils::Clock;

/// What one daily run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: String,
    /// Calendar day of the run.
    pub date: NaiveDate,
    /// Overall outcome.
    pub outcome: RunOutcome,
    /// Per-status task counts.
    pub tasks: DigestSummary,
    /// Whether the digest was handed off this run.
    pub email_sent: bool,
}

/// The daily entry point: lock, collect, deliver, record.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DailyRun: Send + Sync {
    /// Performs one run. Lock contention surfaces as
    /// [`DaybreakError::AlreadyRunning`](crate::errors::DaybreakError::AlreadyRunning).
    async fn run(&self, force: bool) -> Result<RunSummary>;
}

/// Evaluation of today's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckDecision {
    /// No run has recorded today.
    NoRecord,
    /// Runs recorded today but the digest has not gone out.
    NotSent {
        /// Runs recorded so far today.
        attempts: u32,
        /// Outcome of the most recent run.
        outcome: RunOutcome,
    },
    /// The digest went out today.
    AlreadySent,
}

impl CheckDecision {
    /// Returns true if the entry point should be re-invoked.
    #[must_use]
    pub fn should_trigger(&self) -> bool {
        !matches!(self, Self::AlreadySent)
    }
}

impl fmt::Display for CheckDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecord => write!(f, "no run recorded today"),
            Self::NotSent { attempts, outcome } => {
                write!(f, "{attempts} run(s) recorded today ({outcome}), digest not sent")
            }
            Self::AlreadySent => write!(f, "digest already sent today"),
        }
    }
}

/// Result of a retry check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCheckOutcome {
    /// Today's digest already went out.
    NotNeeded,
    /// Dry run: evaluated and logged only.
    DryRun(CheckDecision),
    /// The entry point was re-invoked.
    Triggered(RunSummary),
    /// Another run holds the lock.
    AlreadyRunning,
}

/// Decides whether today's run needs to be re-invoked.
#[derive(Debug, Clone)]
pub struct RetryCheck {
    reporter: Arc<RunReporter>,
    clock: Arc<dyn Clock>,
}

impl RetryCheck {
    /// Creates a retry check over `reporter`.
    #[must_use]
    pub fn new(reporter: Arc<RunReporter>, clock: Arc<dyn Clock>) -> Self {
        Self { reporter, clock }
    }

    /// Evaluates the record for today.
    pub fn evaluate(&self) -> Result<CheckDecision> {
        self.evaluate_for(self.clock.today())
    }

    /// Evaluates the record for `date`.
    pub fn evaluate_for(&self, date: NaiveDate) -> Result<CheckDecision> {
        Ok(match self.reporter.get(date)? {
            None => CheckDecision::NoRecord,
            Some(record) if record.email_sent => CheckDecision::AlreadySent,
            Some(record) => CheckDecision::NotSent {
                attempts: record.attempts,
                outcome: record.overall_status,
            },
        })
    }

    /// Evaluates today's record and re-invokes `entry` if needed.
    ///
    /// The re-invocation never forces: a date-deterministic value cached by
    /// the earlier run is still good.
    pub async fn run(&self, entry: &dyn DailyRun, dry_run: bool) -> Result<RetryCheckOutcome> {
        let decision = self.evaluate()?;
        info!(%decision, dry_run, "Retry check evaluated");

        if dry_run {
            if decision.should_trigger() {
                info!("Dry run; would re-invoke the daily run");
            }
            return Ok(RetryCheckOutcome::DryRun(decision));
        }
        if !decision.should_trigger() {
            return Ok(RetryCheckOutcome::NotNeeded);
        }

        match entry.run(false).await {
            Ok(summary) => {
                info!(
                    run_id = %summary.run_id,
                    outcome = %summary.outcome,
                    email_sent = summary.email_sent,
                    "Retry run finished"
                );
                Ok(RetryCheckOutcome::Triggered(summary))
            }
            Err(e) if e.is_already_running() => {
                warn!(error = %e, "Another run is in progress; nothing to do");
                Ok(RetryCheckOutcome::AlreadyRunning)
            }
            Err(e) => Err(e),
        }
    }
}
