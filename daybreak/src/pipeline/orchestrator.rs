//! Concurrent task collection with retry and last-known-good fallback.
//!
//! Every task resolves to exactly one [`TaskStatus`]:
//!
//! | Situation                                         | Status           |
//! |---------------------------------------------------|------------------|
//! | date-deterministic task already cached today      | `skipped_cached` |
//! | fetch (with retries) succeeded                    | `success`        |
//! | fetch failed, some cache entry exists for the key | `cache_fallback` |
//! | fetch failed, nothing cached                      | `failed`         |
//!
//! A single task never fails the run. Only an unavailable cache store aborts
//! [`TaskOrchestrator::collect`].

use chrono::NaiveDate;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};

use super::retry::{with_retry_notify, RetryPolicy};
use crate::cache::{CacheEntry, LkgCacheStore};
use crate::core::{Digest, Section, Task, TaskKind, TaskReport, TaskStatus};
use crate::errors::{DaybreakError, FetchError, Result, TaskFailure};
use crate::utils::{generate_run_id, Clock};

/// Concurrency and latency limits for a collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks fetching at once.
    pub workers: usize,
    /// Optional wall-clock budget per task, covering all retries.
    pub task_timeout_secs: Option<f64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            task_timeout_secs: None,
        }
    }
}

impl OrchestratorConfig {
    /// Sets the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the per-task budget in seconds.
    #[must_use]
    pub fn with_task_timeout(mut self, seconds: f64) -> Self {
        self.task_timeout_secs = Some(seconds);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        if let Some(timeout) = self.task_timeout_secs {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err("task_timeout_secs must be positive when provided".to_string());
            }
        }
        Ok(())
    }

    fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Runs collection tasks and aggregates their results into a [`Digest`].
#[derive(Debug, Clone)]
pub struct TaskOrchestrator {
    cache: Arc<dyn LkgCacheStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    config: OrchestratorConfig,
}

impl TaskOrchestrator {
    /// Creates an orchestrator with the default retry policy and limits.
    #[must_use]
    pub fn new(cache: Arc<dyn LkgCacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            clock,
            policy: RetryPolicy::default(),
            config: OrchestratorConfig::default(),
        }
    }

    /// Sets the retry policy applied to every fetch.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets concurrency and latency limits.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the limits.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the cache store.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn LkgCacheStore> {
        &self.cache
    }

    /// Collects all tasks under a fresh run id.
    ///
    /// With `force` the whole cache is cleared first, so no task is served from
    /// cache this run.
    pub async fn collect(&self, tasks: &[Task], force: bool) -> Result<Digest> {
        self.collect_as(&generate_run_id(), tasks, force).await
    }

    /// Collects all tasks under the given run id.
    pub async fn collect_as(&self, run_id: &str, tasks: &[Task], force: bool) -> Result<Digest> {
        check_unique_keys(tasks)?;

        let date = self.clock.today();
        info!(run_id, %date, tasks = tasks.len(), force, "Collecting digest");

        if force {
            let removed = self.cache.clear_all().await?;
            info!(removed, "Force flag set; cache cleared");
        }

        let resolver = Resolver {
            cache: self.cache.clone(),
            clock: self.clock.clone(),
            policy: self.policy.clone(),
            timeout: self.config.task_timeout(),
            date,
        };
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));

        let mut active = FuturesUnordered::new();
        let mut abort_handles = Vec::with_capacity(tasks.len());

        for (index, task) in tasks.iter().enumerate() {
            let resolver = resolver.clone();
            let semaphore = semaphore.clone();
            let task = task.clone();
            let span = info_span!("task", key = %task.key(), kind = %task.kind());
            let started = Instant::now();

            let handle = tokio::spawn(
                async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| DaybreakError::Internal(format!("worker pool closed: {e}")))?;
                    resolver.resolve(&task).await
                }
                .instrument(span),
            );
            abort_handles.push(handle.abort_handle());
            active.push(async move { (index, started, handle.await) });
        }

        let mut resolved: Vec<Option<Resolved>> = vec![None; tasks.len()];
        while let Some((index, started, joined)) = active.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    let task = &tasks[index];
                    warn!(task = task.key(), error = %e, "Task worker aborted");
                    let failure = TaskFailure::Aborted {
                        message: e.to_string(),
                    };
                    resolver
                        .fall_back(task.key(), task.kind(), failure, 0, started)
                        .await
                }
            };
            match result {
                Ok(r) => resolved[index] = Some(r),
                Err(e) => {
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    return Err(e);
                }
            }
        }

        let mut sections = BTreeMap::new();
        let mut reports = Vec::with_capacity(tasks.len());
        for Resolved { report, section } in resolved.into_iter().flatten() {
            sections.insert(report.key.clone(), section);
            reports.push(report);
        }

        let digest = Digest {
            run_id: run_id.to_string(),
            date,
            generated_at: self.clock.now(),
            sections,
            reports,
        };
        let summary = digest.summary();
        info!(
            run_id,
            outcome = %digest.outcome(),
            fresh = summary.fresh,
            cached = summary.cached,
            fallback = summary.fallback,
            failed = summary.failed,
            "Digest collected"
        );
        Ok(digest)
    }
}

/// Per-task resolution state shared by every worker of one run.
#[derive(Debug, Clone)]
struct Resolver {
    cache: Arc<dyn LkgCacheStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    timeout: Option<Duration>,
    date: NaiveDate,
}

#[derive(Debug, Clone)]
struct Resolved {
    report: TaskReport,
    section: Section,
}

impl Resolver {
    async fn resolve(&self, task: &Task) -> Result<Resolved> {
        let started = Instant::now();

        if task.kind() == TaskKind::DateDeterministic {
            if let Some(entry) = self.cache.get(task.key(), self.date).await? {
                debug!("Cached today; skipping fetch");
                let mut report = new_report(task, TaskStatus::SkippedCached, started);
                report.cache_date = Some(entry.date);
                return Ok(Resolved {
                    report,
                    section: Section::Payload(entry.payload),
                });
            }
        }

        let attempts = AtomicUsize::new(0);
        match self.fetch(task, &attempts).await {
            Ok(payload) => {
                let attempts = attempts.load(Ordering::SeqCst);
                self.cache
                    .put(CacheEntry::new(
                        task.key(),
                        self.date,
                        payload.clone(),
                        self.clock.now(),
                    ))
                    .await?;
                debug!(attempts, "Fetched and cached");
                let mut report = new_report(task, TaskStatus::Success, started);
                report.attempts = attempts;
                Ok(Resolved {
                    report,
                    section: Section::Payload(payload),
                })
            }
            Err(failure) => {
                self.fall_back(
                    task.key(),
                    task.kind(),
                    failure,
                    attempts.load(Ordering::SeqCst),
                    started,
                )
                .await
            }
        }
    }

    async fn fetch(
        &self,
        task: &Task,
        attempts: &AtomicUsize,
    ) -> std::result::Result<serde_json::Value, TaskFailure> {
        let retried = with_retry_notify(
            &self.policy,
            FetchError::is_retryable,
            |error, attempt, delay| {
                warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Transient fetch failure; retrying"
                );
            },
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                task.fetch()
            },
        );

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, retried).await {
                Ok(result) => result.map_err(TaskFailure::from),
                Err(_) => {
                    warn!(timeout_ms = millis(limit), "Task exceeded its time budget");
                    Err(TaskFailure::TimedOut {
                        elapsed_ms: millis(limit),
                    })
                }
            },
            None => retried.await.map_err(TaskFailure::from),
        }
    }

    async fn fall_back(
        &self,
        key: &str,
        kind: TaskKind,
        failure: TaskFailure,
        attempts: usize,
        started: Instant,
    ) -> Result<Resolved> {
        let (status, cache_date, section) = match self.cache.latest(key).await? {
            Some(entry) => {
                warn!(
                    task = key,
                    cache_date = %entry.date,
                    error = %failure,
                    "Fetch failed; serving last known good value"
                );
                (TaskStatus::CacheFallback, Some(entry.date), Section::Payload(entry.payload))
            }
            None => {
                warn!(task = key, error = %failure, "Fetch failed with no cached fallback");
                (TaskStatus::Failed, None, Section::Placeholder)
            }
        };

        Ok(Resolved {
            report: TaskReport {
                key: key.to_string(),
                kind,
                status,
                attempts,
                duration_ms: millis(started.elapsed()),
                cache_date,
                failure: Some(failure),
            },
            section,
        })
    }
}

fn new_report(task: &Task, status: TaskStatus, started: Instant) -> TaskReport {
    TaskReport {
        key: task.key().to_string(),
        kind: task.kind(),
        status,
        attempts: 0,
        duration_ms: millis(started.elapsed()),
        cache_date: None,
        failure: None,
    }
}

fn check_unique_keys(tasks: &[Task]) -> Result<()> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !seen.insert(task.key()) {
            return Err(DaybreakError::Config(format!(
                "duplicate task key '{}'",
                task.key()
            )));
        }
    }
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
