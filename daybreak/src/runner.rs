//! The daily entry point.
//!
//! One run: acquire the process lock, collect the digest, hand it to the sink,
//! record the outcome, mark the day sent on a successful hand-off, prune old
//! cache entries. The lock guard lives for the whole sequence and is released
//! on every exit path.

use async_trait::async_trait;
use chrono::Duration;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use crate::cache::{FileCacheStore, LkgCacheStore};
use crate::config::DaybreakConfig;
use crate::core::Task;
use crate::delivery::{DigestSink, JsonFileSink};
use crate::errors::Result;
use crate::lock::ProcessLock;
use crate::observability::run_span;
use crate::pipeline::TaskOrchestrator;
use crate::report::RunReporter;
use crate::sources::build_tasks;
use crate::trigger::{DailyRun, RunSummary};
use crate::utils::{generate_run_id, Clock};

/// Wires the lock, orchestrator, sink and reporter into one daily run.
pub struct DailyRunner {
    lock: ProcessLock,
    orchestrator: TaskOrchestrator,
    sink: Arc<dyn DigestSink>,
    reporter: Arc<RunReporter>,
    clock: Arc<dyn Clock>,
    tasks: Vec<Task>,
    retention_days: u32,
}

impl DailyRunner {
    /// Creates a runner from its parts.
    #[must_use]
    pub fn new(
        lock: ProcessLock,
        orchestrator: TaskOrchestrator,
        sink: Arc<dyn DigestSink>,
        reporter: Arc<RunReporter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            lock,
            orchestrator,
            sink,
            reporter,
            clock,
            tasks: Vec::new(),
            retention_days: 7,
        }
    }

    /// Builds a runner with file-backed stores and HTTP sources from config.
    pub fn from_config(config: &DaybreakConfig) -> Result<Self> {
        config.validate()?;
        let clock = config.build_clock()?;
        let cache: Arc<dyn LkgCacheStore> = Arc::new(FileCacheStore::open(&config.paths.cache_dir)?);
        let reporter = Arc::new(RunReporter::open(
            &config.paths.status_file,
            config.report.history_days,
            clock.clone(),
        )?);
        let lock = ProcessLock::new(&config.paths.lock_file, config.lock.stale_after())
            .with_clock(clock.clone());
        let orchestrator = TaskOrchestrator::new(cache, clock.clone())
            .with_retry_policy(config.retry.clone())
            .with_config(config.orchestrator.clone());
        let sink = Arc::new(JsonFileSink::new(&config.paths.digest_file));

        Ok(Self::new(lock, orchestrator, sink, reporter, clock)
            .with_tasks(build_tasks(&config.tasks)?)
            .with_retention_days(config.cache.retention_days))
    }

    /// Registers the tasks collected on every run.
    #[must_use]
    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Adds one task.
    #[must_use]
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Sets how many days of cache entries survive pruning.
    #[must_use]
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Returns the shared reporter.
    #[must_use]
    pub fn reporter(&self) -> &Arc<RunReporter> {
        &self.reporter
    }

    /// Returns the process lock.
    #[must_use]
    pub fn lock(&self) -> &ProcessLock {
        &self.lock
    }

    /// Returns the registered tasks.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    async fn run_locked(&self, run_id: &str, force: bool) -> Result<RunSummary> {
        let _guard = self.lock.acquire_async().await?;

        let digest = self
            .orchestrator
            .collect_as(run_id, &self.tasks, force)
            .await?;
        let outcome = digest.outcome();

        let delivered = match self.sink.deliver(&digest).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Digest delivery failed; retry check will re-run");
                false
            }
        };

        self.reporter
            .record(digest.date, run_id, &digest.reports, outcome)?;
        if delivered {
            self.reporter.mark_email_sent(digest.date)?;
        }

        self.prune_cache().await;

        Ok(RunSummary {
            run_id: run_id.to_string(),
            date: digest.date,
            outcome,
            tasks: digest.summary(),
            email_sent: delivered,
        })
    }

    /// Drops cache entries older than the retention window. Failures here do
    /// not affect the run.
    async fn prune_cache(&self) {
        let cutoff = self.clock.today() - Duration::days(i64::from(self.retention_days));
        match self.orchestrator.cache().prune_before(cutoff).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, %cutoff, "Pruned old cache entries"),
            Err(e) => warn!(error = %e, "Cache pruning failed"),
        }
    }
}

impl fmt::Debug for DailyRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DailyRunner")
            .field("lock", &self.lock)
            .field("orchestrator", &self.orchestrator)
            .field("reporter", &self.reporter)
            .field("tasks", &self.tasks)
            .field("retention_days", &self.retention_days)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DailyRun for DailyRunner {
    async fn run(&self, force: bool) -> Result<RunSummary> {
        let run_id = generate_run_id();
        let span = run_span(&run_id, self.clock.today());

        let result = self.run_locked(&run_id, force).instrument(span.clone()).await;
        span.in_scope(|| match &result {
            Ok(summary) => info!(
                outcome = %summary.outcome,
                email_sent = summary.email_sent,
                "Run finished"
            ),
            Err(e) if e.is_already_running() => info!(error = %e, "Run skipped"),
            Err(e) => warn!(error = %e, "Run failed"),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::core::{RunOutcome, TaskKind, TaskStatus};
    use crate::delivery::MockDigestSink;
    use crate::errors::{DaybreakError, FetchError};
    use crate::testing::{RecordingSink, ScriptedFetch, TestHarness};
    use serde_json::json;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        harness: TestHarness,
        sink: Arc<RecordingSink>,
        reporter: Arc<RunReporter>,
        lock: ProcessLock,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let harness = TestHarness::new();
            let reporter = Arc::new(
                RunReporter::open(dir.path().join("status.json"), 7, harness.clock.clone())
                    .unwrap(),
            );
            let lock = ProcessLock::new(dir.path().join("run.lock"), StdDuration::from_secs(3600));
            Self {
                _dir: dir,
                harness,
                sink: Arc::new(RecordingSink::new()),
                reporter,
                lock,
            }
        }

        fn runner(&self, tasks: Vec<Task>) -> DailyRunner {
            DailyRunner::new(
                self.lock.clone(),
                self.harness.orchestrator(),
                self.sink.clone(),
                self.reporter.clone(),
                self.harness.clock.clone(),
            )
            .with_tasks(tasks)
        }
    }

    #[tokio::test]
    async fn test_successful_run_records_and_marks_sent() {
        let fixture = Fixture::new();
        let weather = ScriptedFetch::succeeding(json!({"temp_f": 61}));
        let runner = fixture.runner(vec![weather.task("weather", TaskKind::Dynamic)]);

        let summary = runner.run(false).await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Success);
        assert!(summary.email_sent);
        assert_eq!(fixture.sink.delivery_count(), 1);

        let record = fixture.reporter.get(fixture.harness.today()).unwrap().unwrap();
        assert!(record.email_sent);
        assert_eq!(record.run_id, summary.run_id);
        assert_eq!(record.per_task["weather"].status, TaskStatus::Success);
        assert!(!fixture.lock.path().exists());
    }

    #[tokio::test]
    async fn test_failed_delivery_leaves_day_unsent() {
        let fixture = Fixture::new();
        fixture.sink.set_failing(true);
        let runner = fixture.runner(vec![
            ScriptedFetch::succeeding(json!(1)).task("weather", TaskKind::Dynamic),
        ]);

        let summary = runner.run(false).await.unwrap();

        assert!(!summary.email_sent);
        let record = fixture.reporter.get(fixture.harness.today()).unwrap().unwrap();
        assert!(!record.email_sent);
        assert!(record.needs_retry());
    }

    #[tokio::test]
    async fn test_run_fails_fast_when_locked() {
        let fixture = Fixture::new();
        let script = ScriptedFetch::succeeding(json!(1));
        let runner = fixture.runner(vec![script.task("weather", TaskKind::Dynamic)]);

        let _held = fixture.lock.acquire().unwrap();
        let err = runner.run(false).await.unwrap_err();

        assert!(err.is_already_running());
        assert_eq!(script.calls(), 0);
        assert!(fixture.reporter.get(fixture.harness.today()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_released_after_failed_run() {
        let fixture = Fixture::new();
        let runner = fixture.runner(vec![
            ScriptedFetch::succeeding(json!(1)).task("weather", TaskKind::Dynamic),
            ScriptedFetch::succeeding(json!(2)).task("weather", TaskKind::Dynamic),
        ]);

        let err = runner.run(false).await.unwrap_err();
        assert!(matches!(err, DaybreakError::Config(_)));
        assert!(fixture.lock.acquire().is_ok());
    }

    #[tokio::test]
    async fn test_run_prunes_old_cache_entries() {
        let fixture = Fixture::new();
        let old = fixture.harness.today() - Duration::days(30);
        fixture.harness.seed("weather", old, json!("ancient")).await.unwrap();
        let runner = fixture
            .runner(vec![ScriptedFetch::succeeding(json!("new")).task("weather", TaskKind::Dynamic)])
            .with_retention_days(7);

        runner.run(false).await.unwrap();

        assert!(fixture.harness.cache.get("weather", old).await.unwrap().is_none());
        let latest: Option<CacheEntry> = fixture.harness.cache.latest("weather").await.unwrap();
        assert_eq!(latest.unwrap().payload, json!("new"));
    }

    #[tokio::test]
    async fn test_partial_run_still_delivers() {
        let fixture = Fixture::new();
        let runner = fixture.runner(vec![
            ScriptedFetch::succeeding(json!(1)).task("weather", TaskKind::Dynamic),
            ScriptedFetch::failing(FetchError::fatal("410 Gone")).task("webcams", TaskKind::Dynamic),
        ]);

        let summary = runner.run(false).await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Partial);
        assert_eq!(summary.tasks.failed, 1);
        let delivered = fixture.sink.delivered();
        assert!(delivered[0].section("webcams").unwrap().is_placeholder());
    }

    #[tokio::test]
    async fn test_sink_receives_digest_once() {
        let fixture = Fixture::new();
        let mut sink = MockDigestSink::new();
        sink.expect_deliver()
            .withf(|digest| digest.sections.len() == 1)
            .times(1)
            .returning(|_| Ok(()));

        let runner = DailyRunner::new(
            fixture.lock.clone(),
            fixture.harness.orchestrator(),
            Arc::new(sink),
            fixture.reporter.clone(),
            fixture.harness.clock.clone(),
        )
        .with_task(ScriptedFetch::succeeding(json!(1)).task("weather", TaskKind::Dynamic));

        assert!(runner.run(false).await.unwrap().email_sent);
    }

    #[tokio::test]
    async fn test_from_config_builds_file_backed_runner() {
        let dir = TempDir::new().unwrap();
        let mut config = DaybreakConfig::default();
        config.resolve_paths(dir.path());

        let runner = DailyRunner::from_config(&config).unwrap();
        assert!(runner.tasks().is_empty());
        assert_eq!(runner.lock().path(), dir.path().join(".daybreak/daybreak.lock"));

        let summary = runner.run(false).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Success);
        assert!(dir.path().join(".daybreak/digest.json").exists());
    }
}
