//! End-to-end scenarios across the orchestrator, cache, lock, reporter and
//! retry check.

#[cfg(test)]
mod tests {
    use crate::cache::{FileCacheStore, LkgCacheStore};
    use crate::core::{RunOutcome, Task, TaskKind, TaskStatus};
    use crate::errors::{FetchError, TaskFailure};
    use crate::lock::ProcessLock;
    use crate::pipeline::TaskOrchestrator;
    use crate::report::RunReporter;
    use crate::runner::DailyRunner;
    use crate::testing::{fast_policy, RecordingSink, ScriptedFetch, TestHarness};
    use crate::trigger::{DailyRun, RetryCheck, RetryCheckOutcome};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Deployment {
        dir: TempDir,
        harness: TestHarness,
        sink: Arc<RecordingSink>,
        reporter: Arc<RunReporter>,
    }

    impl Deployment {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let harness = TestHarness::new();
            let reporter = Arc::new(
                RunReporter::open(dir.path().join("status.json"), 7, harness.clock.clone())
                    .unwrap(),
            );
            Self {
                dir,
                harness,
                sink: Arc::new(RecordingSink::new()),
                reporter,
            }
        }

        fn runner(&self, tasks: Vec<Task>) -> DailyRunner {
            let lock = ProcessLock::new(self.dir.path().join("run.lock"), Duration::from_secs(3600))
                .with_clock(self.harness.clock.clone());
            DailyRunner::new(
                lock,
                self.harness.orchestrator(),
                self.sink.clone(),
                self.reporter.clone(),
                self.harness.clock.clone(),
            )
            .with_tasks(tasks)
        }

        fn retry_check(&self) -> RetryCheck {
            RetryCheck::new(self.reporter.clone(), self.harness.clock.clone())
        }
    }

    #[tokio::test]
    async fn test_five_task_scenario() {
        let harness = TestHarness::new();
        harness
            .seed("featured_hike", harness.today(), json!({"name": "Highline Trail"}))
            .await
            .unwrap();
        harness
            .seed("featured_photo", harness.today(), json!({"url": "lake.jpg"}))
            .await
            .unwrap();
        harness
            .seed("campgrounds", harness.yesterday(), json!({"open": 12}))
            .await
            .unwrap();

        let hike = ScriptedFetch::succeeding(json!("unused"));
        let photo = ScriptedFetch::succeeding(json!("unused"));
        let weather = ScriptedFetch::succeeding(json!({"temp_f": 64}));
        let roads = ScriptedFetch::flaky(1, json!({"going_to_the_sun": "open"}));
        let campgrounds = ScriptedFetch::failing(FetchError::transient("502 Bad Gateway"));

        let tasks = vec![
            hike.task("featured_hike", TaskKind::DateDeterministic),
            photo.task("featured_photo", TaskKind::DateDeterministic),
            weather.task("weather", TaskKind::Dynamic),
            roads.task("roads", TaskKind::Dynamic),
            campgrounds.task("campgrounds", TaskKind::Dynamic),
        ];

        let digest = harness.orchestrator().collect(&tasks, false).await.unwrap();

        assert_eq!(
            digest.statuses(),
            vec![
                TaskStatus::SkippedCached,
                TaskStatus::SkippedCached,
                TaskStatus::Success,
                TaskStatus::Success,
                TaskStatus::CacheFallback,
            ]
        );
        for key in ["featured_hike", "featured_photo", "weather", "roads", "campgrounds"] {
            assert!(digest.payload(key).is_some(), "{key} should carry a payload");
        }
        assert_eq!(digest.payload("featured_hike"), Some(&json!({"name": "Highline Trail"})));
        assert_eq!(digest.payload("campgrounds"), Some(&json!({"open": 12})));
        assert_eq!(hike.calls() + photo.calls(), 0);
        assert_eq!(campgrounds.calls(), 3);
        assert_eq!(digest.outcome(), RunOutcome::Partial);

        // Successful dynamic fetches refreshed today's entries.
        let roads_today = harness.cache.get("roads", harness.today()).await.unwrap();
        assert_eq!(roads_today.unwrap().payload, json!({"going_to_the_sun": "open"}));
    }

    #[tokio::test]
    async fn test_fallback_survives_restart_with_file_cache() {
        let dir = TempDir::new().unwrap();
        let harness = TestHarness::new();
        let script = ScriptedFetch::succeeding(json!({"alerts": []}));
        let tasks = vec![script.task("alerts", TaskKind::Dynamic)];

        {
            let cache = Arc::new(FileCacheStore::open(dir.path()).unwrap());
            let orchestrator = TaskOrchestrator::new(cache, harness.clock.clone());
            orchestrator.collect(&tasks, false).await.unwrap();
        }

        harness.clock.advance_days(1);
        let failing = ScriptedFetch::failing(FetchError::transient("connection reset"));
        let cache = Arc::new(FileCacheStore::open(dir.path()).unwrap());
        let orchestrator = TaskOrchestrator::new(cache, harness.clock.clone())
            .with_retry_policy(fast_policy(2));

        let digest = orchestrator
            .collect(&[failing.task("alerts", TaskKind::Dynamic)], false)
            .await
            .unwrap();

        let report = digest.report("alerts").unwrap();
        assert_eq!(report.status, TaskStatus::CacheFallback);
        assert_eq!(report.cache_date, Some(harness.yesterday()));
        assert_eq!(
            report.failure,
            Some(TaskFailure::RetryExhausted {
                attempts: 2,
                message: "connection reset".to_string(),
            })
        );
        assert_eq!(digest.payload("alerts"), Some(&json!({"alerts": []})));
    }

    #[tokio::test]
    async fn test_daily_runs_fetch_deterministic_tasks_once() {
        let deployment = Deployment::new();
        let hike = ScriptedFetch::succeeding(json!("Iceberg Lake"));
        let weather = ScriptedFetch::succeeding(json!({"temp_f": 55}));
        let runner = deployment.runner(vec![
            hike.task("featured_hike", TaskKind::DateDeterministic),
            weather.task("weather", TaskKind::Dynamic),
        ]);

        runner.run(false).await.unwrap();
        runner.run(false).await.unwrap();
        assert_eq!(hike.calls(), 1);
        assert_eq!(weather.calls(), 2);

        let record = deployment
            .reporter
            .get(deployment.harness.today())
            .unwrap()
            .unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.per_task["featured_hike"].status, TaskStatus::SkippedCached);

        runner.run(true).await.unwrap();
        assert_eq!(hike.calls(), 2);

        deployment.harness.clock.advance_days(1);
        runner.run(false).await.unwrap();
        assert_eq!(hike.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_check_recovers_failed_delivery() {
        let deployment = Deployment::new();
        let weather = ScriptedFetch::succeeding(json!({"temp_f": 70}));
        let runner = deployment.runner(vec![weather.task("weather", TaskKind::Dynamic)]);
        let check = deployment.retry_check();

        deployment.sink.set_failing(true);
        let first = runner.run(false).await.unwrap();
        assert!(!first.email_sent);

        deployment.sink.set_failing(false);
        let outcome = check.run(&runner, false).await.unwrap();
        match outcome {
            RetryCheckOutcome::Triggered(summary) => assert!(summary.email_sent),
            other => panic!("expected a triggered run, got {other:?}"),
        }
        assert_eq!(weather.calls(), 2);
        assert_eq!(deployment.sink.delivery_count(), 1);

        assert_eq!(check.run(&runner, false).await.unwrap(), RetryCheckOutcome::NotNeeded);
        assert_eq!(weather.calls(), 2);
    }

    #[tokio::test]
    async fn test_retry_check_dry_run_does_not_collect() {
        let deployment = Deployment::new();
        let weather = ScriptedFetch::succeeding(json!(1));
        let runner = deployment.runner(vec![weather.task("weather", TaskKind::Dynamic)]);

        let outcome = deployment.retry_check().run(&runner, true).await.unwrap();

        assert!(matches!(outcome, RetryCheckOutcome::DryRun(_)));
        assert_eq!(weather.calls(), 0);
        assert!(deployment
            .reporter
            .get(deployment.harness.today())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_overlapping_runs_one_wins() {
        let deployment = Deployment::new();
        let slow = ScriptedFetch::succeeding(json!("slow")).with_delay(Duration::from_millis(50));
        let first = deployment.runner(vec![slow.task("webcams", TaskKind::Dynamic)]);
        let second = deployment.runner(vec![slow.task("webcams", TaskKind::Dynamic)]);

        let (a, b) = tokio::join!(first.run(false), second.run(false));

        let results = [a, b];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let contended = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_already_running()))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(contended, 1);
        assert_eq!(slow.calls(), 1);

        // The winner released the lock on exit.
        assert!(first.run(false).await.is_ok());
    }

    #[tokio::test]
    async fn test_retry_check_treats_contention_as_healthy() {
        let deployment = Deployment::new();
        let runner = deployment.runner(vec![
            ScriptedFetch::succeeding(json!(1)).task("weather", TaskKind::Dynamic),
        ]);

        let _held = runner.lock().acquire().unwrap();
        let outcome = deployment.retry_check().run(&runner, false).await.unwrap();
        assert_eq!(outcome, RetryCheckOutcome::AlreadyRunning);
    }
}
