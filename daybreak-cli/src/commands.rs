//! Subcommand implementations. Each returns the process exit code.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use daybreak::prelude::*;
use daybreak::report::RunRecord;
use serde_json::json;
use tracing::info;

/// Exit code for `run` when another run holds the lock.
pub const EXIT_ALREADY_RUNNING: i32 = 3;

const DEFAULT_CONFIG_FILE: &str = "daybreak.toml";

/// Loads the explicit config, `./daybreak.toml`, or built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<DaybreakConfig> {
    if let Some(path) = path {
        return DaybreakConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    let local = Path::new(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return DaybreakConfig::load(local)
            .with_context(|| format!("failed to load config {}", local.display()));
    }
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let mut config = DaybreakConfig::default();
    config.resolve_paths(&cwd);
    config.validate()?;
    Ok(config)
}

pub async fn run(config: &DaybreakConfig, force: bool, json_output: bool) -> Result<i32> {
    let runner = DailyRunner::from_config(config).context("failed to set up the daily run")?;
    match runner.run(force).await {
        Ok(summary) => {
            if json_output {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(0)
        }
        Err(DaybreakError::AlreadyRunning(held)) => {
            eprintln!("{held}");
            Ok(EXIT_ALREADY_RUNNING)
        }
        Err(e) => Err(e).context("daily run failed"),
    }
}

pub async fn retry_check(config: &DaybreakConfig, dry_run: bool, json_output: bool) -> Result<i32> {
    let runner = DailyRunner::from_config(config).context("failed to set up the daily run")?;
    let check = RetryCheck::new(runner.reporter().clone(), config.build_clock()?);
    let outcome = check
        .run(&runner, dry_run)
        .await
        .context("retry check failed")?;

    match &outcome {
        RetryCheckOutcome::NotNeeded => {
            if json_output {
                println!("{}", json!({ "action": "not_needed" }));
            } else {
                println!("Today's digest already went out.");
            }
        }
        RetryCheckOutcome::DryRun(decision) => {
            if json_output {
                println!(
                    "{}",
                    json!({
                        "action": "dry_run",
                        "would_trigger": decision.should_trigger(),
                        "decision": decision.to_string(),
                    })
                );
            } else {
                println!("{decision}");
                let verdict = if decision.should_trigger() {
                    "would re-run"
                } else {
                    "nothing to do"
                };
                println!("Dry run: {verdict}.");
            }
        }
        RetryCheckOutcome::Triggered(summary) => {
            if json_output {
                println!("{}", json!({ "action": "triggered", "summary": summary }));
            } else {
                print_summary(summary);
            }
        }
        RetryCheckOutcome::AlreadyRunning => {
            if json_output {
                println!("{}", json!({ "action": "already_running" }));
            } else {
                println!("A run is already in progress.");
            }
        }
    }
    Ok(0)
}

pub fn status(
    config: &DaybreakConfig,
    date: Option<NaiveDate>,
    history: bool,
    json_output: bool,
) -> Result<i32> {
    let clock = config.build_clock()?;
    let reporter = RunReporter::open(
        &config.paths.status_file,
        config.report.history_days,
        clock.clone(),
    )?;
    let lock = ProcessLock::new(&config.paths.lock_file, config.lock.stale_after())
        .with_clock(clock.clone());
    let holder = lock.inspect().context("failed to inspect the lock")?;

    let records = if history {
        reporter.history()?
    } else {
        let day = date.unwrap_or_else(|| clock.today());
        reporter.get(day)?.into_iter().collect()
    };

    if json_output {
        let lock_json = holder.map(|state| {
            json!({
                "pid": state.info.pid,
                "acquired_at": state.info.acquired_at,
                "live": state.live,
            })
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "records": records, "lock": lock_json }))?
        );
        return Ok(0);
    }

    if records.is_empty() {
        println!("No run recorded.");
    }
    for record in &records {
        print_record(record);
    }
    match holder {
        Some(state) if state.live => println!(
            "Lock: held by pid {} since {}",
            state.info.pid, state.info.acquired_at
        ),
        Some(state) => println!(
            "Lock: stale (pid {}, since {}); the next run reclaims it",
            state.info.pid, state.info.acquired_at
        ),
        None => println!("Lock: free"),
    }
    Ok(0)
}

pub async fn cache_clear(config: &DaybreakConfig, json_output: bool) -> Result<i32> {
    let clock = config.build_clock()?;
    let lock =
        ProcessLock::new(&config.paths.lock_file, config.lock.stale_after()).with_clock(clock);
    let guard = match lock.acquire_async().await {
        Ok(guard) => guard,
        Err(DaybreakError::AlreadyRunning(held)) => {
            eprintln!("{held}");
            return Ok(EXIT_ALREADY_RUNNING);
        }
        Err(e) => return Err(e).context("failed to acquire the lock"),
    };

    let cache = FileCacheStore::open(&config.paths.cache_dir)?;
    let removed = cache.clear_all().await.context("failed to clear the cache")?;
    guard.release()?;

    info!(removed, "Cache cleared");
    if json_output {
        println!("{}", json!({ "removed": removed }));
    } else {
        println!("Removed {removed} cached entries.");
    }
    Ok(0)
}

fn print_summary(summary: &RunSummary) {
    let tasks = &summary.tasks;
    println!(
        "Run {} for {}: {} ({} tasks: {} fresh, {} cached, {} fallback, {} failed)",
        summary.run_id,
        summary.date,
        summary.outcome,
        tasks.total,
        tasks.fresh,
        tasks.cached,
        tasks.fallback,
        tasks.failed,
    );
    let sent = if summary.email_sent {
        "handed off"
    } else {
        "NOT handed off"
    };
    println!("Digest {sent}.");
}

fn print_record(record: &RunRecord) {
    println!(
        "{}: {} after {} run(s), last {} ({})",
        record.date,
        record.overall_status,
        record.attempts,
        record.updated_at,
        record.run_id,
    );
    match record.email_sent_at {
        Some(at) if record.email_sent => println!("  digest sent at {at}"),
        _ => println!("  digest not sent"),
    }
    for (key, task) in &record.per_task {
        let status = task.status.to_string();
        let ms = task.duration_ms;
        match &task.error {
            Some(error) => println!("  {key:<24} {status:<16} {ms:>6}ms  {error}"),
            None => println!("  {key:<24} {status:<16} {ms:>6}ms"),
        }
    }
}
