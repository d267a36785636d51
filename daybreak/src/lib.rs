//! # Daybreak
//!
//! Resilient collection of a daily digest from many unreliable sources.
//!
//! Daybreak guarantees that a "good enough" digest is produced every day even
//! when some sources fail:
//!
//! - **Retry with backoff**: every fetch is wrapped in an exponential backoff
//!   policy that separates transient from fatal failures
//! - **Last-known-good cache**: each successful payload is cached per calendar
//!   day; date-deterministic tasks are fetched at most once a day, and any task
//!   that fails falls back to its most recent cached value
//! - **Single-run lock**: overlapping runs fail fast instead of racing
//! - **Run reporting**: a per-day record drives a scheduler-invoked retry check
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use daybreak::prelude::*;
//!
//! let cache = Arc::new(FileCacheStore::open("state/cache")?);
//! let clock = Arc::new(SystemClock::new());
//! let orchestrator = TaskOrchestrator::new(cache, clock);
//!
//! let tasks = vec![
//!     Task::deterministic("featured_hike", || async { fetch_hike().await }),
//!     Task::dynamic("weather", || async { fetch_weather().await }),
//! ];
//!
//! let digest = orchestrator.collect(&tasks, false).await?;
//! for report in &digest.reports {
//!     println!("{}: {}", report.key, report.status);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod config;
pub mod core;
pub mod delivery;
pub mod errors;
pub mod lock;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod sources;
pub mod testing;
pub mod trigger;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheEntry, FileCacheStore, InMemoryCacheStore, LkgCacheStore};
    pub use crate::config::DaybreakConfig;
    pub use crate::core::{
        Digest, DigestSummary, RunOutcome, Section, Source, Task, TaskKind, TaskReport,
        TaskStatus,
    };
    pub use crate::delivery::{DigestSink, JsonFileSink};
    pub use crate::errors::{
        AlreadyRunningError, CacheMiss, DaybreakError, FetchError, RetryError, TaskFailure,
    };
    pub use crate::lock::{LockGuard, ProcessLock};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{
        with_retry, JitterStrategy, OrchestratorConfig, RetryPolicy, TaskOrchestrator,
    };
    pub use crate::report::{RunRecord, RunReporter};
    pub use crate::runner::DailyRunner;
    pub use crate::trigger::{DailyRun, RetryCheck, RetryCheckOutcome, RunSummary};
    pub use crate::utils::{Clock, ManualClock, SystemClock};
    pub use std::sync::Arc;
}
