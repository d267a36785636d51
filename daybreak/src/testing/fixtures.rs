//! Test fixtures for collection runs.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{CacheEntry, InMemoryCacheStore, LkgCacheStore};
use crate::core::Digest;
use crate::errors::Result;
use crate::pipeline::{JitterStrategy, OrchestratorConfig, RetryPolicy, TaskOrchestrator};
use crate::utils::{Clock, ManualClock};

/// The calendar day fixtures are pinned to (2024-07-01).
#[must_use]
pub fn fixture_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 1).unwrap_or(NaiveDate::MIN)
}

/// A retry policy with millisecond delays and no jitter.
#[must_use]
pub fn fast_policy(max_attempts: usize) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(max_attempts)
        .with_base_delay_ms(1)
        .with_max_delay_ms(5)
        .with_jitter(JitterStrategy::None)
}

/// A manual clock and an in-memory cache wired into an orchestrator.
#[derive(Debug, Clone)]
pub struct TestHarness {
    /// Clock frozen at noon on [`fixture_date`].
    pub clock: Arc<ManualClock>,
    /// Shared in-memory cache.
    pub cache: Arc<InMemoryCacheStore>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Creates a harness on [`fixture_date`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ManualClock::at_date(fixture_date())),
            cache: Arc::new(InMemoryCacheStore::new()),
        }
    }

    /// Today according to the harness clock.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Yesterday according to the harness clock.
    #[must_use]
    pub fn yesterday(&self) -> NaiveDate {
        self.today() - Duration::days(1)
    }

    /// An orchestrator over the harness stores with a fast three-attempt policy.
    #[must_use]
    pub fn orchestrator(&self) -> TaskOrchestrator {
        TaskOrchestrator::new(self.cache.clone(), self.clock.clone())
            .with_retry_policy(fast_policy(3))
            .with_config(OrchestratorConfig::default().with_workers(4))
    }

    /// Seeds a cache entry.
    pub async fn seed(
        &self,
        key: &str,
        date: NaiveDate,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.cache
            .put(CacheEntry::new(key, date, payload, self.clock.now()))
            .await
    }

    /// A digest with no sections.
    #[must_use]
    pub fn empty_digest() -> Digest {
        Digest {
            run_id: "00000000".to_string(),
            date: fixture_date(),
            generated_at: chrono::Utc::now(),
            sections: BTreeMap::new(),
            reports: Vec::new(),
        }
    }
}
