//! Scripted fetches and sinks for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Digest, Task, TaskKind};
use crate::delivery::DigestSink;
use crate::errors::{DaybreakError, FetchError, Result};

/// A fetch operation with a fixed script: fail `failures` times, then succeed.
///
/// Clones share the call counter, so a test can keep one handle while the
/// orchestrator owns the task built from another.
#[derive(Debug, Clone)]
pub struct ScriptedFetch {
    payload: serde_json::Value,
    failures: usize,
    error: FetchError,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFetch {
    /// Always succeeds with `payload`.
    #[must_use]
    pub fn succeeding(payload: serde_json::Value) -> Self {
        Self {
            payload,
            failures: 0,
            error: FetchError::transient("scripted failure"),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails with a transient error `failures` times, then succeeds.
    #[must_use]
    pub fn flaky(failures: usize, payload: serde_json::Value) -> Self {
        Self {
            failures,
            ..Self::succeeding(payload)
        }
    }

    /// Always fails with `error`.
    #[must_use]
    pub fn failing(error: FetchError) -> Self {
        Self {
            failures: usize::MAX,
            error,
            ..Self::succeeding(serde_json::Value::Null)
        }
    }

    /// Sleeps before every attempt.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of fetch attempts made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Builds a task running this script.
    #[must_use]
    pub fn task(&self, key: impl Into<String>, kind: TaskKind) -> Task {
        let script = self.clone();
        Task::new(key, kind, move || {
            let script = script.clone();
            async move { script.attempt().await }
        })
    }

    async fn attempt(&self) -> std::result::Result<serde_json::Value, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call < self.failures {
            Err(self.error.clone())
        } else {
            Ok(self.payload.clone())
        }
    }
}

/// A digest sink that keeps every delivered digest in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Digest>>,
    fail: AtomicBool,
}

impl RecordingSink {
    /// Creates a new recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent deliveries fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns the digests delivered so far.
    #[must_use]
    pub fn delivered(&self) -> Vec<Digest> {
        self.delivered.lock().clone()
    }

    /// Number of successful deliveries.
    #[must_use]
    pub fn delivery_count(&self) -> usize {
        self.delivered.lock().len()
    }
}

#[async_trait]
impl DigestSink for RecordingSink {
    async fn deliver(&self, digest: &Digest) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DaybreakError::Delivery("recording sink set to fail".to_string()));
        }
        self.delivered.lock().push(digest.clone());
        Ok(())
    }
}
