//! Configured data sources.
//!
//! Each [`SourceSpec`] describes one HTTP endpoint returning JSON. The
//! collection core never looks inside the payload; it only needs a [`Task`]
//! that either yields a value or fails.

#[cfg(feature = "http")]
mod http;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::{Task, TaskKind};
use crate::errors::{DaybreakError, Result};

#[cfg(feature = "http")]
pub use http::{classify_status, HttpJsonSource};

/// One configured source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Task key; also the digest section name.
    pub key: String,
    /// Whether the value is fixed for the whole day.
    #[serde(default)]
    pub kind: TaskKind,
    /// Endpoint returning JSON.
    pub url: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
}

fn default_timeout() -> f64 {
    30.0
}

impl SourceSpec {
    /// Creates a spec with default headers and timeout.
    #[must_use]
    pub fn new(key: impl Into<String>, kind: TaskKind, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind,
            url: url.into(),
            headers: BTreeMap::new(),
            timeout_seconds: default_timeout(),
        }
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the per-request timeout in seconds.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// The per-request timeout; must be finite, positive and representable.
    pub fn timeout(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.timeout_seconds)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .ok_or_else(|| {
                DaybreakError::Config(format!(
                    "source '{}': timeout_seconds must be a positive number of seconds, got {}",
                    self.key, self.timeout_seconds
                ))
            })
    }
}

/// Builds one task per configured source.
#[cfg(feature = "http")]
pub fn build_tasks(specs: &[SourceSpec]) -> Result<Vec<Task>> {
    specs
        .iter()
        .map(|spec| {
            let source = std::sync::Arc::new(HttpJsonSource::from_spec(spec)?);
            Ok(Task::from_source(spec.key.clone(), spec.kind, source))
        })
        .collect()
}

/// Builds one task per configured source.
#[cfg(not(feature = "http"))]
pub fn build_tasks(specs: &[SourceSpec]) -> Result<Vec<Task>> {
    if specs.is_empty() {
        Ok(Vec::new())
    } else {
        Err(DaybreakError::Config(
            "HTTP sources require the `http` feature".to_string(),
        ))
    }
}
