//! Error types for the daybreak collection core.
//!
//! Per-task failures ([`FetchError`], [`RetryError`], [`TaskFailure`],
//! [`CacheMiss`]) are absorbed inside the orchestrator and only ever show up
//! as report detail. [`DaybreakError`] is reserved for conditions that stop a
//! whole run: lock contention, an unavailable store, bad configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for daybreak operations.
#[derive(Debug, Error)]
pub enum DaybreakError {
    /// Another live run holds the process lock.
    #[error("{0}")]
    AlreadyRunning(#[from] AlreadyRunningError),

    /// The lock file could not be created, read or removed.
    #[error("Lock error: {0}")]
    Lock(String),

    /// The last-known-good cache store is unavailable.
    #[error("Cache store error: {0}")]
    Cache(String),

    /// The run report could not be read or persisted.
    #[error("Run report error: {0}")]
    Report(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The downstream digest consumer rejected the digest.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DaybreakError {
    /// Returns true if this error means another run is in progress.
    #[must_use]
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning(_))
    }
}

/// Raised when the process lock is held by a live run.
#[derive(Debug, Clone, Error)]
#[error("Another run is already in progress (pid {pid}, since {acquired_at})")]
pub struct AlreadyRunningError {
    /// PID recorded by the current holder.
    pub pid: u32,
    /// When the holder acquired the lock.
    pub acquired_at: DateTime<Utc>,
}

impl AlreadyRunningError {
    /// Creates a new already-running error.
    #[must_use]
    pub fn new(pid: u32, acquired_at: DateTime<Utc>) -> Self {
        Self { pid, acquired_at }
    }
}

/// Failure returned by a single fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// A failure worth retrying (timeouts, 5xx, connection resets).
    #[error("Transient fetch error: {0}")]
    Transient(String),

    /// A failure that will not improve by retrying (bad credentials, 4xx).
    #[error("Fatal fetch error: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true if the error should be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns the underlying message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Fatal(m) => m,
        }
    }
}

/// Failure returned by the retry wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Number of attempts made.
        attempts: usize,
        /// The error from the final attempt.
        last_error: E,
    },

    /// An attempt failed with an error the policy refuses to retry.
    #[error("Non-retryable failure on attempt {attempt}: {error}")]
    Rejected {
        /// The attempt that failed (1-based).
        attempt: usize,
        /// The rejected error.
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Returns true if the retry budget was used up.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Number of attempts made before giving up.
    #[must_use]
    pub fn attempts(&self) -> usize {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Rejected { attempt, .. } => *attempt,
        }
    }

    /// Returns the last underlying error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Rejected { error, .. } => error,
        }
    }
}

/// Why a task produced no fresh value this run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    /// The fetch failed with a non-retryable error.
    #[error("fatal: {message}")]
    Fatal {
        /// Underlying error message.
        message: String,
    },

    /// All attempts failed with retryable errors.
    #[error("retries exhausted after {attempts} attempts: {message}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: usize,
        /// Message of the last error.
        message: String,
    },

    /// The task exceeded its wall-clock budget.
    #[error("timed out after {elapsed_ms} ms")]
    TimedOut {
        /// How long the task ran before being abandoned.
        elapsed_ms: u64,
    },

    /// The task panicked or its worker was aborted.
    #[error("worker aborted: {message}")]
    Aborted {
        /// Join error description.
        message: String,
    },
}

impl From<RetryError<FetchError>> for TaskFailure {
    fn from(err: RetryError<FetchError>) -> Self {
        match err {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => Self::RetryExhausted {
                attempts,
                message: last_error.message().to_string(),
            },
            RetryError::Rejected { error, .. } => Self::Fatal {
                message: error.message().to_string(),
            },
        }
    }
}

/// No cached value exists to stand in for a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no cached fallback for task '{key}'")]
pub struct CacheMiss {
    /// The task key that missed.
    pub key: String,
}

impl CacheMiss {
    /// Creates a new cache miss.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Result type alias for daybreak operations.
pub type Result<T> = std::result::Result<T, DaybreakError>;
