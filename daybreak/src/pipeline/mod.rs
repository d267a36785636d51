//! Collection pipeline: retry wrapper and task orchestrator.
//!
//! This module provides:
//! - The backoff-retry wrapper applied around each fetch
//! - The task orchestrator that fans tasks out and aggregates the digest

mod orchestrator;
mod retry;

mod integration_tests;

pub use orchestrator::{OrchestratorConfig, TaskOrchestrator};
pub use retry::{
    should_retry, with_retry, with_retry_if, with_retry_notify, JitterStrategy, RetryDecision,
    RetryPolicy, Retryable,
};
