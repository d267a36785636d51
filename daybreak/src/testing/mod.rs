//! Testing utilities for daybreak collection runs.
//!
//! This module provides:
//! - Scripted fetch operations that count calls and fail on demand
//! - A recording digest sink
//! - Fixtures for a fixed calendar day, fast retry policies and temp stores

mod fixtures;
mod mocks;

pub use fixtures::{fast_policy, fixture_date, TestHarness};
pub use mocks::{RecordingSink, ScriptedFetch};
