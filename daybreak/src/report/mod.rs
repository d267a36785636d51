//! Run reporting.
//!
//! One [`RunRecord`] per calendar day, persisted as a small JSON status file
//! and mutated in place by every run on that day. The retry check reads it to
//! decide whether today's digest still needs to go out.

mod record;
mod reporter;

pub use record::{RunRecord, TaskRecord};
pub use reporter::RunReporter;
