//! Core domain model types for daybreak.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Task classification, task status and run outcome enums
//! - Collection tasks and the source seam
//! - The digest produced by a run

mod digest;
mod status;
mod task;

pub use digest::{Digest, DigestSummary, Section, TaskReport};
pub use status::{RunOutcome, TaskKind, TaskStatus};
pub use task::{FetchFuture, Source, Task};
