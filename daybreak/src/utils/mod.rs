//! Utility functions for time, identifiers and durable file writes.

mod clock;
mod ids;
pub mod io;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::generate_run_id;
