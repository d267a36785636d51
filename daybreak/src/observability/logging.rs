//! Logging setup and run-scoped spans.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Span};
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{DaybreakError, Result};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `default_filter` when set. Fails if a global
/// subscriber is already installed.
pub fn init_logging(format: LogFormat, default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| DaybreakError::Config(format!("invalid log filter: {e}")))?;

    let installed = match format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .try_init(),
    };
    installed.map_err(|e| DaybreakError::Internal(format!("logging already initialized: {e}")))
}

/// The span every event of one run is recorded under.
#[must_use]
pub fn run_span(run_id: &str, date: NaiveDate) -> Span {
    info_span!("run", run_id = %run_id, date = %date)
}
