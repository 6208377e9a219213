//! # medust-runner
//!
//! Runs a dust persistence study end to end: loads the YAML configuration,
//! acquires observations, detects dust events, tracks and fits the cloud
//! anomalies that follow them and writes the catalogs.

mod error;
mod output;
mod pipeline;
mod summary;

pub use error::{Result, RunError};
pub use output::{
    write_outputs, ANOMALIES_FILE, EVENTS_FILE, PERSISTENCE_FILE, REGRESSION_FILE, SUMMARY_FILE,
};
pub use pipeline::{Pipeline, RunOptions, RunOutput};
pub use summary::{RunCounts, RunSummary, SkipReason, SkippedItem};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. Calling this twice is
/// harmless.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
