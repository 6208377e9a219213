use medust_acquire::AcquireError;
use medust_model::ConfigError;
use thiserror::Error;

/// Errors that abort a run.
///
/// Per-region and per-event failures are not errors at this level; they are
/// recorded in the run summary and the run continues.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Acquisition setup failed: {0}")]
    Acquire(#[from] AcquireError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunError>;
