//! Error types for study configuration.

use thiserror::Error;

/// Errors raised while loading or validating a study configuration.
///
/// All variants are fatal: a run aborts before any data is fetched.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A bounding box violates `min < max` or leaves the valid lat/lon range.
    #[error("Invalid bounding box for region '{region}': {reason}")]
    InvalidBoundingBox {
        /// Region the box belongs to.
        region: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Two regions share a name.
    #[error("Duplicate region name '{0}'")]
    DuplicateRegion(String),

    /// No regions were configured.
    #[error("No regions configured")]
    NoRegions,

    /// A scalar option is outside its allowed range.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Dotted path of the offending option (e.g. `detection.aod_threshold`).
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The study time period is empty or inverted.
    #[error("Invalid time period: {0}")]
    InvalidTimePeriod(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
