//! Run summary written next to the catalogs.

use chrono::{DateTime, Utc};
use medust_analysis::RegressionReport;
use medust_model::CloudProperty;
use serde::Serialize;

/// Why a region, event or step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Too few valid AOD days in the observation window.
    DataGap,
    /// The data source failed after retries.
    ExternalService,
    /// The data source delivered malformed input, such as an unordered series.
    InvalidInput,
    /// Dropped because vertical profiles contradicted a dust origin.
    ValidationRejected,
    /// Not started before a shutdown request.
    Cancelled,
    /// The covariate regression could not be computed.
    Aggregation,
}

/// One skipped unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Event key (`region@YYYY-MM-DD`) for event-scoped entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<CloudProperty>,
    pub message: String,
}

impl SkippedItem {
    /// A run-scoped entry.
    pub fn run(reason: SkipReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            region: None,
            event: None,
            property: None,
            message: message.into(),
        }
    }

    /// A region-scoped entry.
    pub fn region(reason: SkipReason, region: &str, message: impl Into<String>) -> Self {
        Self {
            reason,
            region: Some(region.to_string()),
            event: None,
            property: None,
            message: message.into(),
        }
    }

    /// Narrow the entry to a property.
    pub fn with_property(mut self, property: CloudProperty) -> Self {
        self.property = Some(property);
        self
    }

    /// Narrow the entry to an event.
    pub fn with_event(mut self, event: impl ToString) -> Self {
        self.event = Some(event.to_string());
        self
    }
}

/// Record counts of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunCounts {
    pub regions: usize,
    pub regions_processed: usize,
    pub events: usize,
    /// Events found in the climatology years before the study period.
    pub history_events: usize,
    pub events_confirmed: usize,
    pub events_rejected: usize,
    pub events_unverified: usize,
    pub anomalies: usize,
    pub metrics_fitted: usize,
    pub metrics_insufficient: usize,
    pub cancelled: usize,
}

/// Outcome of a run, serialized to `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub study: String,
    pub generated_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub source: String,
    pub counts: RunCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regression: Option<RegressionReport>,
    pub skipped: Vec<SkippedItem>,
}

impl RunSummary {
    /// An empty summary for a study.
    pub fn new(study: &str, source: String) -> Self {
        Self {
            study: study.to_string(),
            generated_at: Utc::now(),
            duration_secs: 0.0,
            source,
            counts: RunCounts::default(),
            regression: None,
            skipped: Vec::new(),
        }
    }

    /// Record a skipped unit.
    pub fn skip(&mut self, item: SkippedItem) {
        self.skipped.push(item);
    }

    /// Skipped entries with a given reason.
    pub fn skipped_for(&self, reason: SkipReason) -> impl Iterator<Item = &SkippedItem> {
        self.skipped.iter().filter(move |s| s.reason == reason)
    }

    /// Whether any region was rejected for a data gap.
    pub fn has_data_gaps(&self) -> bool {
        self.skipped_for(SkipReason::DataGap).next().is_some()
    }

    /// Process exit code: 2 when a data gap occurred, otherwise 0.
    pub fn exit_code(&self) -> i32 {
        if self.has_data_gaps() {
            2
        } else {
            0
        }
    }
}
