//! Metric declarations for the dust persistence pipeline.
//!
//! Every metric the pipeline emits is declared once as a const [`Metric`] in
//! [`metric_defs`] so names cannot drift between emitters. No recorder is
//! installed here; without one the `metrics` macros are no-ops.
//!
//! # Example
//!
//! ```rust
//! use medust_metrics::{metric_defs, describe_metrics, region_labels};
//!
//! describe_metrics();
//! metrics::counter!(metric_defs::EVENTS_DETECTED.name, &region_labels("aegean")).increment(2);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use medust_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const FETCHES: Metric = Metric::counter("medust.acquire.fetches")
///     .with_description("Series fetched")
///     .with_unit(Unit::Count);
///
/// assert_eq!(FETCHES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "medust.detect.events").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement, if any.
    pub unit: Option<Unit>,
}

impl Metric {
    const fn with_kind(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
        }
    }

    /// Creates a new counter metric.
    pub const fn counter(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Counter)
    }

    /// Creates a new gauge metric.
    pub const fn gauge(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Gauge)
    }

    /// Creates a new histogram metric.
    pub const fn histogram(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Histogram)
    }

    /// Sets the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// Label set for region-scoped metrics.
pub fn region_labels(region: &str) -> Vec<(&'static str, String)> {
    vec![("region", region.to_string())]
}

/// All metrics emitted by the pipeline.
pub mod metric_defs {
    // Region-scoped metrics carry a `region` label; persistence metrics
    // add `property`.

    use super::{Metric, Unit};

    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Series fetched successfully.
    pub const SERIES_FETCHED: Metric = Metric::counter("medust.acquire.series_fetched")
        .with_description("Observation series fetched")
        .with_unit(Unit::Count);

    /// Series that could not be fetched.
    pub const FETCH_FAILURES: Metric = Metric::counter("medust.acquire.fetch_failures")
        .with_description("Observation series that failed to fetch")
        .with_unit(Unit::Count);

    // ========================================================================
    // Detection
    // ========================================================================

    /// Dust events detected.
    pub const EVENTS_DETECTED: Metric = Metric::counter("medust.detect.events")
        .with_description("Dust events detected")
        .with_unit(Unit::Count);

    /// Regions rejected for insufficient AOD coverage.
    pub const REGIONS_SKIPPED: Metric = Metric::counter("medust.detect.regions_skipped")
        .with_description("Regions skipped because of data gaps")
        .with_unit(Unit::Count);

    /// Events contradicted by vertical dust profiles.
    pub const EVENTS_REJECTED: Metric = Metric::counter("medust.detect.events_rejected")
        .with_description("Dust events rejected by profile validation")
        .with_unit(Unit::Count);

    /// Event duration distribution.
    pub const EVENT_DURATION: Metric = Metric::histogram("medust.detect.event_duration_days")
        .with_description("Dust event duration in days");

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Fits that produced a decay model.
    pub const FITS_COMPLETED: Metric = Metric::counter("medust.persistence.fits")
        .with_description("Persistence fits completed")
        .with_unit(Unit::Count);

    /// Fits replaced by an "insufficient data" record.
    pub const FITS_INSUFFICIENT: Metric = Metric::counter("medust.persistence.insufficient")
        .with_description("Persistence fits with too few valid days")
        .with_unit(Unit::Count);

    /// Events not processed because of shutdown.
    pub const EVENTS_CANCELLED: Metric = Metric::counter("medust.run.events_cancelled")
        .with_description("Events skipped after a shutdown request")
        .with_unit(Unit::Count);

    /// Wall time of a run.
    pub const RUN_DURATION: Metric = Metric::gauge("medust.run.duration_seconds")
        .with_description("Wall time of the last run")
        .with_unit(Unit::Seconds);

    /// Every declared metric.
    pub const ALL: &[Metric] = &[
        SERIES_FETCHED,
        FETCH_FAILURES,
        EVENTS_DETECTED,
        REGIONS_SKIPPED,
        EVENTS_REJECTED,
        EVENT_DURATION,
        FITS_COMPLETED,
        FITS_INSUFFICIENT,
        EVENTS_CANCELLED,
        RUN_DURATION,
    ];
}

/// Register descriptions for every metric in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
