//! A study run: acquisition, detection, per-event analysis and aggregation.
//!
//! Regions are fetched on a pool bounded by
//! `acquisition.max_concurrent_requests`. Detection runs per region; a region
//! with too little AOD coverage is skipped and recorded. Detected events are
//! checked against CALIOP dust profiles when validation is enabled. The AOD
//! of the climatology years before the study period is scanned too, so dusty
//! history years are kept out of the baseline. Each (event, property) pair is
//! then tracked and fitted on a second pool sized by `runtime.threads`,
//! sharing one climatology per region and property.
//!
//! Setting the shutdown flag stops new events from starting. Events already
//! in flight finish; the rest are recorded as cancelled.

use chrono::{Datelike, Days, NaiveDate};
use medust_acquire::{open_source, ObservationSource};
use medust_analysis::{
    regress, validate_events, Climatology, CovariateTable, DetectError, DustEventDetector,
    PersistenceAnalyzer, ProfileValidator, RegressionConfig, RegressionError, RegressionReport,
    TemporalAnalyzer,
};
use medust_metrics::{metric_defs, region_labels};
use medust_model::{
    AnomalyCatalog, AodObservation, BaselineExclusion, CloudAnomaly, CloudObservation,
    CloudProperty, DateRange, DustEvent, DustProfile, EventCatalog, ObservationWindow,
    PersistenceCatalog, PersistenceMetric, Region, RejectAction, StudyConfig,
};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::summary::{RunSummary, SkipReason, SkippedItem};
use crate::Result;

/// Command-line overrides applied on top of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Replaces `output.dir`.
    pub output_dir: Option<PathBuf>,
    /// Forces the aggregation step on.
    pub aggregate: bool,
    /// Replaces `runtime.threads`.
    pub threads: Option<usize>,
}

impl RunOptions {
    /// Apply the overrides and validate the result.
    pub fn apply(&self, config: &mut StudyConfig) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if self.aggregate {
            config.aggregation.enabled = true;
        }
        if let Some(threads) = self.threads {
            config.runtime.threads = threads;
        }
        config.validate()?;
        Ok(())
    }
}

/// Everything a run produces.
#[derive(Debug)]
pub struct RunOutput {
    pub events: EventCatalog,
    pub anomalies: AnomalyCatalog,
    pub persistence: PersistenceCatalog,
    pub summary: RunSummary,
}

/// Series of one region.
struct RegionData {
    region: Region,
    /// AOD inside the study period.
    aod: Vec<AodObservation>,
    /// AOD of the climatology years before the study period.
    aod_history: Vec<AodObservation>,
    clouds: HashMap<CloudProperty, Vec<CloudObservation>>,
    /// Present when validation is enabled and the profiles were fetched.
    profiles: Option<Vec<DustProfile>>,
}

/// A region that passed detection.
struct RegionEvents {
    data: RegionData,
    events: Vec<DustEvent>,
    /// Events before the study period, used only to exclude baseline samples.
    history: Vec<DustEvent>,
}

/// One (event, property) unit of the fan-out.
struct EventJob<'a> {
    event: &'a DustEvent,
    property: CloudProperty,
    series: &'a [CloudObservation],
    climatology: Arc<Climatology>,
}

enum JobResult {
    Done {
        anomalies: Vec<CloudAnomaly>,
        metric: PersistenceMetric,
    },
    Cancelled(SkippedItem),
}

/// A configured study run.
pub struct Pipeline {
    config: StudyConfig,
    source: Box<dyn ObservationSource>,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("study", &self.config.study.name)
            .field("source", &self.source.describe())
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl Pipeline {
    /// Validate the configuration and open its data source.
    pub fn new(config: StudyConfig) -> Result<Self> {
        config.validate()?;
        let source = open_source(&config.acquisition)?;
        Self::with_source(config, source)
    }

    /// Validate the configuration and use an explicit source.
    pub fn with_source(config: StudyConfig, source: Box<dyn ObservationSource>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    /// Flag that stops new events from starting once set.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Execute the study.
    pub fn run(&self) -> Result<RunOutput> {
        let started = Instant::now();
        let mut summary = RunSummary::new(&self.config.study.name, self.source.describe());
        summary.counts.regions = self.config.regions.len();
        info!(
            "Study '{}': {} regions, {} to {}, source {}",
            self.config.study.name,
            self.config.regions.len(),
            self.config.time_period.start,
            self.config.time_period.end,
            summary.source
        );

        // Acquisition
        let mut regions = Vec::new();
        for (data, skipped) in self.acquire()? {
            skipped.into_iter().for_each(|s| summary.skip(s));
            regions.extend(data);
        }

        // Detection
        let detected = self.detect(regions, &mut summary);
        let mut events = EventCatalog::new();
        for region in &detected {
            events.extend(region.events.iter().cloned());
        }
        summary.counts.regions_processed = detected.len();
        summary.counts.events = events.len();

        // Per-event tracking and persistence
        let jobs = self.build_jobs(&detected);
        let results = self.process_jobs(&jobs)?;

        let mut anomalies = AnomalyCatalog::new();
        let mut persistence = PersistenceCatalog::new();
        for result in results {
            match result {
                JobResult::Done {
                    anomalies: records,
                    metric,
                } => {
                    if metric.is_insufficient() {
                        summary.counts.metrics_insufficient += 1;
                    } else {
                        summary.counts.metrics_fitted += 1;
                    }
                    anomalies.extend(records);
                    persistence.append(metric);
                }
                JobResult::Cancelled(item) => {
                    summary.counts.cancelled += 1;
                    summary.skip(item);
                }
            }
        }
        summary.counts.anomalies = anomalies.len();
        if summary.counts.cancelled > 0 {
            warn!(
                "Shutdown requested: {} event analyses cancelled",
                summary.counts.cancelled
            );
            metrics::counter!(metric_defs::EVENTS_CANCELLED.name)
                .increment(summary.counts.cancelled as u64);
        }

        // Aggregation
        if self.config.aggregation.enabled {
            let metrics: Vec<PersistenceMetric> = persistence.iter().cloned().collect();
            match self.aggregate(&metrics) {
                Ok(report) => summary.regression = Some(report),
                Err(e) => {
                    warn!("Aggregation failed: {}", e);
                    summary.skip(SkippedItem::run(SkipReason::Aggregation, e.to_string()));
                }
            }
        }

        summary.duration_secs = started.elapsed().as_secs_f64();
        metrics::gauge!(metric_defs::RUN_DURATION.name).set(summary.duration_secs);
        info!(
            "Finished in {:.1}s: {} events, {} fits, {} insufficient, {} skipped entries",
            summary.duration_secs,
            summary.counts.events,
            summary.counts.metrics_fitted,
            summary.counts.metrics_insufficient,
            summary.skipped.len()
        );

        Ok(RunOutput {
            events,
            anomalies,
            persistence,
            summary,
        })
    }

    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Cloud history reaches back far enough for the climatology and forward
    /// far enough for the tracking window.
    fn cloud_range(&self) -> DateRange {
        let tp = &self.config.time_period;
        let first_year = tp.start.year() - self.config.baseline.lookback_years as i32;
        let first = NaiveDate::from_ymd_opt(first_year, 1, 1).unwrap_or(tp.start);
        let last = tp
            .end
            .checked_add_days(Days::new(u64::from(self.config.tracking.window_days)))
            .unwrap_or(tp.end);
        DateRange::new(first, last)
    }

    /// Years before the study period covered by the climatology. `None` when
    /// the exclusion rule ignores events or the study starts the history.
    fn history_range(&self) -> Option<DateRange> {
        if self.config.baseline.exclusion == BaselineExclusion::None {
            return None;
        }
        let end = self.config.time_period.start.pred_opt()?;
        let range = DateRange::new(self.cloud_range().start, end);
        (!range.is_empty()).then_some(range)
    }

    /// AOD is needed for the study period and for the history years.
    fn aod_range(&self) -> DateRange {
        let study = self.config.date_range();
        match self.history_range() {
            Some(history) => DateRange::new(history.start, study.end),
            None => study,
        }
    }

    /// Overpasses just outside the study period can still match an event.
    fn profile_range(&self) -> DateRange {
        let study = self.config.date_range();
        let margin = Days::new(u64::from(self.config.validation.match_days));
        DateRange::new(
            study.start.checked_sub_days(margin).unwrap_or(study.start),
            study.end.checked_add_days(margin).unwrap_or(study.end),
        )
    }

    fn acquire(&self) -> Result<Vec<(Option<RegionData>, Vec<SkippedItem>)>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.acquisition.max_concurrent_requests)
            .build()?;
        let aod_range = self.aod_range();
        let cloud_range = self.cloud_range();
        debug!(
            "Fetching AOD for {} to {}, cloud history {} to {}",
            aod_range.start, aod_range.end, cloud_range.start, cloud_range.end
        );

        Ok(pool.install(|| {
            self.config
                .regions
                .par_iter()
                .map(|region| self.fetch_region(region, &aod_range, &cloud_range))
                .collect()
        }))
    }

    fn fetch_region(
        &self,
        region: &Region,
        aod_range: &DateRange,
        cloud_range: &DateRange,
    ) -> (Option<RegionData>, Vec<SkippedItem>) {
        let labels = region_labels(&region.name);
        let mut skipped = Vec::new();

        let study_start = self.config.time_period.start;
        let (aod_history, aod): (Vec<AodObservation>, Vec<AodObservation>) =
            match self.source.aod_series(region, aod_range) {
                Ok(aod) => {
                    metrics::counter!(metric_defs::SERIES_FETCHED.name, &labels).increment(1);
                    aod.into_iter().partition(|o| o.date < study_start)
                }
                Err(e) => {
                    warn!("Region {}: AOD acquisition failed: {}", region.name, e);
                    metrics::counter!(metric_defs::FETCH_FAILURES.name, &labels).increment(1);
                    skipped.push(SkippedItem::region(
                        SkipReason::ExternalService,
                        &region.name,
                        e.to_string(),
                    ));
                    return (None, skipped);
                }
            };

        let mut clouds = HashMap::new();
        for &property in &self.config.tracking.properties {
            match self.source.cloud_series(region, property, cloud_range) {
                Ok(series) => {
                    metrics::counter!(metric_defs::SERIES_FETCHED.name, &labels).increment(1);
                    clouds.insert(property, series);
                }
                Err(e) => {
                    warn!("Region {}: {} acquisition failed: {}", region.name, property, e);
                    metrics::counter!(metric_defs::FETCH_FAILURES.name, &labels).increment(1);
                    skipped.push(
                        SkippedItem::region(SkipReason::ExternalService, &region.name, e.to_string())
                            .with_property(property),
                    );
                }
            }
        }

        let profiles = if self.config.validation.enabled {
            match self.source.dust_profiles(region, &self.profile_range()) {
                Ok(profiles) => {
                    metrics::counter!(metric_defs::SERIES_FETCHED.name, &labels).increment(1);
                    Some(profiles)
                }
                Err(e) => {
                    warn!("Region {}: dust profile acquisition failed: {}", region.name, e);
                    metrics::counter!(metric_defs::FETCH_FAILURES.name, &labels).increment(1);
                    skipped.push(SkippedItem::region(
                        SkipReason::ExternalService,
                        &region.name,
                        format!("dust profiles: {}", e),
                    ));
                    None
                }
            }
        } else {
            None
        };

        (
            Some(RegionData {
                region: region.clone(),
                aod,
                aod_history,
                clouds,
                profiles,
            }),
            skipped,
        )
    }

    // ========================================================================
    // Detection and fan-out
    // ========================================================================

    fn detect(
        &self,
        regions: Vec<RegionData>,
        summary: &mut RunSummary,
    ) -> Vec<RegionEvents> {
        let detector = DustEventDetector::new(self.config.detection.clone());
        let window = self.config.observation_window();
        let mut detected = Vec::new();

        for data in regions {
            let name = data.region.name.clone();
            let labels = region_labels(&name);
            match detector.detect_all(&name, &data.aod, Some(&window)) {
                Ok(found) => {
                    let found = self.validate(&data, found, summary);
                    info!("Region {}: {} dust events", name, found.len());
                    metrics::counter!(metric_defs::EVENTS_DETECTED.name, &labels)
                        .increment(found.len() as u64);
                    for event in &found {
                        metrics::histogram!(metric_defs::EVENT_DURATION.name, &labels)
                            .record(f64::from(event.duration_days()));
                    }
                    let history = self.history_events(&detector, &data);
                    summary.counts.history_events += history.len();
                    detected.push(RegionEvents {
                        data,
                        events: found,
                        history,
                    });
                }
                Err(e @ DetectError::DataGap { .. }) => {
                    warn!("Skipping region {}: {}", name, e);
                    metrics::counter!(metric_defs::REGIONS_SKIPPED.name, &labels).increment(1);
                    summary.skip(SkippedItem::region(SkipReason::DataGap, &name, e.to_string()));
                }
                Err(e @ DetectError::Unordered { .. }) => {
                    warn!("Skipping region {}: {}", name, e);
                    summary.skip(SkippedItem::region(SkipReason::InvalidInput, &name, e.to_string()));
                }
            }
        }
        detected
    }

    /// Apply profile validation to a region's events.
    fn validate(
        &self,
        data: &RegionData,
        events: Vec<DustEvent>,
        summary: &mut RunSummary,
    ) -> Vec<DustEvent> {
        let config = &self.config.validation;
        if !config.enabled {
            return events;
        }
        let Some(profiles) = data.profiles.as_deref() else {
            summary.counts.events_unverified += events.len();
            return events;
        };

        let name = &data.region.name;
        let validator = ProfileValidator::new(config.clone(), profiles);
        let outcome = validate_events(events, &validator, config);
        summary.counts.events_confirmed += outcome.confirmed;
        summary.counts.events_unverified += outcome.unverified;
        summary.counts.events_rejected += outcome.rejected.len();

        if !outcome.rejected.is_empty() {
            info!(
                "Region {}: {} events contradicted by dust profiles",
                name,
                outcome.rejected.len()
            );
            let labels = region_labels(name);
            metrics::counter!(metric_defs::EVENTS_REJECTED.name, &labels)
                .increment(outcome.rejected.len() as u64);
        }
        if config.on_reject == RejectAction::Drop {
            for key in &outcome.rejected {
                summary.skip(
                    SkippedItem::region(
                        SkipReason::ValidationRejected,
                        name,
                        format!("dust fraction below {}", config.min_dust_fraction),
                    )
                    .with_event(key),
                );
            }
        }
        outcome.events
    }

    /// Events of the history years. Coverage is not enforced there: a sparse
    /// history only weakens the exclusion, it does not invalidate the region.
    fn history_events(&self, detector: &DustEventDetector, data: &RegionData) -> Vec<DustEvent> {
        let Some(range) = self.history_range() else {
            return Vec::new();
        };
        let window = ObservationWindow::with_months(range, self.config.time_period.focus_months.clone());
        match detector.scan(&data.region.name, &data.aod_history, Some(&window)) {
            Ok(events) => {
                let events: Vec<DustEvent> = events.collect();
                debug!(
                    "Region {}: {} dust events before the study period",
                    data.region.name,
                    events.len()
                );
                events
            }
            Err(e) => {
                warn!("Region {}: history AOD not scanned: {}", data.region.name, e);
                Vec::new()
            }
        }
    }

    fn build_jobs<'a>(&self, detected: &'a [RegionEvents]) -> Vec<EventJob<'a>> {
        let mut jobs = Vec::new();
        for region in detected {
            if region.events.is_empty() {
                continue;
            }
            let data = &region.data;
            let exclusions: Vec<DustEvent> =
                region.history.iter().chain(&region.events).cloned().collect();
            for &property in &self.config.tracking.properties {
                let Some(series) = data.clouds.get(&property) else {
                    continue;
                };
                let climatology = Arc::new(Climatology::build(
                    &data.region.name,
                    property,
                    series,
                    &exclusions,
                    &self.config.baseline,
                ));
                jobs.extend(region.events.iter().map(|event| EventJob {
                    event,
                    property,
                    series,
                    climatology: Arc::clone(&climatology),
                }));
            }
        }
        jobs
    }

    fn process_jobs(&self, jobs: &[EventJob<'_>]) -> Result<Vec<JobResult>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.runtime.threads)
            .build()?;
        let tracker = TemporalAnalyzer::new(self.config.tracking.clone());
        let analyzer = PersistenceAnalyzer::new(self.config.persistence.clone());
        info!(
            "Analysing {} event/property pairs on {} threads",
            jobs.len(),
            pool.current_num_threads()
        );

        Ok(pool.install(|| {
            jobs.par_iter()
                .map(|job| self.process_job(job, &tracker, &analyzer))
                .collect()
        }))
    }

    fn process_job(
        &self,
        job: &EventJob<'_>,
        tracker: &TemporalAnalyzer,
        analyzer: &PersistenceAnalyzer,
    ) -> JobResult {
        let key = job.event.key();
        if self.shutdown.load(Ordering::SeqCst) {
            return JobResult::Cancelled(
                SkippedItem::region(SkipReason::Cancelled, &job.event.region, "shutdown requested")
                    .with_event(&key)
                    .with_property(job.property),
            );
        }

        let anomalies = tracker.track(job.event, job.property, job.series, job.climatology.as_ref());
        let metric = analyzer.fit(&key, job.property, &anomalies);

        let labels = [
            ("region", job.event.region.clone()),
            ("property", job.property.as_str().to_string()),
        ];
        if metric.is_insufficient() {
            metrics::counter!(metric_defs::FITS_INSUFFICIENT.name, &labels).increment(1);
        } else {
            metrics::counter!(metric_defs::FITS_COMPLETED.name, &labels).increment(1);
        }
        debug!("{} {}: {:?}", key, job.property, metric.outcome);

        JobResult::Done { anomalies, metric }
    }

    // ========================================================================
    // Aggregation
    // ========================================================================

    fn aggregate(
        &self,
        metrics: &[PersistenceMetric],
    ) -> std::result::Result<RegressionReport, RegressionError> {
        let agg = &self.config.aggregation;
        let (Some(path), Some(property)) =
            (agg.covariates_path.as_ref(), self.config.aggregation_property())
        else {
            return Err(RegressionError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "aggregation needs a covariates_path and a tracked property",
            )));
        };
        let covariates = CovariateTable::load(path)?;
        regress(
            metrics,
            &covariates,
            &RegressionConfig {
                response: agg.response,
                covariates: agg.covariates.clone(),
                property,
            },
        )
    }
}
