//! Study configuration loaded from YAML.
//!
//! The configuration is read once per run and validated before any data is
//! fetched. Every section has defaults so a minimal file only needs the time
//! period and the regions:
//!
//! ```yaml
//! time_period:
//!   start: 2015-01-01
//!   end: 2020-12-31
//!   focus_months: [4, 5, 6, 7, 8, 9]
//! regions:
//!   - name: central_med
//!     bbox: [10.0, 33.0, 20.0, 40.0]
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::{
    CloudProperty, ConfigError, DateRange, DecayModel, ObservationWindow,
    QualityFlag, Region,
};

// ============================================================================
// Top level
// ============================================================================

/// Complete configuration of one study run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyConfig {
    /// Descriptive metadata.
    #[serde(default)]
    pub study: StudyInfo,
    /// Analysed period.
    pub time_period: TimePeriod,
    /// Study regions.
    pub regions: Vec<Region>,
    /// Event detection options.
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Vertical-profile validation of detected events.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Post-event anomaly tracking options.
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Climatology construction options.
    #[serde(default)]
    pub baseline: BaselineConfig,
    /// Decay fit options.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Cross-event covariate regression options.
    #[serde(default)]
    pub aggregation: AggregationConfig,
    /// Data source options.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Thread pool options.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Output location.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Descriptive study metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyInfo {
    /// Study name, echoed in the run summary.
    pub name: String,
}

impl Default for StudyInfo {
    fn default() -> Self {
        Self {
            name: "mediterranean_dust_persistence".to_string(),
        }
    }
}

/// Analysed period and dust-season months.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimePeriod {
    /// First day.
    pub start: NaiveDate,
    /// Last day (inclusive).
    pub end: NaiveDate,
    /// Calendar months analysed (1-12). Empty means all months.
    #[serde(default)]
    pub focus_months: Vec<u32>,
}

// ============================================================================
// Stage options
// ============================================================================

/// Event detector options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    /// Readings at or above this AOD belong to an event.
    pub aod_threshold: f64,
    /// Longest run of missing days that does not split an event.
    pub gap_tolerance_days: u32,
    /// Events spanning fewer days are discarded.
    pub min_duration_days: u32,
    /// Largest tolerated fraction of missing days in the input window.
    pub max_missing_fraction: f64,
    /// Readings below this quality count as missing.
    pub min_quality: QualityFlag,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            aod_threshold: 0.5,
            gap_tolerance_days: 1,
            min_duration_days: 2,
            max_missing_fraction: 0.5,
            min_quality: QualityFlag::Marginal,
        }
    }
}

/// What happens to an event the profile data contradicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RejectAction {
    /// Remove the event from the catalog.
    #[default]
    Drop,
    /// Keep the event with its confidence scaled by `downweight_factor`.
    Downweight,
}

/// Vertical-profile validation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    /// Check detected events against CALIOP dust profiles.
    pub enabled: bool,
    /// Mean dust fraction at or above which an event is confirmed.
    pub min_dust_fraction: f64,
    /// Overpasses up to this many days outside the event span still count.
    pub match_days: u32,
    /// Treatment of rejected events.
    pub on_reject: RejectAction,
    /// Confidence multiplier for [`RejectAction::Downweight`].
    pub downweight_factor: f64,
    /// Profiles below this quality are ignored.
    pub min_quality: QualityFlag,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_dust_fraction: 0.5,
            match_days: 1,
            on_reject: RejectAction::Drop,
            downweight_factor: 0.5,
            min_quality: QualityFlag::Marginal,
        }
    }
}

/// Temporal analyzer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    /// Last day offset tracked after the event end (offsets `0..=window_days`).
    pub window_days: u32,
    /// Cloud properties tracked for every event.
    pub properties: Vec<CloudProperty>,
    /// Readings below this quality are recorded as "no data".
    pub min_quality: QualityFlag,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            properties: vec![
                CloudProperty::CloudEffectiveRadius,
                CloudProperty::CloudOpticalThickness,
            ],
            min_quality: QualityFlag::Marginal,
        }
    }
}

/// Which historical samples are kept out of the climatology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineExclusion {
    /// Drop every year in which the region had a dust event.
    #[default]
    EventYears,
    /// Drop only days inside an event span widened by `buffer_days`.
    EventWindows,
    /// Keep everything.
    None,
}

/// Climatology options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaselineConfig {
    /// Half-width of the calendar window around the target day-of-year.
    pub half_window_days: u32,
    /// Number of prior years searched.
    pub lookback_years: u32,
    /// Exclusion rule for anomalous periods.
    pub exclusion: BaselineExclusion,
    /// Extra days around events for [`BaselineExclusion::EventWindows`].
    pub buffer_days: u32,
    /// Fewer samples than this yields no baseline.
    pub min_samples: u32,
    /// Readings below this quality are ignored.
    pub min_quality: QualityFlag,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            half_window_days: 7,
            lookback_years: 10,
            exclusion: BaselineExclusion::EventYears,
            buffer_days: 3,
            min_samples: 5,
            min_quality: QualityFlag::Marginal,
        }
    }
}

/// Decay fit options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Functional form fitted to the anomaly.
    pub model: DecayModel,
    /// Fewer valid anomaly days yields an "insufficient data" metric.
    pub min_valid_days: u32,
    /// Two-sided significance level.
    pub significance_level: f64,
    /// Longest persistence reported, in days after the event end.
    pub horizon_days: f64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            model: DecayModel::Exponential,
            min_valid_days: 4,
            significance_level: 0.05,
            horizon_days: 30.0,
        }
    }
}

/// Response variable of the covariate regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegressionResponse {
    /// Fitted decay rate.
    #[default]
    DecayRate,
    /// Estimated persistence duration.
    PersistenceDays,
}

/// Cross-event regression options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregationConfig {
    /// Run the regression after the per-event fits.
    pub enabled: bool,
    /// Long-format CSV `region,event_start,variable,value`.
    pub covariates_path: Option<PathBuf>,
    /// Covariates used as predictors, in order.
    pub covariates: Vec<String>,
    /// Response variable.
    pub response: RegressionResponse,
    /// Property whose metrics are regressed. Defaults to the first tracked one.
    pub property: Option<CloudProperty>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            covariates_path: None,
            covariates: vec![
                "boundary_layer_height".to_string(),
                "relative_humidity_850".to_string(),
                "vertical_velocity_500".to_string(),
            ],
            response: RegressionResponse::DecayRate,
            property: None,
        }
    }
}

// ============================================================================
// Acquisition and runtime
// ============================================================================

/// MODIS platform for the cloud product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Satellite {
    /// Terra (MOD06_L2).
    #[default]
    Terra,
    /// Aqua (MYD06_L2).
    Aqua,
}

/// Where observations come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Pre-extracted CSV files in a directory.
    Local {
        /// Directory holding `aod_<region>.csv`, `cloud_<region>_<property>.csv`
        /// and `profile_<region>.csv`.
        dir: PathBuf,
    },
    /// Remote geospatial service.
    Remote {
        /// Query endpoint.
        base_url: String,
        /// Product collection.
        collection: String,
        /// Platform for the cloud product.
        #[serde(default)]
        satellite: Satellite,
        /// CALIOP data release for the dust profiles.
        #[serde(default = "default_profile_version")]
        profile_version: String,
        /// Response cache directory.
        cache_dir: PathBuf,
    },
}

fn default_profile_version() -> String {
    "4.51".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Local {
            dir: PathBuf::from("data/processed"),
        }
    }
}

/// Bounded exponential backoff for transient service failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

/// Acquisition options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionConfig {
    /// Data source.
    pub source: SourceConfig,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
    /// Regions fetched concurrently.
    pub max_concurrent_requests: usize,
    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            retry: RetryConfig::default(),
            max_concurrent_requests: 4,
            timeout_secs: 60,
        }
    }
}

/// Thread pool options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Worker threads for the per-event fan-out. 0 uses all cores.
    pub threads: usize,
}

/// Output options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory receiving the catalogs and the run summary.
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<StudyConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parse and validate a configuration from a YAML string.
pub fn load_config_from_str(yaml: &str) -> Result<StudyConfig, ConfigError> {
    let config: StudyConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

impl StudyConfig {
    /// Check every option. Called by the loaders; call again after mutating.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_time_period()?;
        self.validate_regions()?;
        self.validate_detection()?;
        self.validate_validation()?;
        self.validate_tracking()?;
        self.validate_baseline()?;
        self.validate_persistence()?;
        self.validate_aggregation()?;
        self.validate_acquisition()?;
        Ok(())
    }

    /// The analysed period.
    pub fn date_range(&self) -> DateRange {
        DateRange::new(self.time_period.start, self.time_period.end)
    }

    /// The analysed period restricted to the focus months.
    pub fn observation_window(&self) -> ObservationWindow {
        ObservationWindow::with_months(self.date_range(), self.time_period.focus_months.clone())
    }

    /// Look up a region by name.
    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Property regressed by the aggregation step.
    pub fn aggregation_property(&self) -> Option<CloudProperty> {
        self.aggregation
            .property
            .or_else(|| self.tracking.properties.first().copied())
    }

    fn validate_time_period(&self) -> Result<(), ConfigError> {
        let tp = &self.time_period;
        if tp.start > tp.end {
            return Err(ConfigError::InvalidTimePeriod(format!(
                "start {} is after end {}",
                tp.start, tp.end
            )));
        }
        if let Some(m) = tp.focus_months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(ConfigError::InvalidTimePeriod(format!(
                "focus month {} is not in 1..=12",
                m
            )));
        }
        if self.observation_window().expected_days() == 0 {
            return Err(ConfigError::InvalidTimePeriod(
                "no day of the period falls in a focus month".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_regions(&self) -> Result<(), ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }
        let mut seen = HashSet::new();
        for region in &self.regions {
            let name_ok = !region.name.is_empty()
                && region
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !name_ok {
                return Err(ConfigError::invalid(
                    "regions.name",
                    format!(
                        "'{}' must be non-empty and use only ASCII letters, digits, '_' or '-'",
                        region.name
                    ),
                ));
            }
            if !seen.insert(region.name.as_str()) {
                return Err(ConfigError::DuplicateRegion(region.name.clone()));
            }
            region.bbox.validate(&region.name)?;
        }
        Ok(())
    }

    fn validate_detection(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        if !d.aod_threshold.is_finite() || d.aod_threshold <= 0.0 {
            return Err(ConfigError::invalid(
                "detection.aod_threshold",
                format!("{} must be a positive number", d.aod_threshold),
            ));
        }
        if d.min_duration_days == 0 {
            return Err(ConfigError::invalid(
                "detection.min_duration_days",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&d.max_missing_fraction) {
            return Err(ConfigError::invalid(
                "detection.max_missing_fraction",
                format!("{} must lie within [0, 1]", d.max_missing_fraction),
            ));
        }
        Ok(())
    }

    fn validate_validation(&self) -> Result<(), ConfigError> {
        let v = &self.validation;
        if !(0.0..=1.0).contains(&v.min_dust_fraction) {
            return Err(ConfigError::invalid(
                "validation.min_dust_fraction",
                format!("{} must lie within [0, 1]", v.min_dust_fraction),
            ));
        }
        if !(v.downweight_factor > 0.0 && v.downweight_factor <= 1.0) {
            return Err(ConfigError::invalid(
                "validation.downweight_factor",
                format!("{} must lie within (0, 1]", v.downweight_factor),
            ));
        }
        Ok(())
    }

    fn validate_tracking(&self) -> Result<(), ConfigError> {
        let t = &self.tracking;
        if t.window_days == 0 || t.window_days > 30 {
            return Err(ConfigError::invalid(
                "tracking.window_days",
                format!("{} must lie within 1..=30", t.window_days),
            ));
        }
        if t.properties.is_empty() {
            return Err(ConfigError::invalid(
                "tracking.properties",
                "at least one cloud property is required",
            ));
        }
        Ok(())
    }

    fn validate_baseline(&self) -> Result<(), ConfigError> {
        let b = &self.baseline;
        if b.lookback_years == 0 {
            return Err(ConfigError::invalid("baseline.lookback_years", "must be at least 1"));
        }
        if b.min_samples == 0 {
            return Err(ConfigError::invalid("baseline.min_samples", "must be at least 1"));
        }
        if b.half_window_days > 45 {
            return Err(ConfigError::invalid(
                "baseline.half_window_days",
                format!("{} exceeds 45 days", b.half_window_days),
            ));
        }
        Ok(())
    }

    fn validate_persistence(&self) -> Result<(), ConfigError> {
        let p = &self.persistence;
        if p.min_valid_days < 3 {
            return Err(ConfigError::invalid(
                "persistence.min_valid_days",
                format!("{} is below 3, the smallest sample with a slope test", p.min_valid_days),
            ));
        }
        if p.min_valid_days > self.tracking.window_days + 1 {
            return Err(ConfigError::invalid(
                "persistence.min_valid_days",
                format!(
                    "{} exceeds the {} tracked days",
                    p.min_valid_days,
                    self.tracking.window_days + 1
                ),
            ));
        }
        if !(p.significance_level > 0.0 && p.significance_level < 1.0) {
            return Err(ConfigError::invalid(
                "persistence.significance_level",
                format!("{} must lie within (0, 1)", p.significance_level),
            ));
        }
        if !p.horizon_days.is_finite() || p.horizon_days <= 0.0 {
            return Err(ConfigError::invalid(
                "persistence.horizon_days",
                format!("{} must be positive", p.horizon_days),
            ));
        }
        Ok(())
    }

    fn validate_aggregation(&self) -> Result<(), ConfigError> {
        let a = &self.aggregation;
        if !a.enabled {
            return Ok(());
        }
        if a.covariates_path.is_none() {
            return Err(ConfigError::invalid(
                "aggregation.covariates_path",
                "required when aggregation is enabled",
            ));
        }
        if a.covariates.is_empty() {
            return Err(ConfigError::invalid(
                "aggregation.covariates",
                "at least one covariate is required",
            ));
        }
        if let Some(p) = a.property {
            if !self.tracking.properties.contains(&p) {
                return Err(ConfigError::invalid(
                    "aggregation.property",
                    format!("{} is not a tracked property", p),
                ));
            }
        }
        Ok(())
    }

    fn validate_acquisition(&self) -> Result<(), ConfigError> {
        let a = &self.acquisition;
        if a.max_concurrent_requests == 0 {
            return Err(ConfigError::invalid(
                "acquisition.max_concurrent_requests",
                "must be at least 1",
            ));
        }
        if a.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("acquisition.retry.max_attempts", "must be at least 1"));
        }
        if !a.retry.multiplier.is_finite() || a.retry.multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "acquisition.retry.multiplier",
                format!("{} must be at least 1.0", a.retry.multiplier),
            ));
        }
        if let SourceConfig::Remote { base_url, .. } = &a.source {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    "acquisition.source.base_url",
                    format!("'{}' is not an http(s) URL", base_url),
                ));
            }
        }
        Ok(())
    }
}
