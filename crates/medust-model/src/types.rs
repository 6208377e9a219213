//! Record types shared by every stage of the pipeline.
//!
//! All records are plain immutable values. Downstream records refer to the
//! dust event they derive from through an [`EventKey`] only.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

// ============================================================================
// Geography
// ============================================================================

/// Geographic bounding box in degrees.
///
/// Serialized as `[min_lon, min_lat, max_lon, max_lat]`, the same order the
/// acquisition service expects in its `bbox` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    /// Western edge.
    pub min_lon: f64,
    /// Southern edge.
    pub min_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self {
            min_lon: v[0],
            min_lat: v[1],
            max_lon: v[2],
            max_lat: v[3],
        }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.min_lon, b.min_lat, b.max_lon, b.max_lat]
    }
}

impl BoundingBox {
    /// Create a bounding box without validation.
    pub const fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Check `min < max` on both axes and that all edges are on the globe.
    pub fn validate(&self, region: &str) -> Result<(), ConfigError> {
        let fail = |reason: String| ConfigError::InvalidBoundingBox {
            region: region.to_string(),
            reason,
        };

        let edges = [self.min_lon, self.min_lat, self.max_lon, self.max_lat];
        if edges.iter().any(|v| !v.is_finite()) {
            return Err(fail("edges must be finite".to_string()));
        }
        if self.min_lon >= self.max_lon {
            return Err(fail(format!(
                "min longitude {} must be less than max longitude {}",
                self.min_lon, self.max_lon
            )));
        }
        if self.min_lat >= self.max_lat {
            return Err(fail(format!(
                "min latitude {} must be less than max latitude {}",
                self.min_lat, self.max_lat
            )));
        }
        if self.min_lon < -180.0 || self.max_lon > 180.0 {
            return Err(fail("longitudes must lie within [-180, 180]".to_string()));
        }
        if self.min_lat < -90.0 || self.max_lat > 90.0 {
            return Err(fail("latitudes must lie within [-90, 90]".to_string()));
        }
        Ok(())
    }

    /// Whether the point lies inside the box (edges inclusive).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Render as `min_lon,min_lat,max_lon,max_lat`.
    pub fn query_string(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// A named study region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Region {
    /// Unique region name, used in file names and event keys.
    pub name: String,
    /// Spatial extent.
    pub bbox: BoundingBox,
}

impl Region {
    /// Create a new region.
    pub fn new(name: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            name: name.into(),
            bbox,
        }
    }
}

// ============================================================================
// Observations
// ============================================================================

/// Retrieval quality attached to every satellite reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityFlag {
    /// Retrieval rejected by the product's own QA (clouded, glint, ...).
    Bad,
    /// Usable with caution.
    Marginal,
    /// Best quality.
    Good,
}

impl QualityFlag {
    /// Returns the flag as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::Bad => "bad",
            QualityFlag::Marginal => "marginal",
            QualityFlag::Good => "good",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" | "3" => Ok(QualityFlag::Good),
            "marginal" | "1" | "2" => Ok(QualityFlag::Marginal),
            "bad" | "0" => Ok(QualityFlag::Bad),
            other => Err(format!("unknown quality flag '{}'", other)),
        }
    }
}

/// A daily aerosol optical depth reading for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AodObservation {
    /// Observation day.
    pub date: NaiveDate,
    /// Region name.
    pub region: String,
    /// Aerosol optical depth at 550 nm (unitless). NaN for a fill value.
    pub aod: f64,
    /// Retrieval quality.
    pub quality: QualityFlag,
}

impl AodObservation {
    /// Create a new observation.
    pub fn new(date: NaiveDate, region: impl Into<String>, aod: f64, quality: QualityFlag) -> Self {
        Self {
            date,
            region: region.into(),
            aod,
            quality,
        }
    }

    /// A reading counts when it is finite and meets the minimum quality.
    pub fn is_valid(&self, min_quality: QualityFlag) -> bool {
        self.aod.is_finite() && self.quality >= min_quality
    }
}

/// Cloud microphysical properties tracked after a dust event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudProperty {
    /// Cloud droplet effective radius (µm).
    CloudEffectiveRadius,
    /// Cloud optical thickness (unitless).
    CloudOpticalThickness,
    /// Liquid water path (g/m²).
    LiquidWaterPath,
    /// Cloud fraction (0-1).
    CloudFraction,
    /// Cloud top pressure (hPa).
    CloudTopPressure,
}

impl CloudProperty {
    /// All properties, in a stable order.
    pub const ALL: [CloudProperty; 5] = [
        CloudProperty::CloudEffectiveRadius,
        CloudProperty::CloudOpticalThickness,
        CloudProperty::LiquidWaterPath,
        CloudProperty::CloudFraction,
        CloudProperty::CloudTopPressure,
    ];

    /// Snake-case name used in configs, file names and catalogs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloudProperty::CloudEffectiveRadius => "cloud_effective_radius",
            CloudProperty::CloudOpticalThickness => "cloud_optical_thickness",
            CloudProperty::LiquidWaterPath => "liquid_water_path",
            CloudProperty::CloudFraction => "cloud_fraction",
            CloudProperty::CloudTopPressure => "cloud_top_pressure",
        }
    }

    /// Science dataset name in the MODIS cloud product.
    pub const fn modis_variable(&self) -> &'static str {
        match self {
            CloudProperty::CloudEffectiveRadius => "Cloud_Effective_Radius",
            CloudProperty::CloudOpticalThickness => "Cloud_Optical_Thickness",
            CloudProperty::LiquidWaterPath => "Cloud_Water_Path",
            CloudProperty::CloudFraction => "Cloud_Fraction",
            CloudProperty::CloudTopPressure => "Cloud_Top_Pressure",
        }
    }
}

impl fmt::Display for CloudProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProperty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CloudProperty::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown cloud property '{}'", s))
    }
}

/// A daily cloud-property reading for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudObservation {
    /// Observation day.
    pub date: NaiveDate,
    /// Region name.
    pub region: String,
    /// Which property was retrieved.
    pub property: CloudProperty,
    /// Retrieved value. NaN for a fill value.
    pub value: f64,
    /// Retrieval quality.
    pub quality: QualityFlag,
}

impl CloudObservation {
    /// Create a new observation.
    pub fn new(
        date: NaiveDate,
        region: impl Into<String>,
        property: CloudProperty,
        value: f64,
        quality: QualityFlag,
    ) -> Self {
        Self {
            date,
            region: region.into(),
            property,
            value,
            quality,
        }
    }

    /// A reading counts when it is finite and meets the minimum quality.
    pub fn is_valid(&self, min_quality: QualityFlag) -> bool {
        self.value.is_finite() && self.quality >= min_quality
    }
}

/// Daily vertical-profile dust classification for one region.
///
/// `dust_fraction` is the share of CALIOP aerosol layers over the region
/// classified as dust or polluted dust (`Aerosol_Type_532`) on an overpass
/// day. The lidar revisits a region every few days, so these series are
/// sparse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DustProfile {
    /// Overpass day.
    pub date: NaiveDate,
    /// Region name.
    pub region: String,
    /// Dust share of the detected aerosol layers, in [0, 1]. NaN when no
    /// aerosol layer was detected.
    pub dust_fraction: f64,
    /// Retrieval quality.
    pub quality: QualityFlag,
}

impl DustProfile {
    /// Create a new profile reading.
    pub fn new(date: NaiveDate, region: impl Into<String>, dust_fraction: f64, quality: QualityFlag) -> Self {
        Self {
            date,
            region: region.into(),
            dust_fraction,
            quality,
        }
    }

    /// A reading counts when its fraction lies in [0, 1] and it meets the
    /// minimum quality.
    pub fn is_valid(&self, min_quality: QualityFlag) -> bool {
        (0.0..=1.0).contains(&self.dust_fraction) && self.quality >= min_quality
    }
}

// ============================================================================
// Derived records
// ============================================================================

/// Identifies a dust event: the region plus its first day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    /// Region name.
    pub region: String,
    /// First day of the event.
    pub start: NaiveDate,
}

impl EventKey {
    /// Create a new event key.
    pub fn new(region: impl Into<String>, start: NaiveDate) -> Self {
        Self {
            region: region.into(),
            start,
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.region, self.start.format("%Y-%m-%d"))
    }
}

/// A contiguous period of AOD at or above the detection threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DustEvent {
    /// Region name.
    pub region: String,
    /// First above-threshold day.
    pub start: NaiveDate,
    /// Last above-threshold day.
    pub end: NaiveDate,
    /// Highest AOD inside the event.
    pub peak_aod: f64,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    /// Number of valid above-threshold readings in the span.
    pub valid_days: u32,
}

impl DustEvent {
    /// The catalog key of this event.
    pub fn key(&self) -> EventKey {
        EventKey::new(self.region.clone(), self.start)
    }

    /// Inclusive span in days.
    pub fn duration_days(&self) -> u32 {
        ((self.end - self.start).num_days() + 1).max(0) as u32
    }

    /// Whether a date falls inside the event span.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// One day of a post-event cloud-property anomaly.
///
/// `observed`, `baseline` and `anomaly` are `None` when no valid sample or no
/// climatology exists for that day. Missing days are never imputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudAnomaly {
    /// Event this anomaly follows.
    pub event: EventKey,
    /// Days after the event end (0 = the last event day).
    pub day_offset: u32,
    /// Property being tracked.
    pub property: CloudProperty,
    /// Observed value, if any.
    pub observed: Option<f64>,
    /// Climatological mean, if any.
    pub baseline: Option<f64>,
    /// Interannual standard deviation of the climatology, if any.
    pub baseline_std: Option<f64>,
    /// `observed - baseline` when both are present.
    pub anomaly: Option<f64>,
}

impl CloudAnomaly {
    /// Whether this day carries a usable anomaly.
    pub fn is_valid(&self) -> bool {
        self.anomaly.is_some_and(f64::is_finite)
    }
}

/// Functional form of the anomaly decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecayModel {
    /// `a(t) = A * exp(-k t)`.
    #[default]
    Exponential,
    /// `a(t) = a0 + b t`.
    Linear,
}

impl DecayModel {
    /// Returns the model as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DecayModel::Exponential => "exponential",
            DecayModel::Linear => "linear",
        }
    }
}

impl fmt::Display for DecayModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a successful decay fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayFit {
    /// Model that was fitted.
    pub model: DecayModel,
    /// Anomaly at day offset 0 according to the fit.
    pub amplitude: f64,
    /// Exponential: `k` in 1/day. Linear: anomaly units per day toward zero.
    pub decay_rate: f64,
    /// `ln 2 / k` for exponential fits with positive `k`.
    pub half_life_days: Option<f64>,
    /// Day offset at which the anomaly is no longer distinguishable from
    /// baseline, or `None` if that does not happen within the horizon.
    pub persistence_days: Option<f64>,
    /// Coefficient of determination on the anomaly scale.
    pub r_squared: f64,
    /// Two-sided p-value of the decay slope.
    pub p_value: f64,
    /// `p_value < significance level`.
    pub significant: bool,
    /// Number of days used in the fit.
    pub valid_days: u32,
}

/// Outcome of a persistence fit for one event and property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceOutcome {
    /// A decay model was fitted.
    Fitted(DecayFit),
    /// Too few valid anomaly days for a fit.
    InsufficientData {
        /// Valid days available.
        valid_days: u32,
        /// Valid days required.
        required: u32,
    },
}

/// Terminal artifact of the pipeline for one event and property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceMetric {
    /// Event the metric belongs to.
    pub event: EventKey,
    /// Property that was fitted.
    pub property: CloudProperty,
    /// Fit result.
    pub outcome: PersistenceOutcome,
}

impl PersistenceMetric {
    /// The fit, if one was produced.
    pub fn fit(&self) -> Option<&DecayFit> {
        match &self.outcome {
            PersistenceOutcome::Fitted(fit) => Some(fit),
            PersistenceOutcome::InsufficientData { .. } => None,
        }
    }

    /// Whether the metric is a null "insufficient data" record.
    pub fn is_insufficient(&self) -> bool {
        matches!(self.outcome, PersistenceOutcome::InsufficientData { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_bbox_validation() {
        let ok = BoundingBox::new(-6.0, 30.0, 36.0, 46.0);
        assert!(ok.validate("med").is_ok());

        let swapped_lon = BoundingBox::new(36.0, 30.0, -6.0, 46.0);
        assert!(matches!(
            swapped_lon.validate("med"),
            Err(ConfigError::InvalidBoundingBox { .. })
        ));

        let equal_lat = BoundingBox::new(-6.0, 30.0, 36.0, 30.0);
        assert!(equal_lat.validate("med").is_err());

        let off_globe = BoundingBox::new(-190.0, 30.0, 36.0, 46.0);
        assert!(off_globe.validate("med").is_err());
    }

    #[test]
    fn test_bbox_query_string_and_contains() {
        let b = BoundingBox::new(-6.0, 30.0, 36.0, 46.0);
        assert_eq!(b.query_string(), "-6,30,36,46");
        assert!(b.contains(40.0, 10.0));
        assert!(!b.contains(50.0, 10.0));
    }

    #[test]
    fn test_quality_ordering_and_parse() {
        assert!(QualityFlag::Good > QualityFlag::Marginal);
        assert!(QualityFlag::Marginal > QualityFlag::Bad);
        assert_eq!("Good".parse::<QualityFlag>().unwrap(), QualityFlag::Good);
        assert_eq!("0".parse::<QualityFlag>().unwrap(), QualityFlag::Bad);
        assert!("excellent".parse::<QualityFlag>().is_err());
    }

    #[test]
    fn test_observation_validity() {
        let d = date(2020, 6, 1);
        assert!(AodObservation::new(d, "r", 0.4, QualityFlag::Marginal).is_valid(QualityFlag::Marginal));
        assert!(!AodObservation::new(d, "r", 0.4, QualityFlag::Bad).is_valid(QualityFlag::Marginal));
        assert!(!AodObservation::new(d, "r", f64::NAN, QualityFlag::Good).is_valid(QualityFlag::Bad));
    }

    #[test]
    fn test_cloud_property_names_roundtrip() {
        for p in CloudProperty::ALL {
            assert_eq!(p.as_str().parse::<CloudProperty>().unwrap(), p);
        }
    }

    #[test]
    fn test_event_key_and_duration() {
        let event = DustEvent {
            region: "central_med".to_string(),
            start: date(2020, 6, 15),
            end: date(2020, 6, 17),
            peak_aod: 0.9,
            confidence: 0.8,
            valid_days: 3,
        };
        assert_eq!(event.duration_days(), 3);
        assert_eq!(event.key().to_string(), "central_med@2020-06-15");
        assert!(event.contains(date(2020, 6, 16)));
        assert!(!event.contains(date(2020, 6, 18)));
    }

    #[test]
    fn test_bbox_yaml_array_form() {
        let region: Region = serde_yaml::from_str("name: east\nbbox: [20.0, 30.0, 36.0, 42.0]").unwrap();
        assert_eq!(region.bbox, BoundingBox::new(20.0, 30.0, 36.0, 42.0));
    }
}
