//! Climatological baselines for cloud properties.
//!
//! The baseline for a target day is the mean of valid historical readings
//! falling in the same calendar window (target day ± `half_window_days`) of
//! each of the `lookback_years` prior years. Anomalous periods are kept out
//! according to [`BaselineExclusion`]:
//!
//! - `event_years`: every year in which the region had a dust event is skipped
//! - `event_windows`: only days inside an event span (± `buffer_days`) are skipped
//! - `none`: nothing is skipped
//!
//! Samples from the target year itself never enter the baseline.

use chrono::{Datelike, Days, NaiveDate};
use medust_model::{
    BaselineConfig, BaselineExclusion, CloudObservation, CloudProperty, DateRange, DustEvent,
};
use std::collections::HashSet;

/// Baseline statistics for one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineValue {
    /// Climatological mean.
    pub mean: f64,
    /// Sample standard deviation of the climatological samples.
    pub std: f64,
    /// Number of samples.
    pub samples: u32,
}

/// Supplies the expected value of a cloud property on a given day.
///
/// Shared read-only between worker threads.
pub trait BaselineProvider: Send + Sync {
    /// Baseline for `date`, or `None` if no climatology is available.
    fn baseline(&self, date: NaiveDate) -> Option<BaselineValue>;
}

/// A constant baseline, for climatologies computed elsewhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedBaseline {
    value: BaselineValue,
}

impl FixedBaseline {
    /// Create a fixed baseline.
    pub fn new(mean: f64, std: f64) -> Self {
        Self {
            value: BaselineValue {
                mean,
                std,
                samples: 0,
            },
        }
    }
}

impl BaselineProvider for FixedBaseline {
    fn baseline(&self, _date: NaiveDate) -> Option<BaselineValue> {
        Some(self.value)
    }
}

/// Calendar-window climatology for one region and property.
#[derive(Debug, Clone)]
pub struct Climatology {
    region: String,
    property: CloudProperty,
    config: BaselineConfig,
    /// Valid historical readings, sorted by date.
    samples: Vec<(NaiveDate, f64)>,
    excluded_years: HashSet<i32>,
    excluded_spans: Vec<DateRange>,
}

impl Climatology {
    /// Build a climatology from a region's history and its detected events.
    ///
    /// Readings from other regions or of other properties are ignored, as are
    /// events of other regions.
    pub fn build(
        region: &str,
        property: CloudProperty,
        history: &[CloudObservation],
        events: &[DustEvent],
        config: &BaselineConfig,
    ) -> Self {
        let mut samples: Vec<(NaiveDate, f64)> = history
            .iter()
            .filter(|o| o.region == region && o.property == property)
            .filter(|o| o.is_valid(config.min_quality))
            .map(|o| (o.date, o.value))
            .collect();
        samples.sort_by_key(|(d, _)| *d);

        let region_events = events.iter().filter(|e| e.region == region);
        let mut excluded_years = HashSet::new();
        let mut excluded_spans = Vec::new();
        match config.exclusion {
            BaselineExclusion::EventYears => {
                for e in region_events {
                    excluded_years.extend(e.start.year()..=e.end.year());
                }
            }
            BaselineExclusion::EventWindows => {
                let buffer = Days::new(u64::from(config.buffer_days));
                for e in region_events {
                    let start = e.start.checked_sub_days(buffer).unwrap_or(NaiveDate::MIN);
                    let end = e.end.checked_add_days(buffer).unwrap_or(NaiveDate::MAX);
                    excluded_spans.push(DateRange::new(start, end));
                }
            }
            BaselineExclusion::None => {}
        }

        Self {
            region: region.to_string(),
            property,
            config: config.clone(),
            samples,
            excluded_years,
            excluded_spans,
        }
    }

    /// Region the climatology belongs to.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Property the climatology describes.
    pub fn property(&self) -> CloudProperty {
        self.property
    }

    /// Years skipped because of dust events.
    pub fn excluded_years(&self) -> &HashSet<i32> {
        &self.excluded_years
    }

    fn is_excluded(&self, date: NaiveDate) -> bool {
        self.excluded_years.contains(&date.year())
            || self.excluded_spans.iter().any(|s| s.contains(date))
    }

    /// Valid samples inside `range`.
    fn samples_in(&self, range: DateRange) -> &[(NaiveDate, f64)] {
        let lo = self.samples.partition_point(|(d, _)| *d < range.start);
        let hi = self.samples.partition_point(|(d, _)| *d <= range.end);
        &self.samples[lo..hi.max(lo)]
    }
}

/// The same month and day in another year. February 29 maps to February 28.
fn same_day_in_year(date: NaiveDate, year: i32) -> Option<NaiveDate> {
    date.with_year(year)
        .or_else(|| NaiveDate::from_ymd_opt(year, date.month(), 28))
}

impl BaselineProvider for Climatology {
    fn baseline(&self, date: NaiveDate) -> Option<BaselineValue> {
        let target_year = date.year();
        let half = Days::new(u64::from(self.config.half_window_days));
        let mut values = Vec::new();

        for year in (target_year - self.config.lookback_years as i32)..target_year {
            let Some(center) = same_day_in_year(date, year) else {
                continue;
            };
            let start = center.checked_sub_days(half).unwrap_or(NaiveDate::MIN);
            let end = center.checked_add_days(half).unwrap_or(NaiveDate::MAX);
            values.extend(
                self.samples_in(DateRange::new(start, end))
                    .iter()
                    .filter(|(d, _)| d.year() < target_year && !self.is_excluded(*d))
                    .map(|(_, v)| *v),
            );
        }

        let n = values.len();
        if n == 0 || (n as u32) < self.config.min_samples {
            return None;
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        Some(BaselineValue {
            mean,
            std,
            samples: n as u32,
        })
    }
}
