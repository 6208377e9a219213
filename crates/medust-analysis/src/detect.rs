//! Dust event detection from daily AOD series.
//!
//! The detector walks a date-ordered series and groups consecutive readings
//! at or above the AOD threshold into events. Days without a valid reading
//! (fill values, clouded or low-quality retrievals, or no record at all) do
//! not split an event as long as no more than `gap_tolerance_days` of them
//! occur in a row. Days outside the observation window's focus months are
//! not expected to carry readings and are never counted as missing, but an
//! event never spans them: the end of a focus season closes any open event.
//!
//! Before anything is scanned the series is checked for coverage: if more than
//! `max_missing_fraction` of the expected days lack a valid reading the whole
//! window is rejected with [`DetectError::DataGap`]. Nothing is interpolated.
//! [`DustEventDetector::scan`] skips the coverage check; it serves history
//! years where any detected event matters more than complete coverage.

use chrono::NaiveDate;
use medust_model::{AodObservation, DateRange, DetectionConfig, DustEvent, ObservationWindow};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during event detection.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Too many expected days have no valid reading.
    #[error(
        "Data gap in region '{region}': {observed} of {expected} expected days observed ({:.1}% missing, limit {:.1}%)",
        .missing_fraction * 100.0,
        .max_missing_fraction * 100.0
    )]
    DataGap {
        /// Region name.
        region: String,
        /// Days expected in the window.
        expected: u32,
        /// Days with a valid reading.
        observed: u32,
        /// Missing fraction.
        missing_fraction: f64,
        /// Configured limit.
        max_missing_fraction: f64,
    },

    /// The series is not ordered by date.
    #[error("Observations for region '{region}' are not ordered by date (index {index})")]
    Unordered {
        /// Region name.
        region: String,
        /// First out-of-order index.
        index: usize,
    },
}

/// Threshold-based dust event detector.
#[derive(Debug, Clone)]
pub struct DustEventDetector {
    config: DetectionConfig,
}

impl DustEventDetector {
    /// Create a detector.
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// The detector's configuration.
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Check coverage and return a lazy iterator over the events in
    /// `observations`.
    ///
    /// `window` defines the expected days. Without one, every day from the
    /// first to the last observation is expected.
    pub fn detect<'a>(
        &'a self,
        region: &str,
        observations: &'a [AodObservation],
        window: Option<&ObservationWindow>,
    ) -> Result<DustEvents<'a>, DetectError> {
        let events = self.scan(region, observations, window)?;
        self.check_coverage(region, observations, &events.window)?;
        Ok(events)
    }

    /// Like [`detect`](Self::detect) but without the coverage check.
    ///
    /// Sparse input yields fewer events instead of a [`DetectError::DataGap`].
    pub fn scan<'a>(
        &'a self,
        region: &str,
        observations: &'a [AodObservation],
        window: Option<&ObservationWindow>,
    ) -> Result<DustEvents<'a>, DetectError> {
        if let Some(index) = observations
            .windows(2)
            .position(|w| w[1].date < w[0].date)
        {
            return Err(DetectError::Unordered {
                region: region.to_string(),
                index: index + 1,
            });
        }

        let window = match window {
            Some(w) => w.clone(),
            None => match (observations.first(), observations.last()) {
                (Some(first), Some(last)) => {
                    ObservationWindow::all_months(DateRange::new(first.date, last.date))
                }
                _ => ObservationWindow::all_months(DateRange::new(NaiveDate::MAX, NaiveDate::MIN)),
            },
        };

        Ok(DustEvents {
            config: &self.config,
            region: region.to_string(),
            observations,
            window,
            pos: 0,
        })
    }

    /// Detect and collect all events.
    pub fn detect_all(
        &self,
        region: &str,
        observations: &[AodObservation],
        window: Option<&ObservationWindow>,
    ) -> Result<Vec<DustEvent>, DetectError> {
        Ok(self.detect(region, observations, window)?.collect())
    }

    fn check_coverage(
        &self,
        region: &str,
        observations: &[AodObservation],
        window: &ObservationWindow,
    ) -> Result<(), DetectError> {
        let expected = window.expected_days();
        if expected == 0 {
            return Ok(());
        }

        let observed = observations
            .iter()
            .filter(|o| o.is_valid(self.config.min_quality) && window.is_expected(o.date))
            .map(|o| o.date)
            .collect::<HashSet<_>>()
            .len() as u32;

        let missing_fraction = f64::from(expected - observed.min(expected)) / f64::from(expected);
        debug!(
            "Coverage for {}: {}/{} days ({:.1}% missing)",
            region,
            observed,
            expected,
            missing_fraction * 100.0
        );

        if missing_fraction > self.config.max_missing_fraction {
            return Err(DetectError::DataGap {
                region: region.to_string(),
                expected,
                observed,
                missing_fraction,
                max_missing_fraction: self.config.max_missing_fraction,
            });
        }
        Ok(())
    }
}

/// A run of above-threshold readings being extended.
struct Candidate {
    start: NaiveDate,
    end: NaiveDate,
    peak: f64,
    valid_days: u32,
}

/// Lazy sequence of dust events produced by [`DustEventDetector::detect`].
pub struct DustEvents<'a> {
    config: &'a DetectionConfig,
    region: String,
    observations: &'a [AodObservation],
    window: ObservationWindow,
    pos: usize,
}

impl DustEvents<'_> {
    fn is_usable(&self, o: &AodObservation) -> bool {
        o.is_valid(self.config.min_quality) && self.window.is_expected(o.date)
    }

    /// Advance to the next valid reading at or above threshold and open a
    /// candidate there.
    fn open_candidate(&mut self) -> Option<Candidate> {
        while self.pos < self.observations.len() {
            let o = &self.observations[self.pos];
            self.pos += 1;
            if self.is_usable(o) && o.aod >= self.config.aod_threshold {
                return Some(Candidate {
                    start: o.date,
                    end: o.date,
                    peak: o.aod,
                    valid_days: 1,
                });
            }
        }
        None
    }

    /// Extend a candidate until the run ends.
    fn extend_candidate(&mut self, candidate: &mut Candidate) {
        while self.pos < self.observations.len() {
            let o = &self.observations[self.pos];
            if !self.is_usable(o) {
                // Missing reading: the gap is measured when the next valid one arrives.
                self.pos += 1;
                continue;
            }

            if !self.window.is_contiguous(candidate.end, o.date) {
                return;
            }
            let gap = self.window.expected_days_between(candidate.end, o.date);
            if gap > self.config.gap_tolerance_days || o.aod < self.config.aod_threshold {
                return;
            }

            if o.date > candidate.end {
                candidate.valid_days += 1;
                candidate.end = o.date;
            }
            candidate.peak = candidate.peak.max(o.aod);
            self.pos += 1;
        }
    }

    fn close(&self, candidate: Candidate) -> DustEvent {
        let threshold = self.config.aod_threshold;
        let span_days = DateRange::new(candidate.start, candidate.end)
            .days()
            .filter(|d| self.window.is_expected(*d))
            .count()
            .max(1) as f64;
        let coverage = (f64::from(candidate.valid_days) / span_days).min(1.0);
        let intensity = ((candidate.peak - threshold) / threshold).clamp(0.0, 1.0);

        DustEvent {
            region: self.region.clone(),
            start: candidate.start,
            end: candidate.end,
            peak_aod: candidate.peak,
            confidence: (coverage * (0.5 + 0.5 * intensity)).clamp(0.0, 1.0),
            valid_days: candidate.valid_days,
        }
    }
}

impl Iterator for DustEvents<'_> {
    type Item = DustEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut candidate = self.open_candidate()?;
            self.extend_candidate(&mut candidate);
            let event = self.close(candidate);

            if event.duration_days() >= self.config.min_duration_days {
                debug!(
                    "Dust event {} to {} in {} (peak AOD {:.2})",
                    event.start, event.end, event.region, event.peak_aod
                );
                return Some(event);
            }
            debug!(
                "Discarding {}-day run starting {} in {}",
                event.duration_days(),
                event.start,
                event.region
            );
        }
    }
}
