//! Post-event cloud anomaly tracking.

use chrono::{Days, NaiveDate};
use medust_model::{CloudAnomaly, CloudObservation, CloudProperty, DustEvent, TrackingConfig};
use std::collections::HashMap;

use crate::BaselineProvider;

/// Extracts the cloud-property anomaly window following a dust event.
#[derive(Debug, Clone)]
pub struct TemporalAnalyzer {
    config: TrackingConfig,
}

impl TemporalAnalyzer {
    /// Create an analyzer.
    pub fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    /// The analyzer's configuration.
    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Anomalies for day offsets `0..=window_days` after `event.end`.
    ///
    /// Always returns `window_days + 1` records. A day without a valid
    /// reading or without a baseline is an explicit "no data" record. When a
    /// day carries several valid readings their mean is used. The source
    /// event and series are not modified.
    pub fn track(
        &self,
        event: &DustEvent,
        property: CloudProperty,
        series: &[CloudObservation],
        baseline: &dyn BaselineProvider,
    ) -> Vec<CloudAnomaly> {
        let key = event.key();
        let daily = self.daily_means(event, property, series);

        (0..=self.config.window_days)
            .map(|offset| {
                let date = event.end.checked_add_days(Days::new(u64::from(offset)));
                let observed = date.and_then(|d| daily.get(&d).copied());
                let base = date.and_then(|d| baseline.baseline(d));
                let anomaly = match (observed, base) {
                    (Some(o), Some(b)) => Some(o - b.mean),
                    _ => None,
                };
                CloudAnomaly {
                    event: key.clone(),
                    day_offset: offset,
                    property,
                    observed,
                    baseline: base.map(|b| b.mean),
                    baseline_std: base.map(|b| b.std),
                    anomaly,
                }
            })
            .collect()
    }

    /// Mean of valid readings per day inside the tracking window.
    fn daily_means(
        &self,
        event: &DustEvent,
        property: CloudProperty,
        series: &[CloudObservation],
    ) -> HashMap<NaiveDate, f64> {
        let last = event
            .end
            .checked_add_days(Days::new(u64::from(self.config.window_days)))
            .unwrap_or(NaiveDate::MAX);

        let mut sums: HashMap<NaiveDate, (f64, u32)> = HashMap::new();
        for o in series {
            if o.property != property
                || o.region != event.region
                || o.date < event.end
                || o.date > last
                || !o.is_valid(self.config.min_quality)
            {
                continue;
            }
            let entry = sums.entry(o.date).or_insert((0.0, 0));
            entry.0 += o.value;
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(d, (sum, n))| (d, sum / f64::from(n)))
            .collect()
    }
}
