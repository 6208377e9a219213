//! End-to-end analysis of a single synthetic dust event.

use approx::assert_relative_eq;
use chrono::{Days, NaiveDate};
use medust_analysis::{
    Climatology, DustEventDetector, FixedBaseline, PersistenceAnalyzer, TemporalAnalyzer,
};
use medust_model::{
    AodObservation, BaselineConfig, CloudObservation, CloudProperty, DetectionConfig,
    PersistenceConfig, QualityFlag, TrackingConfig,
};

const REGION: &str = "central_med";
const DECAY: f64 = 0.25;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn aod_series() -> Vec<AodObservation> {
    [0.1, 0.1, 0.6, 0.7, 0.65, 0.2, 0.1]
        .iter()
        .enumerate()
        .map(|(i, aod)| {
            AodObservation::new(
                date(2020, 6, 1) + Days::new(i as u64),
                REGION,
                *aod,
                QualityFlag::Good,
            )
        })
        .collect()
}

/// Cloud effective radius relaxing back to 12 µm after the event end.
fn post_event_cloud(end: NaiveDate) -> Vec<CloudObservation> {
    (0..=7u64)
        .map(|t| {
            CloudObservation::new(
                end + Days::new(t),
                REGION,
                CloudProperty::CloudEffectiveRadius,
                12.0 + 3.0 * (-DECAY * t as f64).exp(),
                QualityFlag::Good,
            )
        })
        .collect()
}

#[test]
fn test_event_to_persistence_with_fixed_baseline() {
    let detector = DustEventDetector::new(DetectionConfig::default());
    let events = detector.detect_all(REGION, &aod_series(), None).unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.start, date(2020, 6, 3));
    assert_eq!(event.end, date(2020, 6, 5));
    assert_relative_eq!(event.peak_aod, 0.7);

    let anomalies = TemporalAnalyzer::new(TrackingConfig::default()).track(
        event,
        CloudProperty::CloudEffectiveRadius,
        &post_event_cloud(event.end),
        &FixedBaseline::new(12.0, 0.3),
    );
    assert_eq!(anomalies.len(), 8);
    assert_relative_eq!(anomalies[0].anomaly.unwrap(), 3.0, epsilon = 1e-12);

    let metric = PersistenceAnalyzer::new(PersistenceConfig::default()).fit(
        &event.key(),
        CloudProperty::CloudEffectiveRadius,
        &anomalies,
    );
    let fit = metric.fit().unwrap();
    assert_relative_eq!(fit.decay_rate, DECAY, epsilon = 1e-6);
    assert!(fit.significant);
    assert!(fit.persistence_days.unwrap() > 0.0);
}

#[test]
fn test_event_to_persistence_with_climatology() {
    let event = DustEventDetector::new(DetectionConfig::default())
        .detect_all(REGION, &aod_series(), None)
        .unwrap()
        .remove(0);

    let mut history = Vec::new();
    for year in 2012..=2019 {
        let first = date(year, 5, 15);
        for d in 0..60u64 {
            history.push(CloudObservation::new(
                first + Days::new(d),
                REGION,
                CloudProperty::CloudEffectiveRadius,
                12.0,
                QualityFlag::Good,
            ));
        }
    }
    let mut past_event = event.clone();
    past_event.start = date(2017, 6, 3);
    past_event.end = date(2017, 6, 4);
    let clim = Climatology::build(
        REGION,
        CloudProperty::CloudEffectiveRadius,
        &history,
        &[past_event, event.clone()],
        &BaselineConfig::default(),
    );
    assert!(clim.excluded_years().contains(&2017));

    let anomalies = TemporalAnalyzer::new(TrackingConfig::default()).track(
        &event,
        CloudProperty::CloudEffectiveRadius,
        &post_event_cloud(event.end),
        &clim,
    );
    assert!(anomalies.iter().all(|a| a.baseline == Some(12.0)));

    let fit = PersistenceAnalyzer::new(PersistenceConfig::default())
        .fit(&event.key(), CloudProperty::CloudEffectiveRadius, &anomalies)
        .fit()
        .cloned()
        .unwrap();
    assert_relative_eq!(fit.decay_rate, DECAY, epsilon = 1e-6);
    assert_relative_eq!(fit.amplitude, 3.0, epsilon = 1e-6);
}
