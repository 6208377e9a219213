//! End-to-end runs over local CSV extracts.

use chrono::{Days, NaiveDate};
use medust_acquire::ObservationSource;
use medust_model::{
    load_config_from_str, AodObservation, BoundingBox, CloudObservation, CloudProperty,
    ConfigError, DateRange, DustProfile, PersistenceOutcome, QualityFlag, Region, RejectAction,
    StudyConfig,
};
use medust_runner::{
    write_outputs, Pipeline, RunError, RunOptions, SkipReason, EVENTS_FILE, PERSISTENCE_FILE,
    REGRESSION_FILE, SUMMARY_FILE,
};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const DECAY: f64 = 0.25;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// June 2020 with one dust event on the 3rd to 5th in `central_med`, a
/// sparse `aegean` AOD record, and a cloud effective radius history for
/// `central_med` that relaxes back to 12 µm after the event.
fn write_extracts(dir: &Path) {
    let mut aod = String::from("date,aod,quality\n");
    for d in 1..=30 {
        let value = match d {
            3 => 0.6,
            4 => 0.7,
            5 => 0.65,
            _ => 0.1,
        };
        writeln!(aod, "2020-06-{:02},{},good", d, value).unwrap();
    }
    fs::write(dir.join("aod_central_med.csv"), aod).unwrap();

    let mut sparse = String::from("date,aod,quality\n");
    for d in 1..=10 {
        writeln!(sparse, "2020-06-{:02},0.2,good", d).unwrap();
    }
    fs::write(dir.join("aod_aegean.csv"), sparse).unwrap();

    let mut cloud = String::from("date,value,quality\n");
    for year in 2015..=2019 {
        for d in 1..=30 {
            writeln!(cloud, "{}-06-{:02},12.0,good", year, d).unwrap();
        }
    }
    let end = date(2020, 6, 5);
    for t in 0..=7u64 {
        let value = 12.0 + 3.0 * (-DECAY * t as f64).exp();
        writeln!(cloud, "{},{},good", end + Days::new(t), value).unwrap();
    }
    fs::write(
        dir.join("cloud_central_med_cloud_effective_radius.csv"),
        cloud,
    )
    .unwrap();
}

fn study_config(data_dir: &Path, output_dir: &Path) -> StudyConfig {
    load_config_from_str(&format!(
        r#"
study:
  name: june_2020
time_period:
  start: 2020-06-01
  end: 2020-06-30
regions:
  - name: central_med
    bbox: [10.0, 33.0, 20.0, 40.0]
  - name: aegean
    bbox: [22.0, 35.0, 28.0, 41.0]
acquisition:
  source:
    kind: local
    dir: {}
runtime:
  threads: 2
output:
  dir: {}
"#,
        data_dir.display(),
        output_dir.display()
    ))
    .unwrap()
}

#[test]
fn test_end_to_end_run() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_extracts(data.path());

    let pipeline = Pipeline::new(study_config(data.path(), out.path())).unwrap();
    let output = pipeline.run().unwrap();

    assert_eq!(output.events.len(), 1);
    let event = output.events.iter().next().unwrap();
    assert_eq!(event.region, "central_med");
    assert_eq!(event.start, date(2020, 6, 3));
    assert_eq!(event.end, date(2020, 6, 5));

    // Only cloud effective radius has an extract.
    assert_eq!(output.anomalies.len(), 8);
    assert_eq!(output.persistence.len(), 1);
    let metric = output.persistence.iter().next().unwrap();
    assert_eq!(metric.property, CloudProperty::CloudEffectiveRadius);
    let fit = metric.fit().unwrap();
    assert!((fit.decay_rate - DECAY).abs() < 1e-6);

    let summary = &output.summary;
    assert_eq!(summary.counts.regions, 2);
    assert_eq!(summary.counts.regions_processed, 1);
    assert_eq!(summary.counts.metrics_fitted, 1);
    let gaps: Vec<_> = summary.skipped_for(SkipReason::DataGap).collect();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].region.as_deref(), Some("aegean"));
    assert!(summary
        .skipped_for(SkipReason::ExternalService)
        .any(|s| s.region.as_deref() == Some("central_med")
            && s.property == Some(CloudProperty::CloudOpticalThickness)));
    assert_eq!(summary.exit_code(), 2);

    write_outputs(&pipeline.config().output.dir, &output).unwrap();
    let events_csv = fs::read_to_string(out.path().join(EVENTS_FILE)).unwrap();
    let mut lines = events_csv.lines();
    assert_eq!(
        lines.next(),
        Some("region,start,end,duration_days,peak_aod,confidence,valid_days")
    );
    assert!(lines.next().unwrap().starts_with("central_med,2020-06-03,2020-06-05,3,0.7,"));

    let persistence_csv = fs::read_to_string(out.path().join(PERSISTENCE_FILE)).unwrap();
    assert!(persistence_csv.lines().nth(1).unwrap().contains(",fitted,exponential,"));
    assert!(!out.path().join(REGRESSION_FILE).exists());

    let summary_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.path().join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary_json["study"], "june_2020");
    assert_eq!(summary_json["counts"]["events"], 1);
}

#[test]
fn test_shutdown_cancels_unstarted_events() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_extracts(data.path());

    let pipeline = Pipeline::new(study_config(data.path(), out.path())).unwrap();
    pipeline.shutdown_flag().store(true, Ordering::SeqCst);
    let output = pipeline.run().unwrap();

    assert_eq!(output.events.len(), 1);
    assert!(output.persistence.is_empty());
    assert_eq!(output.summary.counts.cancelled, 1);
    let cancelled: Vec<_> = output.summary.skipped_for(SkipReason::Cancelled).collect();
    assert_eq!(cancelled[0].event.as_deref(), Some("central_med@2020-06-03"));
}

#[test]
fn test_aggregation_failure_recorded() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_extracts(data.path());
    let covariates = data.path().join("covariates.csv");
    fs::write(
        &covariates,
        "region,event_start,variable,value\n\
         central_med,2020-06-03,boundary_layer_height,850\n\
         central_med,2020-06-03,relative_humidity_850,61\n\
         central_med,2020-06-03,vertical_velocity_500,-0.1\n",
    )
    .unwrap();

    let mut config = study_config(data.path(), out.path());
    config.aggregation.covariates_path = Some(covariates);
    RunOptions {
        aggregate: true,
        ..RunOptions::default()
    }
    .apply(&mut config)
    .unwrap();

    let output = Pipeline::new(config).unwrap().run().unwrap();
    assert!(output.summary.regression.is_none());
    let failures: Vec<_> = output.summary.skipped_for(SkipReason::Aggregation).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("Too few"));
}

#[test]
fn test_aggregate_flag_requires_covariates() {
    let data = tempfile::tempdir().unwrap();
    let mut config = study_config(data.path(), data.path());
    let err = RunOptions {
        aggregate: true,
        ..RunOptions::default()
    }
    .apply(&mut config)
    .unwrap_err();
    assert!(matches!(err, RunError::Config(ConfigError::InvalidValue { .. })));
}

/// Source that only counts how often it is asked for data.
struct CountingSource(Arc<AtomicUsize>);

impl ObservationSource for CountingSource {
    fn aod_series(
        &self,
        _region: &Region,
        _range: &DateRange,
    ) -> medust_acquire::Result<Vec<AodObservation>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn cloud_series(
        &self,
        _region: &Region,
        _property: CloudProperty,
        _range: &DateRange,
    ) -> medust_acquire::Result<Vec<CloudObservation>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn dust_profiles(
        &self,
        _region: &Region,
        _range: &DateRange,
    ) -> medust_acquire::Result<Vec<DustProfile>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        "counting".to_string()
    }
}

#[test]
fn test_invalid_bbox_rejected_before_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = study_config(dir.path(), dir.path());
    config.regions[0].bbox = BoundingBox::new(20.0, 33.0, 10.0, 40.0);

    let calls = Arc::new(AtomicUsize::new(0));
    let err = Pipeline::with_source(config, Box::new(CountingSource(Arc::clone(&calls))))
        .unwrap_err();
    assert!(matches!(
        err,
        RunError::Config(ConfigError::InvalidBoundingBox { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_insufficient_post_event_data() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_extracts(data.path());
    // Keep only two post-event days.
    let path = data.path().join("cloud_central_med_cloud_effective_radius.csv");
    let kept: Vec<_> = fs::read_to_string(&path)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with("2020-") || l.starts_with("2020-06-05") || l.starts_with("2020-06-06"))
        .map(str::to_string)
        .collect();
    fs::write(&path, kept.join("\n") + "\n").unwrap();

    let output = Pipeline::new(study_config(data.path(), out.path()))
        .unwrap()
        .run()
        .unwrap();
    let metric = output.persistence.iter().next().unwrap();
    assert_eq!(
        metric.outcome,
        PersistenceOutcome::InsufficientData {
            valid_days: 2,
            required: 4
        }
    );
    assert_eq!(output.summary.counts.metrics_insufficient, 1);
}

#[test]
fn test_dusty_history_year_excluded_from_baseline() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_extracts(data.path());

    // A dust event in June 2019, which also had unusually large droplets.
    let aod_path = data.path().join("aod_central_med.csv");
    let mut aod = fs::read_to_string(&aod_path).unwrap();
    for d in 1..=30 {
        let value = if (10..=12).contains(&d) { 0.9 } else { 0.1 };
        writeln!(aod, "2019-06-{:02},{},good", d, value).unwrap();
    }
    fs::write(&aod_path, aod).unwrap();

    let cloud_path = data.path().join("cloud_central_med_cloud_effective_radius.csv");
    let mut cloud = fs::read_to_string(&cloud_path)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with("2019-"))
        .map(|l| format!("{}\n", l))
        .collect::<String>();
    for d in 1..=30 {
        writeln!(cloud, "2019-06-{:02},20.0,good", d).unwrap();
    }
    fs::write(&cloud_path, cloud).unwrap();

    let output = Pipeline::new(study_config(data.path(), out.path()))
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(output.events.len(), 1, "history events stay out of the catalog");
    assert_eq!(output.summary.counts.history_events, 1);
    assert_eq!(output.anomalies.len(), 8);
    assert!(output.anomalies.iter().all(|a| a.baseline == Some(12.0)));
    let fit = output.persistence.iter().next().unwrap().fit().unwrap().clone();
    assert!((fit.decay_rate - DECAY).abs() < 1e-6);
}

fn write_profiles(dir: &Path, dust_fraction: f64) {
    fs::write(
        dir.join("profile_central_med.csv"),
        format!("date,dust_fraction,quality\n2020-06-04,{},good\n", dust_fraction),
    )
    .unwrap();
    fs::write(
        dir.join("profile_aegean.csv"),
        "date,dust_fraction,quality\n",
    )
    .unwrap();
}

#[test]
fn test_profile_validation_confirms_event() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_extracts(data.path());
    write_profiles(data.path(), 0.85);

    let mut config = study_config(data.path(), out.path());
    config.validation.enabled = true;
    let output = Pipeline::new(config).unwrap().run().unwrap();

    assert_eq!(output.events.len(), 1);
    assert_eq!(output.summary.counts.events_confirmed, 1);
    assert_eq!(output.summary.counts.events_rejected, 0);
    assert_eq!(output.persistence.len(), 1);
}

#[test]
fn test_profile_validation_drops_contradicted_event() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_extracts(data.path());
    write_profiles(data.path(), 0.1);

    let mut config = study_config(data.path(), out.path());
    config.validation.enabled = true;
    let output = Pipeline::new(config).unwrap().run().unwrap();

    assert!(output.events.is_empty());
    assert!(output.persistence.is_empty());
    assert_eq!(output.summary.counts.events_rejected, 1);
    let rejected: Vec<_> = output
        .summary
        .skipped_for(SkipReason::ValidationRejected)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].event.as_deref(), Some("central_med@2020-06-03"));
}

#[test]
fn test_profile_validation_downweights_contradicted_event() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_extracts(data.path());
    write_profiles(data.path(), 0.1);

    let baseline = Pipeline::new(study_config(data.path(), out.path()))
        .unwrap()
        .run()
        .unwrap();
    let original = baseline.events.iter().next().unwrap().confidence;

    let mut config = study_config(data.path(), out.path());
    config.validation.enabled = true;
    config.validation.on_reject = RejectAction::Downweight;
    let output = Pipeline::new(config).unwrap().run().unwrap();

    let event = output.events.iter().next().unwrap();
    assert!((event.confidence - original * 0.5).abs() < 1e-12);
    assert_eq!(output.summary.counts.events_rejected, 1);
    assert_eq!(output.summary.skipped_for(SkipReason::ValidationRejected).count(), 0);
}

/// Source serving one fixed AOD series to every region.
struct FixedSource(Vec<AodObservation>);

impl ObservationSource for FixedSource {
    fn aod_series(
        &self,
        _region: &Region,
        _range: &DateRange,
    ) -> medust_acquire::Result<Vec<AodObservation>> {
        Ok(self.0.clone())
    }

    fn cloud_series(
        &self,
        _region: &Region,
        _property: CloudProperty,
        _range: &DateRange,
    ) -> medust_acquire::Result<Vec<CloudObservation>> {
        Ok(Vec::new())
    }

    fn dust_profiles(
        &self,
        _region: &Region,
        _range: &DateRange,
    ) -> medust_acquire::Result<Vec<DustProfile>> {
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        "fixed".to_string()
    }
}

#[test]
fn test_unordered_series_recorded_as_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let aod = (1..=30u32)
        .rev()
        .map(|d| AodObservation::new(date(2020, 6, d), "any", 0.1, QualityFlag::Good))
        .collect();
    let pipeline =
        Pipeline::with_source(study_config(dir.path(), dir.path()), Box::new(FixedSource(aod)))
            .unwrap();
    let output = pipeline.run().unwrap();

    assert_eq!(output.summary.skipped_for(SkipReason::InvalidInput).count(), 2);
    assert_eq!(output.summary.skipped_for(SkipReason::ExternalService).count(), 0);
    assert_eq!(output.summary.exit_code(), 0);
}
