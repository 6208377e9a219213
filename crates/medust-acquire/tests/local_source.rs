//! Integration tests for reading local CSV extracts.

use chrono::NaiveDate;
use medust_acquire::{AcquireError, LocalSource, ObservationSource};
use medust_model::{BoundingBox, CloudProperty, DateRange, QualityFlag, Region};
use std::fs;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn region() -> Region {
    Region::new("ionian", BoundingBox::new(15.0, 35.0, 22.0, 40.0))
}

#[test]
fn test_aod_extract_filtered_and_sorted() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("aod_ionian.csv"),
        "date,aod,quality\n\
         2020-06-03,0.61,good\n\
         2020-06-01,0.12,good\n\
         2020-06-02,,bad\n\
         2020-07-15,0.40,marginal\n",
    )
    .unwrap();

    let source = LocalSource::new(dir.path());
    let range = DateRange::new(date(2020, 6, 1), date(2020, 6, 30));
    let obs = source.aod_series(&region(), &range).unwrap();

    assert_eq!(obs.len(), 3, "July row is outside the range");
    assert_eq!(obs[0].date, date(2020, 6, 1));
    assert!(obs[1].aod.is_nan());
    assert_eq!(obs[1].quality, QualityFlag::Bad);
    assert_eq!(obs[2].aod, 0.61);
}

#[test]
fn test_cloud_extract_empty_quality_is_good() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("cloud_ionian_cloud_effective_radius.csv"),
        "date,value,quality\n2020-06-01,12.5,\n2020-06-02,11.0,marginal\n",
    )
    .unwrap();

    let source = LocalSource::new(dir.path());
    let range = DateRange::new(date(2020, 6, 1), date(2020, 6, 30));
    let obs = source
        .cloud_series(&region(), CloudProperty::CloudEffectiveRadius, &range)
        .unwrap();

    assert_eq!(obs.len(), 2);
    assert_eq!(obs[0].quality, QualityFlag::Good);
    assert_eq!(obs[1].value, 11.0);
}

#[test]
fn test_missing_extract_reported() {
    let dir = tempfile::tempdir().unwrap();
    let source = LocalSource::new(dir.path());
    let range = DateRange::new(date(2020, 6, 1), date(2020, 6, 30));
    let err = source.aod_series(&region(), &range).unwrap_err();
    assert!(matches!(err, AcquireError::MissingData(_)));
    assert!(!err.is_transient());
}

#[test]
fn test_unknown_quality_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("aod_ionian.csv"),
        "date,aod,quality\n2020-06-01,0.3,excellent\n",
    )
    .unwrap();
    let source = LocalSource::new(dir.path());
    let range = DateRange::new(date(2020, 6, 1), date(2020, 6, 30));
    assert!(matches!(
        source.aod_series(&region(), &range),
        Err(AcquireError::InvalidRecord { .. })
    ));
}

#[test]
fn test_profile_extract() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("profile_ionian.csv"),
        "date,dust_fraction,quality\n2020-06-09,0.72,good\n2020-06-02,,\n",
    )
    .unwrap();

    let source = LocalSource::new(dir.path());
    let range = DateRange::new(date(2020, 6, 1), date(2020, 6, 30));
    let profiles = source.dust_profiles(&region(), &range).unwrap();

    assert_eq!(profiles.len(), 2);
    assert_eq!(profiles[0].date, date(2020, 6, 2));
    assert!(profiles[0].dust_fraction.is_nan());
    assert_eq!(profiles[1].dust_fraction, 0.72);
    assert_eq!(profiles[1].region, "ionian");
}
