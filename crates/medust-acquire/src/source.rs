//! Observation sources: the remote service or local CSV extracts.

use chrono::NaiveDate;
use medust_model::{
    AcquisitionConfig, AodObservation, CloudObservation, CloudProperty, DateRange, DustProfile,
    QualityFlag, Region, Satellite, SourceConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{retry_with_backoff, AcquireError, ProductQuery, Result, RetryPolicy, ServiceClient};

/// Supplies AOD, cloud-property and dust-profile series for a region and
/// date range.
///
/// Implementations must be shareable across the acquisition thread pool.
pub trait ObservationSource: Send + Sync {
    /// Daily AOD readings for a region, ordered by date.
    fn aod_series(&self, region: &Region, range: &DateRange) -> Result<Vec<AodObservation>>;

    /// Daily readings of one cloud property for a region, ordered by date.
    fn cloud_series(
        &self,
        region: &Region,
        property: CloudProperty,
        range: &DateRange,
    ) -> Result<Vec<CloudObservation>>;

    /// Vertical-profile dust classification on overpass days, ordered by date.
    fn dust_profiles(&self, region: &Region, range: &DateRange) -> Result<Vec<DustProfile>>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Build the source described by the acquisition config.
pub fn open_source(config: &AcquisitionConfig) -> Result<Box<dyn ObservationSource>> {
    match &config.source {
        SourceConfig::Local { dir } => Ok(Box::new(LocalSource::new(dir))),
        SourceConfig::Remote {
            base_url,
            collection,
            satellite,
            profile_version,
            cache_dir,
        } => {
            let client = ServiceClient::new(
                base_url,
                cache_dir,
                Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Box::new(
                RemoteSource::new(client, collection, *satellite, RetryPolicy::from(&config.retry))
                    .with_profile_version(profile_version),
            ))
        }
    }
}

// ============================================================================
// Remote source
// ============================================================================

/// Source backed by the geospatial service, with retry on transient failures.
#[derive(Debug)]
pub struct RemoteSource {
    client: ServiceClient,
    collection: String,
    satellite: Satellite,
    profile_version: String,
    retry: RetryPolicy,
}

impl RemoteSource {
    /// Create a remote source.
    pub fn new(client: ServiceClient, collection: &str, satellite: Satellite, retry: RetryPolicy) -> Self {
        Self {
            client,
            collection: collection.to_string(),
            satellite,
            profile_version: "4.51".to_string(),
            retry,
        }
    }

    /// Use another CALIOP release for the dust profiles.
    pub fn with_profile_version(mut self, version: &str) -> Self {
        self.profile_version = version.to_string();
        self
    }

    /// The underlying client, for download statistics.
    pub fn client(&self) -> &ServiceClient {
        &self.client
    }
}

impl ObservationSource for RemoteSource {
    fn aod_series(&self, region: &Region, range: &DateRange) -> Result<Vec<AodObservation>> {
        let query = ProductQuery::aod(&self.collection, &region.name, region.bbox, *range);
        let response = retry_with_backoff(&self.retry, &query.to_string(), |_| {
            self.client.fetch(&query)
        })?;
        response.into_aod(query.product.id(), &region.name)
    }

    fn cloud_series(
        &self,
        region: &Region,
        property: CloudProperty,
        range: &DateRange,
    ) -> Result<Vec<CloudObservation>> {
        let query = ProductQuery::cloud(
            &self.collection,
            self.satellite,
            &region.name,
            region.bbox,
            *range,
            property,
        );
        let response = retry_with_backoff(&self.retry, &query.to_string(), |_| {
            self.client.fetch(&query)
        })?;
        response.into_cloud(query.product.id(), &region.name, property)
    }

    fn dust_profiles(&self, region: &Region, range: &DateRange) -> Result<Vec<DustProfile>> {
        let query = ProductQuery::dust_profile(&self.profile_version, &region.name, region.bbox, *range);
        let response = retry_with_backoff(&self.retry, &query.to_string(), |_| {
            self.client.fetch(&query)
        })?;
        response.into_dust_profiles(query.product.id(), &region.name)
    }

    fn describe(&self) -> String {
        format!(
            "remote service {} (collection {}, {:?})",
            self.client.base_url(),
            self.collection,
            self.satellite
        )
    }
}

// ============================================================================
// Local CSV source
// ============================================================================

/// Row of an `aod_<region>.csv` extract.
#[derive(Debug, Deserialize)]
struct AodRow {
    date: NaiveDate,
    aod: Option<f64>,
    #[serde(default)]
    quality: Option<String>,
}

/// Row of a `cloud_<region>_<property>.csv` extract.
#[derive(Debug, Deserialize)]
struct CloudRow {
    date: NaiveDate,
    value: Option<f64>,
    #[serde(default)]
    quality: Option<String>,
}

/// Row of a `profile_<region>.csv` extract.
#[derive(Debug, Deserialize)]
struct ProfileRow {
    date: NaiveDate,
    dust_fraction: Option<f64>,
    #[serde(default)]
    quality: Option<String>,
}

/// Source reading pre-extracted daily series from CSV files.
///
/// Files: `aod_<region>.csv` with columns `date,aod,quality`,
/// `cloud_<region>_<property>.csv` with columns `date,value,quality` and
/// `profile_<region>.csv` with columns `date,dust_fraction,quality`. Empty
/// values are fill values; an empty quality means good.
#[derive(Debug, Clone)]
pub struct LocalSource {
    dir: PathBuf,
}

impl LocalSource {
    /// Create a source over a directory.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of a region's AOD extract.
    pub fn aod_path(&self, region: &str) -> PathBuf {
        self.dir.join(format!("aod_{}.csv", region))
    }

    /// Path of a region's cloud-property extract.
    pub fn cloud_path(&self, region: &str, property: CloudProperty) -> PathBuf {
        self.dir.join(format!("cloud_{}_{}.csv", region, property))
    }

    /// Path of a region's dust-profile extract.
    pub fn profile_path(&self, region: &str) -> PathBuf {
        self.dir.join(format!("profile_{}.csv", region))
    }

    fn open(&self, path: &Path) -> Result<csv::Reader<std::fs::File>> {
        if !path.exists() {
            return Err(AcquireError::MissingData(path.display().to_string()));
        }
        Ok(csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?)
    }
}

fn parse_quality(raw: Option<&str>, path: &Path) -> Result<QualityFlag> {
    match raw {
        None | Some("") => Ok(QualityFlag::Good),
        Some(q) => q.parse().map_err(|reason| AcquireError::InvalidRecord {
            source_name: path.display().to_string(),
            reason,
        }),
    }
}

impl ObservationSource for LocalSource {
    fn aod_series(&self, region: &Region, range: &DateRange) -> Result<Vec<AodObservation>> {
        let path = self.aod_path(&region.name);
        let mut reader = self.open(&path)?;
        let mut out = Vec::new();
        for row in reader.deserialize::<AodRow>() {
            let row = row?;
            if !range.contains(row.date) {
                continue;
            }
            let quality = parse_quality(row.quality.as_deref(), &path)?;
            out.push(AodObservation::new(
                row.date,
                &region.name,
                row.aod.unwrap_or(f64::NAN),
                quality,
            ));
        }
        out.sort_by_key(|o| o.date);
        debug!("Read {} AOD rows from {}", out.len(), path.display());
        Ok(out)
    }

    fn cloud_series(
        &self,
        region: &Region,
        property: CloudProperty,
        range: &DateRange,
    ) -> Result<Vec<CloudObservation>> {
        let path = self.cloud_path(&region.name, property);
        let mut reader = self.open(&path)?;
        let mut out = Vec::new();
        for row in reader.deserialize::<CloudRow>() {
            let row = row?;
            if !range.contains(row.date) {
                continue;
            }
            let quality = parse_quality(row.quality.as_deref(), &path)?;
            out.push(CloudObservation::new(
                row.date,
                &region.name,
                property,
                row.value.unwrap_or(f64::NAN),
                quality,
            ));
        }
        out.sort_by_key(|o| o.date);
        debug!("Read {} {} rows from {}", out.len(), property, path.display());
        Ok(out)
    }

    fn dust_profiles(&self, region: &Region, range: &DateRange) -> Result<Vec<DustProfile>> {
        let path = self.profile_path(&region.name);
        let mut reader = self.open(&path)?;
        let mut out = Vec::new();
        for row in reader.deserialize::<ProfileRow>() {
            let row = row?;
            if !range.contains(row.date) {
                continue;
            }
            let quality = parse_quality(row.quality.as_deref(), &path)?;
            out.push(DustProfile::new(
                row.date,
                &region.name,
                row.dust_fraction.unwrap_or(f64::NAN),
                quality,
            ));
        }
        out.sort_by_key(|p| p.date);
        debug!("Read {} profile rows from {}", out.len(), path.display());
        Ok(out)
    }

    fn describe(&self) -> String {
        format!("local extracts in {}", self.dir.display())
    }
}
