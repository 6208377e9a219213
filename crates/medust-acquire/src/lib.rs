//! # medust-acquire
//!
//! Acquisition of daily aerosol and cloud-property series for study regions.
//!
//! Two sources implement [`ObservationSource`]:
//!
//! - [`RemoteSource`]: translates a region and date range into a product
//!   query for the geospatial service, caches responses on disk and retries
//!   transient failures with bounded exponential backoff
//! - [`LocalSource`]: reads pre-extracted CSV series from a directory
//!
//! Both normalize their input into [`medust_model::AodObservation`],
//! [`medust_model::CloudObservation`] and [`medust_model::DustProfile`]
//! records ordered by date.
//!
//! ## Example
//!
//! ```no_run
//! use medust_acquire::{LocalSource, ObservationSource};
//! use medust_model::{BoundingBox, DateRange, Region};
//! use chrono::NaiveDate;
//!
//! let source = LocalSource::new("data/processed");
//! let region = Region::new("central_med", BoundingBox::new(10.0, 33.0, 20.0, 40.0));
//! let range = DateRange::new(
//!     NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2020, 8, 31).unwrap(),
//! );
//! let aod = source.aod_series(&region, &range)?;
//! println!("{} AOD readings", aod.len());
//! # Ok::<(), medust_acquire::AcquireError>(())
//! ```

mod client;
mod error;
mod normalize;
mod query;
mod retry;
mod source;

pub use client::{DownloadStats, ServiceClient};
pub use error::AcquireError;
pub use normalize::{ServiceRecord, ServiceResponse};
pub use query::{Product, ProductQuery, CALIOP_AEROSOL_TYPE};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use source::{open_source, LocalSource, ObservationSource, RemoteSource};

/// Result type for acquisition operations.
pub type Result<T> = std::result::Result<T, AcquireError>;
