//! # medust-model
//!
//! Records, configuration and date handling shared by every stage of the
//! Mediterranean dust persistence pipeline.
//!
//! - [`types`]: observations, dust events, cloud anomalies and persistence
//!   metrics as plain immutable records
//! - [`config`]: the YAML study configuration and its validation
//! - [`window`]: inclusive date ranges and focus-month windows
//! - [`catalog`]: append-only per-run record catalogs
//!
//! ## Example
//!
//! ```
//! use medust_model::load_config_from_str;
//!
//! let config = load_config_from_str(r#"
//! time_period: { start: 2020-06-01, end: 2020-08-31 }
//! regions:
//!   - { name: aegean, bbox: [22.0, 35.0, 28.0, 41.0] }
//! "#)?;
//! assert_eq!(config.regions[0].name, "aegean");
//! # Ok::<(), medust_model::ConfigError>(())
//! ```

pub mod catalog;
pub mod config;
mod error;
pub mod types;
pub mod window;

pub use catalog::{AnomalyCatalog, Catalog, CatalogRecord, EventCatalog, PersistenceCatalog};
pub use config::{
    load_config, load_config_from_str, AcquisitionConfig, AggregationConfig, BaselineConfig,
    BaselineExclusion, DetectionConfig, OutputConfig, PersistenceConfig, RegressionResponse,
    RejectAction, RetryConfig, RuntimeConfig, Satellite, SourceConfig, StudyConfig, StudyInfo,
    TimePeriod, TrackingConfig, ValidationConfig,
};
pub use error::ConfigError;
pub use types::{
    AodObservation, BoundingBox, CloudAnomaly, CloudObservation, CloudProperty, DecayFit,
    DecayModel, DustEvent, DustProfile, EventKey, PersistenceMetric, PersistenceOutcome,
    QualityFlag, Region,
};
pub use window::{DateRange, ObservationWindow};
