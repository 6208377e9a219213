//! # medust-analysis
//!
//! The analytical core of the dust persistence pipeline.
//!
//! ## Features
//!
//! - **Event detection**: threshold scan of daily AOD into dust events, with
//!   gap tolerance and coverage checks
//! - **Event validation**: confirmation or rejection of events from CALIOP
//!   vertical dust profiles
//! - **Anomaly tracking**: cloud-property departures from a climatology over
//!   the days following each event
//! - **Persistence**: exponential or linear decay fits with significance and
//!   persistence duration
//! - **Aggregation**: least squares regression of persistence on
//!   meteorological covariates
//!
//! Every analyzer holds only its configuration; results depend on nothing but
//! the inputs, so analyzers can be shared freely between worker threads.

mod baseline;
mod detect;
mod persistence;
mod regression;
mod stats;
mod temporal;
mod validate;

pub use baseline::{BaselineProvider, BaselineValue, Climatology, FixedBaseline};
pub use detect::{DetectError, DustEventDetector, DustEvents};
pub use persistence::PersistenceAnalyzer;
pub use regression::{
    regress, CovariateTable, RegressionConfig, RegressionError, RegressionReport, RegressionTerm,
};
pub use temporal::TemporalAnalyzer;
pub use validate::{validate_events, EventValidator, ProfileValidator, ValidatedEvents, Verdict};
