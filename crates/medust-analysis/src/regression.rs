//! Cross-event regression of persistence metrics on meteorological covariates.

use chrono::NaiveDate;
use medust_model::{CloudProperty, EventKey, PersistenceMetric, RegressionResponse};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::stats::{r_squared, t_statistic, two_sided_p};

/// Errors that can occur while loading covariates or fitting the regression.
#[derive(Debug, Error)]
pub enum RegressionError {
    /// I/O error reading the covariate table.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed covariate CSV.
    #[error("Covariate CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A covariate row could not be interpreted.
    #[error("Invalid covariate row {line}: {reason}")]
    InvalidRow {
        /// 1-based data line.
        line: usize,
        /// What was wrong.
        reason: String,
    },

    /// Not enough complete rows for the number of predictors.
    #[error("Too few complete events for regression: {rows} rows, {predictors} predictors")]
    TooFewRows {
        /// Complete rows.
        rows: usize,
        /// Predictors, excluding the intercept.
        predictors: usize,
    },

    /// The design matrix is not invertible.
    #[error("Singular design matrix (collinear or constant covariates)")]
    Singular,
}

/// Reciprocal condition number below which the design counts as singular.
const SINGULAR_RCOND: f64 = 1e-10;

/// Result type for regression operations.
pub type Result<T> = std::result::Result<T, RegressionError>;

// ============================================================================
// Covariates
// ============================================================================

/// Raw row of the long-format covariate CSV.
#[derive(Debug, Deserialize)]
struct CovariateRow {
    region: String,
    event_start: String,
    variable: String,
    value: Option<f64>,
}

/// Per-event covariate values, keyed by event and variable name.
#[derive(Debug, Clone, Default)]
pub struct CovariateTable {
    values: HashMap<(EventKey, String), f64>,
}

impl CovariateTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a long-format CSV with columns `region,event_start,variable,value`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let table = Self::from_reader(file)?;
        debug!(
            "Loaded {} covariate values from {}",
            table.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    /// Parse the long-format CSV from any reader. Empty values are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut table = Self::new();
        for (i, row) in csv_reader.deserialize::<CovariateRow>().enumerate() {
            let row = row?;
            let start = NaiveDate::parse_from_str(&row.event_start, "%Y-%m-%d").map_err(|e| {
                RegressionError::InvalidRow {
                    line: i + 1,
                    reason: format!("event_start '{}': {}", row.event_start, e),
                }
            })?;
            if let Some(value) = row.value.filter(|v| v.is_finite()) {
                table.insert(EventKey::new(row.region, start), &row.variable, value);
            }
        }
        Ok(table)
    }

    /// Set one covariate value.
    pub fn insert(&mut self, event: EventKey, variable: &str, value: f64) {
        self.values.insert((event, variable.to_string()), value);
    }

    /// Look up one covariate value.
    pub fn get(&self, event: &EventKey, variable: &str) -> Option<f64> {
        self.values.get(&(event.clone(), variable.to_string())).copied()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// Regression
// ============================================================================

/// What to regress on what.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionConfig {
    /// Response taken from each metric's fit.
    pub response: RegressionResponse,
    /// Predictor names, in order.
    pub covariates: Vec<String>,
    /// Only metrics of this property enter the regression.
    pub property: CloudProperty,
}

/// One estimated coefficient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionTerm {
    /// `intercept` or the covariate name.
    pub name: String,
    pub coefficient: f64,
    pub std_error: f64,
    pub t_statistic: f64,
    pub p_value: f64,
}

/// Ordinary least squares report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionReport {
    pub response: RegressionResponse,
    pub property: CloudProperty,
    /// Intercept first, then the covariates in configured order.
    pub terms: Vec<RegressionTerm>,
    pub r_squared: f64,
    /// Rows used.
    pub n: usize,
    /// Metrics of the property dropped for a missing response or covariate.
    pub dropped: usize,
}

impl RegressionReport {
    /// Look up a term by name.
    pub fn term(&self, name: &str) -> Option<&RegressionTerm> {
        self.terms.iter().find(|t| t.name == name)
    }
}

fn response_value(metric: &PersistenceMetric, response: RegressionResponse) -> Option<f64> {
    let fit = metric.fit()?;
    let value = match response {
        RegressionResponse::DecayRate => Some(fit.decay_rate),
        RegressionResponse::PersistenceDays => fit.persistence_days,
    }?;
    value.is_finite().then_some(value)
}

/// Regress the chosen response on the covariates with an intercept.
pub fn regress(
    metrics: &[PersistenceMetric],
    covariates: &CovariateTable,
    config: &RegressionConfig,
) -> Result<RegressionReport> {
    let p = config.covariates.len();
    let mut ys = Vec::new();
    let mut xs = Vec::new();
    let mut dropped = 0;

    for metric in metrics.iter().filter(|m| m.property == config.property) {
        let row: Option<Vec<f64>> = config
            .covariates
            .iter()
            .map(|name| covariates.get(&metric.event, name))
            .collect();
        match (response_value(metric, config.response), row) {
            (Some(y), Some(row)) => {
                ys.push(y);
                xs.push(row);
            }
            _ => dropped += 1,
        }
    }

    let n = ys.len();
    if n <= p + 1 {
        return Err(RegressionError::TooFewRows {
            rows: n,
            predictors: p,
        });
    }

    let x = DMatrix::from_fn(n, p + 1, |i, j| if j == 0 { 1.0 } else { xs[i][j - 1] });
    let y = DVector::from_vec(ys);

    let svd = x.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    if max_sv <= 0.0 || svd.singular_values.min() / max_sv < SINGULAR_RCOND {
        return Err(RegressionError::Singular);
    }
    let beta = svd
        .solve(&y, f64::EPSILON)
        .map_err(|_| RegressionError::Singular)?;
    let xtx_inv = (x.transpose() * &x)
        .try_inverse()
        .ok_or(RegressionError::Singular)?;

    let residuals = &y - &x * &beta;
    let sse = residuals.norm_squared();
    let mean = y.mean();
    let sst: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
    let df = (n - p - 1) as f64;
    let sigma2 = sse / df;

    let terms = (0..=p)
        .map(|j| {
            let se = (sigma2 * xtx_inv[(j, j)]).max(0.0).sqrt();
            let t = t_statistic(beta[j], se);
            RegressionTerm {
                name: if j == 0 {
                    "intercept".to_string()
                } else {
                    config.covariates[j - 1].clone()
                },
                coefficient: beta[j],
                std_error: se,
                t_statistic: t,
                p_value: two_sided_p(t, df),
            }
        })
        .collect();

    let report = RegressionReport {
        response: config.response,
        property: config.property,
        terms,
        r_squared: r_squared(sse, sst),
        n,
        dropped,
    };
    info!(
        "Regression of {:?} on {} covariates: n = {}, R² = {:.3}",
        config.response, p, n, report.r_squared
    );
    Ok(report)
}
