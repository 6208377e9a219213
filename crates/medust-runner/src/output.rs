//! Catalog and summary files.
//!
//! Every run rewrites `events.csv`, `anomalies.csv`, `persistence.csv` and
//! `summary.json`. `regression.csv` is written when the regression succeeded
//! and removed otherwise, so no file from an earlier run is left behind.

use chrono::NaiveDate;
use medust_model::{CloudProperty, DecayModel, PersistenceOutcome, RegressionResponse};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::pipeline::RunOutput;
use crate::Result;

pub const EVENTS_FILE: &str = "events.csv";
pub const ANOMALIES_FILE: &str = "anomalies.csv";
pub const PERSISTENCE_FILE: &str = "persistence.csv";
pub const REGRESSION_FILE: &str = "regression.csv";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Serialize)]
struct EventRow<'a> {
    region: &'a str,
    start: NaiveDate,
    end: NaiveDate,
    duration_days: u32,
    peak_aod: f64,
    confidence: f64,
    valid_days: u32,
}

#[derive(Serialize)]
struct AnomalyRow<'a> {
    region: &'a str,
    event_start: NaiveDate,
    property: CloudProperty,
    day_offset: u32,
    observed: Option<f64>,
    baseline: Option<f64>,
    baseline_std: Option<f64>,
    anomaly: Option<f64>,
}

#[derive(Serialize)]
struct PersistenceRow<'a> {
    region: &'a str,
    event_start: NaiveDate,
    property: CloudProperty,
    status: &'static str,
    model: Option<DecayModel>,
    amplitude: Option<f64>,
    decay_rate: Option<f64>,
    half_life_days: Option<f64>,
    persistence_days: Option<f64>,
    r_squared: Option<f64>,
    p_value: Option<f64>,
    significant: Option<bool>,
    valid_days: u32,
    required_days: Option<u32>,
}

#[derive(Serialize)]
struct TermRow<'a> {
    response: RegressionResponse,
    property: CloudProperty,
    term: &'a str,
    coefficient: f64,
    std_error: f64,
    t_statistic: f64,
    p_value: f64,
    r_squared: f64,
    n: usize,
}

/// Write every catalog of `output` into `dir`, creating it if needed.
pub fn write_outputs(dir: &Path, output: &RunOutput) -> Result<()> {
    fs::create_dir_all(dir)?;

    let mut wtr = csv::Writer::from_path(dir.join(EVENTS_FILE))?;
    for e in output.events.sorted() {
        wtr.serialize(EventRow {
            region: &e.region,
            start: e.start,
            end: e.end,
            duration_days: e.duration_days(),
            peak_aod: e.peak_aod,
            confidence: e.confidence,
            valid_days: e.valid_days,
        })?;
    }
    wtr.flush()?;

    let mut wtr = csv::Writer::from_path(dir.join(ANOMALIES_FILE))?;
    for a in output.anomalies.sorted() {
        wtr.serialize(AnomalyRow {
            region: &a.event.region,
            event_start: a.event.start,
            property: a.property,
            day_offset: a.day_offset,
            observed: a.observed,
            baseline: a.baseline,
            baseline_std: a.baseline_std,
            anomaly: a.anomaly,
        })?;
    }
    wtr.flush()?;

    let mut wtr = csv::Writer::from_path(dir.join(PERSISTENCE_FILE))?;
    for m in output.persistence.sorted() {
        let row = match &m.outcome {
            PersistenceOutcome::Fitted(fit) => PersistenceRow {
                region: &m.event.region,
                event_start: m.event.start,
                property: m.property,
                status: "fitted",
                model: Some(fit.model),
                amplitude: Some(fit.amplitude),
                decay_rate: Some(fit.decay_rate),
                half_life_days: fit.half_life_days,
                persistence_days: fit.persistence_days,
                r_squared: Some(fit.r_squared),
                p_value: Some(fit.p_value),
                significant: Some(fit.significant),
                valid_days: fit.valid_days,
                required_days: None,
            },
            PersistenceOutcome::InsufficientData {
                valid_days,
                required,
            } => PersistenceRow {
                region: &m.event.region,
                event_start: m.event.start,
                property: m.property,
                status: "insufficient_data",
                model: None,
                amplitude: None,
                decay_rate: None,
                half_life_days: None,
                persistence_days: None,
                r_squared: None,
                p_value: None,
                significant: None,
                valid_days: *valid_days,
                required_days: Some(*required),
            },
        };
        wtr.serialize(row)?;
    }
    wtr.flush()?;

    let regression_path = dir.join(REGRESSION_FILE);
    match &output.summary.regression {
        Some(report) => {
            let mut wtr = csv::Writer::from_path(&regression_path)?;
            for term in &report.terms {
                wtr.serialize(TermRow {
                    response: report.response,
                    property: report.property,
                    term: &term.name,
                    coefficient: term.coefficient,
                    std_error: term.std_error,
                    t_statistic: term.t_statistic,
                    p_value: term.p_value,
                    r_squared: report.r_squared,
                    n: report.n,
                })?;
            }
            wtr.flush()?;
        }
        None if regression_path.exists() => fs::remove_file(&regression_path)?,
        None => {}
    }

    let file = fs::File::create(dir.join(SUMMARY_FILE))?;
    serde_json::to_writer_pretty(file, &output.summary)?;

    info!(
        "Wrote {} events, {} anomaly days, {} persistence records to {}",
        output.events.len(),
        output.anomalies.len(),
        output.persistence.len(),
        dir.display()
    );
    Ok(())
}
