//! Decay fitting of post-event cloud anomalies.
//!
//! The exponential model `a(t) = A exp(-k t)` is initialized from a
//! log-linear least squares fit and refined with Nelder-Mead on the squared
//! residuals. The linear model is plain least squares. Either way the decay
//! slope is tested with a two-sided t-test and the persistence duration is
//! the first day at which the fitted anomaly drops inside `z * sigma` of the
//! baseline.

use argmin::core::{CostFunction, Error, Executor, State};
use argmin::solver::neldermead::NelderMead;
use medust_model::{
    CloudAnomaly, CloudProperty, DecayFit, DecayModel, EventKey, PersistenceConfig,
    PersistenceMetric, PersistenceOutcome,
};
use tracing::{debug, warn};

use crate::stats::{fit_line, normal_critical, r_squared, LineFit};

const OPTIMIZER_MAX_ITERS: u64 = 500;
const DEFAULT_DECAY_RATE: f64 = 0.1;

/// Fits decay models to anomaly sets.
#[derive(Debug, Clone)]
pub struct PersistenceAnalyzer {
    config: PersistenceConfig,
}

/// Sum of squared residuals of the exponential model.
struct DecayCost {
    points: Vec<(f64, f64)>,
}

impl CostFunction for DecayCost {
    type Param = Vec<f64>; // [amplitude, rate]
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> Result<Self::Output, Error> {
        let sse = exponential_sse(&self.points, p[0], p[1]);
        Ok(if sse.is_finite() { sse } else { f64::INFINITY })
    }
}

fn exponential_sse(points: &[(f64, f64)], amplitude: f64, rate: f64) -> f64 {
    points
        .iter()
        .map(|&(t, a)| (a - amplitude * (-rate * t).exp()).powi(2))
        .sum()
}

/// Result of one model fit before thresholding.
struct RawFit {
    amplitude: f64,
    decay_rate: f64,
    sse: f64,
    p_value: f64,
}

impl PersistenceAnalyzer {
    /// Create an analyzer.
    pub fn new(config: PersistenceConfig) -> Self {
        Self { config }
    }

    /// The analyzer's configuration.
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Fit the anomaly set of one event and property.
    ///
    /// Days without a valid anomaly are skipped. With fewer than
    /// `min_valid_days` remaining the metric is an explicit
    /// "insufficient data" record.
    pub fn fit(
        &self,
        event: &EventKey,
        property: CloudProperty,
        anomalies: &[CloudAnomaly],
    ) -> PersistenceMetric {
        let mut points = Vec::new();
        let mut stds = Vec::new();
        for a in anomalies.iter().filter(|a| a.is_valid()) {
            if let Some(value) = a.anomaly {
                points.push((f64::from(a.day_offset), value));
            }
            if let Some(s) = a.baseline_std.filter(|s| s.is_finite() && *s > 0.0) {
                stds.push(s);
            }
        }
        let valid_days = points.len() as u32;

        let outcome = if valid_days < self.config.min_valid_days {
            debug!(
                "{} {}: {} valid days, {} required",
                event, property, valid_days, self.config.min_valid_days
            );
            PersistenceOutcome::InsufficientData {
                valid_days,
                required: self.config.min_valid_days,
            }
        } else {
            let raw = match self.config.model {
                DecayModel::Exponential => fit_exponential(&points, event, property),
                DecayModel::Linear => fit_linear(&points),
            };
            match raw {
                Some(raw) => PersistenceOutcome::Fitted(self.finish(raw, &points, &stds)),
                None => PersistenceOutcome::InsufficientData {
                    valid_days,
                    required: self.config.min_valid_days,
                },
            }
        };

        PersistenceMetric {
            event: event.clone(),
            property,
            outcome,
        }
    }

    fn finish(&self, raw: RawFit, points: &[(f64, f64)], stds: &[f64]) -> DecayFit {
        let n = points.len() as f64;
        let mean = points.iter().map(|p| p.1).sum::<f64>() / n;
        let sst: f64 = points.iter().map(|p| (p.1 - mean).powi(2)).sum();
        let residual_se = (raw.sse / (n - 2.0).max(1.0)).sqrt();

        let sigma = if stds.is_empty() {
            residual_se
        } else {
            stds.iter().sum::<f64>() / stds.len() as f64
        };
        let threshold = normal_critical(self.config.significance_level) * sigma;

        let persistence = match self.config.model {
            DecayModel::Exponential => exponential_crossing(raw.amplitude, raw.decay_rate, threshold),
            DecayModel::Linear => linear_crossing(raw.amplitude, raw.decay_rate, threshold),
        }
        .filter(|t| *t <= self.config.horizon_days);

        let half_life = match self.config.model {
            DecayModel::Exponential if raw.decay_rate > 0.0 => {
                Some(std::f64::consts::LN_2 / raw.decay_rate)
            }
            _ => None,
        };

        DecayFit {
            model: self.config.model,
            amplitude: raw.amplitude,
            decay_rate: raw.decay_rate,
            half_life_days: half_life,
            persistence_days: persistence,
            r_squared: r_squared(raw.sse, sst),
            p_value: raw.p_value,
            significant: raw.p_value < self.config.significance_level,
            valid_days: points.len() as u32,
        }
    }
}

// ============================================================================
// Model fits
// ============================================================================

fn fit_exponential(points: &[(f64, f64)], event: &EventKey, property: CloudProperty) -> Option<RawFit> {
    let total: f64 = points.iter().map(|p| p.1).sum();
    let sign = if total < 0.0 { -1.0 } else { 1.0 };

    // Log-linear fit on the values sharing the dominant sign.
    let logs: Vec<(f64, f64)> = points
        .iter()
        .filter(|p| sign * p.1 > 0.0)
        .map(|p| (p.0, (sign * p.1).ln()))
        .collect();
    let log_fit = fit_line(&logs);

    let (amp0, rate0) = match &log_fit {
        Some(f) => (sign * f.intercept.exp(), -f.slope),
        None => (points[0].1, DEFAULT_DECAY_RATE),
    };
    let p_value = log_fit.as_ref().map_or(1.0, LineFit::slope_p_value);

    let cost = DecayCost {
        points: points.to_vec(),
    };
    let initial_sse = exponential_sse(points, amp0, rate0);
    let amp_step = (0.1 * amp0.abs()).max(1e-3);
    let rate_step = (0.1 * rate0.abs()).max(0.01);
    let solver = NelderMead::new(vec![
        vec![amp0, rate0],
        vec![amp0 + amp_step, rate0],
        vec![amp0, rate0 + rate_step],
    ]);

    let (amplitude, decay_rate) = match Executor::new(cost, solver)
        .configure(|state| state.max_iters(OPTIMIZER_MAX_ITERS))
        .run()
    {
        Ok(res) => match res.state().get_best_param() {
            Some(best) if exponential_sse(points, best[0], best[1]) <= initial_sse => {
                (best[0], best[1])
            }
            _ => (amp0, rate0),
        },
        Err(e) => {
            warn!("{} {}: decay refinement failed: {}", event, property, e);
            (amp0, rate0)
        }
    };

    if !amplitude.is_finite() || !decay_rate.is_finite() {
        return None;
    }
    Some(RawFit {
        amplitude,
        decay_rate,
        sse: exponential_sse(points, amplitude, decay_rate),
        p_value,
    })
}

fn fit_linear(points: &[(f64, f64)]) -> Option<RawFit> {
    let fit = fit_line(points)?;
    let sign = if fit.intercept < 0.0 { -1.0 } else { 1.0 };
    Some(RawFit {
        amplitude: fit.intercept,
        decay_rate: -fit.slope * sign,
        sse: fit.sse,
        p_value: fit.slope_p_value(),
    })
}

// ============================================================================
// Persistence duration
// ============================================================================

/// First `t >= 0` with `|A| exp(-k t) <= threshold`.
fn exponential_crossing(amplitude: f64, rate: f64, threshold: f64) -> Option<f64> {
    let a = amplitude.abs();
    if a <= threshold {
        return Some(0.0);
    }
    if rate <= 0.0 || threshold <= 0.0 {
        return None;
    }
    Some((a / threshold).ln() / rate)
}

/// First `t >= 0` with `|a0 - sign(a0) r t| <= threshold`, `r` the decay rate.
fn linear_crossing(intercept: f64, rate: f64, threshold: f64) -> Option<f64> {
    let a = intercept.abs();
    if a <= threshold {
        return Some(0.0);
    }
    if rate <= 0.0 {
        return None;
    }
    Some((a - threshold) / rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn key() -> EventKey {
        EventKey::new("aegean", NaiveDate::from_ymd_opt(2020, 6, 3).unwrap())
    }

    fn anomaly(offset: u32, value: Option<f64>, std: f64) -> CloudAnomaly {
        CloudAnomaly {
            event: key(),
            day_offset: offset,
            property: CloudProperty::CloudEffectiveRadius,
            observed: value.map(|v| v + 12.0),
            baseline: Some(12.0),
            baseline_std: Some(std),
            anomaly: value,
        }
    }

    fn analyzer(model: DecayModel) -> PersistenceAnalyzer {
        PersistenceAnalyzer::new(PersistenceConfig {
            model,
            ..PersistenceConfig::default()
        })
    }

    #[test]
    fn test_insufficient_data() {
        let anomalies: Vec<_> = (0..8)
            .map(|i| anomaly(i, if i < 2 { Some(3.0) } else { None }, 0.5))
            .collect();
        let metric = analyzer(DecayModel::Exponential).fit(
            &key(),
            CloudProperty::CloudEffectiveRadius,
            &anomalies,
        );
        assert!(metric.is_insufficient());
        assert_eq!(
            metric.outcome,
            PersistenceOutcome::InsufficientData {
                valid_days: 2,
                required: 4
            }
        );
    }

    #[test]
    fn test_exponential_recovers_decay_constant() {
        let k = 0.35;
        let anomalies: Vec<_> = (0..8)
            .map(|i| anomaly(i, Some(-4.0 * (-k * f64::from(i)).exp()), 0.5))
            .collect();
        let metric = analyzer(DecayModel::Exponential).fit(
            &key(),
            CloudProperty::CloudEffectiveRadius,
            &anomalies,
        );
        let fit = metric.fit().unwrap();
        assert_relative_eq!(fit.decay_rate, k, epsilon = 1e-6);
        assert_relative_eq!(fit.amplitude, -4.0, epsilon = 1e-6);
        assert_relative_eq!(fit.half_life_days.unwrap(), std::f64::consts::LN_2 / k, epsilon = 1e-4);
        assert!(fit.r_squared > 0.999);
        assert!(fit.significant);
        assert_eq!(fit.valid_days, 8);

        // 4 exp(-k t) = 1.96 * 0.5
        let expected = (4.0 / (normal_critical(0.05) * 0.5)).ln() / k;
        assert_relative_eq!(fit.persistence_days.unwrap(), expected, epsilon = 1e-4);
    }

    #[test]
    fn test_exponential_skips_missing_days() {
        let k = 0.2;
        let anomalies: Vec<_> = (0..8)
            .map(|i| {
                let v = if i % 3 == 1 { None } else { Some(2.5 * (-k * f64::from(i)).exp()) };
                anomaly(i, v, 0.3)
            })
            .collect();
        let fit = analyzer(DecayModel::Exponential)
            .fit(&key(), CloudProperty::CloudEffectiveRadius, &anomalies)
            .fit()
            .cloned()
            .unwrap();
        assert_eq!(fit.valid_days, 5);
        assert_relative_eq!(fit.decay_rate, k, epsilon = 1e-6);
    }

    #[test]
    fn test_linear_fit() {
        let anomalies: Vec<_> = (0..8)
            .map(|i| anomaly(i, Some(3.0 - 0.4 * f64::from(i)), 0.25))
            .collect();
        let fit = analyzer(DecayModel::Linear)
            .fit(&key(), CloudProperty::CloudEffectiveRadius, &anomalies)
            .fit()
            .cloned()
            .unwrap();
        assert_eq!(fit.model, DecayModel::Linear);
        assert_relative_eq!(fit.amplitude, 3.0, epsilon = 1e-9);
        assert_relative_eq!(fit.decay_rate, 0.4, epsilon = 1e-9);
        assert!(fit.half_life_days.is_none());
        let expected = (3.0 - normal_critical(0.05) * 0.25) / 0.4;
        assert_relative_eq!(fit.persistence_days.unwrap(), expected, epsilon = 1e-9);
        assert!(fit.significant);
    }

    #[test]
    fn test_growing_anomaly_never_persists_out() {
        let anomalies: Vec<_> = (0..6)
            .map(|i| anomaly(i, Some(1.0 + 0.5 * f64::from(i)), 0.1))
            .collect();
        let fit = analyzer(DecayModel::Linear)
            .fit(&key(), CloudProperty::CloudEffectiveRadius, &anomalies)
            .fit()
            .cloned()
            .unwrap();
        assert!(fit.decay_rate < 0.0);
        assert!(fit.persistence_days.is_none());
    }

    #[test]
    fn test_small_anomaly_persists_zero_days() {
        let anomalies: Vec<_> = (0..6)
            .map(|i| anomaly(i, Some(0.1 * (-0.3 * f64::from(i)).exp()), 1.0))
            .collect();
        let fit = analyzer(DecayModel::Exponential)
            .fit(&key(), CloudProperty::CloudEffectiveRadius, &anomalies)
            .fit()
            .cloned()
            .unwrap();
        assert_eq!(fit.persistence_days, Some(0.0));
    }

    #[test]
    fn test_crossing_beyond_horizon() {
        assert!(exponential_crossing(10.0, 0.01, 0.5)
            .filter(|t| *t <= 30.0)
            .is_none());
        assert_eq!(linear_crossing(-2.0, 0.5, 1.0), Some(2.0));
        assert_eq!(linear_crossing(2.0, 0.0, 1.0), None);
    }
}
