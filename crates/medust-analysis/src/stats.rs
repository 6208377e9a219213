//! Small statistics helpers shared by the persistence fit and the regression.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Ordinary least squares fit of `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    /// Standard error of the slope. NaN with fewer than three points.
    pub slope_se: f64,
    /// Residual sum of squares.
    pub sse: f64,
    pub n: usize,
}

impl LineFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    /// Two-sided p-value of the slope against zero.
    pub fn slope_p_value(&self) -> f64 {
        if self.n < 3 {
            return 1.0;
        }
        two_sided_p(t_statistic(self.slope, self.slope_se), (self.n - 2) as f64)
    }
}

/// Fit a line through `points`. `None` with fewer than two points or when
/// every x is equal.
pub(crate) fn fit_line(points: &[(f64, f64)]) -> Option<LineFit> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / nf;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / nf;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return None;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let sse: f64 = points
        .iter()
        .map(|p| (p.1 - (intercept + slope * p.0)).powi(2))
        .sum();
    let slope_se = if n > 2 {
        (sse / (nf - 2.0) / sxx).sqrt()
    } else {
        f64::NAN
    };
    Some(LineFit {
        slope,
        intercept,
        slope_se,
        sse,
        n,
    })
}

/// `estimate / se`, treating an exact fit (zero error) as infinitely significant.
pub(crate) fn t_statistic(estimate: f64, se: f64) -> f64 {
    if se.is_nan() {
        return f64::NAN;
    }
    if se == 0.0 {
        return if estimate == 0.0 { 0.0 } else { f64::INFINITY };
    }
    estimate / se
}

/// Two-sided p-value of a t statistic with `df` degrees of freedom.
pub(crate) fn two_sided_p(t: f64, df: f64) -> f64 {
    if t.is_nan() || df <= 0.0 {
        return 1.0;
    }
    if t.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Two-sided standard normal critical value for significance `alpha`.
pub(crate) fn normal_critical(alpha: f64) -> f64 {
    Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(1.0 - alpha / 2.0))
        .unwrap_or(1.96)
}

/// Coefficient of determination from residual and total sums of squares.
pub(crate) fn r_squared(sse: f64, sst: f64) -> f64 {
    if sst <= f64::EPSILON {
        if sse <= f64::EPSILON {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - sse / sst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fit_line_exact() {
        let pts: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, 2.0 - 0.5 * i as f64)).collect();
        let fit = fit_line(&pts).unwrap();
        assert_relative_eq!(fit.slope, -0.5, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept, 2.0, epsilon = 1e-12);
        assert_relative_eq!(fit.predict(4.0), 0.0, epsilon = 1e-12);
        assert!(fit.sse < 1e-20);
        assert_eq!(fit.slope_p_value(), 0.0);
    }

    #[test]
    fn test_fit_line_degenerate() {
        assert!(fit_line(&[(1.0, 2.0)]).is_none());
        assert!(fit_line(&[(1.0, 2.0), (1.0, 3.0)]).is_none());
    }

    #[test]
    fn test_p_value_of_flat_noise_is_large() {
        let pts = [(0.0, 1.0), (1.0, -1.0), (2.0, 1.0), (3.0, -1.0), (4.0, 1.0), (5.0, -1.0)];
        let fit = fit_line(&pts).unwrap();
        assert!(fit.slope_p_value() > 0.5);
    }

    #[test]
    fn test_normal_critical() {
        assert_relative_eq!(normal_critical(0.05), 1.959964, epsilon = 1e-5);
    }

    #[test]
    fn test_two_sided_p_known_value() {
        // t = 2.776 with 4 df is the 97.5% quantile.
        assert_relative_eq!(two_sided_p(2.776445, 4.0), 0.05, epsilon = 1e-4);
    }
}
