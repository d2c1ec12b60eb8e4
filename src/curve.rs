//! Detection curves
//!
//! An empirical curve maps a point in condition space (flux, wind speed, ...)
//! to a value: a detection probability for surveys, or a mean time to detect
//! for continuous monitors. Samples must form a full rectilinear grid; queries
//! are interpolated multilinearly and clamped to the sampled range, so a
//! single varying variable reduces to 1-D linear interpolation.

use serde::{Deserialize, Serialize};
use statrs::function::erf::erf;

use crate::{ensure_len, LdarError};

/// Raw sample data as supplied in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveData {
    /// One row per sample, one column per detection variable
    pub points: Vec<Vec<f64>>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CurveData", into = "CurveData")]
pub struct DetectionCurve {
    /// Sorted distinct sample coordinates, one axis per variable
    axes: Vec<Vec<f64>>,
    /// Grid values in row-major order over `axes`
    grid: Vec<f64>,
    data: CurveData,
}

impl DetectionCurve {
    pub fn new(points: Vec<Vec<f64>>, values: Vec<f64>) -> Result<Self, LdarError> {
        Self::try_from(CurveData { points, values })
    }

    /// Curve over a single variable
    pub fn from_1d(points: Vec<f64>, values: Vec<f64>) -> Result<Self, LdarError> {
        Self::new(points.into_iter().map(|p| vec![p]).collect(), values)
    }

    pub fn n_variables(&self) -> usize {
        self.axes.len()
    }

    pub fn points(&self) -> &[Vec<f64>] {
        &self.data.points
    }

    pub fn values(&self) -> &[f64] {
        &self.data.values
    }

    /// Interpolated value at `query`, clamped to the sampled range on every axis
    pub fn evaluate(&self, query: &[f64]) -> f64 {
        debug_assert_eq!(query.len(), self.axes.len(), "query dimension mismatch");

        // Bracketing index and weight of the upper neighbour along each axis
        let brackets: Vec<(usize, f64)> = self
            .axes
            .iter()
            .zip(query.iter())
            .map(|(axis, &q)| bracket(axis, q))
            .collect();

        let strides = self.strides();
        let mut total = 0.0;
        for corner in 0..(1usize << brackets.len()) {
            let mut weight = 1.0;
            let mut offset = 0;
            for (d, &(lo, t)) in brackets.iter().enumerate() {
                let upper = (corner >> d) & 1 == 1;
                let (idx, w) = if upper { (lo + 1, t) } else { (lo, 1.0 - t) };
                if w == 0.0 {
                    weight = 0.0;
                    break;
                }
                weight *= w;
                offset += idx * strides[d];
            }
            if weight != 0.0 {
                total += weight * self.grid[offset];
            }
        }
        total
    }

    pub fn evaluate_rows(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.evaluate(row)).collect()
    }

    fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.axes.len()];
        for d in (0..self.axes.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * self.axes[d + 1].len();
        }
        strides
    }
}

/// Lower bracketing index along a sorted axis and the interpolation weight of
/// the next sample. Out-of-range queries clamp to the end samples.
fn bracket(axis: &[f64], q: f64) -> (usize, f64) {
    let last = axis.len() - 1;
    if last == 0 || q.is_nan() || q <= axis[0] {
        return (0, 0.0);
    }
    if q >= axis[last] {
        return (last - 1, 1.0);
    }
    let upper = axis.partition_point(|&a| a <= q);
    let lo = upper - 1;
    let t = (q - axis[lo]) / (axis[upper] - axis[lo]);
    (lo, t)
}

impl TryFrom<CurveData> for DetectionCurve {
    type Error = LdarError;

    fn try_from(data: CurveData) -> Result<Self, Self::Error> {
        ensure_len("detection curve values", data.points.len(), data.values.len())?;
        let Some(first) = data.points.first() else {
            return Err(LdarError::InvalidConfig(
                "detection curve has no samples".to_string(),
            ));
        };
        let dims = first.len();
        if dims == 0 {
            return Err(LdarError::InvalidConfig(
                "detection curve points have no variables".to_string(),
            ));
        }
        for row in &data.points {
            ensure_len("detection curve point", dims, row.len())?;
            if row.iter().any(|v| !v.is_finite()) {
                return Err(LdarError::InvalidConfig(
                    "detection curve points must be finite".to_string(),
                ));
            }
        }
        if data.values.iter().any(|v| v.is_nan()) {
            return Err(LdarError::InvalidConfig(
                "detection curve values must not be NaN".to_string(),
            ));
        }

        let axes: Vec<Vec<f64>> = (0..dims)
            .map(|d| {
                let mut axis: Vec<f64> = data.points.iter().map(|row| row[d]).collect();
                axis.sort_by(|a, b| a.total_cmp(b));
                axis.dedup();
                axis
            })
            .collect();

        let cells: usize = axes.iter().map(Vec::len).product();
        if cells != data.points.len() {
            return Err(LdarError::InvalidConfig(format!(
                "detection curve samples do not form a full grid: {} samples for {} grid cells",
                data.points.len(),
                cells
            )));
        }

        let mut grid = vec![f64::NAN; cells];
        let mut filled = vec![false; cells];
        let mut curve = Self {
            axes,
            grid: Vec::new(),
            data,
        };
        let strides = curve.strides();
        for (row, &value) in curve.data.points.iter().zip(curve.data.values.iter()) {
            let offset: usize = row
                .iter()
                .zip(curve.axes.iter())
                .zip(strides.iter())
                .map(|((v, axis), stride)| {
                    axis.partition_point(|a| a.total_cmp(v).is_lt()) * stride
                })
                .sum();
            if filled[offset] {
                return Err(LdarError::InvalidConfig(
                    "detection curve contains duplicate sample points".to_string(),
                ));
            }
            filled[offset] = true;
            grid[offset] = value;
        }
        curve.grid = grid;
        Ok(curve)
    }
}

impl From<DetectionCurve> for CurveData {
    fn from(curve: DetectionCurve) -> Self {
        curve.data
    }
}

/// Log-normal detection probability: `0.5 + 0.5 erf((ln f - ln mu) / (sigma sqrt 2))`.
///
/// Zero or negative rates are never detected.
pub fn lognormal_probability(flux: f64, mu: f64, sigma: f64) -> f64 {
    if flux <= 0.0 {
        return 0.0;
    }
    0.5 + 0.5 * erf((flux.ln() - mu.ln()) / (sigma * std::f64::consts::SQRT_2))
}

/// How a stage turns a condition row into a detection probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionModel {
    /// Interpolate an empirical curve over the stage's detection variables
    Empirical(DetectionCurve),
    /// Closed-form curve over the flux column
    LogNormal { mu: f64, sigma: f64 },
}

impl DetectionModel {
    pub fn log_normal(mu: f64, sigma: f64) -> Self {
        Self::LogNormal { mu, sigma }
    }

    pub fn validate(&self, n_variables: usize, flux_column: Option<usize>) -> Result<(), LdarError> {
        match self {
            Self::Empirical(curve) => {
                ensure_len("detection variables", curve.n_variables(), n_variables)
            }
            Self::LogNormal { mu, sigma } => {
                if !(mu.is_finite() && *mu > 0.0 && sigma.is_finite() && *sigma > 0.0) {
                    return Err(LdarError::InvalidConfig(
                        "log-normal mu and sigma must be finite and > 0".to_string(),
                    ));
                }
                if flux_column.is_none() {
                    return Err(LdarError::InvalidConfig(
                        "log-normal detection requires a 'flux' detection variable".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Detection probability for one condition row, in [0, 1]
    pub fn probability(&self, row: &[f64], flux_column: Option<usize>) -> f64 {
        let p = match self {
            Self::Empirical(curve) => curve.evaluate(row),
            Self::LogNormal { mu, sigma } => {
                let flux = flux_column.and_then(|c| row.get(c)).copied().unwrap_or(0.0);
                lognormal_probability(flux, *mu, *sigma)
            }
        };
        if p.is_nan() {
            0.0
        } else {
            p.clamp(0.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_curve() -> DetectionCurve {
        // flux in {0.01, 0.1}, wind in {1, 2}; shuffled sample order
        DetectionCurve::new(
            vec![
                vec![0.1, 2.0],
                vec![0.01, 1.0],
                vec![0.1, 1.0],
                vec![0.01, 2.0],
            ],
            vec![0.6, 0.2, 0.8, 0.1],
        )
        .unwrap()
    }

    #[test]
    fn test_1d_linear_interpolation() {
        let curve = DetectionCurve::from_1d(vec![0.0, 1.0, 3.0], vec![0.0, 0.5, 1.0]).unwrap();
        assert_relative_eq!(curve.evaluate(&[0.5]), 0.25, epsilon = 1e-12);
        assert_relative_eq!(curve.evaluate(&[2.0]), 0.75, epsilon = 1e-12);
        assert_relative_eq!(curve.evaluate(&[1.0]), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_clamps_outside_range() {
        let curve = DetectionCurve::from_1d(vec![0.1, 1.0], vec![0.3, 0.9]).unwrap();
        assert_eq!(curve.evaluate(&[0.0]), 0.3);
        assert_eq!(curve.evaluate(&[-5.0]), 0.3);
        assert_eq!(curve.evaluate(&[50.0]), 0.9);
    }

    #[test]
    fn test_grid_corners_reproduce_samples() {
        let curve = grid_curve();
        assert_relative_eq!(curve.evaluate(&[0.01, 1.0]), 0.2, epsilon = 1e-12);
        assert_relative_eq!(curve.evaluate(&[0.1, 2.0]), 0.6, epsilon = 1e-12);
        assert_relative_eq!(curve.evaluate(&[0.01, 2.0]), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_grid_reduces_to_1d_along_axis() {
        let curve = grid_curve();
        // wind fixed at a sample, flux halfway
        assert_relative_eq!(curve.evaluate(&[0.055, 1.0]), 0.5, epsilon = 1e-12);
        // flux fixed at a sample, wind halfway
        let p = curve.evaluate(&[0.01, 1.5]);
        assert!((0.1..=0.2).contains(&p));
        assert_relative_eq!(p, 0.15, epsilon = 1e-12);
        // bilinear centre
        assert_relative_eq!(curve.evaluate(&[0.055, 1.5]), 0.425, epsilon = 1e-12);
        // clamped on both axes
        assert_relative_eq!(curve.evaluate(&[1.0, 0.0]), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_incomplete_grid() {
        let result = DetectionCurve::new(
            vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![0.0, 2.0]],
            vec![0.1, 0.2, 0.3],
        );
        assert!(result.is_err());

        let result = DetectionCurve::from_1d(vec![0.0, 0.0], vec![0.1, 0.2]);
        assert!(result.is_err());

        let result = DetectionCurve::from_1d(vec![0.0, 1.0], vec![0.1]);
        assert!(matches!(result, Err(LdarError::LengthMismatch { .. })));
    }

    #[test]
    fn test_infinite_values_survive_clamping() {
        let curve =
            DetectionCurve::from_1d(vec![0.99, 1.0, 1.01], vec![f64::INFINITY, 1.0, 0.0]).unwrap();
        assert_eq!(curve.evaluate(&[0.5]), f64::INFINITY);
        assert_eq!(curve.evaluate(&[1.0]), 1.0);
        assert_eq!(curve.evaluate(&[2.0]), 0.0);
    }

    #[test]
    fn test_lognormal_probability() {
        assert_relative_eq!(lognormal_probability(0.02, 0.02, 0.8), 0.5, epsilon = 1e-12);
        assert!(lognormal_probability(1.0, 0.02, 0.8) > 0.99);
        assert_eq!(lognormal_probability(0.0, 0.02, 0.8), 0.0);
    }
}
