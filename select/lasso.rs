//! L1-penalized linear regression by cyclic coordinate descent.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

/// Default relative tolerance on coefficient steps and on the duality gap.
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Design matrix has {rows} rows but the response has {targets} entries.")]
    ShapeMismatch { rows: usize, targets: usize },
    #[error("Cannot fit a sparse model to an empty training set.")]
    NoSamples,
    #[error("L1 penalty must be finite and non-negative, got {0}.")]
    InvalidPenalty(f64),
}

/// A solver for `min_w (1/2n)‖y − Xw − b‖² + penalty·‖w‖₁` with a free intercept `b`.
///
/// Only the slope coefficients are returned; a coefficient of exactly zero means
/// the feature was not selected.
pub trait SparseSolver: Sync {
    fn fit_l1(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        penalty: f64,
        max_iterations: usize,
    ) -> Result<Array1<f64>, SolverError>;
}

/// Cyclic coordinate descent on centred data with a duality-gap stopping rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateDescent {
    pub tolerance: f64,
}

impl Default for CoordinateDescent {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    value.signum() * (value.abs() - threshold).max(0.0)
}

/// Duality gap of the lasso problem scaled by `n`, given the current residual.
fn duality_gap(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    coefficients: &Array1<f64>,
    residual: &Array1<f64>,
    l1: f64,
) -> f64 {
    let xt_residual = x.t().dot(residual);
    let dual_norm = xt_residual.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let residual_norm_sq = residual.dot(residual);

    let (scale, mut gap) = if dual_norm > l1 {
        let scale = l1 / dual_norm;
        let scaled_norm_sq = residual_norm_sq * scale * scale;
        (scale, 0.5 * (residual_norm_sq + scaled_norm_sq))
    } else {
        (1.0, residual_norm_sq)
    };

    let l1_norm: f64 = coefficients.iter().map(|c| c.abs()).sum();
    gap += l1 * l1_norm - scale * residual.dot(&y);
    gap
}

impl SparseSolver for CoordinateDescent {
    fn fit_l1(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        penalty: f64,
        max_iterations: usize,
    ) -> Result<Array1<f64>, SolverError> {
        let (n_samples, n_features) = x.dim();
        if n_samples != y.len() {
            return Err(SolverError::ShapeMismatch {
                rows: n_samples,
                targets: y.len(),
            });
        }
        if n_samples == 0 {
            return Err(SolverError::NoSamples);
        }
        if !penalty.is_finite() || penalty < 0.0 {
            return Err(SolverError::InvalidPenalty(penalty));
        }

        // The intercept is unpenalized, so it drops out once both sides are centred.
        let x_mean = x.mean_axis(Axis(0)).ok_or(SolverError::NoSamples)?;
        let y_mean = y.mean().ok_or(SolverError::NoSamples)?;
        let xc = &x - &x_mean;
        let yc = &y - y_mean;

        let mut coefficients = Array1::<f64>::zeros(n_features);
        let y_norm_sq = yc.dot(&yc);
        if y_norm_sq == 0.0 {
            return Ok(coefficients);
        }

        let column_norms_sq: Array1<f64> = xc.columns().into_iter().map(|c| c.dot(&c)).collect();
        let l1 = penalty * n_samples as f64;
        let gap_tolerance = self.tolerance * y_norm_sq;
        let mut residual = yc.clone();

        for iteration in 0..max_iterations {
            let mut max_step = 0.0_f64;
            let mut max_coefficient = 0.0_f64;

            for j in 0..n_features {
                if column_norms_sq[j] == 0.0 {
                    continue;
                }
                let column = xc.column(j);
                let previous = coefficients[j];
                if previous != 0.0 {
                    residual.scaled_add(previous, &column);
                }

                let correlation = column.dot(&residual);
                let updated = soft_threshold(correlation, l1) / column_norms_sq[j];
                coefficients[j] = updated;
                if updated != 0.0 {
                    residual.scaled_add(-updated, &column);
                }

                max_step = max_step.max((updated - previous).abs());
                max_coefficient = max_coefficient.max(updated.abs());
            }

            if max_coefficient == 0.0 || max_step / max_coefficient < self.tolerance {
                let gap = duality_gap(xc.view(), yc.view(), &coefficients, &residual, l1);
                if gap < gap_tolerance {
                    log::trace!(
                        "Coordinate descent converged after {} sweeps (gap {gap:.3e})",
                        iteration + 1
                    );
                    return Ok(coefficients);
                }
            }
        }

        log::warn!(
            "Coordinate descent did not converge within {max_iterations} iterations; consider raising the iteration cap or the penalty."
        );
        Ok(coefficients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    #[test]
    fn soft_threshold_shrinks_toward_zero() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
    }

    #[test]
    fn zero_penalty_recovers_least_squares() {
        let x = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 1.0], [0.0, 3.0]];
        let truth = array![1.5, -2.0];
        let y = x.dot(&truth) + 4.0;

        let solver = CoordinateDescent { tolerance: 1e-10 };
        let coefficients = solver.fit_l1(x.view(), y.view(), 0.0, 10_000).unwrap();
        assert_abs_diff_eq!(coefficients[0], 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(coefficients[1], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn orthogonal_design_matches_closed_form() {
        // Centred orthogonal columns with unit mean square: the lasso solution is
        // the soft-thresholded least-squares estimate.
        let x = array![[1.0, 1.0], [-1.0, 1.0], [1.0, -1.0], [-1.0, -1.0]];
        let y = array![3.0, -1.0, 1.0, -3.0];
        let solver = CoordinateDescent { tolerance: 1e-12 };
        let coefficients = solver.fit_l1(x.view(), y.view(), 0.5, 1_000).unwrap();
        // Least squares gives (2, 1); soft-thresholding by 0.5 gives (1.5, 0.5).
        assert_abs_diff_eq!(coefficients[0], 1.5, epsilon = 1e-9);
        assert_abs_diff_eq!(coefficients[1], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn large_penalty_zeroes_every_coefficient() {
        let x = array![[1.0, 2.0], [2.0, 0.0], [3.0, 1.0], [4.0, 5.0]];
        let y = array![1.0, 2.0, 2.5, 4.0];
        let coefficients = CoordinateDescent::default()
            .fit_l1(x.view(), y.view(), 100.0, 100)
            .unwrap();
        assert!(coefficients.iter().all(|&c| c == 0.0));
    }

    #[test]
    fn constant_columns_and_constant_response_stay_zero() {
        let x = Array2::from_shape_fn((6, 3), |(i, j)| if j == 1 { 7.0 } else { (i * j) as f64 });
        let y = Array1::from_elem(6, 2.0);
        let coefficients = CoordinateDescent::default()
            .fit_l1(x.view(), y.view(), 0.1, 100)
            .unwrap();
        assert_eq!(coefficients, Array1::<f64>::zeros(3));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0];
        assert_eq!(
            CoordinateDescent::default().fit_l1(x.view(), y.view(), 0.1, 10),
            Err(SolverError::ShapeMismatch { rows: 2, targets: 1 })
        );

        let y = array![1.0, 2.0];
        assert_eq!(
            CoordinateDescent::default().fit_l1(x.view(), y.view(), -1.0, 10),
            Err(SolverError::InvalidPenalty(-1.0))
        );
    }
}
