//! Ridge-regression BLUP with the shrinkage ratio estimated by REML.
//!
//! The model is `y = 1μ + Xu + e` with `u ~ N(0, σ²_u I)` and `e ~ N(0, σ²_e I)`.
//! The ratio `λ = σ²_e / σ²_u` is found by maximizing the restricted likelihood on
//! the spectrum of the centred marker kernel `S XXᵀ S`, `S = I − 11ᵀ/n`. Given
//! `λ`, `μ` is the GLS intercept and `u = Xᵀ H⁻¹ (y − 1μ)` with `H = XXᵀ + λI`.

use super::predictor::{GenomicPredictor, PredictError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use ndarray_linalg::{Eigh, Solve, UPLO};

/// Search bounds for `λ`, matching the usual mixed-model solver defaults.
const LAMBDA_BOUNDS: (f64, f64) = (1e-9, 1e9);
/// Width of the final bracket on `ln λ`.
const LOG_LAMBDA_TOLERANCE: f64 = 1e-8;

/// The fitted parameters of an [`RrBlup`] model.
#[derive(Debug, Clone, PartialEq)]
pub struct RrBlupFit {
    /// Fixed intercept `μ`.
    pub intercept: f64,
    /// Marker effects `u`, one per column of the training matrix.
    pub effects: Array1<f64>,
    /// `σ²_e / σ²_u` at the REML optimum.
    pub lambda: f64,
    pub genetic_variance: f64,
    pub residual_variance: f64,
}

impl RrBlupFit {
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, PredictError> {
        if x.ncols() != self.effects.len() {
            return Err(PredictError::FeatureCountMismatch {
                expected: self.effects.len(),
                found: x.ncols(),
            });
        }
        Ok(x.dot(&self.effects) + self.intercept)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RrBlup {
    fitted: Option<RrBlupFit>,
}

impl RrBlup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fitted(&self) -> Option<&RrBlupFit> {
        self.fitted.as_ref()
    }
}

/// Golden-section search for the minimum of a unimodal `f` on `[lo, hi]`.
fn golden_section_minimize(f: impl Fn(f64) -> f64, mut lo: f64, mut hi: f64, tolerance: f64) -> f64 {
    let inv_phi = (5.0_f64.sqrt() - 1.0) / 2.0;
    let mut c = hi - inv_phi * (hi - lo);
    let mut d = lo + inv_phi * (hi - lo);
    let mut fc = f(c);
    let mut fd = f(d);
    while hi - lo > tolerance {
        if fc < fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - inv_phi * (hi - lo);
            fc = f(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + inv_phi * (hi - lo);
            fd = f(d);
        }
    }
    0.5 * (lo + hi)
}

/// `S A S` for `S = I − 11ᵀ/n`: subtracts row and column means, adds back the grand mean.
fn double_centre(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows() as f64;
    let row_means: Array1<f64> = a.rows().into_iter().map(|row| row.sum() / n).collect();
    let col_means: Array1<f64> = a.columns().into_iter().map(|col| col.sum() / n).collect();
    let grand_mean = row_means.sum() / n;
    Array2::from_shape_fn(a.dim(), |(i, j)| {
        a[[i, j]] - row_means[i] - col_means[j] + grand_mean
    })
}

/// Sum of `η²/(θ+λ)` and sum of `ln(θ+λ)` over the non-null spectrum.
fn spectral_terms(theta: &Array1<f64>, eta_sq: &Array1<f64>, lambda: f64) -> (f64, f64) {
    theta
        .iter()
        .zip(eta_sq)
        .fold((0.0, 0.0), |(quadratic, log_det), (&t, &e)| {
            let d = t + lambda;
            (quadratic + e / d, log_det + d.ln())
        })
}

impl GenomicPredictor for RrBlup {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), PredictError> {
        self.fitted = None;

        let (n_samples, n_markers) = x.dim();
        if n_samples != y.len() {
            return Err(PredictError::ShapeMismatch {
                rows: n_samples,
                targets: y.len(),
            });
        }
        if n_samples < 2 {
            return Err(PredictError::TooFewSamples(n_samples));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(PredictError::NonFinite("marker matrix"));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(PredictError::NonFinite("phenotype vector"));
        }

        let kernel = x.dot(&x.t());
        let df = (n_samples - 1) as f64;

        // Shifting by sqrt(n) keeps the informative eigenvalues clear of the null
        // direction of S before they are sorted.
        let offset = (n_samples as f64).sqrt();
        let mut shifted = kernel.clone();
        shifted.diag_mut().mapv_inplace(|v| v + offset);
        let (eigenvalues, eigenvectors) = double_centre(&shifted).eigh(UPLO::Lower)?;

        // Eigenvalues come back ascending; the first belongs to the null space of S.
        let theta = eigenvalues.slice(s![1..]).mapv(|v| (v - offset).max(0.0));
        let eta = eigenvectors.slice(s![.., 1..]).t().dot(&y);
        let eta_sq = eta.mapv(|v| v * v);

        let y_mean = y.sum() / n_samples as f64;
        let centred_ss: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
        let (lambda, genetic_variance) = if centred_ss == 0.0 {
            log::warn!("Phenotype is constant; marker effects are all zero.");
            (LAMBDA_BOUNDS.1, 0.0)
        } else {
            let objective = |log_lambda: f64| {
                let (quadratic, log_det) = spectral_terms(&theta, &eta_sq, log_lambda.exp());
                df * quadratic.ln() + log_det
            };
            let log_lambda = golden_section_minimize(
                objective,
                LAMBDA_BOUNDS.0.ln(),
                LAMBDA_BOUNDS.1.ln(),
                LOG_LAMBDA_TOLERANCE,
            );
            let lambda = log_lambda.exp();
            let (quadratic, _) = spectral_terms(&theta, &eta_sq, lambda);
            (lambda, quadratic / df)
        };
        let residual_variance = lambda * genetic_variance;

        let mut h = kernel;
        h.diag_mut().mapv_inplace(|v| v + lambda);
        let h_inv_y = h.solve(&y.to_owned())?;
        let h_inv_ones = h.solve(&Array1::ones(n_samples))?;
        let intercept = h_inv_y.sum() / h_inv_ones.sum();
        let effects = x.t().dot(&(&h_inv_y - &(h_inv_ones * intercept)));

        log::info!(
            "RR-BLUP fitted on {n_samples} samples and {n_markers} markers: lambda {lambda:.4e}, Vu {genetic_variance:.4e}, Ve {residual_variance:.4e}"
        );

        self.fitted = Some(RrBlupFit {
            intercept,
            effects,
            lambda,
            genetic_variance,
            residual_variance,
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, PredictError> {
        self.fitted
            .as_ref()
            .ok_or(PredictError::NotFitted)?
            .predict(x)
    }
}
