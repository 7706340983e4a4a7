use ndarray::{Array1, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("The model has not been trained. Call 'fit' before 'predict'.")]
    NotFitted,
    #[error("Marker matrix has {rows} rows but the phenotype vector has {targets} entries.")]
    ShapeMismatch { rows: usize, targets: usize },
    #[error("Model was trained on {expected} markers but the matrix has {found} columns.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("At least two samples are required to estimate variance components, got {0}.")]
    TooFewSamples(usize),
    #[error(
        "Input contains a missing or non-finite value in the {0}; impute or drop it before fitting."
    )]
    NonFinite(&'static str),
    #[error("Linear algebra failure while fitting the model: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

/// A regression model that maps a numeric marker matrix to predicted phenotypes.
///
/// The output of both the genotype normalizer and the stability selector is a
/// valid input.
pub trait GenomicPredictor {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), PredictError>;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, PredictError>;
}
