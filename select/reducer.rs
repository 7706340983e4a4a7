use super::lasso::SparseSolver;
use super::stability::{SelectionError, StabilitySelector};
use ndarray::{Array2, ArrayView1, ArrayView2};
use std::convert::Infallible;

/// A feature-reduction step with a fit/transform lifecycle.
///
/// Implementors learn which columns to keep from a feature matrix and target
/// in `fit`, then apply that choice to any matrix with the same width.
pub trait FeatureReducer {
    type Error: std::error::Error;

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), Self::Error>;

    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, Self::Error>;

    fn fit_transform(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<Array2<f64>, Self::Error> {
        self.fit(x, y)?;
        self.transform(x)
    }
}

/// Keeps every feature. Transform returns an owned copy of its input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpReducer;

impl FeatureReducer for NoOpReducer {
    type Error = Infallible;

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), Self::Error> {
        log::debug!(
            "No-op reducer fitted on {} samples and {} features (target length {})",
            x.nrows(),
            x.ncols(),
            y.len()
        );
        Ok(())
    }

    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, Self::Error> {
        Ok(x.to_owned())
    }
}

impl<S: SparseSolver> FeatureReducer for StabilitySelector<S> {
    type Error = SelectionError;

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), Self::Error> {
        StabilitySelector::fit(self, x, y).map(|_| ())
    }

    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, Self::Error> {
        StabilitySelector::transform(self, x)
    }
}
