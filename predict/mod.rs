pub mod predictor;
pub mod rrblup;
pub use predictor::{GenomicPredictor, PredictError};
pub use rrblup::{RrBlup, RrBlupFit};
