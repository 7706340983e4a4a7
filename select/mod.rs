pub mod lasso;
pub mod progress;
pub mod reducer;
pub mod split;
pub mod stability;
pub use lasso::{CoordinateDescent, SolverError, SparseSolver};
pub use progress::{NoopRepetitionProgress, RepetitionObserver};
pub use reducer::{FeatureReducer, NoOpReducer};
pub use split::{TrainTestSplit, train_test_split};
pub use stability::{
    RetainedFeatures, SelectionError, SelectionHistory, StabilityConfig, StabilitySelector,
};
