//! # Stability Selection
//!
//! Fits an L1-penalized regression on many seeded resamples of the training data
//! and keeps the features that the sparse model picks often enough. Each
//! repetition contributes one boolean mask to a [`SelectionHistory`]; the retained
//! set is derived from the per-feature counts whenever it is requested.

use super::lasso::{CoordinateDescent, SolverError, SparseSolver};
use super::progress::{NoopRepetitionProgress, RepetitionObserver};
use super::split::train_test_split;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Parameter '{name}' must be {expected}, got {value}.")]
    ParameterOutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("Feature matrix has {rows} rows but the target vector has {targets} entries.")]
    ShapeMismatch { rows: usize, targets: usize },
    #[error("Feature matrix has no columns; there is nothing to select from.")]
    NoFeatures,
    #[error(
        "Cannot split {samples} samples with test fraction {test_fraction}: both the training and held-out sets must be non-empty."
    )]
    SplitTooSmall { samples: usize, test_fraction: f64 },
    #[error("Input contains a non-finite value in the {0}.")]
    NonFinite(&'static str),
    #[error("The selector has not been fitted. Call 'fit' before 'transform'.")]
    NotFitted,
    #[error("Selector was fitted on {expected} features but the matrix has {found} columns.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("Sparse solver failed in repetition {repetition}: {source}")]
    Solver {
        repetition: usize,
        #[source]
        source: SolverError,
    },
    #[error("Stored selection history is inconsistent: {0}")]
    CorruptHistory(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse selector file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize selector: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Parameters of a stability-selection run. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// L1 penalty handed to the sparse solver.
    pub alpha: f64,
    /// Fraction of repetitions a feature must exceed to be retained, in `[0, 1]`.
    pub threshold: f64,
    /// Fraction of rows held out in each repetition, in `(0, 1)`.
    pub test_fraction: f64,
    pub repetitions: usize,
    pub max_iterations: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            threshold: 0.1,
            test_fraction: 0.2,
            repetitions: 200,
            max_iterations: 10_000,
        }
    }
}

impl StabilityConfig {
    pub fn validate(&self) -> Result<(), SelectionError> {
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(SelectionError::ParameterOutOfRange {
                name: "alpha",
                value: self.alpha,
                expected: "finite and non-negative",
            });
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(SelectionError::ParameterOutOfRange {
                name: "threshold",
                value: self.threshold,
                expected: "within [0, 1]",
            });
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(SelectionError::ParameterOutOfRange {
                name: "test_fraction",
                value: self.test_fraction,
                expected: "strictly between 0 and 1",
            });
        }
        if self.repetitions == 0 {
            return Err(SelectionError::ParameterOutOfRange {
                name: "repetitions",
                value: 0.0,
                expected: "at least 1",
            });
        }
        if self.max_iterations == 0 {
            return Err(SelectionError::ParameterOutOfRange {
                name: "max_iterations",
                value: 0.0,
                expected: "at least 1",
            });
        }
        Ok(())
    }
}

/// Per-repetition selection masks, in repetition order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionHistory {
    pub n_features: usize,
    pub masks: Vec<Vec<bool>>,
}

impl SelectionHistory {
    /// How many repetitions selected each feature.
    pub fn selection_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_features];
        for mask in &self.masks {
            for (count, &selected) in counts.iter_mut().zip(mask) {
                *count += usize::from(selected);
            }
        }
        counts
    }

    /// Applies the frequency threshold `ratio` to the recorded masks.
    ///
    /// A feature is kept when its count is strictly greater than
    /// `ratio * repetitions`. When that bar is higher than the best count any
    /// feature reached, every feature selected at least once is kept instead.
    pub fn retained_features(&self, ratio: f64) -> RetainedFeatures {
        let counts = self.selection_counts();
        let threshold = ratio * self.masks.len() as f64;
        let max_count = counts.iter().copied().max().unwrap_or(0);

        let fell_back = threshold > max_count as f64;
        let mask: Vec<bool> = if fell_back {
            log::warn!(
                "Selection threshold {threshold} exceeds the highest selection count {max_count}; keeping every feature selected at least once."
            );
            counts.iter().map(|&count| count > 0).collect()
        } else {
            counts.iter().map(|&count| count as f64 > threshold).collect()
        };

        RetainedFeatures {
            mask,
            counts,
            threshold,
            fell_back,
        }
    }

    fn check(&self) -> Result<(), SelectionError> {
        if let Some((repetition, mask)) = self
            .masks
            .iter()
            .enumerate()
            .find(|(_, mask)| mask.len() != self.n_features)
        {
            return Err(SelectionError::CorruptHistory(format!(
                "mask {repetition} has {} entries but the history records {} features",
                mask.len(),
                self.n_features
            )));
        }
        Ok(())
    }
}

/// The feature subset derived from a [`SelectionHistory`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetainedFeatures {
    pub mask: Vec<bool>,
    pub counts: Vec<usize>,
    /// The nominal bar `ratio * repetitions`.
    pub threshold: f64,
    /// Whether the "selected at least once" rule replaced the nominal bar.
    pub fell_back: bool,
}

impl RetainedFeatures {
    /// Column indices of the retained features, in original order.
    pub fn indices(&self) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(index, &kept)| kept.then_some(index))
            .collect()
    }

    /// Projects `x` onto the retained columns.
    pub fn project(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SelectionError> {
        if x.ncols() != self.mask.len() {
            return Err(SelectionError::FeatureCountMismatch {
                expected: self.mask.len(),
                found: x.ncols(),
            });
        }
        Ok(x.select(Axis(1), &self.indices()))
    }
}

/// What is written to and read from a selector file.
#[derive(Serialize, Deserialize)]
struct StoredSelector {
    config: StabilityConfig,
    history: SelectionHistory,
}

/// Stateful stability selector. Owns its history exclusively; every `fit`
/// replaces it.
#[derive(Debug, Clone)]
pub struct StabilitySelector<S = CoordinateDescent> {
    config: StabilityConfig,
    solver: S,
    history: Option<SelectionHistory>,
}

impl StabilitySelector<CoordinateDescent> {
    pub fn new(config: StabilityConfig) -> Result<Self, SelectionError> {
        Self::with_solver(config, CoordinateDescent::default())
    }

    /// Saves the configuration and the fitted history to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), SelectionError> {
        let history = self.history.clone().ok_or(SelectionError::NotFitted)?;
        let stored = StoredSelector {
            config: self.config,
            history,
        };
        let toml_string = toml::to_string_pretty(&stored)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Restores a fitted selector saved with [`StabilitySelector::save`].
    pub fn load(path: &Path) -> Result<Self, SelectionError> {
        let toml_string = fs::read_to_string(path)?;
        let stored: StoredSelector = toml::from_str(&toml_string)?;
        stored.history.check()?;
        let mut selector = Self::new(stored.config)?;
        selector.history = Some(stored.history);
        Ok(selector)
    }
}

impl<S: SparseSolver> StabilitySelector<S> {
    pub fn with_solver(config: StabilityConfig, solver: S) -> Result<Self, SelectionError> {
        config.validate()?;
        Ok(Self {
            config,
            solver,
            history: None,
        })
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    pub fn history(&self) -> Option<&SelectionHistory> {
        self.history.as_ref()
    }

    pub fn fit(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<&SelectionHistory, SelectionError> {
        self.fit_with_observer(x, y, &NoopRepetitionProgress)
    }

    /// Runs every repetition and replaces the stored history.
    ///
    /// Repetition `i` splits the rows with seed `i`, so the result does not
    /// depend on how rayon schedules the work.
    pub fn fit_with_observer(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        observer: &dyn RepetitionObserver,
    ) -> Result<&SelectionHistory, SelectionError> {
        self.history = None;

        let (n_samples, n_features) = x.dim();
        if n_samples != y.len() {
            return Err(SelectionError::ShapeMismatch {
                rows: n_samples,
                targets: y.len(),
            });
        }
        if n_features == 0 {
            return Err(SelectionError::NoFeatures);
        }
        if x.iter().any(|value| !value.is_finite()) {
            return Err(SelectionError::NonFinite("feature matrix"));
        }
        if y.iter().any(|value| !value.is_finite()) {
            return Err(SelectionError::NonFinite("target vector"));
        }
        // Fails early on sizes that cannot be split, before any work is scheduled.
        train_test_split(n_samples, self.config.test_fraction, 0)?;

        let config = self.config;
        log::info!(
            "Running stability selection: {} repetitions over {n_samples} samples and {n_features} features (alpha {}, threshold {})",
            config.repetitions,
            config.alpha,
            config.threshold
        );
        observer.on_start(config.repetitions);

        let solver = &self.solver;
        let masks = (0..config.repetitions)
            .into_par_iter()
            .map(|repetition| {
                let split = train_test_split(n_samples, config.test_fraction, repetition as u64)?;
                let x_train = x.select(Axis(0), &split.train);
                let y_train = y.select(Axis(0), &split.train);
                let coefficients = solver
                    .fit_l1(
                        x_train.view(),
                        y_train.view(),
                        config.alpha,
                        config.max_iterations,
                    )
                    .map_err(|source| SelectionError::Solver { repetition, source })?;

                let mask: Vec<bool> = coefficients.iter().map(|c| c.abs() > 0.0).collect();
                let selected = mask.iter().filter(|&&kept| kept).count();
                log::trace!(
                    "Repetition {repetition}: trained on {} rows, held out {}, selected {selected} features",
                    split.train.len(),
                    split.test.len()
                );
                observer.on_repetition_finished(repetition, selected);
                Ok(mask)
            })
            .collect::<Result<Vec<Vec<bool>>, SelectionError>>()?;

        observer.on_finish();
        let history = SelectionHistory { n_features, masks };
        log::debug!(
            "Selection counts per feature: {:?}",
            history.selection_counts()
        );
        Ok(self.history.insert(history))
    }

    /// The retained set under the configured threshold. Recomputed on every call.
    pub fn retained_features(&self) -> Result<RetainedFeatures, SelectionError> {
        let history = self.history.as_ref().ok_or(SelectionError::NotFitted)?;
        Ok(history.retained_features(self.config.threshold))
    }

    /// Restricts `x` to the retained columns, preserving their order.
    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SelectionError> {
        let retained = self.retained_features()?;
        let projected = retained.project(x)?;
        log::info!(
            "Retained {} of {} features",
            projected.ncols(),
            retained.mask.len()
        );
        Ok(projected)
    }

    pub fn fit_transform(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<Array2<f64>, SelectionError> {
        self.fit(x, y)?;
        self.transform(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn history(masks: &[&[bool]]) -> SelectionHistory {
        SelectionHistory {
            n_features: masks[0].len(),
            masks: masks.iter().map(|mask| mask.to_vec()).collect(),
        }
    }

    /// Two strong signal features followed by pure noise.
    fn signal_data(n_samples: usize, n_noise: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let n_features = 2 + n_noise;
        let x = Array2::from_shape_fn((n_samples, n_features), |_| rng.gen_range(-1.0..1.0));
        let y = Array1::from_shape_fn(n_samples, |i| {
            3.0 * x[[i, 0]] - 2.0 * x[[i, 1]] + 0.05 * rng.gen_range(-1.0..1.0)
        });
        (x, y)
    }

    #[test]
    fn threshold_falls_back_to_selected_at_least_once() {
        // Ten repetitions; feature 0 picked three times, feature 1 once, feature 2 never.
        let mut masks = vec![vec![false, false, false]; 10];
        masks[0] = vec![true, true, false];
        masks[1][0] = true;
        masks[2][0] = true;
        let history = SelectionHistory {
            n_features: 3,
            masks,
        };

        let retained = history.retained_features(0.9);
        assert_eq!(retained.counts, vec![3, 1, 0]);
        assert!(retained.fell_back);
        assert_eq!(retained.mask, vec![true, true, false]);
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        let history = history(&[
            &[true, true, false],
            &[true, false, false],
            &[true, true, false],
            &[true, false, true],
        ]);
        // Bar is 0.5 * 4 = 2: feature 1 with exactly two picks is excluded.
        let retained = history.retained_features(0.5);
        assert!(!retained.fell_back);
        assert_eq!(retained.threshold, 2.0);
        assert_eq!(retained.indices(), vec![0]);
    }

    #[test]
    fn zero_ratio_with_nothing_selected_keeps_nothing() {
        let history = history(&[&[false, false], &[false, false]]);
        let retained = history.retained_features(0.0);
        assert!(!retained.fell_back);
        assert!(retained.indices().is_empty());

        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let projected = retained.project(x.view()).unwrap();
        assert_eq!(projected.dim(), (2, 0));
    }

    #[test]
    fn invalid_parameters_are_rejected_at_construction() {
        let bad = [
            StabilityConfig {
                threshold: 1.5,
                ..Default::default()
            },
            StabilityConfig {
                test_fraction: 0.0,
                ..Default::default()
            },
            StabilityConfig {
                test_fraction: 1.0,
                ..Default::default()
            },
            StabilityConfig {
                repetitions: 0,
                ..Default::default()
            },
            StabilityConfig {
                alpha: f64::NAN,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                StabilitySelector::new(config),
                Err(SelectionError::ParameterOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn transform_requires_fit_and_matching_width() {
        let selector = StabilitySelector::new(StabilityConfig::default()).unwrap();
        let x = Array2::<f64>::zeros((4, 3));
        assert!(matches!(
            selector.transform(x.view()),
            Err(SelectionError::NotFitted)
        ));

        let (x, y) = signal_data(40, 3, 1);
        let mut selector = StabilitySelector::new(StabilityConfig {
            repetitions: 5,
            ..Default::default()
        })
        .unwrap();
        selector.fit(x.view(), y.view()).unwrap();
        let narrow = Array2::<f64>::zeros((4, 4));
        assert!(matches!(
            selector.transform(narrow.view()),
            Err(SelectionError::FeatureCountMismatch {
                expected: 5,
                found: 4
            })
        ));
    }

    #[test]
    fn fit_rejects_bad_shapes_before_running() {
        let mut selector = StabilitySelector::new(StabilityConfig::default()).unwrap();
        let x = Array2::<f64>::zeros((5, 2));
        let y = Array1::<f64>::zeros(4);
        assert!(matches!(
            selector.fit(x.view(), y.view()),
            Err(SelectionError::ShapeMismatch { rows: 5, targets: 4 })
        ));

        let x = Array2::<f64>::zeros((5, 0));
        let y = Array1::<f64>::zeros(5);
        assert!(matches!(
            selector.fit(x.view(), y.view()),
            Err(SelectionError::NoFeatures)
        ));

        let x = Array2::<f64>::zeros((1, 2));
        let y = Array1::<f64>::zeros(1);
        assert!(matches!(
            selector.fit(x.view(), y.view()),
            Err(SelectionError::SplitTooSmall { .. })
        ));

        let mut x = Array2::<f64>::zeros((5, 2));
        x[[2, 1]] = f64::INFINITY;
        let y = Array1::<f64>::zeros(5);
        assert!(matches!(
            selector.fit(x.view(), y.view()),
            Err(SelectionError::NonFinite("feature matrix"))
        ));
    }

    #[test]
    fn strong_signal_is_retained_and_mask_width_matches() {
        let (x, y) = signal_data(80, 6, 42);
        let mut selector = StabilitySelector::new(StabilityConfig {
            alpha: 0.3,
            threshold: 0.8,
            repetitions: 30,
            ..Default::default()
        })
        .unwrap();

        let history = selector.fit(x.view(), y.view()).unwrap();
        assert_eq!(history.masks.len(), 30);
        assert!(history.masks.iter().all(|mask| mask.len() == 8));

        let retained = selector.retained_features().unwrap();
        assert!(retained.mask[0] && retained.mask[1]);
        let reduced = selector.transform(x.view()).unwrap();
        assert_eq!(reduced.nrows(), 80);
        assert_eq!(reduced.column(0), x.column(0));
    }

    #[test]
    fn fitting_is_deterministic_across_instances_and_refits() {
        let (x, y) = signal_data(30, 5, 9);
        let config = StabilityConfig {
            alpha: 0.05,
            repetitions: 12,
            ..Default::default()
        };
        let mut first = StabilitySelector::new(config).unwrap();
        let mut second = StabilitySelector::new(config).unwrap();
        let once = first.fit(x.view(), y.view()).unwrap().clone();
        let again = first.fit(x.view(), y.view()).unwrap().clone();
        let other = second.fit(x.view(), y.view()).unwrap().clone();
        assert_eq!(once, again);
        assert_eq!(once, other);
        assert_eq!(
            first.transform(x.view()).unwrap(),
            second.transform(x.view()).unwrap()
        );
    }

    #[test]
    fn observer_sees_every_repetition() {
        struct Counting(AtomicUsize);
        impl RepetitionObserver for Counting {
            fn on_repetition_finished(&self, repetition: usize, selected: usize) {
                let _ = (repetition, selected);
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (x, y) = signal_data(25, 2, 3);
        let observer = Counting(AtomicUsize::new(0));
        let mut selector = StabilitySelector::new(StabilityConfig {
            repetitions: 7,
            ..Default::default()
        })
        .unwrap();
        selector
            .fit_with_observer(x.view(), y.view(), &observer)
            .unwrap();
        assert_eq!(observer.0.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn selector_file_round_trip() {
        let (x, y) = signal_data(30, 3, 5);
        let mut selector = StabilitySelector::new(StabilityConfig {
            repetitions: 6,
            ..Default::default()
        })
        .unwrap();
        selector.fit(x.view(), y.view()).unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        selector.save(file.path()).unwrap();
        let loaded = StabilitySelector::load(file.path()).unwrap();
        assert_eq!(loaded.config(), selector.config());
        assert_eq!(loaded.history(), selector.history());
        assert_eq!(
            loaded.transform(x.view()).unwrap(),
            selector.transform(x.view()).unwrap()
        );
    }

    #[test]
    fn unfitted_selector_cannot_be_saved() {
        let selector = StabilitySelector::new(StabilityConfig::default()).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            selector.save(file.path()),
            Err(SelectionError::NotFitted)
        ));
    }
}
