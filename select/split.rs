use super::stability::SelectionError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Row indices of one resampled train/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Number of held-out rows for `n_samples` rows at the given fraction.
pub fn held_out_count(n_samples: usize, test_fraction: f64) -> usize {
    (test_fraction * n_samples as f64).ceil() as usize
}

/// Shuffles `0..n_samples` with a generator seeded by `seed` and cuts the
/// permutation into a leading test block of `ceil(test_fraction * n)` rows and a
/// training block with the remainder.
///
/// The same `(n_samples, test_fraction, seed)` always yields the same split.
pub fn train_test_split(
    n_samples: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<TrainTestSplit, SelectionError> {
    let n_test = held_out_count(n_samples, test_fraction);
    if n_test == 0 || n_test >= n_samples {
        return Err(SelectionError::SplitTooSmall {
            samples: n_samples,
            test_fraction,
        });
    }

    let mut order: Vec<usize> = (0..n_samples).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let train = order.split_off(n_test);
    Ok(TrainTestSplit { train, test: order })
}
