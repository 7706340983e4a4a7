//! Accuracy metrics for genomic prediction runs.

use ndarray::{Array1, ArrayView1};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Portion of the ranking used by the hit-rate metrics when none is given.
pub const DEFAULT_PORTION: f64 = 0.25;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Cannot compare {left} observed values with {right} predicted values.")]
    LengthMismatch { left: usize, right: usize },
    #[error("Cannot compute a metric over an empty set of values.")]
    Empty,
    #[error("Portion must be in the interval [0, 1], got {0}.")]
    PortionOutOfRange(f64),
    #[error("Correlation is undefined because one input has zero variance.")]
    ZeroVariance,
    #[error("Input contains a missing or non-finite value.")]
    NonFinite,
}

fn check_pair(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Result<(), MetricError> {
    if a.len() != b.len() {
        return Err(MetricError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(MetricError::Empty);
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(MetricError::NonFinite);
    }
    Ok(())
}

fn check_portion(r: f64) -> Result<(), MetricError> {
    if (0.0..=1.0).contains(&r) {
        Ok(())
    } else {
        Err(MetricError::PortionOutOfRange(r))
    }
}

/// Number of entries in the top `r` portion of `n` values; never less than one.
fn portion_size(n: usize, r: f64) -> usize {
    ((n as f64 * r).floor() as usize).max(1)
}

/// Pearson product-moment correlation.
pub fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Result<f64, MetricError> {
    check_pair(a, b)?;
    let n = a.len() as f64;
    let mean_a = a.sum() / n;
    let mean_b = b.sum() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return Err(MetricError::ZeroVariance);
    }
    Ok(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// 1-based ranks; tied values share the average of the ranks they span.
fn average_ranks(values: ArrayView1<f64>) -> Array1<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));

    let mut ranks = Array1::zeros(values.len());
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end hold ranks start+1..=end
        let rank = (start + 1 + end) as f64 / 2.0;
        for &index in &order[start..end] {
            ranks[index] = rank;
        }
        start = end;
    }
    ranks
}

/// Spearman rank correlation: Pearson correlation of the average ranks.
pub fn spearman(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Result<f64, MetricError> {
    check_pair(a, b)?;
    pearson(average_ranks(a).view(), average_ranks(b).view())
}

/// Indices of the `k` largest values. Ties keep their original order.
fn top_indices(values: ArrayView1<f64>, k: usize) -> HashSet<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
    order[order.len() - k..].iter().copied().collect()
}

/// Share of the truly best `k = max(1, floor(n·r))` samples that also rank in
/// the predicted top `k`.
pub fn top_portion_hit_rate(
    y_true: ArrayView1<f64>,
    y_pred: ArrayView1<f64>,
    r: f64,
) -> Result<f64, MetricError> {
    check_portion(r)?;
    check_pair(y_true, y_pred)?;
    let k = portion_size(y_true.len(), r);
    let hits = top_indices(y_true, k)
        .intersection(&top_indices(y_pred, k))
        .count();
    Ok(hits as f64 / k as f64)
}

/// The hit rate for the lowest `r` portion instead of the highest.
pub fn low_portion_hit_rate(
    y_true: ArrayView1<f64>,
    y_pred: ArrayView1<f64>,
    r: f64,
) -> Result<f64, MetricError> {
    let negated_true = y_true.mapv(|v| -v);
    let negated_pred = y_pred.mapv(|v| -v);
    top_portion_hit_rate(negated_true.view(), negated_pred.view(), r)
}

/// Mean of the largest `max(1, floor(n·r))` values.
pub fn top_mean(values: ArrayView1<f64>, r: f64) -> Result<f64, MetricError> {
    check_portion(r)?;
    if values.is_empty() {
        return Err(MetricError::Empty);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(MetricError::NonFinite);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let k = portion_size(sorted.len(), r);
    Ok(sorted[sorted.len() - k..].iter().sum::<f64>() / k as f64)
}

/// Accuracy summary of one prediction run.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReport {
    /// Repetition and fold indices when the run is part of a resampling scheme.
    pub run: Option<(usize, usize)>,
    pub portion: f64,
    pub pearson: f64,
    pub top_hit_rate: f64,
    pub low_hit_rate: f64,
}

impl MetricReport {
    pub fn compute(
        y_true: ArrayView1<f64>,
        y_pred: ArrayView1<f64>,
        portion: f64,
    ) -> Result<Self, MetricError> {
        Ok(Self {
            run: None,
            portion,
            pearson: pearson(y_true, y_pred)?,
            top_hit_rate: top_portion_hit_rate(y_true, y_pred, portion)?,
            low_hit_rate: low_portion_hit_rate(y_true, y_pred, portion)?,
        })
    }

    pub fn with_run(mut self, repetition: usize, fold: usize) -> Self {
        self.run = Some((repetition, fold));
        self
    }
}

impl fmt::Display for MetricReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((repetition, fold)) = self.run {
            write!(f, "rep {repetition}\tfold {fold}\t")?;
        }
        let percent = (self.portion * 100.0).floor() as u32;
        write!(
            f,
            "Pearson's r {:.4}\tTop {percent}% HR {:.4}\tLow {percent}% HR {:.4}",
            self.pearson, self.top_hit_rate, self.low_hit_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn pearson_of_linear_relations() {
        let a = array![1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(pearson(a.view(), (&a * 2.0 + 1.0).view()).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pearson(a.view(), (-&a).view()).unwrap(), -1.0, epsilon = 1e-12);

        // Centred cross-product 3 over sums of squares 5 and 5.
        let b = array![2.0, 1.0, 4.0, 3.0];
        assert_abs_diff_eq!(pearson(a.view(), b.view()).unwrap(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn pearson_rejects_degenerate_input() {
        let a = array![1.0, 2.0];
        assert_eq!(
            pearson(a.view(), array![1.0].view()),
            Err(MetricError::LengthMismatch { left: 2, right: 1 })
        );
        assert_eq!(
            pearson(a.view(), array![3.0, 3.0].view()),
            Err(MetricError::ZeroVariance)
        );
        let empty = Array1::<f64>::zeros(0);
        assert_eq!(pearson(empty.view(), empty.view()), Err(MetricError::Empty));
        assert_eq!(
            pearson(a.view(), array![f64::NAN, 1.0].view()),
            Err(MetricError::NonFinite)
        );
    }

    #[test]
    fn ties_share_average_ranks() {
        let ranks = average_ranks(array![10.0, 20.0, 10.0, 5.0].view());
        assert_eq!(ranks, array![2.5, 4.0, 2.5, 1.0]);
    }

    #[test]
    fn spearman_is_rank_based() {
        let a = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let b = a.mapv(|v: f64| v.powi(3));
        assert_abs_diff_eq!(spearman(a.view(), b.view()).unwrap(), 1.0, epsilon = 1e-12);

        // Ranks (1,2,3,4) against (2,1,4,3) give 0.6.
        let c = array![0.1, 0.2, 0.3, 0.4];
        let d = array![20.0, 10.0, 400.0, 30.0];
        assert_abs_diff_eq!(spearman(c.view(), d.view()).unwrap(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn hit_rates_on_a_small_ranking() {
        let y_true = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let y_pred = array![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 6.0, 7.0];
        // k = 2: true top {6, 7}, predicted top {5, 7}.
        assert_abs_diff_eq!(top_portion_hit_rate(y_true.view(), y_pred.view(), 0.25).unwrap(), 0.5);
        // Lowest two agree exactly.
        assert_abs_diff_eq!(low_portion_hit_rate(y_true.view(), y_pred.view(), 0.25).unwrap(), 1.0);
    }

    #[test]
    fn hit_rate_always_considers_one_element() {
        let y_true = array![3.0, 1.0, 2.0];
        let y_pred = array![0.9, 0.1, 0.2];
        assert_eq!(top_portion_hit_rate(y_true.view(), y_pred.view(), 0.0), Ok(1.0));
        assert_eq!(
            top_portion_hit_rate(y_true.view(), y_pred.view(), 1.2),
            Err(MetricError::PortionOutOfRange(1.2))
        );
    }

    #[test]
    fn top_mean_uses_the_largest_values() {
        let values = array![5.0, 1.0, 4.0, 2.0, 3.0, 6.0, 0.0, 7.0];
        assert_abs_diff_eq!(top_mean(values.view(), 0.25).unwrap(), 6.5);
        assert_abs_diff_eq!(top_mean(values.view(), 0.0).unwrap(), 7.0);
        assert_abs_diff_eq!(top_mean(values.view(), 1.0).unwrap(), 3.5);
    }

    #[test]
    fn report_formats_every_metric() {
        let y_true = array![1.0, 2.0, 3.0, 4.0];
        let y_pred = array![1.0, 2.0, 4.0, 3.0];
        let report = MetricReport::compute(y_true.view(), y_pred.view(), DEFAULT_PORTION)
            .unwrap()
            .with_run(1, 3);
        assert_abs_diff_eq!(report.pearson, 0.8, epsilon = 1e-12);
        assert_eq!(report.top_hit_rate, 0.0);
        assert_eq!(report.low_hit_rate, 1.0);
        assert_eq!(
            report.to_string(),
            "rep 1\tfold 3\tPearson's r 0.8000\tTop 25% HR 0.0000\tLow 25% HR 1.0000"
        );
    }
}
