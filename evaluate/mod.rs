pub mod metrics;
pub use metrics::{
    DEFAULT_PORTION, MetricError, MetricReport, low_portion_hit_rate, pearson, spearman,
    top_mean, top_portion_hit_rate,
};
