pub mod alleles;
pub mod cells;
pub mod detect;
pub mod normalize;
pub use alleles::{AllelePair, Nucleotide, ReferenceAlleles, parse_labeled_alleles};
pub use cells::sample_columns;
pub use detect::{
    ColumnSample, DEFAULT_SAMPLE_ROWS, DetectionError, EncodingKind, SampledValue, detect_encoding,
};
pub use normalize::{
    FittedState, GenotypeNormalizer, NormalizeError, NormalizerConfig, NormalizerParams,
};
