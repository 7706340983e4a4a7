//! Heuristic classification of a genotype table's encoding.
//!
//! Detection looks only at a bounded prefix of rows (five by default). A marker
//! whose variation is not visible in that prefix can be misclassified; this is an
//! accepted limitation of the heuristic rather than something to paper over.

use super::alleles::{AllelePair, parse_labeled_alleles};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of leading rows sampled when detecting an encoding.
pub const DEFAULT_SAMPLE_ROWS: usize = 5;

/// The genotype encodings the normalizer understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingKind {
    /// Numeric dosages already on the signed `{-1, 0, 1}` scale.
    SignedNumeric,
    /// Numeric dosages on the `{0, 1, 2}` scale.
    UnsignedNumeric,
    /// Categorical `A` / `H` / `B` calls.
    AhbCategorical,
    /// Two-letter allele calls whose column names carry `_<ref>_<alt>`.
    AlleleCallLabeled,
    /// Two-letter allele calls without allele labels in the column names.
    AlleleCallUnlabeled,
}

impl EncodingKind {
    pub fn describe(self) -> &'static str {
        match self {
            Self::SignedNumeric => "signed numeric {-1, 0, 1}",
            Self::UnsignedNumeric => "unsigned numeric {0, 1, 2}",
            Self::AhbCategorical => "A/H/B categorical",
            Self::AlleleCallLabeled => "labeled allele call",
            Self::AlleleCallUnlabeled => "unlabeled allele call",
        }
    }
}

impl fmt::Display for EncodingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A single distinct, non-missing value seen in the sampled rows of a column.
#[derive(Clone, Debug, PartialEq)]
pub enum SampledValue {
    Numeric(f64),
    Text(String),
}

impl SampledValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Numeric(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Numeric(_) => None,
            Self::Text(value) => Some(value),
        }
    }

    /// Whether this value on its own belongs to at least one supported encoding.
    fn is_recognizable(&self) -> bool {
        match self {
            Self::Numeric(value) => (-1.0..=2.0).contains(value),
            Self::Text(value) => is_ahb(value) || AllelePair::parse(value).is_some(),
        }
    }
}

impl fmt::Display for SampledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// The distinct non-missing values drawn from the leading rows of one column.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSample {
    pub name: String,
    pub values: Vec<SampledValue>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error(
        "Unable to detect genotype encoding: the sampled rows contain no non-missing values."
    )]
    EmptySample,
    #[error(
        "Unable to detect genotype encoding: value '{value}' in column '{column}' matches none of the supported encodings (signed numeric, unsigned numeric, A/H/B, allele call)."
    )]
    UnrecognizedValue { column: String, value: String },
    #[error(
        "Unable to detect genotype encoding: the sampled values mix incompatible encodings ({summary})."
    )]
    MixedEncodings { summary: String },
}

fn is_ahb(value: &str) -> bool {
    matches!(value, "A" | "H" | "B")
}

/// Classifies the encoding of a sampled table.
///
/// Rules are tried in order and the first match wins:
/// 1. every value numeric and within `[-1, 1]` gives [`EncodingKind::SignedNumeric`];
/// 2. every value numeric and within `[0, 2]` gives [`EncodingKind::UnsignedNumeric`];
/// 3. every value one of `A`, `H`, `B` gives [`EncodingKind::AhbCategorical`];
/// 4. every value a two-letter call over `{A, C, G, T}` gives an allele-call encoding,
///    labeled when every column name ends in `_<allele>_<allele>`.
///
/// Anything else is an error; there is no fallback encoding.
pub fn detect_encoding(samples: &[ColumnSample]) -> Result<EncodingKind, DetectionError> {
    let values: Vec<&SampledValue> = samples.iter().flat_map(|s| s.values.iter()).collect();
    if values.is_empty() {
        return Err(DetectionError::EmptySample);
    }

    if let Some(numbers) = values
        .iter()
        .map(|value| value.as_number())
        .collect::<Option<Vec<f64>>>()
    {
        if numbers.iter().all(|value| (-1.0..=1.0).contains(value)) {
            return Ok(EncodingKind::SignedNumeric);
        }
        if numbers.iter().all(|value| (0.0..=2.0).contains(value)) {
            return Ok(EncodingKind::UnsignedNumeric);
        }
    } else if let Some(texts) = values
        .iter()
        .map(|value| value.as_text())
        .collect::<Option<Vec<&str>>>()
    {
        if texts.iter().all(|text| is_ahb(text)) {
            return Ok(EncodingKind::AhbCategorical);
        }
        if texts.iter().all(|text| AllelePair::parse(text).is_some()) {
            let labeled = samples
                .iter()
                .all(|sample| parse_labeled_alleles(&sample.name).is_some());
            return Ok(if labeled {
                EncodingKind::AlleleCallLabeled
            } else {
                EncodingKind::AlleleCallUnlabeled
            });
        }
    }

    Err(unrecognized(samples))
}

fn unrecognized(samples: &[ColumnSample]) -> DetectionError {
    for sample in samples {
        if let Some(value) = sample.values.iter().find(|value| !value.is_recognizable()) {
            return DetectionError::UnrecognizedValue {
                column: sample.name.clone(),
                value: value.to_string(),
            };
        }
    }

    let summary = samples
        .iter()
        .flat_map(|sample| sample.values.iter())
        .map(|value| match value {
            SampledValue::Numeric(_) => "numeric",
            SampledValue::Text(text) if is_ahb(text) => "A/H/B",
            SampledValue::Text(_) => "allele call",
        })
        .sorted_unstable()
        .dedup()
        .join(", ");
    DetectionError::MixedEncodings { summary }
}
