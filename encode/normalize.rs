//! # Genotype Normalization
//!
//! Converts a genotype table in any supported encoding into the canonical signed
//! matrix used by downstream models: 1 for a reference homozygote, 0 for a
//! heterozygote, -1 for an alternate homozygote. Missing cells stay missing (`NaN`).
//!
//! The lifecycle is two-phase. [`GenotypeNormalizer::fit`] detects the encoding and,
//! for unlabeled allele calls, learns a reference/alternate pair per marker. The
//! result is an immutable [`NormalizerParams`] whose `transform` has no side effects
//! and can be persisted to TOML and applied to future tables.

use super::alleles::{
    AllelePair, ReferenceAlleles, format_allele_set, learn_reference_alleles,
    parse_labeled_alleles,
};
use super::cells::{GenotypeCells, sample_columns};
use super::detect::{DEFAULT_SAMPLE_ROWS, DetectionError, EncodingKind, detect_encoding};
use ndarray::{Array2, ArrayViewMut1};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Settings fixed when a normalizer is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizerConfig {
    /// Only detect the encoding. No column order or allele map is recorded and
    /// `transform` is refused afterwards.
    pub read_only: bool,
    /// Number of leading rows inspected by the encoding detector.
    pub sample_rows: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            sample_rows: DEFAULT_SAMPLE_ROWS,
        }
    }
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(
        "Column '{column}' has type {dtype}, which is not a genotype column type. Genotype columns must hold integers, floats, or strings."
    )]
    UnsupportedColumnType { column: String, dtype: String },
    #[error(
        "Column '{column}' holds {found} cells, but the fitted {encoding} encoding expects {expected} cells."
    )]
    ColumnTypeMismatch {
        column: String,
        encoding: EncodingKind,
        expected: &'static str,
        found: &'static str,
    },
    #[error("The normalizer must be fitted before transforming data.")]
    NotFitted,
    #[error(
        "The normalizer was fitted in read-only mode; it validates encodings but cannot transform data."
    )]
    ReadOnly,
    #[error("Input columns do not match the training data: {0}.")]
    ColumnMismatch(String),
    #[error(
        "Column '{column}' has invalid allele pattern {alleles}. All markers must be biallelic and polymorphic."
    )]
    NotBiallelic { column: String, alleles: String },
    #[error(
        "Column '{column}' contains '{value}', which is not a two-letter allele call over A, C, G, T."
    )]
    InvalidAlleleCall { column: String, value: String },
    #[error("Cannot extract alleles from column name: {0}")]
    MissingAlleleLabel(String),
    #[error("Column name '{0}' labels the same allele as both reference and alternate.")]
    IdenticalLabelAlleles(String),
    #[error("No reference alleles were learned for column '{0}'.")]
    MissingReferenceAlleles(String),
    #[error(
        "Row {row} of column '{column}' holds '{value}', which the {encoding} encoding cannot convert."
    )]
    UnmappableValue {
        column: String,
        row: usize,
        value: String,
        encoding: EncodingKind,
    },
    #[error("Detected {found} encoding, but the normalizer was fitted on {expected} data.")]
    EncodingMismatch {
        expected: EncodingKind,
        found: EncodingKind,
    },
    #[error("Failed to read or write normalizer file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML normalizer file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize normalizer to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Everything `fit` learns from the training table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerParams {
    pub encoding: EncodingKind,
    /// Training column names in order. Transform inputs must match exactly.
    pub columns: Vec<String>,
    /// Per-marker allele assignment, populated only for unlabeled allele calls.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reference_alleles: BTreeMap<String, ReferenceAlleles>,
}

/// How the cells of one column are mapped onto the signed scale.
#[derive(Debug, Clone, Copy)]
enum ColumnConversion {
    Identity,
    ShiftDown,
    Ahb,
    Alleles(ReferenceAlleles),
}

impl ColumnConversion {
    fn expected_cells(self) -> &'static str {
        match self {
            Self::Identity | Self::ShiftDown => "numeric",
            Self::Ahb | Self::Alleles(_) => "text",
        }
    }

    /// Writes the converted cells of one column into `dest`, which arrives filled
    /// with `NaN` so missing cells need no work.
    fn apply(
        self,
        column: &str,
        encoding: EncodingKind,
        cells: &GenotypeCells,
        mut dest: ArrayViewMut1<f64>,
    ) -> Result<(), NormalizeError> {
        let unmappable = |row: usize, value: &str| NormalizeError::UnmappableValue {
            column: column.to_string(),
            row: row + 1,
            value: value.to_string(),
            encoding,
        };

        match (self, cells) {
            (_, GenotypeCells::Missing) => Ok(()),
            (Self::Identity, GenotypeCells::Numeric(values)) => {
                for (slot, value) in dest.iter_mut().zip(values) {
                    *slot = value.unwrap_or(f64::NAN);
                }
                Ok(())
            }
            (Self::ShiftDown, GenotypeCells::Numeric(values)) => {
                for (slot, value) in dest.iter_mut().zip(values) {
                    *slot = value.map_or(f64::NAN, |v| v - 1.0);
                }
                Ok(())
            }
            (Self::Ahb, GenotypeCells::Text(values)) => {
                for (row, (slot, value)) in dest.iter_mut().zip(values).enumerate() {
                    *slot = match value {
                        None => f64::NAN,
                        Some("A") => 1.0,
                        Some("H") => 0.0,
                        Some("B") => -1.0,
                        Some(other) => return Err(unmappable(row, other)),
                    };
                }
                Ok(())
            }
            (Self::Alleles(alleles), GenotypeCells::Text(values)) => {
                for (row, (slot, value)) in dest.iter_mut().zip(values).enumerate() {
                    *slot = match value {
                        None => f64::NAN,
                        Some(text) => AllelePair::parse(text)
                            .and_then(|call| alleles.signed_dosage(call))
                            .ok_or_else(|| unmappable(row, text))?,
                    };
                }
                Ok(())
            }
            (conversion, cells) => Err(NormalizeError::ColumnTypeMismatch {
                column: column.to_string(),
                encoding,
                expected: conversion.expected_cells(),
                found: cells.describe(),
            }),
        }
    }
}

fn labeled_reference_alleles(column: &str) -> Result<ReferenceAlleles, NormalizeError> {
    let (reference, alternate) = parse_labeled_alleles(column)
        .ok_or_else(|| NormalizeError::MissingAlleleLabel(column.to_string()))?;
    if reference == alternate {
        return Err(NormalizeError::IdenticalLabelAlleles(column.to_string()));
    }
    Ok(ReferenceAlleles {
        reference,
        alternate,
    })
}

fn column_names(table: &DataFrame) -> Vec<String> {
    table
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

fn describe_column_mismatch(expected: &[String], found: &[String]) -> String {
    match expected.iter().zip(found).position(|(a, b)| a != b) {
        Some(index) => format!(
            "column {} is '{}' but training had '{}'",
            index + 1,
            found[index],
            expected[index]
        ),
        None if found.len() < expected.len() => format!(
            "expected {} columns, found {}; first missing column is '{}'",
            expected.len(),
            found.len(),
            expected[found.len()]
        ),
        None => format!(
            "expected {} columns, found {}; first extra column is '{}'",
            expected.len(),
            found.len(),
            found[expected.len()]
        ),
    }
}

/// Learns the reference/alternate pair of every column of an unlabeled allele-call
/// table, using all rows rather than the detection sample.
fn learn_allele_map(
    table: &DataFrame,
) -> Result<BTreeMap<String, ReferenceAlleles>, NormalizeError> {
    let mut map = BTreeMap::new();
    for column in table.get_columns() {
        let name = column.name().to_string();
        let calls = match GenotypeCells::from_column(column)? {
            GenotypeCells::Text(values) => {
                let distinct: BTreeSet<&str> = (&values).into_iter().flatten().collect();
                distinct
                    .into_iter()
                    .map(|value| {
                        AllelePair::parse(value).ok_or_else(|| NormalizeError::InvalidAlleleCall {
                            column: name.clone(),
                            value: value.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            GenotypeCells::Missing => Vec::new(),
            GenotypeCells::Numeric(_) => {
                return Err(NormalizeError::ColumnTypeMismatch {
                    column: name,
                    encoding: EncodingKind::AlleleCallUnlabeled,
                    expected: "text",
                    found: "numeric",
                });
            }
        };

        let alleles = learn_reference_alleles(calls).map_err(|observed| {
            NormalizeError::NotBiallelic {
                column: name.clone(),
                alleles: format_allele_set(&observed),
            }
        })?;
        log::debug!("Marker '{name}': reference/alternate {alleles}");
        map.insert(name, alleles);
    }
    Ok(map)
}

impl NormalizerParams {
    /// Converts `table` to the canonical signed matrix.
    ///
    /// The column names must equal the training columns in the same order;
    /// missing, extra, and reordered columns are all rejected.
    pub fn transform(&self, table: &DataFrame) -> Result<Array2<f64>, NormalizeError> {
        let found = column_names(table);
        if found != self.columns {
            return Err(NormalizeError::ColumnMismatch(describe_column_mismatch(
                &self.columns,
                &found,
            )));
        }

        let mut matrix = Array2::from_elem((table.height(), self.columns.len()), f64::NAN);
        for ((name, column), dest) in self
            .columns
            .iter()
            .zip(table.get_columns())
            .zip(matrix.columns_mut())
        {
            let conversion = self.conversion_for(name)?;
            let cells = GenotypeCells::from_column(column)?;
            conversion.apply(name, self.encoding, &cells, dest)?;
        }

        log::debug!(
            "Normalized {} samples x {} markers from {} encoding",
            matrix.nrows(),
            matrix.ncols(),
            self.encoding
        );
        Ok(matrix)
    }

    /// Checks, without touching these parameters, that `table` is encoded the same
    /// way as the training data. Returns the encoding detected in `table`.
    pub fn check_consistent(
        &self,
        table: &DataFrame,
        sample_rows: usize,
    ) -> Result<EncodingKind, NormalizeError> {
        let mut validator = GenotypeNormalizer::new(NormalizerConfig {
            read_only: true,
            sample_rows,
        });
        let found = validator.fit(table)?;
        if found != self.encoding {
            return Err(NormalizeError::EncodingMismatch {
                expected: self.encoding,
                found,
            });
        }
        Ok(found)
    }

    fn conversion_for(&self, column: &str) -> Result<ColumnConversion, NormalizeError> {
        Ok(match self.encoding {
            EncodingKind::SignedNumeric => ColumnConversion::Identity,
            EncodingKind::UnsignedNumeric => ColumnConversion::ShiftDown,
            EncodingKind::AhbCategorical => ColumnConversion::Ahb,
            EncodingKind::AlleleCallLabeled => {
                ColumnConversion::Alleles(labeled_reference_alleles(column)?)
            }
            EncodingKind::AlleleCallUnlabeled => ColumnConversion::Alleles(
                *self
                    .reference_alleles
                    .get(column)
                    .ok_or_else(|| NormalizeError::MissingReferenceAlleles(column.to_string()))?,
            ),
        })
    }

    /// Saves the fitted parameters to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), NormalizeError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads fitted parameters from a TOML file.
    pub fn load(path: &Path) -> Result<Self, NormalizeError> {
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}

/// What a normalizer holds after `fit`.
#[derive(Debug, Clone, PartialEq)]
pub enum FittedState {
    ReadOnly(EncodingKind),
    Trained(NormalizerParams),
}

/// Stateful fit/transform front end over [`NormalizerParams`].
#[derive(Debug, Clone, Default)]
pub struct GenotypeNormalizer {
    config: NormalizerConfig,
    state: Option<FittedState>,
}

impl GenotypeNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Wraps previously fitted parameters, e.g. ones loaded from disk.
    pub fn from_params(params: NormalizerParams) -> Self {
        Self {
            config: NormalizerConfig::default(),
            state: Some(FittedState::Trained(params)),
        }
    }

    /// Detects the encoding of `table` and, unless read-only, records the column
    /// order and any per-marker allele assignment. Any earlier fit is discarded
    /// first, including when this fit fails.
    pub fn fit(&mut self, table: &DataFrame) -> Result<EncodingKind, NormalizeError> {
        self.state = None;

        let samples = sample_columns(table, self.config.sample_rows)?;
        let encoding = detect_encoding(&samples)?;
        log::info!(
            "Detected {encoding} encoding from the first {} rows of {} columns",
            self.config.sample_rows.min(table.height()),
            table.width()
        );

        if self.config.read_only {
            self.state = Some(FittedState::ReadOnly(encoding));
            return Ok(encoding);
        }

        let columns = column_names(table);
        let reference_alleles = match encoding {
            EncodingKind::AlleleCallUnlabeled => learn_allele_map(table)?,
            EncodingKind::AlleleCallLabeled => {
                for column in &columns {
                    labeled_reference_alleles(column)?;
                }
                BTreeMap::new()
            }
            _ => BTreeMap::new(),
        };

        self.state = Some(FittedState::Trained(NormalizerParams {
            encoding,
            columns,
            reference_alleles,
        }));
        Ok(encoding)
    }

    /// Converts `table` with the fitted encoding.
    pub fn transform(&self, table: &DataFrame) -> Result<Array2<f64>, NormalizeError> {
        match &self.state {
            None => Err(NormalizeError::NotFitted),
            Some(FittedState::ReadOnly(_)) => Err(NormalizeError::ReadOnly),
            Some(FittedState::Trained(params)) => params.transform(table),
        }
    }

    pub fn fit_transform(&mut self, table: &DataFrame) -> Result<Array2<f64>, NormalizeError> {
        self.fit(table)?;
        self.transform(table)
    }

    /// The encoding found by the last fit, read-only or not.
    pub fn encoding(&self) -> Option<EncodingKind> {
        match &self.state {
            None => None,
            Some(FittedState::ReadOnly(encoding)) => Some(*encoding),
            Some(FittedState::Trained(params)) => Some(params.encoding),
        }
    }

    /// The fitted parameters, present only after a successful non-read-only fit.
    pub fn params(&self) -> Option<&NormalizerParams> {
        match &self.state {
            Some(FittedState::Trained(params)) => Some(params),
            _ => None,
        }
    }

    pub fn state(&self) -> Option<&FittedState> {
        self.state.as_ref()
    }
}
