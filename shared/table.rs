//! # Table Files
//!
//! Reads the tab-separated genotype and feature tables handled by the command-line
//! tool and writes numeric matrices back out. Every table has a header row; `NA`
//! marks a missing cell. An optional leading `sample_id` column is set aside on
//! input and written back first on output; without it samples are numbered from 1.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ShapeBuilder};
use polars::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Name of the optional sample identifier column.
pub const SAMPLE_ID_COLUMN: &str = "sample_id";
/// Name of the target column in feature tables.
pub const PHENOTYPE_COLUMN: &str = "phenotype";
/// Cell text that reads and writes as missing.
pub const MISSING_TOKEN: &str = "NA";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Column '{column}' must be numeric but could not be read as numbers (found type: {found}).")]
    ColumnWrongType { column: String, found: String },
    #[error(
        "Missing values were found in the required column '{0}'. This column must be complete."
    )]
    MissingValues(String),
    #[error("Cannot write {values} rows with {labels} labels in '{what}'.")]
    LengthMismatch {
        what: &'static str,
        values: usize,
        labels: usize,
    },
    #[error("Matrix shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// A genotype table with the sample identifiers split off.
#[derive(Debug)]
pub struct GenotypeFile {
    pub sample_ids: Vec<String>,
    /// One column per marker, in file order.
    pub genotypes: DataFrame,
}

/// A numeric feature table, optionally with its phenotype column.
#[derive(Debug)]
pub struct FeatureFile {
    pub sample_ids: Vec<String>,
    pub feature_names: Vec<String>,
    /// Shape: `[n_samples, n_features]`. Missing cells are `NaN`.
    pub features: Array2<f64>,
    pub phenotype: Option<Array1<f64>>,
}

fn read_tsv(path: &Path) -> Result<DataFrame, TableError> {
    log::info!("Loading table from '{}'", path.display());
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(
                    CsvParseOptions::default()
                        .with_separator(b'\t')
                        .with_null_values(Some(NullValues::AllColumnsSingle(
                            MISSING_TOKEN.into(),
                        ))),
                ),
        )
        .finish()?;
    log::debug!("Read {} rows and {} columns", df.height(), df.width());
    Ok(df)
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// Removes `sample_id` from the table if present and returns the identifiers.
fn split_sample_ids(df: DataFrame) -> Result<(Vec<String>, DataFrame), TableError> {
    let n = df.height();
    if !has_column(&df, SAMPLE_ID_COLUMN) {
        return Ok(((1..=n).map(|i| i.to_string()).collect(), df));
    }

    let ids_column = df.column(SAMPLE_ID_COLUMN)?.cast(&DataType::String)?;
    let ids = ids_column
        .str()?
        .into_iter()
        .enumerate()
        .map(|(i, id)| match id {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => (i + 1).to_string(),
        })
        .collect();
    Ok((ids, df.drop(SAMPLE_ID_COLUMN)?))
}

/// Casts a numeric column to `f64`. Nulls become `NaN`; text is rejected unless
/// every cell is missing.
fn numeric_values(column: &Column) -> Result<Vec<f64>, TableError> {
    let wrong_type = || TableError::ColumnWrongType {
        column: column.name().to_string(),
        found: column.dtype().to_string(),
    };
    if column.null_count() == column.len() {
        return Ok(vec![f64::NAN; column.len()]);
    }
    if matches!(column.dtype(), DataType::String | DataType::Boolean) {
        return Err(wrong_type());
    }
    let casted = column.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    if casted.null_count() != column.null_count() {
        return Err(wrong_type());
    }
    Ok(casted
        .f64()?
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect())
}

/// Reads a genotype table. Cell types are left as polars infers them so the
/// normalizer can detect the encoding.
pub fn read_genotype_table(path: &Path) -> Result<GenotypeFile, TableError> {
    let (sample_ids, genotypes) = split_sample_ids(read_tsv(path)?)?;
    log::info!(
        "Genotype table has {} samples and {} markers",
        genotypes.height(),
        genotypes.width()
    );
    Ok(GenotypeFile {
        sample_ids,
        genotypes,
    })
}

/// Reads a numeric feature table. Every column other than `sample_id` and
/// `phenotype` is a feature.
pub fn read_feature_table(path: &Path, require_phenotype: bool) -> Result<FeatureFile, TableError> {
    let (sample_ids, mut df) = split_sample_ids(read_tsv(path)?)?;

    let phenotype = if has_column(&df, PHENOTYPE_COLUMN) {
        let column = df.column(PHENOTYPE_COLUMN)?;
        if column.null_count() > 0 {
            return Err(TableError::MissingValues(PHENOTYPE_COLUMN.to_string()));
        }
        let values = Array1::from_vec(numeric_values(column)?);
        df = df.drop(PHENOTYPE_COLUMN)?;
        Some(values)
    } else if require_phenotype {
        return Err(TableError::ColumnNotFound(PHENOTYPE_COLUMN.to_string()));
    } else {
        None
    };

    let n_samples = df.height();
    let feature_names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    let mut buffer = Vec::with_capacity(n_samples * feature_names.len());
    for column in df.get_columns() {
        buffer.extend(numeric_values(column)?);
    }
    let features = Array2::from_shape_vec((n_samples, feature_names.len()).f(), buffer)?;

    log::info!(
        "Feature table has {n_samples} samples and {} features",
        feature_names.len()
    );
    Ok(FeatureFile {
        sample_ids,
        feature_names,
        features,
        phenotype,
    })
}

/// Writes `matrix` as a tab-separated table with `sample_id` first and an
/// optional trailing phenotype column. `NaN` is written as `NA`.
pub fn write_matrix(
    path: &Path,
    sample_ids: &[String],
    column_names: &[String],
    matrix: ArrayView2<f64>,
    phenotype: Option<ArrayView1<f64>>,
) -> Result<(), TableError> {
    if sample_ids.len() != matrix.nrows() {
        return Err(TableError::LengthMismatch {
            what: SAMPLE_ID_COLUMN,
            values: matrix.nrows(),
            labels: sample_ids.len(),
        });
    }
    if column_names.len() != matrix.ncols() {
        return Err(TableError::LengthMismatch {
            what: "header",
            values: matrix.ncols(),
            labels: column_names.len(),
        });
    }
    if let Some(values) = phenotype {
        if values.len() != matrix.nrows() {
            return Err(TableError::LengthMismatch {
                what: PHENOTYPE_COLUMN,
                values: values.len(),
                labels: sample_ids.len(),
            });
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    let mut buffer = ryu::Buffer::new();
    let mut write_cell = |writer: &mut BufWriter<File>, value: f64| -> std::io::Result<()> {
        writer.write_all(b"\t")?;
        if value.is_nan() {
            writer.write_all(MISSING_TOKEN.as_bytes())
        } else {
            writer.write_all(buffer.format(value).as_bytes())
        }
    };

    write!(writer, "{SAMPLE_ID_COLUMN}")?;
    for name in column_names {
        write!(writer, "\t{name}")?;
    }
    if phenotype.is_some() {
        write!(writer, "\t{PHENOTYPE_COLUMN}")?;
    }
    writeln!(writer)?;

    for (i, (id, row)) in sample_ids.iter().zip(matrix.rows()).enumerate() {
        writer.write_all(id.as_bytes())?;
        for &value in row {
            write_cell(&mut writer, value)?;
        }
        if let Some(values) = phenotype {
            write_cell(&mut writer, values[i])?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    log::info!(
        "Wrote {} x {} matrix to '{}'",
        matrix.nrows(),
        matrix.ncols(),
        path.display()
    );
    Ok(())
}
