use super::detect::{ColumnSample, SampledValue};
use super::normalize::NormalizeError;
use polars::prelude::*;
use std::collections::BTreeSet;

/// Typed view over the cells of one genotype column.
pub(crate) enum GenotypeCells {
    /// Integer and float columns, widened to `f64`. `NaN` counts as missing.
    Numeric(Float64Chunked),
    Text(StringChunked),
    /// Every cell is missing, whatever dtype the reader gave the column.
    Missing,
}

impl GenotypeCells {
    pub(crate) fn from_column(column: &Column) -> Result<Self, NormalizeError> {
        match column.dtype() {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64 => {
                let widened = column.cast(&DataType::Float64)?;
                Ok(Self::Numeric(widened.f64()?.clone()))
            }
            DataType::String if column.null_count() == column.len() => Ok(Self::Missing),
            DataType::String => Ok(Self::Text(column.str()?.clone())),
            DataType::Null => Ok(Self::Missing),
            other => Err(NormalizeError::UnsupportedColumnType {
                column: column.name().to_string(),
                dtype: other.to_string(),
            }),
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::Numeric(_) => "numeric",
            Self::Text(_) => "text",
            Self::Missing => "all-missing",
        }
    }

    /// Distinct non-missing values among the first `rows` cells.
    fn distinct_prefix(&self, rows: usize) -> Vec<SampledValue> {
        match self {
            Self::Numeric(values) => {
                let mut seen: Vec<f64> = values
                    .into_iter()
                    .take(rows)
                    .flatten()
                    .filter(|value| !value.is_nan())
                    .collect();
                seen.sort_by(f64::total_cmp);
                seen.dedup();
                seen.into_iter().map(SampledValue::Numeric).collect()
            }
            Self::Text(values) => values
                .into_iter()
                .take(rows)
                .flatten()
                .collect::<BTreeSet<&str>>()
                .into_iter()
                .map(|value| SampledValue::Text(value.to_string()))
                .collect(),
            Self::Missing => Vec::new(),
        }
    }
}

/// Collects, per column, the distinct non-missing values among the first `rows`
/// rows of `table`. This is the input the encoding detector works from.
pub fn sample_columns(table: &DataFrame, rows: usize) -> Result<Vec<ColumnSample>, NormalizeError> {
    table
        .get_columns()
        .iter()
        .map(|column| {
            let cells = GenotypeCells::from_column(column)?;
            Ok(ColumnSample {
                name: column.name().to_string(),
                values: cells.distinct_prefix(rows),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_keeps_distinct_values_from_the_prefix_only() {
        let table = DataFrame::new(vec![
            Series::new("m1".into(), &[Some(1i64), None, Some(1), Some(0), Some(1), Some(2)]).into(),
            Series::new(
                "m2".into(),
                &[Some("AT"), Some("AA"), None, Some("AT"), Some("AA"), Some("GG")],
            )
            .into(),
        ])
        .expect("construct table");

        let samples = sample_columns(&table, 5).expect("sample");
        assert_eq!(samples[0].name, "m1");
        assert_eq!(
            samples[0].values,
            vec![SampledValue::Numeric(0.0), SampledValue::Numeric(1.0)]
        );
        assert_eq!(
            samples[1].values,
            vec![
                SampledValue::Text("AA".to_string()),
                SampledValue::Text("AT".to_string())
            ]
        );
    }

    #[test]
    fn nan_cells_count_as_missing() {
        let table = DataFrame::new(vec![
            Series::new("m1".into(), &[f64::NAN, 1.0, -1.0]).into(),
        ])
        .expect("construct table");
        let samples = sample_columns(&table, 5).expect("sample");
        assert_eq!(
            samples[0].values,
            vec![SampledValue::Numeric(-1.0), SampledValue::Numeric(1.0)]
        );
    }

    #[test]
    fn boolean_columns_are_rejected() {
        let table = DataFrame::new(vec![Series::new("flag".into(), &[true, false]).into()])
            .expect("construct table");
        let err = sample_columns(&table, 5).err().expect("boolean column must fail");
        assert!(matches!(
            err,
            NormalizeError::UnsupportedColumnType { ref column, .. } if column == "flag"
        ));
    }

    #[test]
    fn null_columns_sample_to_nothing() {
        let table = DataFrame::new(vec![Series::new_null("m1".into(), 3).into()])
            .expect("construct table");
        let samples = sample_columns(&table, 5).expect("sample");
        assert!(samples[0].values.is_empty());
    }

    #[test]
    fn all_null_text_columns_count_as_missing() {
        let column: Column = Series::new("m1".into(), &[None::<&str>, None, None]).into();
        assert_eq!(column.dtype(), &DataType::String);
        assert!(matches!(
            GenotypeCells::from_column(&column).expect("classify"),
            GenotypeCells::Missing
        ));

        let partial: Column = Series::new("m2".into(), &[None, Some("AA"), None]).into();
        assert!(matches!(
            GenotypeCells::from_column(&partial).expect("classify"),
            GenotypeCells::Text(_)
        ));
    }
}
