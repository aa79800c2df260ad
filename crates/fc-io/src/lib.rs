#![forbid(unsafe_code)]

use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use fc_corr::{ColumnKind, CorrelationPair, CorrelationResult};
use fc_table::{Column, DataTable, TableError};
use fc_types::{DType, NullKind, Scalar, TypeError, infer_dtype};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub fn read_csv_path(path: impl AsRef<Path>) -> Result<DataTable, IoError> {
    let input = std::fs::read_to_string(path)?;
    read_csv_str(&input)
}

/// Parse CSV text with a header row into a table. Empty fields are missing.
///
/// Fields parse as integer, then float, then boolean, else text. Numeric and
/// boolean fields widen to a common type, so `1` and `true` in one column
/// read as integers. A column mixing text with any other type is read as
/// text.
pub fn read_csv_str(input: &str) -> Result<DataTable, IoError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(input.as_bytes());

    let headers = reader.headers().cloned().map_err(IoError::from)?;
    if headers.is_empty() {
        return Err(IoError::MissingHeaders);
    }

    let header_count = headers.len();
    let row_hint = input.len() / (header_count * 8).max(1);
    let mut fields: Vec<Vec<String>> = (0..header_count)
        .map(|_| Vec::with_capacity(row_hint))
        .collect();

    for row in reader.records() {
        let record = row?;
        for (idx, column) in fields.iter_mut().enumerate() {
            column.push(record.get(idx).unwrap_or_default().trim().to_owned());
        }
    }

    let mut columns = Vec::with_capacity(header_count);
    for (idx, raw) in fields.into_iter().enumerate() {
        let name = headers.get(idx).unwrap_or_default().to_owned();
        let column = column_from_fields(raw)?;
        tracing::debug!(column = %name, dtype = ?column.dtype(), "read csv column");
        columns.push((name, column));
    }
    Ok(DataTable::new(columns)?)
}

fn column_from_fields(raw: Vec<String>) -> Result<Column, TableError> {
    let values: Vec<Scalar> = raw.iter().map(|field| parse_scalar(field)).collect();
    match infer_dtype(&values) {
        Ok(dtype) => Column::new(dtype, values),
        Err(TypeError::IncompatibleDtypes { .. }) => {
            let text = raw
                .into_iter()
                .map(|field| {
                    if field.is_empty() {
                        Scalar::Null(NullKind::Null)
                    } else {
                        Scalar::Utf8(field)
                    }
                })
                .collect();
            Column::new(DType::Utf8, text)
        }
        Err(err) => Err(err.into()),
    }
}

fn parse_scalar(field: &str) -> Scalar {
    if field.is_empty() {
        return Scalar::Null(NullKind::Null);
    }

    if let Ok(value) = field.parse::<i64>() {
        return Scalar::Int64(value);
    }
    if let Ok(value) = field.parse::<f64>() {
        return Scalar::Float64(value);
    }
    if let Ok(value) = field.parse::<bool>() {
        return Scalar::Bool(value);
    }

    Scalar::Utf8(field.to_owned())
}

/// One line per participating column pair. NaN and absent degrees of
/// freedom are written as empty fields.
pub fn write_pairs_csv(result: &CorrelationResult) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record([
        "first",
        "second",
        "correlation",
        "p_value",
        "degrees_of_freedom",
    ])?;

    for pair in result.pairs() {
        writer.write_record([
            pair.first.as_str(),
            pair.second.as_str(),
            &float_to_csv(pair.correlation),
            &float_to_csv(pair.p_value),
            &pair
                .degrees_of_freedom
                .map_or_else(String::new, |dof| dof.to_string()),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

fn float_to_csv(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Serialize)]
struct ResultDocument<'a> {
    columns: Vec<ColumnEntry<'a>>,
    /// Dense correlation matrix over the participating columns.
    matrix: Vec<Vec<f64>>,
    pairs: Vec<CorrelationPair>,
}

#[derive(Debug, Serialize)]
struct ColumnEntry<'a> {
    name: &'a str,
    kind: ColumnKind,
}

/// Pretty JSON with the participating columns, the dense matrix and the
/// pair listing. NaN is written as `null`.
pub fn write_result_json(result: &CorrelationResult) -> Result<String, IoError> {
    let columns = result
        .participating_columns()
        .into_iter()
        .filter_map(|idx| {
            Some(ColumnEntry {
                name: result.column_names()[idx].as_str(),
                kind: result.kind(idx)?,
            })
        })
        .collect();
    let document = ResultDocument {
        columns,
        matrix: result.correlation_matrix(),
        pairs: result.pairs(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}
