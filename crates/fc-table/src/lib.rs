#![forbid(unsafe_code)]

use std::collections::HashSet;

use fc_types::{DType, Scalar, TypeError, cast_scalar_owned, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packed per-row validity bits of one column (`true` = value present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let len = values.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, value) in values.iter().enumerate() {
            if !value.is_missing() {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Self { words, len }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        // bits past `len` are never set
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn count_missing(&self) -> usize {
        self.len - self.count_valid()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("column {name:?} has {actual} rows, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("duplicate column name {name:?}")]
    DuplicateColumn { name: String },
    #[error("row {row} has {actual} cells, schema has {expected} columns")]
    RowWidthMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Name, dtype and (for nominal columns) the known set of values of a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: DType,
    /// Distinct non-missing values in first-seen order; `None` when unknown
    /// or when the column is not nominal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Vec<Scalar>>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
            domain: None,
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: Vec<Scalar>) -> Self {
        self.domain = Some(domain);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self, TableError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for spec in &columns {
            if !seen.insert(spec.name.as_str()) {
                return Err(TableError::DuplicateColumn {
                    name: spec.name.clone(),
                });
            }
        }
        Ok(Self { columns })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn column(&self, idx: usize) -> Option<&ColumnSpec> {
        self.columns.get(idx)
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|spec| spec.name == name)
    }

    /// Same column names and dtypes in the same order. Domains are ignored.
    #[must_use]
    pub fn equal_structure(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.name == b.name && a.dtype == b.dtype)
    }
}

/// Read access to one row during a scan.
pub trait RowView {
    fn cell(&self, column: usize) -> &Scalar;

    fn is_missing(&self, column: usize) -> bool {
        self.cell(column).is_missing()
    }
}

/// A table that can be scanned front to back any number of times.
///
/// Every scan must yield the same rows in the same order.
pub trait RowSource {
    type Row<'a>: RowView
    where
        Self: 'a;

    fn schema(&self) -> &Schema;

    fn row_count(&self) -> usize;

    fn scan(&self) -> impl Iterator<Item = Self::Row<'_>> + '_;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

impl Column {
    /// Build a column of `dtype`, casting every value into it.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, TableError> {
        let values = values
            .into_iter()
            .map(|value| cast_scalar_owned(value, dtype))
            .collect::<Result<Vec<_>, _>>()?;
        let validity = ValidityMask::from_values(&values);
        Ok(Self {
            dtype,
            values,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, TableError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    /// Distinct non-missing values in first-seen order.
    #[must_use]
    pub fn domain(&self) -> Vec<Scalar> {
        let mut seen = HashSet::new();
        self.values
            .iter()
            .filter(|value| !value.is_missing())
            .filter(|value| seen.insert(value.nominal_key()))
            .cloned()
            .collect()
    }
}

/// Columnar in-memory table.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    schema: Schema,
    columns: Vec<Column>,
    row_count: usize,
}

impl DataTable {
    /// Build a table from named columns. Nominal columns get their domain
    /// attached to the schema.
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self, TableError> {
        let row_count = columns.first().map_or(0, |(_, column)| column.len());
        let mut specs = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        for (name, column) in columns {
            if column.len() != row_count {
                return Err(TableError::LengthMismatch {
                    name,
                    expected: row_count,
                    actual: column.len(),
                });
            }
            let mut spec = ColumnSpec::new(name, column.dtype());
            if column.dtype().is_nominal() {
                spec.domain = Some(column.domain());
            }
            specs.push(spec);
            data.push(column);
        }
        Ok(Self {
            schema: Schema::new(specs)?,
            columns: data,
            row_count,
        })
    }

    /// Build a table from raw values, inferring each column's dtype.
    pub fn from_values<N>(columns: Vec<(N, Vec<Scalar>)>) -> Result<Self, TableError>
    where
        N: Into<String>,
    {
        let columns = columns
            .into_iter()
            .map(|(name, values)| Ok((name.into(), Column::from_values(values)?)))
            .collect::<Result<Vec<_>, TableError>>()?;
        Self::new(columns)
    }

    #[must_use]
    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.schema.position(name).and_then(|idx| self.column(idx))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableRow<'a> {
    table: &'a DataTable,
    position: usize,
}

impl TableRow<'_> {
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }
}

impl RowView for TableRow<'_> {
    fn cell(&self, column: usize) -> &Scalar {
        &self.table.columns[column].values[self.position]
    }

    fn is_missing(&self, column: usize) -> bool {
        !self.table.columns[column].validity.get(self.position)
    }
}

impl RowSource for DataTable {
    type Row<'a> = TableRow<'a>;

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn row_count(&self) -> usize {
        self.row_count
    }

    fn scan(&self) -> impl Iterator<Item = TableRow<'_>> + '_ {
        (0..self.row_count).map(move |position| TableRow {
            table: self,
            position,
        })
    }
}

/// Row-major table against an explicit schema.
#[derive(Debug, Clone, PartialEq)]
pub struct RowTable {
    schema: Schema,
    rows: Vec<Vec<Scalar>>,
}

impl RowTable {
    /// Cells are cast to their column's dtype.
    pub fn new(schema: Schema, rows: Vec<Vec<Scalar>>) -> Result<Self, TableError> {
        let width = schema.len();
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(row, cells)| {
                if cells.len() != width {
                    return Err(TableError::RowWidthMismatch {
                        row,
                        expected: width,
                        actual: cells.len(),
                    });
                }
                cells
                    .into_iter()
                    .zip(schema.columns())
                    .map(|(cell, spec)| cast_scalar_owned(cell, spec.dtype))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(TableError::from)
            })
            .collect::<Result<Vec<_>, TableError>>()?;
        Ok(Self { schema, rows })
    }

    pub fn push_row(&mut self, cells: Vec<Scalar>) -> Result<(), TableError> {
        if cells.len() != self.schema.len() {
            return Err(TableError::RowWidthMismatch {
                row: self.rows.len(),
                expected: self.schema.len(),
                actual: cells.len(),
            });
        }
        let cells = cells
            .into_iter()
            .zip(self.schema.columns())
            .map(|(cell, spec)| cast_scalar_owned(cell, spec.dtype))
            .collect::<Result<Vec<_>, _>>()?;
        self.rows.push(cells);
        Ok(())
    }
}

impl RowView for &[Scalar] {
    fn cell(&self, column: usize) -> &Scalar {
        &self[column]
    }
}

impl RowSource for RowTable {
    type Row<'a> = &'a [Scalar];

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn scan(&self) -> impl Iterator<Item = &[Scalar]> + '_ {
        self.rows.iter().map(Vec::as_slice)
    }
}
