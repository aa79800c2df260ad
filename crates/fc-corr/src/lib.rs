#![forbid(unsafe_code)]

//! Pairwise correlation of the columns of a table.
//!
//! Numeric pairs get the linear correlation coefficient and categorical
//! pairs get Cramér's V, both with a p-value, in one symmetric result. The
//! work happens in two scans of the table; see [`CorrelationComputer`].

mod computer;
mod contingency;
mod result;
mod significance;

use fc_runtime::{Canceled, EvidenceLedger, ExecutionMonitor, RuntimeMode, RuntimePolicy};
use fc_table::{RowSource, Schema};
use fc_types::TypeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use computer::{ConstantColumn, CorrelationComputer, PossibleValues};
pub use contingency::{CategoricalAssociation, ContingencyTable};
pub use result::{CorrelationPair, CorrelationResult};
pub use significance::{chi_squared_p_value, linear_correlation_p_value};

/// Variances below this are treated as zero.
pub const ROUND_ERROR_OK: f64 = 1e-7;
pub const DEFAULT_MAX_POSSIBLE_VALUES: usize = 50;
pub const DEFAULT_MAX_ITEMS_TO_REPORT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Other,
}

impl ColumnKind {
    /// Numeric takes precedence for types that qualify as both.
    #[must_use]
    pub fn classify(dtype: fc_types::DType) -> Self {
        if dtype.is_numeric() {
            Self::Numeric
        } else if dtype.is_nominal() {
            Self::Categorical
        } else {
            Self::Other
        }
    }
}

/// Column kinds of a schema with the numeric and categorical positions in
/// table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnClassification {
    pub kinds: Vec<ColumnKind>,
    pub numeric: Vec<usize>,
    pub categorical: Vec<usize>,
}

impl ColumnClassification {
    #[must_use]
    pub fn from_schema(schema: &Schema) -> Self {
        let kinds: Vec<ColumnKind> = schema
            .columns()
            .iter()
            .map(|spec| ColumnKind::classify(spec.dtype))
            .collect();
        let positions = |wanted: ColumnKind| {
            kinds
                .iter()
                .enumerate()
                .filter(|(_, kind)| **kind == wanted)
                .map(|(idx, _)| idx)
                .collect::<Vec<_>>()
        };
        let numeric = positions(ColumnKind::Numeric);
        let categorical = positions(ColumnKind::Categorical);
        Self {
            kinds,
            numeric,
            categorical,
        }
    }
}

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error(transparent)]
    Canceled(#[from] Canceled),
    #[error("table structure differs from the structure the computer was created for")]
    SchemaMismatch,
    #[error("statistics have not been calculated")]
    StatisticsMissing,
    #[error("second scan returned {actual} rows, expected {expected}")]
    RowCountMismatch { expected: usize, actual: usize },
    #[error("column {column:?} contains value {value} that was not seen in the first scan")]
    UnknownCategory { column: String, value: String },
    #[error("column {column:?}: {source}")]
    Type {
        column: String,
        #[source]
        source: TypeError,
    },
}

impl CorrelationError {
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Categorical columns with more distinct values (missing included) are
    /// left out of the categorical correlation.
    pub max_possible_values: usize,
    pub max_items_to_report: usize,
    pub mode: RuntimeMode,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            max_possible_values: DEFAULT_MAX_POSSIBLE_VALUES,
            max_items_to_report: DEFAULT_MAX_ITEMS_TO_REPORT,
            mode: RuntimeMode::Strict,
        }
    }
}

impl CorrelationConfig {
    #[must_use]
    pub fn policy(&self) -> RuntimePolicy {
        RuntimePolicy { mode: self.mode }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationOutcome {
    pub result: CorrelationResult,
    /// Missing-value and constant-column diagnostics, in that order.
    pub warnings: Vec<String>,
    pub ledger: EvidenceLedger,
}

/// Run both scans over `table` and collect the diagnostics.
///
/// Progress of the first scan is reported in `[0, 0.5]`, the second in
/// `[0.5, 1]`.
pub fn compute_correlation<T, M>(
    table: &T,
    config: &CorrelationConfig,
    monitor: &mut M,
) -> Result<CorrelationOutcome, CorrelationError>
where
    T: RowSource,
    M: ExecutionMonitor,
{
    let mut computer = CorrelationComputer::new(table.schema().clone(), config.max_possible_values)
        .with_policy(config.policy());

    computer.calculate_statistics(table, &mut monitor.sub_progress(0.0, 0.5))?;
    let result = computer.calculate_output(table, &mut monitor.sub_progress(0.5, 0.5))?;

    let warnings: Vec<String> = [
        computer.numeric_missing_value_warning(config.max_items_to_report),
        computer.numeric_constant_column_pairs(config.max_items_to_report),
    ]
    .into_iter()
    .flatten()
    .collect();

    tracing::debug!(
        columns = result.participating_columns().len(),
        warnings = warnings.len(),
        "correlation computed"
    );

    Ok(CorrelationOutcome {
        result,
        warnings,
        ledger: computer.ledger().cloned().unwrap_or_default(),
    })
}
