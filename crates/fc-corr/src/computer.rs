use std::collections::HashSet;

use fc_matrix::HalfMatrix;
use fc_runtime::{
    ContractIssue, DecisionAction, EvidenceLedger, ExecutionMonitor, IssueKind, RuntimePolicy,
};
use fc_table::{RowSource, RowView, Schema};
use fc_types::NominalKey;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::contingency::ContingencyTable;
use crate::result::CorrelationResult;
use crate::significance::linear_correlation_p_value;
use crate::{ColumnClassification, CorrelationError, ROUND_ERROR_OK};

/// Observed values of one categorical column.
///
/// Values are indexed densely in order of first occurrence. A column whose
/// number of distinct values exceeds the cap is `Excluded` for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PossibleValues {
    Open(IndexSet<NominalKey>),
    Excluded,
}

impl PossibleValues {
    fn with_capacity(capacity: usize) -> Self {
        Self::Open(IndexSet::with_capacity(capacity))
    }

    fn observe(&mut self, key: NominalKey, max_possible_values: usize) {
        if let Self::Open(values) = self {
            values.insert(key);
            if values.len() > max_possible_values {
                *self = Self::Excluded;
            }
        }
    }

    #[must_use]
    pub fn is_excluded(&self) -> bool {
        matches!(self, Self::Excluded)
    }

    /// Number of distinct values, `None` once excluded.
    #[must_use]
    pub fn cardinality(&self) -> Option<usize> {
        match self {
            Self::Open(values) => Some(values.len()),
            Self::Excluded => None,
        }
    }

    #[must_use]
    pub fn index_of(&self, key: &NominalKey) -> Option<usize> {
        match self {
            Self::Open(values) => values.get_index_of(key),
            Self::Excluded => None,
        }
    }
}

/// A numeric column found to be constant, either everywhere or only on the
/// rows where `given` is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantColumn {
    pub column: usize,
    pub given: Option<usize>,
}

/// Everything the first scan learns. Numeric matrices are indexed by
/// position in the numeric column list.
#[derive(Debug, Clone)]
struct Statistics {
    row_count: usize,
    valid_counts: HalfMatrix<u64>,
    /// `means[i * n + j]`: mean of column i over rows where j is present.
    means: Vec<f64>,
    /// Laid out like `means`.
    stddevs: Vec<f64>,
    possible_values: Vec<PossibleValues>,
    numerics_with_missing: IndexSet<usize>,
}

impl Statistics {
    fn mean(&self, i: usize, j: usize) -> f64 {
        self.means[i * self.valid_counts.size() + j]
    }

    fn stddev(&self, i: usize, j: usize) -> f64 {
        self.stddevs[i * self.valid_counts.size() + j]
    }
}

/// What the second scan leaves behind for inspection.
#[derive(Debug, Clone)]
struct OutputState {
    constant_columns: Vec<ConstantColumn>,
    contingency_tables: HalfMatrix<Option<ContingencyTable>>,
    ledger: EvidenceLedger,
}

/// Two-scan pairwise correlation over numeric and categorical columns.
///
/// Numeric pairs get the linear correlation coefficient over pairwise
/// complete rows; categorical pairs get Cramér's V, with missing treated as
/// a category of its own. Mixed pairs are left NaN.
///
/// Call [`calculate_statistics`](Self::calculate_statistics) and then
/// [`calculate_output`](Self::calculate_output) with the same table. A pass
/// that fails or is canceled discards everything computed so far, so both
/// passes have to be run again.
#[derive(Debug, Clone)]
pub struct CorrelationComputer {
    schema: Schema,
    classification: ColumnClassification,
    max_possible_values: usize,
    policy: RuntimePolicy,
    statistics: Option<Statistics>,
    output: Option<OutputState>,
}

impl CorrelationComputer {
    #[must_use]
    pub fn new(schema: Schema, max_possible_values: usize) -> Self {
        let classification = ColumnClassification::from_schema(&schema);
        Self {
            schema,
            classification,
            max_possible_values,
            policy: RuntimePolicy::default(),
            statistics: None,
            output: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RuntimePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn numeric_columns(&self) -> &[usize] {
        &self.classification.numeric
    }

    #[must_use]
    pub fn categorical_columns(&self) -> &[usize] {
        &self.classification.categorical
    }

    /// First scan: pairwise sums of the numeric columns and the distinct
    /// values of the categorical columns.
    pub fn calculate_statistics<T, M>(
        &mut self,
        table: &T,
        monitor: &mut M,
    ) -> Result<(), CorrelationError>
    where
        T: RowSource,
        M: ExecutionMonitor + ?Sized,
    {
        self.output = None;
        match self.collect_statistics(table, monitor) {
            Ok(statistics) => {
                self.statistics = Some(statistics);
                Ok(())
            }
            Err(err) => {
                self.statistics = None;
                Err(err)
            }
        }
    }

    /// Second scan: standardized cross products of numeric pairs and
    /// contingency tables of categorical pairs, finalized into correlation
    /// values and p-values.
    pub fn calculate_output<T, M>(
        &mut self,
        table: &T,
        monitor: &mut M,
    ) -> Result<CorrelationResult, CorrelationError>
    where
        T: RowSource,
        M: ExecutionMonitor + ?Sized,
    {
        self.output = None;
        match self.build_output(table, monitor) {
            Ok((result, output)) => {
                self.output = Some(output);
                Ok(result)
            }
            Err(err) => {
                if !matches!(err, CorrelationError::StatisticsMissing) {
                    self.statistics = None;
                }
                Err(err)
            }
        }
    }

    fn collect_statistics<T, M>(
        &self,
        table: &T,
        monitor: &mut M,
    ) -> Result<Statistics, CorrelationError>
    where
        T: RowSource,
        M: ExecutionMonitor + ?Sized,
    {
        self.check_structure(table)?;
        let numeric = &self.classification.numeric;
        let categorical = &self.classification.categorical;
        let n = numeric.len();

        // sums[i * n + j]: sum of column i over rows where column j is present
        let mut sums = vec![0.0_f64; n * n];
        let mut sums_sq = vec![0.0_f64; n * n];
        let mut valid_counts = HalfMatrix::new(n, true, 0_u64);
        let mut numerics_with_missing = IndexSet::new();
        let mut possible_values: Vec<PossibleValues> = categorical
            .iter()
            .map(|&col| {
                let known = self.schema.columns()[col]
                    .domain
                    .as_ref()
                    .map_or(0, Vec::len);
                // +1 for the missing category
                PossibleValues::with_capacity(
                    (known + 1).min(self.max_possible_values.saturating_add(1)),
                )
            })
            .collect();

        let row_count = table.row_count();
        let mut cells = vec![None::<f64>; n];
        let mut scanned = 0_usize;
        for row in table.scan() {
            monitor.check_canceled()?;
            self.read_numeric_cells(&row, &mut cells)?;
            for i in 0..n {
                let Some(value) = cells[i] else {
                    numerics_with_missing.insert(numeric[i]);
                    continue;
                };
                let value_sq = value * value;
                for j in 0..n {
                    if cells[j].is_some() {
                        sums[i * n + j] += value;
                        sums_sq[i * n + j] += value_sq;
                        if j >= i {
                            valid_counts.increment(i, j);
                        }
                    }
                }
            }

            for (values, &col) in possible_values.iter_mut().zip(categorical) {
                if !values.is_excluded() {
                    values.observe(row.cell(col).nominal_key(), self.max_possible_values);
                }
            }

            monitor.set_progress(
                scanned as f64 / row_count as f64,
                format_args!("Calculating statistics - {scanned}/{row_count}"),
            );
            scanned += 1;
        }

        let (means, stddevs) = finalize_moments(n, sums, sums_sq, &valid_counts);

        tracing::debug!(
            rows = scanned,
            numeric = n,
            categorical = categorical.len(),
            excluded = possible_values.iter().filter(|v| v.is_excluded()).count(),
            "first correlation scan complete"
        );

        Ok(Statistics {
            row_count: scanned,
            valid_counts,
            means,
            stddevs,
            possible_values,
            numerics_with_missing,
        })
    }

    fn build_output<T, M>(
        &self,
        table: &T,
        monitor: &mut M,
    ) -> Result<(CorrelationResult, OutputState), CorrelationError>
    where
        T: RowSource,
        M: ExecutionMonitor + ?Sized,
    {
        self.check_structure(table)?;
        let stats = self
            .statistics
            .as_ref()
            .ok_or(CorrelationError::StatisticsMissing)?;
        let numeric = &self.classification.numeric;
        let categorical = &self.classification.categorical;
        let mut ledger = EvidenceLedger::new();

        let row_count = table.row_count();
        if row_count != stats.row_count {
            let issue = ContractIssue {
                kind: IssueKind::RowCountMismatch,
                subject: "table".to_owned(),
                detail: format!(
                    "second scan reports {row_count} rows, first scan saw {}",
                    stats.row_count
                ),
            };
            if self.policy.decide(issue, &mut ledger) == DecisionAction::Reject {
                return Err(CorrelationError::RowCountMismatch {
                    expected: stats.row_count,
                    actual: row_count,
                });
            }
        }

        let width = self.schema.len();
        let mut nominators = HalfMatrix::new(width, false, f64::NAN);
        let mut p_values = HalfMatrix::new(width, false, f64::NAN);
        let mut degrees_of_freedom = HalfMatrix::new(width, false, None);
        let constant_columns = self.handle_zero_stddev(stats, &mut nominators);
        let mut contingency_tables = self.init_contingency_tables(stats);

        let mut cells = vec![None::<f64>; numeric.len()];
        let mut category_indices = vec![None::<usize>; categorical.len()];
        let mut reported_unknown = HashSet::new();
        let mut scanned = 0_usize;
        for row in table.scan() {
            monitor.check_canceled()?;
            self.read_numeric_cells(&row, &mut cells)?;
            self.add_row_to_nominators(stats, &cells, &mut nominators);

            for (pos, &col) in categorical.iter().enumerate() {
                let values = &stats.possible_values[pos];
                if values.is_excluded() {
                    category_indices[pos] = None;
                    continue;
                }
                let key = row.cell(col).nominal_key();
                category_indices[pos] = values.index_of(&key);
                if category_indices[pos].is_none() && reported_unknown.insert((pos, key.clone())) {
                    let name = self.column_name(col).to_owned();
                    let issue = ContractIssue {
                        kind: IssueKind::UnknownCategory,
                        subject: name.clone(),
                        detail: format!("value {key} was not seen in the first scan"),
                    };
                    if self.policy.decide(issue, &mut ledger) == DecisionAction::Reject {
                        return Err(CorrelationError::UnknownCategory {
                            column: name,
                            value: key.to_string(),
                        });
                    }
                }
            }
            add_row_to_contingency_tables(&category_indices, &mut contingency_tables);

            monitor.set_progress(
                scanned as f64 / row_count as f64,
                format_args!("Calculating correlation - {scanned}/{row_count}"),
            );
            scanned += 1;
        }

        self.normalize_numeric_correlation(
            stats,
            &mut nominators,
            &mut p_values,
            &mut degrees_of_freedom,
        );
        self.fill_categorical_correlation(
            &contingency_tables,
            &mut nominators,
            &mut p_values,
            &mut degrees_of_freedom,
        );

        tracing::debug!(
            rows = scanned,
            constant = constant_columns.len(),
            repairs = ledger.repairs(),
            "second correlation scan complete"
        );

        let result = CorrelationResult::new(
            self.schema.columns().iter().map(|spec| spec.name.clone()).collect(),
            self.classification.kinds.clone(),
            nominators,
            p_values,
            degrees_of_freedom,
        );
        let output = OutputState {
            constant_columns,
            contingency_tables,
            ledger,
        };
        Ok((result, output))
    }

    /// Number of rows where both numeric columns are present, by table
    /// column position. `None` unless both are numeric and the first scan
    /// has completed.
    #[must_use]
    pub fn valid_count(&self, col_a: usize, col_b: usize) -> Option<u64> {
        let stats = self.statistics.as_ref()?;
        let (a, b) = (self.numeric_position(col_a)?, self.numeric_position(col_b)?);
        Some(stats.valid_counts.get(a, b))
    }

    /// Mean of `column` over the rows where `given` is present.
    #[must_use]
    pub fn pairwise_mean(&self, column: usize, given: usize) -> Option<f64> {
        let stats = self.statistics.as_ref()?;
        Some(stats.mean(self.numeric_position(column)?, self.numeric_position(given)?))
    }

    /// Sample standard deviation of `column` over the rows where `given` is
    /// present.
    #[must_use]
    pub fn pairwise_stddev(&self, column: usize, given: usize) -> Option<f64> {
        let stats = self.statistics.as_ref()?;
        Some(stats.stddev(self.numeric_position(column)?, self.numeric_position(given)?))
    }

    /// Distinct values of a categorical column in index order. `None` if the
    /// column is not categorical, was excluded, or the first scan has not
    /// completed.
    #[must_use]
    pub fn possible_values(&self, column: usize) -> Option<Vec<NominalKey>> {
        let stats = self.statistics.as_ref()?;
        let pos = self.categorical_position(column)?;
        match &stats.possible_values[pos] {
            PossibleValues::Open(values) => Some(values.iter().cloned().collect()),
            PossibleValues::Excluded => None,
        }
    }

    /// Distinct-value counts per categorical column as of the first scan,
    /// keyed by column name. Excluded columns map to `None`.
    #[must_use]
    pub fn categorical_cardinalities(&self) -> IndexMap<String, Option<usize>> {
        let Some(stats) = self.statistics.as_ref() else {
            return IndexMap::new();
        };
        self.classification
            .categorical
            .iter()
            .zip(&stats.possible_values)
            .map(|(&col, values)| (self.column_name(col).to_owned(), values.cardinality()))
            .collect()
    }

    /// Contingency table of two categorical columns from the last completed
    /// second scan. `None` if none was built for the pair.
    #[must_use]
    pub fn contingency_table(&self, col_a: usize, col_b: usize) -> Option<&ContingencyTable> {
        let output = self.output.as_ref()?;
        let (a, b) = (
            self.categorical_position(col_a)?,
            self.categorical_position(col_b)?,
        );
        if a == b {
            return None;
        }
        output.contingency_tables.get_ref(a, b).as_ref()
    }

    /// Numeric columns with at least one missing value, in order of first
    /// occurrence.
    #[must_use]
    pub fn columns_with_missing_values(&self) -> Vec<usize> {
        self.statistics
            .as_ref()
            .map(|stats| stats.numerics_with_missing.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn constant_columns(&self) -> &[ConstantColumn] {
        self.output
            .as_ref()
            .map_or(&[], |output| output.constant_columns.as_slice())
    }

    /// Contract decisions taken during the last completed second scan.
    #[must_use]
    pub fn ledger(&self) -> Option<&EvidenceLedger> {
        self.output.as_ref().map(|output| &output.ledger)
    }

    /// Warning naming the numeric columns that contained missing values, or
    /// `None` if there were none.
    #[must_use]
    pub fn numeric_missing_value_warning(&self, max_items_to_report: usize) -> Option<String> {
        let stats = self.statistics.as_ref()?;
        let items = stats
            .numerics_with_missing
            .iter()
            .map(|&col| format!("\"{}\"", self.column_name(col)))
            .collect::<Vec<_>>();
        format_truncated(
            "Some numeric column(s) contained missing values: ",
            &items,
            max_items_to_report,
        )
    }

    /// Warning naming the numeric columns that are constant, with the
    /// conditioning column where the column is only constant on the rows
    /// where that column is present.
    #[must_use]
    pub fn numeric_constant_column_pairs(&self, max_items_to_report: usize) -> Option<String> {
        let items = self
            .constant_columns()
            .iter()
            .map(|constant| match constant.given {
                None => format!("\"{}\"", self.column_name(constant.column)),
                Some(given) => format!(
                    "\"{}\" (when \"{}\" is not missing)",
                    self.column_name(constant.column),
                    self.column_name(given)
                ),
            })
            .collect::<Vec<_>>();
        format_truncated(
            "Some numeric column(s) have low variance (are constant): ",
            &items,
            max_items_to_report,
        )
    }

    fn check_structure<T: RowSource>(&self, table: &T) -> Result<(), CorrelationError> {
        if table.schema().equal_structure(&self.schema) {
            Ok(())
        } else {
            Err(CorrelationError::SchemaMismatch)
        }
    }

    fn column_name(&self, col: usize) -> &str {
        self.schema.columns()[col].name.as_str()
    }

    fn numeric_position(&self, col: usize) -> Option<usize> {
        self.classification.numeric.iter().position(|&c| c == col)
    }

    fn categorical_position(&self, col: usize) -> Option<usize> {
        self.classification.categorical.iter().position(|&c| c == col)
    }

    fn read_numeric_cells<R: RowView>(
        &self,
        row: &R,
        cells: &mut [Option<f64>],
    ) -> Result<(), CorrelationError> {
        for (slot, &col) in cells.iter_mut().zip(&self.classification.numeric) {
            *slot = if row.is_missing(col) {
                None
            } else {
                let value = row
                    .cell(col)
                    .to_f64()
                    .map_err(|source| CorrelationError::Type {
                        column: self.column_name(col).to_owned(),
                        source,
                    })?;
                Some(value)
            };
        }
        Ok(())
    }

    /// Seeds the nominator matrix: 0 for computable numeric pairs, NaN where
    /// a column is constant, everywhere or conditioned on the other column.
    fn handle_zero_stddev(
        &self,
        stats: &Statistics,
        nominators: &mut HalfMatrix<f64>,
    ) -> Vec<ConstantColumn> {
        let numeric = &self.classification.numeric;
        let mut constant = Vec::new();
        for i in 0..numeric.len() {
            if stats.stddev(i, i) == 0.0 {
                // pairs stay NaN
                constant.push(ConstantColumn {
                    column: numeric[i],
                    given: None,
                });
                continue;
            }
            for j in (i + 1)..numeric.len() {
                let (col_i, col_j) = (numeric[i], numeric[j]);
                nominators.set(col_i, col_j, 0.0);
                if stats.stddev(j, j) == 0.0 {
                    // reported when j becomes the outer column
                    nominators.set(col_i, col_j, f64::NAN);
                    continue;
                }
                if stats.stddev(i, j) == 0.0 {
                    constant.push(ConstantColumn {
                        column: col_i,
                        given: Some(col_j),
                    });
                    nominators.set(col_i, col_j, f64::NAN);
                }
                if stats.stddev(j, i) == 0.0 {
                    constant.push(ConstantColumn {
                        column: col_j,
                        given: Some(col_i),
                    });
                    nominators.set(col_i, col_j, f64::NAN);
                }
            }
        }
        constant
    }

    fn init_contingency_tables(&self, stats: &Statistics) -> HalfMatrix<Option<ContingencyTable>> {
        let count = self.classification.categorical.len();
        let mut tables = HalfMatrix::new(count, false, None);
        for i in 0..count {
            for j in (i + 1)..count {
                let rows = stats.possible_values[i].cardinality();
                let cols = stats.possible_values[j].cardinality();
                if let (Some(rows), Some(cols)) = (rows, cols) {
                    tables.set(i, j, Some(ContingencyTable::new(rows, cols)));
                }
            }
        }
        tables
    }

    fn add_row_to_nominators(
        &self,
        stats: &Statistics,
        cells: &[Option<f64>],
        nominators: &mut HalfMatrix<f64>,
    ) {
        let numeric = &self.classification.numeric;
        for i in 0..numeric.len() {
            let Some(value_i) = cells[i] else {
                continue;
            };
            if stats.stddev(i, i) == 0.0 {
                continue;
            }
            for j in (i + 1)..numeric.len() {
                let Some(value_j) = cells[j] else {
                    continue;
                };
                let stddev_i = stats.stddev(i, j);
                let stddev_j = stats.stddev(j, i);
                if stddev_i == 0.0 || stddev_j == 0.0 {
                    continue;
                }
                let standardized_i = (value_i - stats.mean(i, j)) / stddev_i;
                let standardized_j = (value_j - stats.mean(j, i)) / stddev_j;
                nominators.add(numeric[i], numeric[j], standardized_i * standardized_j);
            }
        }
    }

    fn normalize_numeric_correlation(
        &self,
        stats: &Statistics,
        nominators: &mut HalfMatrix<f64>,
        p_values: &mut HalfMatrix<f64>,
        degrees_of_freedom: &mut HalfMatrix<Option<u64>>,
    ) {
        let numeric = &self.classification.numeric;
        for i in 0..numeric.len() {
            for j in (i + 1)..numeric.len() {
                let (col_i, col_j) = (numeric[i], numeric[j]);
                let nominator = nominators.get(col_i, col_j);
                if nominator.is_nan() {
                    continue;
                }
                let valid_count = stats.valid_counts.get(i, j);
                let r = (nominator / (valid_count - 1) as f64).clamp(-1.0, 1.0);
                nominators.set(col_i, col_j, r);
                p_values.set(col_i, col_j, linear_correlation_p_value(r, valid_count));
                degrees_of_freedom.set(col_i, col_j, Some(valid_count.saturating_sub(2)));
            }
        }
    }

    fn fill_categorical_correlation(
        &self,
        tables: &HalfMatrix<Option<ContingencyTable>>,
        nominators: &mut HalfMatrix<f64>,
        p_values: &mut HalfMatrix<f64>,
        degrees_of_freedom: &mut HalfMatrix<Option<u64>>,
    ) {
        for (i, j, table) in tables.iter_pairs() {
            let (col_i, col_j) = (
                self.classification.categorical[i],
                self.classification.categorical[j],
            );
            match table {
                Some(table) => {
                    let association = table.association();
                    nominators.set(col_i, col_j, association.cramers_v);
                    p_values.set(col_i, col_j, association.p_value);
                    degrees_of_freedom.set(col_i, col_j, Some(association.degrees_of_freedom));
                }
                None => {
                    nominators.set(col_i, col_j, f64::NAN);
                    p_values.set(col_i, col_j, f64::NAN);
                }
            }
        }
    }
}

/// Turns pairwise sums into pairwise means and sample standard deviations,
/// reusing the sum buffers.
fn finalize_moments(
    n: usize,
    sums: Vec<f64>,
    sums_sq: Vec<f64>,
    valid_counts: &HalfMatrix<u64>,
) -> (Vec<f64>, Vec<f64>) {
    let mut means = sums;
    let mut stddevs = sums_sq;
    for i in 0..n {
        for j in 0..n {
            let idx = i * n + j;
            let count = valid_counts.get(i, j);
            if count > 1 {
                let count = count as f64;
                let sum = means[idx];
                let mut variance = (stddevs[idx] - sum * sum / count) / (count - 1.0);
                if variance < ROUND_ERROR_OK {
                    variance = 0.0;
                }
                stddevs[idx] = variance.sqrt();
                means[idx] = sum / count;
            } else {
                stddevs[idx] = 0.0;
                means[idx] = f64::NAN;
            }
        }
    }
    (means, stddevs)
}

fn add_row_to_contingency_tables(
    category_indices: &[Option<usize>],
    tables: &mut HalfMatrix<Option<ContingencyTable>>,
) {
    for i in 0..category_indices.len() {
        let Some(row) = category_indices[i] else {
            continue;
        };
        for j in (i + 1)..category_indices.len() {
            let Some(col) = category_indices[j] else {
                continue;
            };
            if let Some(table) = tables.get_mut(i, j) {
                table.increment(row, col);
            }
        }
    }
}

/// `prefix` followed by at most `max_items` comma separated items and a
/// `<N more>...` marker when truncated.
fn format_truncated(prefix: &str, items: &[String], max_items: usize) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let mut message = String::from(prefix);
    message.push_str(&items[..items.len().min(max_items)].join(", "));
    if items.len() > max_items {
        if max_items > 0 {
            message.push_str(", ");
        }
        message.push_str(&format!("<{} more>...", items.len() - max_items));
    }
    Some(message)
}
