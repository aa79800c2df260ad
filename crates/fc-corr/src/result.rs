use fc_matrix::HalfMatrix;
use serde::{Deserialize, Serialize};

use crate::ColumnKind;

/// Pairwise correlation values and p-values over the columns of one table.
///
/// Both matrices are indexed by the table's column positions. Pairs that
/// could not be computed (mixed kinds, constant columns, excluded nominal
/// columns, too few rows) hold NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    columns: Vec<String>,
    kinds: Vec<ColumnKind>,
    correlations: HalfMatrix<f64>,
    p_values: HalfMatrix<f64>,
    degrees_of_freedom: HalfMatrix<Option<u64>>,
}

/// One row of the pair listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub first: String,
    pub second: String,
    pub correlation: f64,
    pub p_value: f64,
    pub degrees_of_freedom: Option<u64>,
}

impl CorrelationResult {
    pub(crate) fn new(
        columns: Vec<String>,
        kinds: Vec<ColumnKind>,
        correlations: HalfMatrix<f64>,
        p_values: HalfMatrix<f64>,
        degrees_of_freedom: HalfMatrix<Option<u64>>,
    ) -> Self {
        Self {
            columns,
            kinds,
            correlations,
            p_values,
            degrees_of_freedom,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn kind(&self, column: usize) -> Option<ColumnKind> {
        self.kinds.get(column).copied()
    }

    /// Positions of the numeric and categorical columns, in table order.
    #[must_use]
    pub fn participating_columns(&self) -> Vec<usize> {
        self.kinds
            .iter()
            .enumerate()
            .filter(|(_, kind)| **kind != ColumnKind::Other)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Correlation strength of a pair. A participating column has
    /// correlation 1 with itself.
    ///
    /// # Panics
    ///
    /// If either index is not a column of the table.
    #[must_use]
    pub fn correlation(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return match self.kinds[i] {
                ColumnKind::Other => f64::NAN,
                ColumnKind::Numeric | ColumnKind::Categorical => 1.0,
            };
        }
        self.correlations.get(i, j)
    }

    /// # Panics
    ///
    /// If either index is not a column of the table.
    #[must_use]
    pub fn p_value(&self, i: usize, j: usize) -> f64 {
        if i == j {
            assert!(i < self.columns.len(), "column {i} out of range");
            return f64::NAN;
        }
        self.p_values.get(i, j)
    }

    /// `n - 2` for numeric pairs, `(rows - 1) * (cols - 1)` for categorical
    /// pairs, `None` where no test was run.
    ///
    /// # Panics
    ///
    /// If either index is not a column of the table.
    #[must_use]
    pub fn degrees_of_freedom(&self, i: usize, j: usize) -> Option<u64> {
        if i == j {
            assert!(i < self.columns.len(), "column {i} out of range");
            return None;
        }
        self.degrees_of_freedom.get(i, j)
    }

    #[must_use]
    pub fn correlations(&self) -> &HalfMatrix<f64> {
        &self.correlations
    }

    #[must_use]
    pub fn p_values(&self) -> &HalfMatrix<f64> {
        &self.p_values
    }

    /// Dense square matrix over the participating columns.
    #[must_use]
    pub fn correlation_matrix(&self) -> Vec<Vec<f64>> {
        let columns = self.participating_columns();
        columns
            .iter()
            .map(|&i| columns.iter().map(|&j| self.correlation(i, j)).collect())
            .collect()
    }

    /// Every unordered pair of participating columns once, in column order.
    #[must_use]
    pub fn pairs(&self) -> Vec<CorrelationPair> {
        let columns = self.participating_columns();
        let mut pairs = Vec::with_capacity(columns.len() * columns.len().saturating_sub(1) / 2);
        for (pos, &i) in columns.iter().enumerate() {
            for &j in &columns[pos + 1..] {
                pairs.push(CorrelationPair {
                    first: self.columns[i].clone(),
                    second: self.columns[j].clone(),
                    correlation: self.correlations.get(i, j),
                    p_value: self.p_values.get(i, j),
                    degrees_of_freedom: self.degrees_of_freedom.get(i, j),
                });
            }
        }
        pairs
    }
}
