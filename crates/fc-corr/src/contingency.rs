use serde::{Deserialize, Serialize};

use crate::significance::chi_squared_p_value;

/// Joint occurrence counts of the categories of two nominal columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContingencyTable {
    rows: usize,
    cols: usize,
    counts: Vec<u64>,
}

/// Strength and significance of the association in one contingency table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoricalAssociation {
    pub cramers_v: f64,
    pub p_value: f64,
    pub degrees_of_freedom: u64,
}

impl ContingencyTable {
    #[must_use]
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            counts: vec![0; rows * cols],
        }
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.counts[row * self.cols + col]
    }

    pub fn increment(&mut self, row: usize, col: usize) {
        self.counts[row * self.cols + col] += 1;
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Cramér's V with the p-value of the underlying chi-squared test.
    ///
    /// A table with a single row or column has no association: V = 0, p = 1.
    #[must_use]
    pub fn association(&self) -> CategoricalAssociation {
        if self.rows <= 1 || self.cols <= 1 {
            return CategoricalAssociation {
                cramers_v: 0.0,
                p_value: 1.0,
                degrees_of_freedom: 0,
            };
        }

        let mut row_sums = vec![0.0_f64; self.rows];
        let mut col_sums = vec![0.0_f64; self.cols];
        let mut total = 0.0_f64;
        for row in 0..self.rows {
            for col in 0..self.cols {
                let count = self.get(row, col) as f64;
                row_sums[row] += count;
                col_sums[col] += count;
                total += count;
            }
        }

        let mut chi_square = 0.0;
        for (row, row_sum) in row_sums.iter().enumerate() {
            for (col, col_sum) in col_sums.iter().enumerate() {
                let expected = row_sum * col_sum / total;
                // only zero when a category never occurred in this scan
                if expected > 0.0 {
                    let diff = self.get(row, col) as f64 - expected;
                    chi_square += diff * diff / expected;
                }
            }
        }

        let min_dimension = (self.rows.min(self.cols) - 1) as f64;
        let cramers_v = (chi_square / (total * min_dimension)).sqrt().clamp(0.0, 1.0);
        let degrees_of_freedom = (self.rows * self.cols + 1 - (self.rows + self.cols)) as u64;
        CategoricalAssociation {
            cramers_v,
            p_value: chi_squared_p_value(chi_square, degrees_of_freedom),
            degrees_of_freedom,
        }
    }
}
