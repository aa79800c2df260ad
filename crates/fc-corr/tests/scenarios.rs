#![forbid(unsafe_code)]

//! End-to-end scenarios for the two-scan correlation engine.

use std::cell::Cell;
use std::fmt;

use fc_corr::{
    CorrelationComputer, CorrelationConfig, CorrelationError, CorrelationResult, compute_correlation,
};
use fc_runtime::{Canceled, ExecutionContext, ExecutionMonitor};
use fc_table::{Column, DataTable, RowSource};
use fc_types::{DType, NullKind, Scalar};

fn numeric(name: &str, values: &[Option<f64>]) -> (String, Column) {
    let values = values
        .iter()
        .map(|value| value.map_or(Scalar::Null(NullKind::Null), Scalar::Float64))
        .collect();
    (
        name.to_owned(),
        Column::new(DType::Float64, values).expect("numeric column"),
    )
}

fn nominal(name: &str, values: &[Option<&str>]) -> (String, Column) {
    let values = values
        .iter()
        .map(|value| value.map_or(Scalar::Null(NullKind::Null), |v| Scalar::Utf8(v.to_owned())))
        .collect();
    (
        name.to_owned(),
        Column::new(DType::Utf8, values).expect("nominal column"),
    )
}

fn dense(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().copied().map(Some).collect()
}

fn assert_symmetric(result: &CorrelationResult) {
    let width = result.column_names().len();
    for i in 0..width {
        for j in 0..width {
            assert_eq!(
                result.correlation(i, j).to_bits(),
                result.correlation(j, i).to_bits(),
                "correlation ({i}, {j})"
            );
            assert_eq!(
                result.p_value(i, j).to_bits(),
                result.p_value(j, i).to_bits(),
                "p-value ({i}, {j})"
            );
            assert_eq!(
                result.degrees_of_freedom(i, j),
                result.degrees_of_freedom(j, i)
            );
        }
    }
}

/// Counts per-row cancellation checks and cancels once `cancel_at` rows
/// have been let through.
struct CancelAtRow {
    cancel_at: usize,
    checks: Cell<usize>,
    progress: Vec<f64>,
}

impl CancelAtRow {
    fn new(cancel_at: usize) -> Self {
        Self {
            cancel_at,
            checks: Cell::new(0),
            progress: Vec::new(),
        }
    }
}

impl ExecutionMonitor for CancelAtRow {
    fn check_canceled(&self) -> Result<(), Canceled> {
        let checks = self.checks.get();
        self.checks.set(checks + 1);
        if checks >= self.cancel_at {
            Err(Canceled)
        } else {
            Ok(())
        }
    }

    fn set_progress(&mut self, fraction: f64, _message: fmt::Arguments<'_>) {
        self.progress.push(fraction);
    }
}

fn large_table(rows: usize) -> DataTable {
    let x: Vec<Option<f64>> = (0..rows).map(|row| Some(row as f64)).collect();
    let y: Vec<Option<f64>> = (0..rows)
        .map(|row| if row % 7 == 0 { None } else { Some((row % 13) as f64) })
        .collect();
    let labels = ["a", "b", "c"];
    let group: Vec<Option<&str>> = (0..rows).map(|row| Some(labels[row % 3])).collect();
    let parity: Vec<Option<&str>> = (0..rows)
        .map(|row| Some(if row % 2 == 0 { "even" } else { "odd" }))
        .collect();
    DataTable::new(vec![
        numeric("x", &x),
        numeric("y", &y),
        nominal("group", &group),
        nominal("parity", &parity),
    ])
    .expect("table")
}

#[test]
fn pairwise_complete_rows_are_counted_per_pair() {
    let table = DataTable::new(vec![
        numeric("A", &[Some(1.0), None, Some(3.0)]),
        numeric("B", &[Some(4.0), Some(5.0), None]),
    ])
    .expect("table");
    let mut computer = CorrelationComputer::new(table.schema().clone(), 50);
    let mut ctx = ExecutionContext::new();
    computer.calculate_statistics(&table, &mut ctx).expect("statistics");

    assert_eq!(computer.valid_count(0, 1), Some(1));
    assert_eq!(computer.valid_count(0, 0), Some(2));
    assert_eq!(computer.valid_count(1, 1), Some(2));

    let result = computer.calculate_output(&table, &mut ctx).expect("output");
    assert!(result.correlation(0, 1).is_nan());
    assert_eq!(
        computer.numeric_missing_value_warning(10).as_deref(),
        Some("Some numeric column(s) contained missing values: \"A\", \"B\"")
    );
    assert_eq!(
        computer.numeric_constant_column_pairs(10).as_deref(),
        Some(
            "Some numeric column(s) have low variance (are constant): \
             \"A\" (when \"B\" is not missing), \"B\" (when \"A\" is not missing)"
        )
    );
}

#[test]
fn constant_column_is_nan_and_reported() {
    let table = DataTable::new(vec![
        numeric("x", &dense(&[1.0, 2.0, 3.0, 4.0])),
        numeric("c", &dense(&[5.0, 5.0, 5.0, 5.0])),
        numeric("y", &dense(&[2.0, 1.0, 4.0, 3.0])),
        nominal("label", &[Some("p"), Some("q"), Some("p"), Some("q")]),
    ])
    .expect("table");
    let outcome =
        compute_correlation(&table, &CorrelationConfig::default(), &mut ExecutionContext::new())
            .expect("correlation");
    let result = &outcome.result;

    for other in [0, 2, 3] {
        assert!(result.correlation(1, other).is_nan(), "c vs {other}");
        assert!(result.p_value(other, 1).is_nan(), "c vs {other}");
    }
    assert!((result.correlation(0, 2) - 0.6).abs() < 1e-12);
    assert_eq!(
        outcome.warnings,
        vec!["Some numeric column(s) have low variance (are constant): \"c\"".to_owned()]
    );
}

#[test]
fn over_cap_categorical_column_is_excluded() {
    let table = DataTable::new(vec![
        nominal("id", &[Some("a"), Some("b"), Some("c"), Some("d"), Some("e"), Some("f")]),
        nominal("group", &[Some("g1"), Some("g2"), Some("g1"), Some("g2"), Some("g1"), Some("g2")]),
        nominal("kind", &[Some("k1"), Some("k1"), Some("k2"), Some("k2"), None, None]),
    ])
    .expect("table");
    let mut computer = CorrelationComputer::new(table.schema().clone(), 3);
    let mut ctx = ExecutionContext::new();
    computer.calculate_statistics(&table, &mut ctx).expect("statistics");
    assert_eq!(computer.possible_values(0), None);
    assert_eq!(computer.possible_values(2).map(|values| values.len()), Some(3));
    let cardinalities: Vec<(String, Option<usize>)> =
        computer.categorical_cardinalities().into_iter().collect();
    assert_eq!(
        cardinalities,
        vec![
            ("id".to_owned(), None),
            ("group".to_owned(), Some(2)),
            ("kind".to_owned(), Some(3)),
        ]
    );

    let result = computer.calculate_output(&table, &mut ctx).expect("output");
    assert!(result.correlation(0, 1).is_nan());
    assert!(result.correlation(0, 2).is_nan());
    assert!(computer.contingency_table(0, 1).is_none());
    assert!(computer.contingency_table(2, 0).is_none());

    let kept = computer.contingency_table(1, 2).expect("both under the cap");
    assert_eq!((kept.rows(), kept.cols()), (2, 3));
    let v = result.correlation(1, 2);
    assert!((0.0..=1.0).contains(&v), "v={v}");
    assert_eq!(result.degrees_of_freedom(1, 2), Some(2));
}

#[test]
fn unbounded_cap_keeps_every_value() {
    let table = DataTable::new(vec![
        nominal("color", &[Some("red"), Some("blue"), None]),
        nominal("size", &[Some("s"), Some("m"), Some("l")]),
    ])
    .expect("table");
    let mut computer = CorrelationComputer::new(table.schema().clone(), usize::MAX);
    let mut ctx = ExecutionContext::new();
    computer.calculate_statistics(&table, &mut ctx).expect("statistics");
    assert_eq!(computer.possible_values(0).map(|values| values.len()), Some(3));
    assert_eq!(computer.possible_values(1).map(|values| values.len()), Some(3));

    let result = computer.calculate_output(&table, &mut ctx).expect("output");
    assert!(computer.contingency_table(0, 1).is_some());
    assert!(!result.correlation(0, 1).is_nan());
    assert_eq!(result.degrees_of_freedom(0, 1), Some(4));
}

#[test]
fn perfectly_correlated_columns() {
    let table = DataTable::new(vec![
        numeric("a", &dense(&[1.0, 2.0, 3.0, 4.0, 5.0])),
        numeric("b", &dense(&[2.0, 4.0, 6.0, 8.0, 10.0])),
    ])
    .expect("table");
    let outcome =
        compute_correlation(&table, &CorrelationConfig::default(), &mut ExecutionContext::new())
            .expect("correlation");
    let r = outcome.result.correlation(0, 1);
    let p = outcome.result.p_value(0, 1);
    assert!((r - 1.0).abs() < 1e-9, "r={r}");
    assert!(p < 1e-6, "p={p}");
    assert_eq!(outcome.result.degrees_of_freedom(0, 1), Some(3));
    assert!(outcome.warnings.is_empty());
}

#[test]
fn anti_correlated_columns_are_negative() {
    let table = DataTable::new(vec![
        numeric("up", &dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])),
        numeric("down", &dense(&[12.0, 10.0, 8.0, 6.0, 4.0, 2.0])),
    ])
    .expect("table");
    let outcome =
        compute_correlation(&table, &CorrelationConfig::default(), &mut ExecutionContext::new())
            .expect("correlation");
    assert!((outcome.result.correlation(0, 1) + 1.0).abs() < 1e-9);
}

#[test]
fn every_matrix_is_symmetric() {
    let table = large_table(200);
    let outcome =
        compute_correlation(&table, &CorrelationConfig::default(), &mut ExecutionContext::new())
            .expect("correlation");
    assert_symmetric(&outcome.result);

    let matrix = outcome.result.correlation_matrix();
    assert_eq!(matrix.len(), 4);
    for (i, row) in matrix.iter().enumerate() {
        assert_eq!(row[i], 1.0);
        for (j, value) in row.iter().enumerate() {
            assert_eq!(value.to_bits(), matrix[j][i].to_bits());
        }
    }
}

#[test]
fn repeated_runs_are_bit_identical() {
    let table = large_table(500);
    let mut computer = CorrelationComputer::new(table.schema().clone(), 50);
    let mut ctx = ExecutionContext::new();

    computer.calculate_statistics(&table, &mut ctx).expect("statistics");
    let first = computer.calculate_output(&table, &mut ctx).expect("output");
    computer.calculate_statistics(&table, &mut ctx).expect("statistics");
    let second = computer.calculate_output(&table, &mut ctx).expect("output");

    let bits = |result: &CorrelationResult| {
        result
            .pairs()
            .into_iter()
            .map(|pair| (pair.correlation.to_bits(), pair.p_value.to_bits(), pair.degrees_of_freedom))
            .collect::<Vec<_>>()
    };
    assert_eq!(bits(&first), bits(&second));
}

#[test]
fn canceled_first_scan_exposes_nothing() {
    let table = large_table(10_000);
    let mut computer = CorrelationComputer::new(table.schema().clone(), 50);
    let mut ctx = ExecutionContext::new();
    computer.calculate_statistics(&table, &mut ctx).expect("statistics");
    computer.calculate_output(&table, &mut ctx).expect("output");
    assert!(computer.contingency_table(2, 3).is_some());

    let mut monitor = CancelAtRow::new(5_000);
    let err = computer
        .calculate_statistics(&table, &mut monitor)
        .expect_err("canceled");
    assert!(err.is_canceled());
    assert_eq!(monitor.checks.get(), 5_001);
    assert_eq!(monitor.progress.len(), 5_000);

    assert_eq!(computer.valid_count(0, 1), None);
    assert_eq!(computer.pairwise_mean(0, 1), None);
    assert_eq!(computer.possible_values(2), None);
    assert!(computer.contingency_table(2, 3).is_none());
    assert!(computer.constant_columns().is_empty());
    assert!(computer.columns_with_missing_values().is_empty());
    assert!(computer.numeric_missing_value_warning(10).is_none());

    let err = computer
        .calculate_output(&table, &mut ctx)
        .expect_err("both scans have to run again");
    assert!(matches!(err, CorrelationError::StatisticsMissing));
}

#[test]
fn canceled_second_scan_discards_statistics() {
    let table = large_table(10_000);
    let mut computer = CorrelationComputer::new(table.schema().clone(), 50);
    computer
        .calculate_statistics(&table, &mut ExecutionContext::new())
        .expect("statistics");

    let mut monitor = CancelAtRow::new(5_000);
    let err = computer
        .calculate_output(&table, &mut monitor)
        .expect_err("canceled");
    assert!(matches!(err, CorrelationError::Canceled(_)));
    assert_eq!(computer.valid_count(0, 1), None);
    assert!(computer.contingency_table(2, 3).is_none());
    assert!(computer.ledger().is_none());
}

#[test]
fn progress_is_monotonic_across_both_scans() {
    let table = large_table(100);
    let mut monitor = CancelAtRow::new(usize::MAX);
    compute_correlation(&table, &CorrelationConfig::default(), &mut monitor)
        .expect("correlation");

    assert_eq!(monitor.progress.len(), 200);
    assert!(monitor.progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(monitor.progress[..100].iter().all(|&p| p < 0.5));
    assert!(monitor.progress[100..].iter().all(|&p| (0.5..1.0).contains(&p)));
}

#[test]
fn missing_warning_is_truncated() {
    let columns = (0..5)
        .map(|idx| numeric(&format!("n{idx}"), &[None, Some(1.0), Some(2.0)]))
        .collect();
    let table = DataTable::new(columns).expect("table");
    let config = CorrelationConfig {
        max_items_to_report: 2,
        ..CorrelationConfig::default()
    };
    let outcome = compute_correlation(&table, &config, &mut ExecutionContext::new())
        .expect("correlation");
    assert_eq!(
        outcome.warnings[0],
        "Some numeric column(s) contained missing values: \"n0\", \"n1\", <3 more>..."
    );
    assert!((outcome.result.correlation(0, 4) - 1.0).abs() < 1e-9);
    assert!(outcome.result.p_value(0, 4).is_nan());
}
