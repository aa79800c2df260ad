#![forbid(unsafe_code)]

//! CSV in, correlation report out.

use std::io::Write;

use fc_corr::CorrelationError;
use fc_report::{OutputFormat, ReportError, ReportOptions, run_csv_report, run_report};
use fc_runtime::ExecutionContext;
use fc_table::DataTable;
use fc_types::Scalar;

const ROSTER: &str = "height,weight,team,shift,flag\n\
                      150,50,red,am,5\n\
                      160,,blue,pm,5\n\
                      170,70,red,am,5\n\
                      180,80,blue,pm,5\n\
                      ,90,green,am,5\n";

fn write_csv(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write csv");
    file.flush().expect("flush csv");
    file
}

#[test]
fn roster_report_has_values_and_diagnostics() {
    let file = write_csv(ROSTER);
    let report = run_csv_report(file.path(), &ReportOptions::default()).expect("report");
    assert_eq!(report.row_count, 5);

    let result = &report.outcome.result;
    assert!((result.correlation(0, 1) - 1.0).abs() < 1e-9);
    assert_eq!(result.degrees_of_freedom(0, 1), Some(1));
    assert!((result.correlation(2, 3) - 1.0).abs() < 1e-9);
    assert_eq!(result.degrees_of_freedom(2, 3), Some(2));
    assert!(result.correlation(0, 4).is_nan());
    assert!(result.correlation(0, 2).is_nan());

    assert_eq!(
        report.outcome.warnings,
        vec![
            "Some numeric column(s) contained missing values: \"weight\", \"height\"".to_owned(),
            "Some numeric column(s) have low variance (are constant): \"flag\"".to_owned(),
        ]
    );
}

#[test]
fn pairs_rendering_lists_every_pair() {
    let file = write_csv(ROSTER);
    let report = run_csv_report(file.path(), &ReportOptions::default()).expect("report");
    let rendered = report.render(OutputFormat::Pairs).expect("render");
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines[0], "first,second,correlation,p_value,degrees_of_freedom");
    // 5 participating columns
    assert_eq!(lines.len(), 1 + 10);
    assert!(lines.contains(&"height,flag,,,"));
    let team_shift = lines
        .iter()
        .find(|line| line.starts_with("team,shift,"))
        .expect("categorical pair listed");
    let fields: Vec<&str> = team_shift.split(',').collect();
    let v: f64 = fields[2].parse().expect("cramers v");
    assert!((v - 1.0).abs() < 1e-9);
    assert_eq!(fields[4], "2");
}

#[test]
fn json_rendering_is_valid() {
    let file = write_csv(ROSTER);
    let options = ReportOptions {
        format: OutputFormat::Json,
        ..ReportOptions::default()
    };
    let report = run_csv_report(file.path(), &options).expect("report");
    let rendered = report.render(options.format).expect("render");
    let value: serde_json::Value = serde_json::from_str(&rendered).expect("json");
    assert_eq!(value["columns"].as_array().map(Vec::len), Some(5));
    assert_eq!(value["columns"][2]["kind"], "categorical");
    assert_eq!(value["pairs"].as_array().map(Vec::len), Some(10));
    assert!(value["pairs"][3]["correlation"].is_null());
}

#[test]
fn possible_value_cap_comes_from_options() {
    let file = write_csv(ROSTER);
    let mut options = ReportOptions::default();
    options.correlation.max_possible_values = 2;
    let report = run_csv_report(file.path(), &options).expect("report");
    assert!(report.outcome.result.correlation(2, 3).is_nan());
}

#[test]
fn constant_list_is_truncated() {
    let file = write_csv("a,b,c,d\n1,1,1,1\n1,1,1,1\n1,1,1,1\n");
    let mut options = ReportOptions::default();
    options.correlation.max_items_to_report = 1;
    let report = run_csv_report(file.path(), &options).expect("report");
    assert_eq!(
        report.outcome.warnings,
        vec!["Some numeric column(s) have low variance (are constant): \"a\", <3 more>...".to_owned()]
    );
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = run_csv_report(dir.path().join("absent.csv"), &ReportOptions::default())
        .expect_err("no such file");
    assert!(matches!(err, ReportError::Io(_)));
}

#[test]
fn canceled_report_fails() {
    let table = DataTable::from_values(vec![
        ("x", vec![Scalar::Float64(1.0), Scalar::Float64(2.0)]),
        ("y", vec![Scalar::Float64(2.0), Scalar::Float64(1.0)]),
    ])
    .expect("table");
    let mut ctx = ExecutionContext::new();
    ctx.token().cancel();
    let err = run_report(&table, &ReportOptions::default(), &mut ctx).expect_err("canceled");
    assert!(matches!(
        err,
        ReportError::Correlation(CorrelationError::Canceled(_))
    ));
}
