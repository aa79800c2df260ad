#![forbid(unsafe_code)]

//! Correlation reports over CSV files.

use std::path::Path;

use fc_corr::{CorrelationConfig, CorrelationError, CorrelationOutcome, compute_correlation};
use fc_io::{IoError, read_csv_path, write_pairs_csv, write_result_json};
use fc_runtime::{ExecutionContext, ExecutionMonitor};
use fc_table::RowSource;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Pairs,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    pub correlation: CorrelationConfig,
    pub format: OutputFormat,
}

#[derive(Debug, Clone)]
pub struct CorrelationReport {
    pub row_count: usize,
    pub outcome: CorrelationOutcome,
}

impl CorrelationReport {
    pub fn render(&self, format: OutputFormat) -> Result<String, ReportError> {
        let rendered = match format {
            OutputFormat::Pairs => write_pairs_csv(&self.outcome.result)?,
            OutputFormat::Json => write_result_json(&self.outcome.result)?,
        };
        Ok(rendered)
    }
}

pub fn run_report<T, M>(
    table: &T,
    options: &ReportOptions,
    monitor: &mut M,
) -> Result<CorrelationReport, ReportError>
where
    T: RowSource,
    M: ExecutionMonitor,
{
    let outcome = compute_correlation(table, &options.correlation, monitor)?;
    for warning in &outcome.warnings {
        tracing::warn!("{warning}");
    }
    tracing::info!(
        rows = table.row_count(),
        columns = table.schema().len(),
        pairs = outcome.result.pairs().len(),
        repairs = outcome.ledger.repairs(),
        "correlation report ready"
    );
    Ok(CorrelationReport {
        row_count: table.row_count(),
        outcome,
    })
}

pub fn run_csv_report(
    path: impl AsRef<Path>,
    options: &ReportOptions,
) -> Result<CorrelationReport, ReportError> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "reading csv input");
    let table = read_csv_path(path)?;
    run_report(&table, options, &mut ExecutionContext::new())
}
