#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Caller contract violations fail the operation.
    #[default]
    Strict,
    /// Caller contract violations are logged, recorded and skipped.
    Hardened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Reject,
    Repair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A categorical value seen in the second scan was never seen in the first.
    UnknownCategory,
    /// The two scans of one table produced a different number of rows.
    RowCountMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractIssue {
    pub kind: IssueKind,
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub mode: RuntimeMode,
    pub action: DecisionAction,
    pub issue: ContractIssue,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceLedger {
    records: Vec<DecisionRecord>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: DecisionRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    #[must_use]
    pub fn repairs(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.action == DecisionAction::Repair)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePolicy {
    pub mode: RuntimeMode,
}

impl RuntimePolicy {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: RuntimeMode::Strict,
        }
    }

    #[must_use]
    pub fn hardened() -> Self {
        Self {
            mode: RuntimeMode::Hardened,
        }
    }

    /// Decide how to handle a caller contract violation and record the
    /// decision in `ledger`.
    pub fn decide(&self, issue: ContractIssue, ledger: &mut EvidenceLedger) -> DecisionAction {
        let action = match self.mode {
            RuntimeMode::Strict => DecisionAction::Reject,
            RuntimeMode::Hardened => {
                tracing::warn!(
                    kind = ?issue.kind,
                    subject = %issue.subject,
                    "repairing contract violation: {}",
                    issue.detail
                );
                DecisionAction::Repair
            }
        };
        ledger.push(DecisionRecord {
            mode: self.mode,
            action,
            issue,
        });
        action
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("execution canceled")]
pub struct Canceled;

/// Shared flag for cooperative cancellation. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }
}

/// Progress sink and cancellation check polled by long-running scans.
pub trait ExecutionMonitor {
    fn check_canceled(&self) -> Result<(), Canceled>;

    /// `fraction` is in `[0, 1]`. `message` is only rendered if someone
    /// looks at it.
    fn set_progress(&mut self, fraction: f64, message: fmt::Arguments<'_>);

    /// A monitor that maps `[0, 1]` onto `[offset, offset + weight]` of this one.
    fn sub_progress(&mut self, offset: f64, weight: f64) -> SubProgress<'_, Self>
    where
        Self: Sized,
    {
        SubProgress {
            parent: self,
            offset,
            weight,
        }
    }
}

impl<M: ExecutionMonitor + ?Sized> ExecutionMonitor for &mut M {
    fn check_canceled(&self) -> Result<(), Canceled> {
        (**self).check_canceled()
    }

    fn set_progress(&mut self, fraction: f64, message: fmt::Arguments<'_>) {
        (**self).set_progress(fraction, message);
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    token: CancellationToken,
    progress: f64,
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            progress: 0.0,
        }
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn progress(&self) -> f64 {
        self.progress
    }
}

impl ExecutionMonitor for ExecutionContext {
    fn check_canceled(&self) -> Result<(), Canceled> {
        if self.token.is_canceled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }

    fn set_progress(&mut self, fraction: f64, message: fmt::Arguments<'_>) {
        self.progress = fraction.clamp(0.0, 1.0);
        tracing::trace!(progress = self.progress, "{message}");
    }
}

#[derive(Debug)]
pub struct SubProgress<'a, M> {
    parent: &'a mut M,
    offset: f64,
    weight: f64,
}

impl<M: ExecutionMonitor> ExecutionMonitor for SubProgress<'_, M> {
    fn check_canceled(&self) -> Result<(), Canceled> {
        self.parent.check_canceled()
    }

    fn set_progress(&mut self, fraction: f64, message: fmt::Arguments<'_>) {
        let scaled = self.offset + self.weight * fraction.clamp(0.0, 1.0);
        self.parent.set_progress(scaled, message);
    }
}
