//! Run and step-run history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{CorrelationId, DocumentId, RunId, StepRunId};
use crate::status::{RunStatus, StepStatus};

/// One execution of a workflow against a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub document_id: DocumentId,
    pub workflow_name: String,
    pub workflow_version: String,
    pub correlation_id: CorrelationId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The message that aborted the run, if it failed.
    pub error: Option<String>,
}

impl Run {
    /// Apply a forward-only status change.
    pub fn transition(
        &mut self,
        next: RunStatus,
        at: DateTime<Utc>,
        error: Option<String>,
    ) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::illegal_transition(
                format_args!("run {}", self.id),
                self.status,
                next,
            ));
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(at);
        }
        if error.is_some() {
            self.error = error;
        }
        Ok(())
    }
}

/// Execution record of a single step within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRun {
    pub id: StepRunId,
    pub run_id: RunId,
    pub step_name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub diagnostics: Option<String>,
}

impl StepRun {
    pub fn transition(
        &mut self,
        next: StepStatus,
        at: DateTime<Utc>,
        diagnostics: Option<String>,
    ) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::illegal_transition(
                format_args!("step run {} ({})", self.id, self.step_name),
                self.status,
                next,
            ));
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(at);
        }
        if diagnostics.is_some() {
            self.diagnostics = diagnostics;
        }
        Ok(())
    }
}
