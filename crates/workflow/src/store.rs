//! Storage traits for run history and the result log.
//!
//! ## Ownership
//!
//! A run, its step runs and its results are written only by the executor
//! invocation that created the run. Stores therefore need no cross-writer
//! coordination for these records, but they **must** enforce forward-only
//! status transitions (see `RunStatus::can_transition_to` and
//! `StepStatus::can_transition_to`) and report violations as
//! [`StoreError::InvalidTransition`].
//!
//! ## Result log
//!
//! [`ResultStore::save`] appends. Nothing ever updates or deletes a record.
//! [`ResultStore::get_by_run`] returns records oldest first, so the last
//! matching element is "the most recent result of a type".

use async_trait::async_trait;
use docflow_core::{
    CorrelationId, DocumentId, DomainError, ResultRecord, Run, RunId, StepRun, StepRunId,
};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("storage error: {0}")]
    Backend(String),
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvariantViolation(msg) => StoreError::InvalidTransition(msg),
            DomainError::NotFound(msg) => StoreError::NotFound(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Run and step-run bookkeeping.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a run already in `Running` with `started_at = now`.
    async fn create_run(
        &self,
        document_id: DocumentId,
        workflow_name: &str,
        workflow_version: &str,
        correlation_id: CorrelationId,
    ) -> Result<Run, StoreError>;

    async fn mark_run_succeeded(&self, run_id: RunId) -> Result<(), StoreError>;

    async fn mark_run_failed(&self, run_id: RunId, error: &str) -> Result<(), StoreError>;

    /// Create a step run already in `Running`.
    async fn create_step_run(&self, run_id: RunId, step_name: &str) -> Result<StepRun, StoreError>;

    async fn mark_step_succeeded(&self, step_run_id: StepRunId) -> Result<(), StoreError>;

    async fn mark_step_failed(
        &self,
        step_run_id: StepRunId,
        diagnostics: &str,
    ) -> Result<(), StoreError>;

    async fn get_run(&self, run_id: RunId) -> Result<Option<Run>, StoreError>;

    /// Runs of a document, newest first.
    async fn runs_for_document(&self, document_id: DocumentId) -> Result<Vec<Run>, StoreError>;

    /// Step runs of a run in execution order.
    async fn step_runs(&self, run_id: RunId) -> Result<Vec<StepRun>, StoreError>;
}

/// Append-only log of step outputs.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(
        &self,
        run_id: RunId,
        result_type: &str,
        version: &str,
        payload: serde_json::Value,
    ) -> Result<ResultRecord, StoreError>;

    /// All results of a run, oldest first.
    async fn get_by_run(&self, run_id: RunId) -> Result<Vec<ResultRecord>, StoreError>;

    /// Most recent result of `result_type` (and `version`, if given) in a run.
    /// Matching is case-insensitive.
    async fn latest_in_run(
        &self,
        run_id: RunId,
        result_type: &str,
        version: Option<&str>,
    ) -> Result<Option<ResultRecord>, StoreError> {
        let records = self.get_by_run(run_id).await?;
        Ok(records
            .into_iter()
            .rev()
            .find(|record| record.matches(result_type, version)))
    }
}
