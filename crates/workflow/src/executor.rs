//! Drives one workflow run from start to finish.
//!
//! ## Run state machine
//!
//! ```text
//! (resolve definition) --unknown--> ConfigurationError, no run created
//!          |
//!          v
//!       Running --all steps Succeeded/Skipped--> Succeeded
//!          |
//!          +--first Failed / Retry / fault / unknown step / cancel--> Failed
//! ```
//!
//! Steps run strictly in order. The first outcome that is neither `Succeeded`
//! nor `Skipped` stops the run: the step run is marked `Failed`, then the run,
//! and only then is the error returned. Panics inside a step are caught here so
//! that this bookkeeping always completes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use docflow_core::{CorrelationId, CustomerId, DocumentId, JobParams, RunId, StepRunId};
use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::context::{ContextItems, StepContext};
use crate::registry::{DEFAULT_VERSION, WorkflowDefinition, WorkflowRegistry};
use crate::step::{StepOutcome, StepRegistry, StepResult, synthesized_result_type};
use crate::store::{ResultStore, RunStore, StoreError};

/// Input of [`WorkflowExecutor::execute`].
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub document_id: DocumentId,
    pub customer_id: CustomerId,
    pub workflow_name: String,
    /// `None` means the registry default (`v1`).
    pub workflow_version: Option<String>,
    pub params: JobParams,
}

/// A run that completed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub correlation_id: CorrelationId,
    pub steps_executed: usize,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Unknown workflow/version (no run) or unregistered step (run failed).
    #[error("configuration error: {message}")]
    Configuration {
        run_id: Option<RunId>,
        message: String,
    },

    #[error("workflow failed at step {step}: {message}")]
    StepFailed {
        run_id: RunId,
        step: String,
        message: String,
    },

    #[error("retry requested at step {step}: {message}")]
    RetryRequested {
        run_id: RunId,
        step: String,
        message: String,
        retry_after: Option<Duration>,
    },

    /// The step returned an error or panicked.
    #[error("step {step} faulted: {message}")]
    StepFault {
        run_id: RunId,
        step: String,
        message: String,
    },

    #[error("workflow run cancelled")]
    Cancelled { run_id: Option<RunId> },

    #[error("run bookkeeping failed: {source}")]
    Store {
        run_id: Option<RunId>,
        #[source]
        source: StoreError,
    },
}

impl ExecutionError {
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            ExecutionError::Configuration { run_id, .. }
            | ExecutionError::Cancelled { run_id }
            | ExecutionError::Store { run_id, .. } => *run_id,
            ExecutionError::StepFailed { run_id, .. }
            | ExecutionError::RetryRequested { run_id, .. }
            | ExecutionError::StepFault { run_id, .. } => Some(*run_id),
        }
    }

    /// The step's retry-after hint, for `RetryRequested` only.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExecutionError::RetryRequested { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// What happened when a step was invoked, before bookkeeping.
enum Invocation {
    Outcome(StepOutcome),
    Fault(String),
    Cancelled,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn or_default(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

/// Executes workflows against the run and result stores.
#[derive(Clone)]
pub struct WorkflowExecutor {
    workflows: Arc<WorkflowRegistry>,
    steps: Arc<StepRegistry>,
    runs: Arc<dyn RunStore>,
    results: Arc<dyn ResultStore>,
}

impl WorkflowExecutor {
    pub fn new(
        workflows: Arc<WorkflowRegistry>,
        steps: Arc<StepRegistry>,
        runs: Arc<dyn RunStore>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            workflows,
            steps,
            runs,
            results,
        }
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    #[instrument(
        skip_all,
        fields(
            document_id = %request.document_id,
            workflow = %request.workflow_name,
            version = request.workflow_version.as_deref().unwrap_or(DEFAULT_VERSION),
        )
    )]
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ExecutionError> {
        let definition = self
            .workflows
            .get(&request.workflow_name, request.workflow_version.as_deref())
            .map_err(|e| ExecutionError::Configuration {
                run_id: None,
                message: e.to_string(),
            })?;

        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled { run_id: None });
        }

        let correlation_id = CorrelationId::new();
        let run = self
            .runs
            .create_run(
                request.document_id,
                definition.name(),
                definition.version(),
                correlation_id,
            )
            .await
            .map_err(|source| ExecutionError::Store {
                run_id: None,
                source,
            })?;

        info!(
            run_id = %run.id,
            correlation_id = %correlation_id,
            steps = definition.steps().len(),
            "workflow started"
        );

        let mut ctx = StepContext {
            document_id: request.document_id,
            customer_id: request.customer_id,
            workflow_name: definition.name().to_string(),
            workflow_version: definition.version().to_string(),
            correlation_id,
            run_id: run.id,
            items: ContextItems::from(&request.params),
        };

        let started = Instant::now();
        let result = match self.run_steps(&definition, &mut ctx, cancel).await {
            Ok(steps_executed) => self
                .runs
                .mark_run_succeeded(run.id)
                .await
                .map(|()| steps_executed)
                .map_err(|source| ExecutionError::Store {
                    run_id: Some(run.id),
                    source,
                }),
            Err(err) => Err(err),
        };

        match result {
            Ok(steps_executed) => {
                info!(
                    run_id = %run.id,
                    correlation_id = %correlation_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "workflow completed"
                );
                Ok(RunOutcome {
                    run_id: run.id,
                    correlation_id,
                    steps_executed,
                })
            }
            Err(err) => {
                if let Err(mark_err) = self.runs.mark_run_failed(run.id, &err.to_string()).await {
                    error!(run_id = %run.id, error = %mark_err, "failed to record run failure");
                }
                warn!(
                    run_id = %run.id,
                    correlation_id = %correlation_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "workflow failed"
                );
                Err(err)
            }
        }
    }

    async fn run_steps(
        &self,
        definition: &WorkflowDefinition,
        ctx: &mut StepContext,
        cancel: &CancellationToken,
    ) -> Result<usize, ExecutionError> {
        let run_id = ctx.run_id;
        let store_err = |source| ExecutionError::Store {
            run_id: Some(run_id),
            source,
        };

        for (index, step_name) in definition.steps().iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled {
                    run_id: Some(run_id),
                });
            }

            let step = self
                .steps
                .resolve(step_name)
                .ok_or_else(|| ExecutionError::Configuration {
                    run_id: Some(run_id),
                    message: format!("step not registered: {step_name}"),
                })?;

            let step_run = self
                .runs
                .create_step_run(run_id, step_name)
                .await
                .map_err(store_err)?;
            info!(run_id = %run_id, step = %step_name, index, "step started");

            let started = Instant::now();
            let invocation = {
                let call = AssertUnwindSafe(step.execute(ctx, cancel)).catch_unwind();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Invocation::Cancelled,
                    result = call => match result {
                        Ok(Ok(outcome)) => Invocation::Outcome(outcome),
                        Ok(Err(step_error)) => Invocation::Fault(step_error.to_string()),
                        Err(panic) => Invocation::Fault(format!(
                            "step panicked: {}",
                            panic_message(panic.as_ref())
                        )),
                    },
                }
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let outcome = match invocation {
                Invocation::Outcome(outcome) => outcome,
                Invocation::Cancelled => {
                    self.fail_step(step_run.id, step_name, "cancelled").await;
                    return Err(ExecutionError::Cancelled {
                        run_id: Some(run_id),
                    });
                }
                Invocation::Fault(message) => {
                    error!(run_id = %run_id, step = %step_name, error = %message, "step faulted");
                    self.fail_step(step_run.id, step_name, &message).await;
                    return Err(ExecutionError::StepFault {
                        run_id,
                        step: step_name.clone(),
                        message,
                    });
                }
            };

            info!(
                run_id = %run_id,
                step = %step_name,
                outcome = outcome.label(),
                elapsed_ms,
                "step finished"
            );

            match outcome {
                StepOutcome::Succeeded { message, result } => {
                    if let Some(result) = result {
                        let (result_type, version, payload) = match result {
                            StepResult::Typed(envelope) => {
                                (envelope.result_type, envelope.version, envelope.payload)
                            }
                            StepResult::Untyped(payload) => (
                                synthesized_result_type(step_name),
                                DEFAULT_VERSION.to_string(),
                                payload,
                            ),
                        };
                        if let Err(source) = self
                            .results
                            .save(run_id, &result_type, &version, payload)
                            .await
                        {
                            self.fail_step(
                                step_run.id,
                                step_name,
                                &format!("failed to persist {result_type} result: {source}"),
                            )
                            .await;
                            return Err(store_err(source));
                        }
                    }
                    if let Some(message) = message {
                        info!(run_id = %run_id, step = %step_name, message = %message, "step message");
                    }
                    self.runs
                        .mark_step_succeeded(step_run.id)
                        .await
                        .map_err(store_err)?;
                }
                StepOutcome::Skipped => {
                    self.runs
                        .mark_step_succeeded(step_run.id)
                        .await
                        .map_err(store_err)?;
                }
                StepOutcome::Retry {
                    message,
                    retry_after,
                } => {
                    let message = or_default(message, "retry requested");
                    self.fail_step(step_run.id, step_name, &message).await;
                    return Err(ExecutionError::RetryRequested {
                        run_id,
                        step: step_name.clone(),
                        message,
                        retry_after,
                    });
                }
                StepOutcome::Failed { message } => {
                    let message = or_default(message, "failed");
                    self.fail_step(step_run.id, step_name, &message).await;
                    return Err(ExecutionError::StepFailed {
                        run_id,
                        step: step_name.clone(),
                        message,
                    });
                }
            }
        }

        Ok(definition.steps().len())
    }

    /// Record a failed step. A secondary store failure is logged, never raised.
    async fn fail_step(&self, step_run_id: StepRunId, step_name: &str, diagnostics: &str) {
        if let Err(err) = self.runs.mark_step_failed(step_run_id, diagnostics).await {
            error!(
                step_run_id = %step_run_id,
                step = %step_name,
                error = %err,
                "failed to record step failure"
            );
        }
    }
}
