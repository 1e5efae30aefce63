use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use docflow_core::{DocumentId, DocumentStatus, JobId, RetryPolicy};
use docflow_workflow::{ExecutionError, ExecutionRequest, WorkflowExecutor};

use crate::documents::{DocumentStore, DocumentStoreError};
use crate::jobs::{JobQueue, QueueError};

/// How executor failures are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobFailurePolicy {
    /// Step retry requests, store errors and cancellation reschedule the job;
    /// everything else fails it.
    #[default]
    RetryOnRequest,
    /// Every failure fails the job.
    AlwaysTerminal,
}

impl JobFailurePolicy {
    /// Delay before the job runs again, or `None` when the failure is terminal.
    pub fn retry_after(
        &self,
        err: &ExecutionError,
        attempts: u32,
        backoff: &RetryPolicy,
    ) -> Option<Duration> {
        if *self == JobFailurePolicy::AlwaysTerminal {
            return None;
        }
        match err {
            ExecutionError::RetryRequested { retry_after, .. } => {
                Some(retry_after.unwrap_or_else(|| backoff.delay_for_attempt(attempts)))
            }
            ExecutionError::Store { .. } | ExecutionError::Cancelled { .. } => {
                Some(backoff.delay_for_attempt(attempts))
            }
            ExecutionError::Configuration { .. }
            | ExecutionError::StepFailed { .. }
            | ExecutionError::StepFault { .. } => None,
        }
    }
}

impl FromStr for JobFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry-on-request" | "retry_on_request" | "retry" => Ok(JobFailurePolicy::RetryOnRequest),
            "terminal" | "always-terminal" | "always_terminal" => Ok(JobFailurePolicy::AlwaysTerminal),
            other => Err(format!("unknown job failure policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Visibility timeout of each lease.
    pub lease: Duration,
    /// Sleep when the queue is empty.
    pub idle_interval: Duration,
    /// Sleep after a loop error.
    pub error_backoff: Duration,
    pub failure_policy: JobFailurePolicy,
    /// Backoff for rescheduled jobs without a retry-after hint.
    pub job_retry_policy: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(120),
            idle_interval: Duration::from_secs(3),
            error_backoff: Duration::from_secs(1),
            failure_policy: JobFailurePolicy::default(),
            job_retry_policy: RetryPolicy::exponential(
                u32::MAX,
                Duration::from_secs(5),
                Duration::from_secs(300),
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Documents(#[from] DocumentStoreError),
}

/// Counters kept by one worker loop.
#[derive(Debug, Default)]
pub struct WorkerStats {
    leased: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    loop_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatsSnapshot {
    pub leased: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub loop_errors: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            leased: self.leased.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            loop_errors: self.loop_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What a single [`Worker::poll_once`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Succeeded(JobId),
    Failed(JobId),
    Retried { job_id: JobId, retry_after: Duration },
}

/// Collaborators shared by every loop of a pool.
#[derive(Clone)]
pub struct WorkerResources {
    pub queue: Arc<dyn JobQueue>,
    pub documents: Arc<dyn DocumentStore>,
    pub executor: Arc<WorkflowExecutor>,
}

/// One lease-execute-acknowledge loop.
pub struct Worker {
    name: String,
    resources: WorkerResources,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(name: impl Into<String>, resources: WorkerResources, config: WorkerConfig) -> Self {
        Self {
            name: name.into(),
            resources,
            config,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Lease at most one job and see it through to acknowledgement.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<PollOutcome, WorkerError> {
        let WorkerResources {
            queue,
            documents,
            executor,
        } = &self.resources;

        let Some(job) = queue.try_lease(self.config.lease).await? else {
            return Ok(PollOutcome::Idle);
        };
        WorkerStats::bump(&self.stats.leased);
        info!(
            worker = %self.name,
            job_id = %job.job_id,
            document_id = %job.document_id,
            workflow = %job.workflow_name,
            version = %job.workflow_version,
            attempts = job.attempts,
            "job leased"
        );

        let Some(document) = documents.get(job.document_id).await? else {
            error!(job_id = %job.job_id, document_id = %job.document_id, "document not found");
            queue
                .acknowledge_failure(job.lease(), "document not found", None)
                .await?;
            WorkerStats::bump(&self.stats.failed);
            return Ok(PollOutcome::Failed(job.job_id));
        };

        self.mark_document(job.document_id, DocumentStatus::Processing).await;

        let request = ExecutionRequest {
            document_id: job.document_id,
            customer_id: document.customer_id,
            workflow_name: job.workflow_name.clone(),
            workflow_version: Some(job.workflow_version.clone()),
            params: job.params.clone(),
        };

        match executor.execute(request, cancel).await {
            Ok(outcome) => {
                queue.acknowledge_success(job.lease()).await?;
                self.mark_document(job.document_id, DocumentStatus::Completed).await;
                WorkerStats::bump(&self.stats.succeeded);
                info!(
                    job_id = %job.job_id,
                    run_id = %outcome.run_id,
                    steps = outcome.steps_executed,
                    "job succeeded"
                );
                Ok(PollOutcome::Succeeded(job.job_id))
            }
            Err(err) => {
                let message = err.to_string();
                let retry_after = self.config.failure_policy.retry_after(
                    &err,
                    job.attempts,
                    &self.config.job_retry_policy,
                );
                queue
                    .acknowledge_failure(job.lease(), &message, retry_after)
                    .await?;

                match retry_after {
                    Some(retry_after) => {
                        WorkerStats::bump(&self.stats.retried);
                        warn!(
                            job_id = %job.job_id,
                            run_id = ?err.run_id(),
                            error = %message,
                            retry_after_ms = retry_after.as_millis() as u64,
                            "job rescheduled"
                        );
                        Ok(PollOutcome::Retried {
                            job_id: job.job_id,
                            retry_after,
                        })
                    }
                    None => {
                        self.mark_document(job.document_id, DocumentStatus::Failed).await;
                        WorkerStats::bump(&self.stats.failed);
                        warn!(
                            job_id = %job.job_id,
                            run_id = ?err.run_id(),
                            error = %message,
                            "job failed"
                        );
                        Ok(PollOutcome::Failed(job.job_id))
                    }
                }
            }
        }
    }

    /// Poll until `cancel` fires. Errors never end the loop.
    pub async fn run(&self, cancel: CancellationToken) -> WorkerStatsSnapshot {
        info!(worker = %self.name, "worker started");
        while !cancel.is_cancelled() {
            match self.poll_once(&cancel).await {
                Ok(PollOutcome::Idle) => pause(&cancel, self.config.idle_interval).await,
                Ok(_) => {}
                Err(e) => {
                    WorkerStats::bump(&self.stats.loop_errors);
                    error!(worker = %self.name, error = %e, "worker loop error");
                    pause(&cancel, self.config.error_backoff).await;
                }
            }
        }
        let stats = self.stats.snapshot();
        info!(worker = %self.name, ?stats, "worker stopped");
        stats
    }

    async fn mark_document(&self, document_id: DocumentId, status: DocumentStatus) {
        if let Err(e) = self.resources.documents.set_status(document_id, status).await {
            warn!(%document_id, %status, error = %e, "failed to record document status");
        }
    }
}

async fn pause(cancel: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => debug!("pause interrupted by shutdown"),
        _ = tokio::time::sleep(duration) => {}
    }
}
