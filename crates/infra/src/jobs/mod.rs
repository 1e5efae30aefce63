//! Durable lease-based job queue.
//!
//! ## Design
//!
//! - A job is `Pending` until a worker leases it.
//! - `try_lease` picks the eligible job with the smallest `next_run_at`. In the
//!   same atomic step it marks the job `Leased`, bumps `attempts`, and pushes
//!   `next_run_at` to the lease deadline.
//! - Eligible means `Pending` or `Leased`, with `next_run_at <= now`. A lease
//!   whose deadline passed is therefore handed out again (visibility timeout).
//! - Acknowledgements only apply to a job that is currently `Leased`, and only
//!   under the lease that was handed out last (the attempt number fences it).
//! - Jobs are never deleted.
//!
//! ## Components
//!
//! - [`JobQueue`]: the queue capability used by intake and the worker loop
//! - [`InMemoryJobQueue`]: one mutex-guarded critical section per operation
//! - [`PostgresJobQueue`]: `UPDATE ... FOR UPDATE SKIP LOCKED ... RETURNING`

pub mod in_memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use docflow_core::{DocumentId, EnqueueRequest, Job, JobId, JobStatus, Lease, LeasedJob};

use crate::db::DbError;

pub use in_memory::InMemoryJobQueue;
pub use postgres::PostgresJobQueue;

/// Default cap on lease attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Appended to `last_error` when a job is failed for exhausting its attempts.
pub const MAX_ATTEMPTS_EXCEEDED: &str = "max attempts exceeded";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {job_id} is not leased (status {status})")]
    NotLeased { job_id: JobId, status: JobStatus },

    /// The job was leased again after this lease expired.
    #[error("lease {attempt} of job {job_id} was superseded by attempt {current}")]
    LeaseLost {
        job_id: JobId,
        attempt: u32,
        current: u32,
    },

    #[error("queue storage error: {0}")]
    Backend(String),
}

impl From<DbError> for QueueError {
    fn from(err: DbError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a `Pending` job runnable immediately.
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, QueueError>;

    /// Lease the next eligible job for `lease`, or `None` if nothing is due.
    async fn try_lease(&self, lease: Duration) -> Result<Option<LeasedJob>, QueueError>;

    /// `Leased -> Done`; clears `last_error`.
    async fn acknowledge_success(&self, lease: Lease) -> Result<(), QueueError>;

    /// With `retry_after` the job goes back to `Pending` at `now + retry_after`,
    /// otherwise it becomes `Failed`. `error` is recorded either way.
    async fn acknowledge_failure(
        &self,
        lease: Lease,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<(), QueueError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError>;

    /// The most recently created job of a document.
    async fn latest_for_document(&self, document_id: DocumentId)
    -> Result<Option<Job>, QueueError>;
}

/// `now + duration`, saturating instead of overflowing.
pub(crate) fn deadline(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn exhausted_error(previous: Option<&str>) -> String {
    match previous {
        Some(previous) if !previous.is_empty() => format!("{previous}; {MAX_ATTEMPTS_EXCEEDED}"),
        _ => MAX_ATTEMPTS_EXCEEDED.to_string(),
    }
}
