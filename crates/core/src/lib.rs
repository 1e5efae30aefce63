//! `docflow-core`: shared domain model for the document workflow engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the record types persisted by the queue and the executor, their
//! status machines, and the backoff policy used by every retry path.

pub mod document;
pub mod error;
pub mod id;
pub mod job;
pub mod result;
pub mod retry;
pub mod run;
pub mod status;

pub use document::{Document, NewDocument};
pub use error::{DomainError, DomainResult};
pub use id::{CorrelationId, CustomerId, DocumentId, JobId, ResultId, RunId, StepRunId};
pub use job::{EnqueueRequest, Job, JobParams, Lease, LeasedJob};
pub use result::ResultRecord;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use run::{Run, StepRun};
pub use status::{DocumentStatus, JobStatus, RunStatus, StepStatus};
