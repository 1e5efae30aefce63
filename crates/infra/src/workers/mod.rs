//! Background job processing.
//!
//! - [`Worker`]: lease a job, resolve its document, run the workflow, acknowledge
//! - [`WorkerPool`]: N workers on tokio tasks behind one cancellation token

pub mod job_worker;
pub mod pool;

pub use job_worker::{
    JobFailurePolicy, PollOutcome, Worker, WorkerConfig, WorkerError, WorkerResources,
    WorkerStats, WorkerStatsSnapshot,
};
pub use pool::{WorkerPool, WorkerPoolHandle};
