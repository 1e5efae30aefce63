//! Infrastructure layer: storage, queue, intake, built-in steps, workers, config.
//!
//! Every store comes in two flavours behind one trait: an in-memory version for
//! tests and single-process runs, and a Postgres version (`sqlx`) for
//! persistent deployments.

pub mod blob;
pub mod config;
pub mod db;
pub mod documents;
pub mod intake;
pub mod jobs;
pub mod run_store;
pub mod status;
pub mod steps;
pub mod workers;

pub use blob::{BlobError, BlobStore, InMemoryBlobStore, LocalFileStorage, StoredBlob};
pub use config::{AppConfig, ConfigError};
pub use db::DbError;
pub use documents::{
    DocumentStore, DocumentStoreError, InMemoryDocumentStore, IntakeOutcome, PostgresDocumentStore,
};
pub use intake::{IngestError, IngestReceipt, IngestService, Upload};
pub use jobs::{InMemoryJobQueue, JobQueue, PostgresJobQueue, QueueError};
pub use run_store::{PostgresResultStore, PostgresRunStore};
pub use status::{Download, DocumentStatusView, StatusError, StatusReader};
pub use steps::{StepDependencies, builtin_steps};
pub use workers::{
    JobFailurePolicy, PollOutcome, Worker, WorkerConfig, WorkerError, WorkerPool,
    WorkerPoolHandle, WorkerResources, WorkerStatsSnapshot,
};
