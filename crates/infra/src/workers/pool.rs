use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use super::job_worker::{Worker, WorkerConfig, WorkerResources, WorkerStats, WorkerStatsSnapshot};

/// Spawns N independent worker loops sharing one cancellation token.
#[derive(Debug)]
pub struct WorkerPool;

impl WorkerPool {
    pub fn spawn(count: usize, resources: WorkerResources, config: WorkerConfig) -> WorkerPoolHandle {
        let cancel = CancellationToken::new();
        let mut stats = Vec::with_capacity(count);
        let mut tasks = Vec::with_capacity(count);

        for index in 0..count {
            let worker = Worker::new(format!("worker-{index}"), resources.clone(), config.clone());
            stats.push(worker.stats());
            let span = info_span!("worker", name = %worker.name());
            let token = cancel.clone();
            tasks.push(tokio::spawn(
                async move { worker.run(token).await }.instrument(span),
            ));
        }
        info!(workers = count, "worker pool started");

        WorkerPoolHandle {
            cancel,
            stats,
            tasks,
        }
    }
}

/// Handle to stop and join a [`WorkerPool`].
#[derive(Debug)]
pub struct WorkerPoolHandle {
    cancel: CancellationToken,
    stats: Vec<Arc<WorkerStats>>,
    tasks: Vec<JoinHandle<WorkerStatsSnapshot>>,
}

impl WorkerPoolHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Live counters, one entry per worker.
    pub fn stats(&self) -> Vec<WorkerStatsSnapshot> {
        self.stats.iter().map(|s| s.snapshot()).collect()
    }

    /// Token that stops the pool when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every loop and wait for them to finish. Returns final counters.
    pub async fn shutdown(self) -> Vec<WorkerStatsSnapshot> {
        self.cancel.cancel();
        let mut finished = Vec::with_capacity(self.tasks.len());
        for (task, stats) in self.tasks.into_iter().zip(self.stats) {
            match task.await {
                Ok(snapshot) => finished.push(snapshot),
                Err(e) => {
                    error!(error = %e, "worker task ended abnormally");
                    finished.push(stats.snapshot());
                }
            }
        }
        info!("worker pool stopped");
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use docflow_core::{CustomerId, EnqueueRequest, JobStatus, NewDocument};
    use docflow_workflow::{
        InMemoryResultStore, InMemoryRunStore, StepRegistry, WorkflowExecutor, WorkflowRegistry,
        WorkflowStep,
    };

    use crate::documents::{DocumentStore, InMemoryDocumentStore};
    use crate::jobs::{InMemoryJobQueue, JobQueue};
    use crate::steps::EchoStep;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_processes_every_job_once_then_shuts_down() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let steps: Vec<Arc<dyn WorkflowStep>> = vec![Arc::new(EchoStep)];
        let executor = WorkflowExecutor::new(
            Arc::new(WorkflowRegistry::builtin()),
            Arc::new(StepRegistry::new(steps).unwrap()),
            Arc::new(InMemoryRunStore::new()),
            Arc::new(InMemoryResultStore::new()),
        );

        let mut job_ids = Vec::new();
        for i in 0..20 {
            let document_id = documents
                .create(NewDocument {
                    customer_id: CustomerId::new("acme").unwrap(),
                    source: "test".into(),
                    file_name: format!("{i}.txt"),
                    content_type: "text/plain".into(),
                    storage_path: format!("mem://{i}"),
                    content_hash: format!("hash-{i}"),
                    size_bytes: 1,
                })
                .await
                .unwrap()
                .document_id;
            job_ids.push(
                queue
                    .enqueue(EnqueueRequest::new(document_id, "echo", "v1"))
                    .await
                    .unwrap(),
            );
        }

        let pool = WorkerPool::spawn(
            4,
            WorkerResources {
                queue: queue.clone(),
                documents,
                executor: Arc::new(executor),
            },
            WorkerConfig {
                idle_interval: Duration::from_millis(10),
                ..WorkerConfig::default()
            },
        );
        assert_eq!(pool.len(), 4);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let done = pool.stats().iter().map(|s| s.succeeded).sum::<u64>();
            if done == 20 || tokio::time::Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = pool.shutdown().await;
        assert_eq!(stats.iter().map(|s| s.leased).sum::<u64>(), 20);
        assert_eq!(stats.iter().map(|s| s.succeeded).sum::<u64>(), 20);
        for job_id in job_ids {
            let job = queue.get(job_id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Done);
            assert_eq!(job.attempts, 1);
        }
    }
}
