//! In-memory job queue for tests/dev.
//!
//! Every operation runs inside one `Mutex` critical section, which is what
//! makes a lease exclusive here.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use docflow_core::{DocumentId, EnqueueRequest, Job, JobId, JobStatus, Lease, LeasedJob};

use super::{DEFAULT_MAX_ATTEMPTS, JobQueue, QueueError, deadline, exhausted_error};

#[derive(Debug)]
pub struct InMemoryJobQueue {
    jobs: Mutex<HashMap<JobId, Job>>,
    max_attempts: Option<u32>,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }

    /// `None` lets a job be leased any number of times.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Snapshot of every job, oldest first.
    pub fn jobs(&self) -> Result<Vec<Job>, QueueError> {
        let mut jobs: Vec<_> = self.lock()?.values().cloned().collect();
        jobs.sort_by_key(|job| (job.created_at, *job.id.as_uuid()));
        Ok(jobs)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<JobId, Job>>, QueueError> {
        self.jobs
            .lock()
            .map_err(|_| QueueError::Backend("lock poisoned".to_string()))
    }

    fn leased_mut(jobs: &mut HashMap<JobId, Job>, lease: Lease) -> Result<&mut Job, QueueError> {
        let job_id = lease.job_id;
        let job = jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        if job.status != JobStatus::Leased {
            return Err(QueueError::NotLeased {
                job_id,
                status: job.status,
            });
        }
        if job.attempts != lease.attempt {
            return Err(QueueError::LeaseLost {
                job_id,
                attempt: lease.attempt,
                current: job.attempts,
            });
        }
        Ok(job)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, QueueError> {
        let job = Job::from_request(request, Utc::now());
        let id = job.id;
        debug!(job_id = %id, workflow = %job.workflow_name, "job enqueued");
        self.lock()?.insert(id, job);
        Ok(id)
    }

    async fn try_lease(&self, lease: Duration) -> Result<Option<LeasedJob>, QueueError> {
        let now = Utc::now();
        let mut jobs = self.lock()?;

        if let Some(max) = self.max_attempts {
            for job in jobs
                .values_mut()
                .filter(|job| job.is_eligible(now) && job.attempts >= max)
            {
                warn!(job_id = %job.id, attempts = job.attempts, "job exhausted its attempts");
                job.status = JobStatus::Failed;
                job.finished_at = Some(now);
                job.last_error = Some(exhausted_error(job.last_error.as_deref()));
            }
        }

        let next = jobs
            .values_mut()
            .filter(|job| job.is_eligible(now))
            .min_by_key(|job| (job.next_run_at, job.created_at, *job.id.as_uuid()));

        Ok(next.map(|job| {
            job.status = JobStatus::Leased;
            job.attempts += 1;
            job.next_run_at = deadline(now, lease);
            job.to_lease()
        }))
    }

    async fn acknowledge_success(&self, lease: Lease) -> Result<(), QueueError> {
        let mut jobs = self.lock()?;
        let job = Self::leased_mut(&mut jobs, lease)?;
        job.status = JobStatus::Done;
        job.finished_at = Some(Utc::now());
        job.last_error = None;
        Ok(())
    }

    async fn acknowledge_failure(
        &self,
        lease: Lease,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<(), QueueError> {
        let now = Utc::now();
        let mut jobs = self.lock()?;
        let job = Self::leased_mut(&mut jobs, lease)?;
        job.last_error = Some(error.to_string());
        match retry_after {
            Some(delay) => {
                job.status = JobStatus::Pending;
                job.next_run_at = deadline(now, delay);
            }
            None => {
                job.status = JobStatus::Failed;
                job.finished_at = Some(now);
            }
        }
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.lock()?.get(&job_id).cloned())
    }

    async fn latest_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<Job>, QueueError> {
        Ok(self
            .lock()?
            .values()
            .filter(|job| job.document_id == document_id)
            .max_by_key(|job| (job.created_at, *job.id.as_uuid()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    const LEASE: Duration = Duration::from_secs(60);

    fn request() -> EnqueueRequest {
        EnqueueRequest::new(DocumentId::new(), "echo", "v1")
    }

    #[tokio::test]
    async fn lease_marks_job_and_counts_attempts() {
        let queue = InMemoryJobQueue::new();
        let id = queue
            .enqueue(request().with_param("source", "api"))
            .await
            .unwrap();

        let lease = queue.try_lease(LEASE).await.unwrap().unwrap();
        assert_eq!(lease.job_id, id);
        assert_eq!(lease.attempts, 1);
        assert_eq!(lease.params.get("source").map(String::as_str), Some("api"));

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Leased);
        assert!(job.next_run_at > Utc::now() + chrono::Duration::seconds(50));

        assert!(queue.try_lease(LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oldest_due_job_is_leased_first() {
        let queue = InMemoryJobQueue::new();
        let first = queue.enqueue(request()).await.unwrap();
        let second = queue.enqueue(request()).await.unwrap();

        assert_eq!(queue.try_lease(LEASE).await.unwrap().unwrap().job_id, first);
        assert_eq!(queue.try_lease(LEASE).await.unwrap().unwrap().job_id, second);
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(request()).await.unwrap();
        let lease = Duration::from_millis(150);

        assert!(queue.try_lease(lease).await.unwrap().is_some());
        assert!(queue.try_lease(lease).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(250)).await;
        let again = queue.try_lease(lease).await.unwrap().unwrap();
        assert_eq!(again.job_id, id);
        assert_eq!(again.attempts, 2);
    }

    async fn lease(queue: &InMemoryJobQueue) -> Lease {
        queue.try_lease(LEASE).await.unwrap().unwrap().lease()
    }

    #[tokio::test]
    async fn success_is_terminal_and_clears_error() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(request()).await.unwrap();
        let first = lease(&queue).await;
        queue
            .acknowledge_failure(first, "flaky", Some(Duration::ZERO))
            .await
            .unwrap();
        let second = lease(&queue).await;
        queue.acknowledge_success(second).await.unwrap();

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.finished_at.is_some());
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn failure_with_retry_reschedules() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(request()).await.unwrap();
        let leased = lease(&queue).await;

        let before = Utc::now();
        queue
            .acknowledge_failure(leased, "rate limited", Some(Duration::from_secs(30)))
            .await
            .unwrap();

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.last_error.as_deref(), Some("rate limited"));
        assert!(job.next_run_at >= before + chrono::Duration::seconds(30));
        assert!(job.finished_at.is_none());
        assert!(queue.try_lease(LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_without_retry_is_terminal() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(request()).await.unwrap();
        let leased = lease(&queue).await;
        queue.acknowledge_failure(leased, "bad input", None).await.unwrap();

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.finished_at.is_some());
        assert!(queue.try_lease(LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn late_acknowledgement_is_rejected() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(request()).await.unwrap();

        let never_leased = Lease { job_id: id, attempt: 1 };
        let err = queue.acknowledge_success(never_leased).await.unwrap_err();
        assert!(matches!(err, QueueError::NotLeased { status: JobStatus::Pending, .. }));

        let leased = lease(&queue).await;
        queue.acknowledge_failure(leased, "boom", None).await.unwrap();
        let err = queue.acknowledge_success(leased).await.unwrap_err();
        assert!(matches!(err, QueueError::NotLeased { status: JobStatus::Failed, .. }));

        let unknown = Lease { job_id: JobId::new(), attempt: 1 };
        let err = queue.acknowledge_success(unknown).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_lease_cannot_acknowledge_its_successor() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(request()).await.unwrap();
        let short = Duration::from_millis(100);

        let stale = queue.try_lease(short).await.unwrap().unwrap().lease();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let current = queue.try_lease(LEASE).await.unwrap().unwrap().lease();
        assert_eq!(current.attempt, 2);

        let err = queue.acknowledge_success(stale).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::LeaseLost { attempt: 1, current: 2, .. }
        ));
        let err = queue
            .acknowledge_failure(stale, "slow worker", None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::LeaseLost { .. }));

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Leased);
        assert!(job.last_error.is_none());

        queue.acknowledge_success(current).await.unwrap();
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn exhausted_job_is_failed_instead_of_leased() {
        let queue = InMemoryJobQueue::new().with_max_attempts(Some(2));
        let id = queue.enqueue(request()).await.unwrap();
        for _ in 0..2 {
            let leased = lease(&queue).await;
            queue
                .acknowledge_failure(leased, "transient", Some(Duration::ZERO))
                .await
                .unwrap();
        }

        assert!(queue.try_lease(LEASE).await.unwrap().is_none());
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert_eq!(
            job.last_error.as_deref(),
            Some("transient; max attempts exceeded")
        );
    }

    #[tokio::test]
    async fn uncapped_queue_keeps_leasing() {
        let queue = InMemoryJobQueue::new().with_max_attempts(None);
        queue.enqueue(request()).await.unwrap();
        for attempt in 1..=8 {
            let leased = lease(&queue).await;
            assert_eq!(leased.attempt, attempt);
            queue
                .acknowledge_failure(leased, "again", Some(Duration::ZERO))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn latest_for_document_prefers_newest_job() {
        let queue = InMemoryJobQueue::new();
        let document_id = DocumentId::new();
        queue
            .enqueue(EnqueueRequest::new(document_id, "echo", "v1"))
            .await
            .unwrap();
        let newest = queue
            .enqueue(EnqueueRequest::new(document_id, "invoice", "v2"))
            .await
            .unwrap();
        queue.enqueue(request()).await.unwrap();

        let job = queue.latest_for_document(document_id).await.unwrap().unwrap();
        assert_eq!(job.id, newest);
        assert!(queue.latest_for_document(DocumentId::new()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_leases_are_exclusive() {
        let queue = Arc::new(InMemoryJobQueue::new());
        for _ in 0..50 {
            queue.enqueue(request()).await.unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                let mut leased = Vec::new();
                while let Some(lease) = queue.try_lease(LEASE).await.unwrap() {
                    leased.push(lease.job_id);
                    tokio::task::yield_now().await;
                }
                leased
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

        #[test]
        fn every_job_is_leased_exactly_once(jobs in 1usize..40, workers in 1usize..6) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .build()
                .unwrap();
            let leased = runtime.block_on(async move {
                let queue = Arc::new(InMemoryJobQueue::new());
                for _ in 0..jobs {
                    queue.enqueue(request()).await.unwrap();
                }
                let handles: Vec<_> = (0..workers)
                    .map(|_| {
                        let queue = queue.clone();
                        tokio::spawn(async move {
                            let mut mine = Vec::new();
                            while let Some(lease) = queue.try_lease(LEASE).await.unwrap() {
                                mine.push(lease.job_id);
                            }
                            mine
                        })
                    })
                    .collect();
                let mut all = Vec::new();
                for handle in handles {
                    all.extend(handle.await.unwrap());
                }
                all
            });

            let unique: HashSet<_> = leased.iter().copied().collect();
            prop_assert_eq!(leased.len(), jobs);
            prop_assert_eq!(unique.len(), jobs);
        }
    }
}
