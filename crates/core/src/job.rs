//! Queue records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{DocumentId, JobId};
use crate::status::JobStatus;

/// Opaque key/value parameters passed through to the run context.
pub type JobParams = BTreeMap<String, String>;

/// A durable, leasable unit of work tying a document to a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub document_id: DocumentId,
    pub workflow_name: String,
    pub workflow_version: String,
    pub status: JobStatus,
    /// Incremented on every lease, never decremented.
    pub attempts: u32,
    /// Earliest time the job may be leased. While leased this is the lease deadline.
    pub next_run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub params: JobParams,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn from_request(request: EnqueueRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            document_id: request.document_id,
            workflow_name: request.workflow_name,
            workflow_version: request.workflow_version,
            status: JobStatus::Pending,
            attempts: 0,
            next_run_at: now,
            last_error: None,
            params: request.params,
            created_at: now,
            finished_at: None,
        }
    }

    /// Pending jobs whose time has come, and leased jobs whose lease expired.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Leased) && self.next_run_at <= now
    }

    pub fn to_lease(&self) -> LeasedJob {
        LeasedJob {
            job_id: self.id,
            document_id: self.document_id,
            workflow_name: self.workflow_name.clone(),
            workflow_version: self.workflow_version.clone(),
            attempts: self.attempts,
            params: self.params.clone(),
        }
    }
}

/// Enqueue request shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub document_id: DocumentId,
    pub workflow_name: String,
    pub workflow_version: String,
    #[serde(default)]
    pub params: JobParams,
}

impl EnqueueRequest {
    pub fn new(
        document_id: DocumentId,
        workflow_name: impl Into<String>,
        workflow_version: impl Into<String>,
    ) -> Self {
        Self {
            document_id,
            workflow_name: workflow_name.into(),
            workflow_version: workflow_version.into(),
            params: JobParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// What a successful lease hands to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeasedJob {
    pub job_id: JobId,
    pub document_id: DocumentId,
    pub workflow_name: String,
    pub workflow_version: String,
    pub attempts: u32,
    pub params: JobParams,
}

impl LeasedJob {
    /// The fence an acknowledgement must present.
    pub fn lease(&self) -> Lease {
        Lease {
            job_id: self.job_id,
            attempt: self.attempts,
        }
    }
}

/// One specific lease of a job: the job id plus the attempt number it was
/// handed out with. A later lease of the same job carries a higher attempt,
/// so acknowledgements from an expired lease can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub job_id: JobId,
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_fences_on_the_attempt() {
        let mut job = Job::from_request(EnqueueRequest::new(DocumentId::new(), "echo", "v1"), Utc::now());
        job.attempts = 3;
        let lease = job.to_lease().lease();
        assert_eq!(lease.job_id, job.id);
        assert_eq!(lease.attempt, 3);
    }

    #[test]
    fn new_jobs_are_pending_and_immediately_eligible() {
        let now = Utc::now();
        let job = Job::from_request(EnqueueRequest::new(DocumentId::new(), "echo", "v1"), now);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.is_eligible(now));
    }

    #[test]
    fn terminal_jobs_are_never_eligible() {
        let now = Utc::now();
        let mut job = Job::from_request(EnqueueRequest::new(DocumentId::new(), "echo", "v1"), now);
        job.status = JobStatus::Done;
        assert!(!job.is_eligible(now + chrono::Duration::hours(1)));
    }

    #[test]
    fn expired_lease_is_eligible_again() {
        let now = Utc::now();
        let mut job = Job::from_request(EnqueueRequest::new(DocumentId::new(), "echo", "v1"), now);
        job.status = JobStatus::Leased;
        job.next_run_at = now + chrono::Duration::seconds(30);
        assert!(!job.is_eligible(now));
        assert!(job.is_eligible(now + chrono::Duration::seconds(31)));
    }
}
