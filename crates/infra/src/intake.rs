//! Upload intake: store the bytes, register the document, schedule work.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use docflow_core::{CustomerId, DocumentId, EnqueueRequest, JobId, JobParams, NewDocument};
use docflow_workflow::DEFAULT_VERSION;

use crate::blob::{BlobError, BlobStore};
use crate::documents::{DocumentStore, DocumentStoreError};
use crate::jobs::{JobQueue, QueueError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Documents(#[from] DocumentStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// One uploaded file and the workflow it should go through.
#[derive(Debug, Clone)]
pub struct Upload {
    pub customer_id: CustomerId,
    pub source: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub workflow_name: String,
    pub workflow_version: Option<String>,
    pub params: JobParams,
}

impl Upload {
    pub fn new(
        customer_id: CustomerId,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
        workflow_name: impl Into<String>,
    ) -> Self {
        Self {
            customer_id,
            source: "api".to_string(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
            workflow_name: workflow_name.into(),
            workflow_version: None,
            params: JobParams::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.workflow_version = Some(version.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReceipt {
    pub document_id: DocumentId,
    pub is_new: bool,
    /// Set only when this upload created the document.
    pub job_id: Option<JobId>,
}

#[derive(Clone)]
pub struct IngestService {
    blobs: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentStore>,
    queue: Arc<dyn JobQueue>,
}

impl IngestService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        documents: Arc<dyn DocumentStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            blobs,
            documents,
            queue,
        }
    }

    pub async fn ingest(&self, upload: Upload) -> Result<IngestReceipt, IngestError> {
        let stored = self.blobs.put(&upload.file_name, &upload.bytes).await?;

        let outcome = self
            .documents
            .create(NewDocument {
                customer_id: upload.customer_id.clone(),
                source: upload.source,
                file_name: upload.file_name,
                content_type: upload.content_type,
                storage_path: stored.path.clone(),
                content_hash: stored.sha256,
                size_bytes: stored.size_bytes,
            })
            .await?;

        if !outcome.is_new {
            if let Err(e) = self.blobs.delete(&stored.path).await {
                warn!(path = %stored.path, error = %e, "failed to delete duplicate upload");
            }
            info!(
                document_id = %outcome.document_id,
                customer_id = %upload.customer_id,
                "duplicate upload, no job scheduled"
            );
            return Ok(IngestReceipt {
                document_id: outcome.document_id,
                is_new: false,
                job_id: None,
            });
        }

        let version = upload
            .workflow_version
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());
        let mut request = EnqueueRequest::new(outcome.document_id, upload.workflow_name, version);
        request.params = upload.params;
        let job_id = self.queue.enqueue(request).await?;

        info!(
            document_id = %outcome.document_id,
            customer_id = %upload.customer_id,
            job_id = %job_id,
            "document ingested"
        );
        Ok(IngestReceipt {
            document_id: outcome.document_id,
            is_new: true,
            job_id: Some(job_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::documents::InMemoryDocumentStore;
    use crate::jobs::InMemoryJobQueue;

    struct Fixture {
        service: IngestService,
        blobs: Arc<InMemoryBlobStore>,
        queue: Arc<InMemoryJobQueue>,
    }

    fn fixture() -> Fixture {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let service = IngestService::new(
            blobs.clone(),
            Arc::new(InMemoryDocumentStore::new()),
            queue.clone(),
        );
        Fixture {
            service,
            blobs,
            queue,
        }
    }

    fn upload(bytes: &[u8]) -> Upload {
        Upload::new(
            CustomerId::new("acme").unwrap(),
            "invoice.txt",
            "text/plain",
            bytes.to_vec(),
            "invoice",
        )
        .with_version("v2")
    }

    #[tokio::test]
    async fn new_document_is_enqueued_once() {
        let f = fixture();
        let first = f.service.ingest(upload(b"total 10")).await.unwrap();
        let again = f.service.ingest(upload(b"total 10")).await.unwrap();

        assert!(first.is_new);
        assert!(first.job_id.is_some());
        assert!(!again.is_new);
        assert_eq!(again.document_id, first.document_id);
        assert_eq!(again.job_id, None);

        let jobs = f.queue.jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].workflow_name, "invoice");
        assert_eq!(jobs[0].workflow_version, "v2");
        assert_eq!(f.blobs.len(), 1);
    }

    #[tokio::test]
    async fn version_defaults_to_v1() {
        let f = fixture();
        let receipt = f
            .service
            .ingest(
                Upload::new(
                    CustomerId::new("acme").unwrap(),
                    "a.txt",
                    "text/plain",
                    b"x".to_vec(),
                    "echo",
                )
                .with_param("locale", "en"),
            )
            .await
            .unwrap();

        let job = f.queue.get(receipt.job_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(job.workflow_version, "v1");
        assert_eq!(job.params.get("locale").map(String::as_str), Some("en"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_uploads_schedule_one_job() {
        let f = fixture();
        let service = Arc::new(f.service);
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.ingest(upload(b"same bytes")).await.unwrap() })
            })
            .collect();

        let mut receipts = Vec::new();
        for task in tasks {
            receipts.push(task.await.unwrap());
        }
        assert_eq!(receipts.iter().filter(|r| r.is_new).count(), 1);
        assert_eq!(f.queue.jobs().unwrap().len(), 1);
        assert_eq!(f.blobs.len(), 1);
    }
}
