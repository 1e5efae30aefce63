//! Customer-scoped read queries over documents, jobs, runs and results.
//!
//! A document that does not exist and a document owned by another customer
//! are indistinguishable to the caller: both are [`StatusError::DocumentNotFound`].

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use docflow_core::{CustomerId, Document, DocumentId, Job, ResultRecord, Run, RunId, StepRun};
use docflow_workflow::{ResultStore, RunStore, StoreError};

use crate::documents::{DocumentStore, DocumentStoreError};
use crate::jobs::{JobQueue, QueueError};

const DEFAULT_DOWNLOAD_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("result payload is not downloadable: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Documents(#[from] DocumentStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Snapshot of a document and its most recent processing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatusView {
    pub document: Document,
    pub job: Option<Job>,
    pub run: Option<Run>,
    /// Step runs of `run`, in execution order.
    pub steps: Vec<StepRun>,
    /// Results of `run`, oldest first.
    pub results: Vec<ResultRecord>,
}

/// A decoded file result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

#[derive(Clone)]
pub struct StatusReader {
    documents: Arc<dyn DocumentStore>,
    queue: Arc<dyn JobQueue>,
    runs: Arc<dyn RunStore>,
    results: Arc<dyn ResultStore>,
}

impl StatusReader {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        queue: Arc<dyn JobQueue>,
        runs: Arc<dyn RunStore>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            documents,
            queue,
            runs,
            results,
        }
    }

    async fn owned_document(
        &self,
        document_id: DocumentId,
        customer_id: &CustomerId,
    ) -> Result<Document, StatusError> {
        match self.documents.get(document_id).await? {
            Some(document) if &document.customer_id == customer_id => Ok(document),
            Some(_) => {
                debug!(%document_id, %customer_id, "document belongs to another customer");
                Err(StatusError::DocumentNotFound(document_id))
            }
            None => Err(StatusError::DocumentNotFound(document_id)),
        }
    }

    async fn latest_run(&self, document_id: DocumentId) -> Result<Option<Run>, StatusError> {
        Ok(self.runs.runs_for_document(document_id).await?.into_iter().next())
    }

    /// Runs of a document, newest first.
    pub async fn runs_for_document(
        &self,
        document_id: DocumentId,
        customer_id: &CustomerId,
    ) -> Result<Vec<Run>, StatusError> {
        self.owned_document(document_id, customer_id).await?;
        Ok(self.runs.runs_for_document(document_id).await?)
    }

    /// Results of a run, oldest first.
    pub async fn results_for_run(
        &self,
        run_id: RunId,
        customer_id: &CustomerId,
    ) -> Result<Vec<ResultRecord>, StatusError> {
        let run = self
            .runs
            .get_run(run_id)
            .await?
            .ok_or(StatusError::RunNotFound(run_id))?;
        self.owned_document(run.document_id, customer_id)
            .await
            .map_err(|_| StatusError::RunNotFound(run_id))?;
        Ok(self.results.get_by_run(run_id).await?)
    }

    /// Latest matching result of the document's latest run.
    ///
    /// Older runs are never consulted, even when the latest run has no match.
    pub async fn latest_result(
        &self,
        document_id: DocumentId,
        customer_id: &CustomerId,
        result_type: &str,
        version: Option<&str>,
    ) -> Result<Option<ResultRecord>, StatusError> {
        self.owned_document(document_id, customer_id).await?;
        let Some(run) = self.latest_run(document_id).await? else {
            return Ok(None);
        };
        let version = version.filter(|v| !v.is_empty());
        Ok(self.results.latest_in_run(run.id, result_type, version).await?)
    }

    pub async fn document_status(
        &self,
        document_id: DocumentId,
        customer_id: &CustomerId,
    ) -> Result<DocumentStatusView, StatusError> {
        let document = self.owned_document(document_id, customer_id).await?;
        let job = self.queue.latest_for_document(document_id).await?;
        let run = self.latest_run(document_id).await?;

        let (steps, results) = match &run {
            Some(run) => (
                self.runs.step_runs(run.id).await?,
                self.results.get_by_run(run.id).await?,
            ),
            None => (Vec::new(), Vec::new()),
        };

        Ok(DocumentStatusView {
            document,
            job,
            run,
            steps,
            results,
        })
    }

    /// Decode the file carried by the latest matching result.
    ///
    /// `Ok(None)` when there is no such result or it carries no `*Base64` data.
    pub async fn download(
        &self,
        document_id: DocumentId,
        customer_id: &CustomerId,
        result_type: &str,
        version: Option<&str>,
    ) -> Result<Option<Download>, StatusError> {
        let Some(record) = self
            .latest_result(document_id, customer_id, result_type, version)
            .await?
        else {
            return Ok(None);
        };
        decode_file(document_id, &record.payload)
    }
}

fn decode_file(
    document_id: DocumentId,
    payload: &serde_json::Value,
) -> Result<Option<Download>, StatusError> {
    let Some(fields) = payload.as_object() else {
        return Ok(None);
    };
    let data = fields
        .iter()
        .find(|(key, _)| key.ends_with("Base64"))
        .and_then(|(_, value)| value.as_str())
        .filter(|data| !data.is_empty());
    let Some(data) = data else {
        return Ok(None);
    };

    let bytes = STANDARD
        .decode(data)
        .map_err(|e| StatusError::InvalidPayload(e.to_string()))?;
    let text = |key: &str| fields.get(key).and_then(|v| v.as_str()).map(str::to_string);

    Ok(Some(Download {
        bytes,
        content_type: text("contentType").unwrap_or_else(|| DEFAULT_DOWNLOAD_TYPE.to_string()),
        file_name: text("fileName").unwrap_or_else(|| format!("download_{document_id}.bin")),
    }))
}
