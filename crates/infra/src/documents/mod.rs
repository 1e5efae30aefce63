//! Document intake with per-customer content deduplication.
//!
//! `(customer_id, content_hash)` is unique. [`DocumentStore::create`] returns
//! the existing id with `is_new = false` when the pair is already known, so
//! only the first uploader of a given content goes on to enqueue work.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use docflow_core::{CustomerId, Document, DocumentId, DocumentStatus, NewDocument};

use crate::db::DbError;

pub use in_memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;

#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("document not found: {0}")]
    NotFound(DocumentId),

    #[error("document storage error: {0}")]
    Backend(String),
}

impl From<DbError> for DocumentStoreError {
    fn from(err: DbError) -> Self {
        DocumentStoreError::Backend(err.to_string())
    }
}

/// Outcome of [`DocumentStore::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeOutcome {
    pub document_id: DocumentId,
    pub is_new: bool,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(&self, document: NewDocument) -> Result<IntakeOutcome, DocumentStoreError>;

    async fn get(&self, document_id: DocumentId) -> Result<Option<Document>, DocumentStoreError>;

    /// Documents of a customer, newest first.
    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Document>, DocumentStoreError>;

    async fn set_status(
        &self,
        document_id: DocumentId,
        status: DocumentStatus,
    ) -> Result<(), DocumentStoreError>;
}
