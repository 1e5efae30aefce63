use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use docflow_core::{CustomerId, Document, DocumentId, DocumentStatus, NewDocument};

use super::{DocumentStore, DocumentStoreError, IntakeOutcome};

fn poisoned() -> DocumentStoreError {
    DocumentStoreError::Backend("lock poisoned".to_string())
}

/// In-memory document store. The dedup check and the insert share one write lock.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<DocumentId, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<DocumentId, Document>>, DocumentStoreError> {
        self.documents.read().map_err(|_| poisoned())
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<DocumentId, Document>>, DocumentStoreError> {
        self.documents.write().map_err(|_| poisoned())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, document: NewDocument) -> Result<IntakeOutcome, DocumentStoreError> {
        let mut documents = self.write()?;
        if let Some(existing) = documents.values().find(|d| {
            d.customer_id == document.customer_id && d.content_hash == document.content_hash
        }) {
            return Ok(IntakeOutcome {
                document_id: existing.id,
                is_new: false,
            });
        }

        let id = DocumentId::new();
        documents.insert(id, document.into_document(id, Utc::now()));
        Ok(IntakeOutcome {
            document_id: id,
            is_new: true,
        })
    }

    async fn get(&self, document_id: DocumentId) -> Result<Option<Document>, DocumentStoreError> {
        Ok(self.read()?.get(&document_id).cloned())
    }

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Document>, DocumentStoreError> {
        let mut documents: Vec<_> = self
            .read()?
            .values()
            .filter(|d| &d.customer_id == customer_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.as_uuid().cmp(a.id.as_uuid()))
        });
        Ok(documents)
    }

    async fn set_status(
        &self,
        document_id: DocumentId,
        status: DocumentStatus,
    ) -> Result<(), DocumentStoreError> {
        let mut documents = self.write()?;
        let document = documents
            .get_mut(&document_id)
            .ok_or(DocumentStoreError::NotFound(document_id))?;
        document.status = status;
        Ok(())
    }
}
