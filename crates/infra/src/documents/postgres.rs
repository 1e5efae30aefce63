//! Postgres-backed document store.
//!
//! Dedup relies on the `documents_customer_hash_key` unique constraint. A
//! concurrent loser gets `23505` on insert and re-reads the winner's id.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use docflow_core::{CustomerId, Document, DocumentId, DocumentStatus, NewDocument};

use super::{DocumentStore, DocumentStoreError, IntakeOutcome};
use crate::db::{decode_error, is_unique_violation, map_sqlx_error};

const DOCUMENT_COLUMNS: &str = "id, customer_id, source, file_name, content_type, storage_path, \
                                content_hash, size_bytes, status, created_at";

#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: Arc<PgPool>,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn find_by_hash(
        &self,
        customer_id: &CustomerId,
        content_hash: &str,
    ) -> Result<Option<DocumentId>, DocumentStoreError> {
        let row = sqlx::query("SELECT id FROM documents WHERE customer_id = $1 AND content_hash = $2")
            .bind(customer_id.as_str())
            .bind(content_hash)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_document_by_hash", e))?;

        row.map(|row| row.try_get("id").map(DocumentId::from_uuid))
            .transpose()
            .map_err(|e| map_sqlx_error("find_document_by_hash", e).into())
    }
}

fn document_from_row(row: &PgRow) -> Result<Document, sqlx::Error> {
    let customer: String = row.try_get("customer_id")?;
    let size_bytes: i64 = row.try_get("size_bytes")?;
    Ok(Document {
        id: DocumentId::from_uuid(row.try_get("id")?),
        customer_id: CustomerId::new(customer).map_err(decode_error)?,
        source: row.try_get("source")?,
        file_name: row.try_get("file_name")?,
        content_type: row.try_get("content_type")?,
        storage_path: row.try_get("storage_path")?,
        content_hash: row.try_get("content_hash")?,
        size_bytes: size_bytes.max(0) as u64,
        status: DocumentStatus::from_code(row.try_get("status")?).map_err(decode_error)?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    #[instrument(skip(self, document), fields(customer_id = %document.customer_id), err)]
    async fn create(&self, document: NewDocument) -> Result<IntakeOutcome, DocumentStoreError> {
        if let Some(existing) = self
            .find_by_hash(&document.customer_id, &document.content_hash)
            .await?
        {
            return Ok(IntakeOutcome {
                document_id: existing,
                is_new: false,
            });
        }

        let id = DocumentId::new();
        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (id, customer_id, source, file_name, content_type,
                                   storage_path, content_hash, size_bytes, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id.as_uuid())
        .bind(document.customer_id.as_str())
        .bind(&document.source)
        .bind(&document.file_name)
        .bind(&document.content_type)
        .bind(&document.storage_path)
        .bind(&document.content_hash)
        .bind(i64::try_from(document.size_bytes).unwrap_or(i64::MAX))
        .bind(DocumentStatus::Stored.code())
        .bind(Utc::now())
        .execute(&*self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(IntakeOutcome {
                document_id: id,
                is_new: true,
            }),
            Err(e) if is_unique_violation(&e) => {
                debug!("lost intake race, re-reading the existing document");
                let winner = self
                    .find_by_hash(&document.customer_id, &document.content_hash)
                    .await?
                    .ok_or_else(|| {
                        DocumentStoreError::Backend(
                            "unique violation without a visible winner".to_string(),
                        )
                    })?;
                Ok(IntakeOutcome {
                    document_id: winner,
                    is_new: false,
                })
            }
            Err(e) => Err(map_sqlx_error("create_document", e).into()),
        }
    }

    #[instrument(skip(self), fields(document_id = %document_id), err)]
    async fn get(&self, document_id: DocumentId) -> Result<Option<Document>, DocumentStoreError> {
        let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"))
            .bind(document_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_document", e))?;

        row.as_ref()
            .map(document_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("get_document", e).into())
    }

    #[instrument(skip(self), fields(customer_id = %customer_id), err)]
    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Document>, DocumentStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE customer_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(customer_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_documents", e))?;

        rows.iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("list_documents", e).into())
    }

    #[instrument(skip(self), fields(document_id = %document_id, status = %status), err)]
    async fn set_status(
        &self,
        document_id: DocumentId,
        status: DocumentStatus,
    ) -> Result<(), DocumentStoreError> {
        let result = sqlx::query("UPDATE documents SET status = $2 WHERE id = $1")
            .bind(document_id.as_uuid())
            .bind(status.code())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_document_status", e))?;

        if result.rows_affected() == 0 {
            return Err(DocumentStoreError::NotFound(document_id));
        }
        Ok(())
    }
}
