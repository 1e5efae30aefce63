//! Content-addressed document records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{CustomerId, DocumentId};
use crate::status::DocumentStatus;

/// One uploaded file for one customer.
///
/// `(customer_id, content_hash)` is unique: uploading identical bytes twice
/// resolves to the same document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub customer_id: CustomerId,
    pub source: String,
    pub file_name: String,
    pub content_type: String,
    pub storage_path: String,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub content_hash: String,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

/// Metadata handed to intake once the bytes are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub customer_id: CustomerId,
    pub source: String,
    pub file_name: String,
    pub content_type: String,
    pub storage_path: String,
    pub content_hash: String,
    pub size_bytes: u64,
}

impl NewDocument {
    /// Materialize the record intake inserts for a first-time upload.
    pub fn into_document(self, id: DocumentId, created_at: DateTime<Utc>) -> Document {
        Document {
            id,
            customer_id: self.customer_id,
            source: self.source,
            file_name: self.file_name,
            content_type: self.content_type,
            storage_path: self.storage_path,
            content_hash: self.content_hash,
            size_bytes: self.size_bytes,
            status: DocumentStatus::Stored,
            created_at,
        }
    }
}
