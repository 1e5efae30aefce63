use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use docflow_workflow::{ResultEnvelope, StepContext, StepError, StepOutcome, WorkflowStep};

use super::{DOC_TEXT, EXTRACTED_TEXT_KEY};
use crate::blob::{BlobError, BlobStore};
use crate::documents::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extractor {
    Utf8,
    Pdf,
    Unsupported,
}

fn extractor_for(content_type: &str) -> Extractor {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "application/pdf" => Extractor::Pdf,
        "application/json" | "application/xml" | "application/csv" => Extractor::Utf8,
        m if m.starts_with("text/") => Extractor::Utf8,
        _ => Extractor::Unsupported,
    }
}

/// Text of every page in page order, one line break after each page.
fn pdf_text(bytes: &[u8]) -> Result<String, lopdf::Error> {
    let pdf = lopdf::Document::load_mem(bytes)?;
    let mut text = String::new();
    for page in pdf.get_pages().into_keys() {
        text.push_str(pdf.extract_text(&[page])?.trim_end());
        text.push('\n');
    }
    Ok(text)
}

/// Text extraction from the stored upload: UTF-8 formats are decoded, PDFs are
/// read page by page, anything else yields empty text.
pub struct TextExtractStep {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl TextExtractStep {
    pub fn new(documents: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { documents, blobs }
    }
}

#[async_trait]
impl WorkflowStep for TextExtractStep {
    fn name(&self) -> &str {
        "text.extract"
    }

    async fn execute(
        &self,
        ctx: &mut StepContext,
        _cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError> {
        let document = match self.documents.get(ctx.document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => return Ok(StepOutcome::failed("document not found")),
            Err(e) => return Err(StepError::new(e.to_string())),
        };

        let bytes = match self.blobs.get(&document.storage_path).await {
            Ok(bytes) => bytes,
            Err(BlobError::NotFound(path)) => {
                return Ok(StepOutcome::failed(format!("document content not found: {path}")));
            }
            Err(e) => return Err(StepError::new(e.to_string())),
        };

        let text = match extractor_for(&document.content_type) {
            Extractor::Utf8 => String::from_utf8_lossy(&bytes).into_owned(),
            Extractor::Pdf => {
                let parsed = tokio::task::spawn_blocking(move || pdf_text(&bytes))
                    .await
                    .map_err(|e| StepError::new(format!("pdf extraction task failed: {e}")))?;
                match parsed {
                    Ok(text) => text,
                    Err(e) => {
                        error!(document_id = %ctx.document_id, error = %e, "pdf text extraction failed");
                        return Ok(StepOutcome::failed(format!("extraction failed: {e}")));
                    }
                }
            }
            Extractor::Unsupported => {
                warn!(
                    document_id = %ctx.document_id,
                    content_type = %document.content_type,
                    "no text extractor for content type"
                );
                String::new()
            }
        };

        let chars = text.chars().count();
        ctx.items.insert(EXTRACTED_TEXT_KEY, text.clone());
        let envelope = ResultEnvelope::new(DOC_TEXT, "v1", json!({ "text": text, "chars": chars }));
        Ok(StepOutcome::succeeded_with(envelope).with_message(format!("extracted {chars} characters")))
    }
}
