//! Built-in workflow steps.
//!
//! | Step                     | Reads                      | Writes                                 |
//! |--------------------------|----------------------------|----------------------------------------|
//! | `echo`                   | -                          | `Echo v1`                              |
//! | `text.extract`           | document + blob            | `DocText v1`, context `ExtractedText`  |
//! | `invoice.extract.v1`     | `DocText`                  | `InvoiceExtract v1` (or diagnostics)   |
//! | `invoice.validate.v1`    | `InvoiceExtract`           | `ValidationReport v1`                  |
//! | `invoice.export.csv.v1`  | `InvoiceExtract`           | `InvoiceCsv v1`                        |
//! | `export.json`            | `InvoiceExtract`           | `InvoiceJson v1`                       |
//!
//! Steps chain through the result log of their own run
//! ([`ResultStore::latest_in_run`]), never through another run's output.

mod echo;
mod export;
mod invoice_extract;
mod invoice_validate;
mod text_extract;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use docflow_ai::TextGenerator;
use docflow_core::RunId;
use docflow_invoicing::InvoiceExtract;
use docflow_workflow::{
    RegistryError, ResultEnvelope, ResultStore, StepError, StepRegistry, WorkflowStep,
};

use crate::blob::BlobStore;
use crate::documents::DocumentStore;

pub use echo::EchoStep;
pub use export::{ExportJsonStep, InvoiceExportCsvStep};
pub use invoice_extract::InvoiceExtractStep;
pub use invoice_validate::InvoiceValidateStep;
pub use text_extract::TextExtractStep;

pub const DOC_TEXT: &str = "DocText";
pub const INVOICE_EXTRACT: &str = "InvoiceExtract";
pub const INVOICE_EXTRACT_DIAGNOSTICS: &str = "InvoiceExtractDiagnostics";
pub const VALIDATION_REPORT: &str = "ValidationReport";
pub const INVOICE_CSV: &str = "InvoiceCsv";
pub const INVOICE_JSON: &str = "InvoiceJson";

/// Context key holding the plain document text.
pub const EXTRACTED_TEXT_KEY: &str = "ExtractedText";
/// Context key holding the extracted invoice as JSON.
pub const INVOICE_EXTRACT_KEY: &str = "InvoiceExtract";

/// Collaborators the built-in steps need.
#[derive(Clone)]
pub struct StepDependencies {
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub results: Arc<dyn ResultStore>,
    pub generator: Arc<dyn TextGenerator>,
}

/// The static step map with every built-in step.
pub fn builtin_steps(deps: StepDependencies) -> Result<StepRegistry, RegistryError> {
    let steps: Vec<Arc<dyn WorkflowStep>> = vec![
        Arc::new(EchoStep),
        Arc::new(TextExtractStep::new(deps.documents, deps.blobs)),
        Arc::new(InvoiceExtractStep::new(deps.generator, deps.results.clone())),
        Arc::new(InvoiceValidateStep::new(deps.results.clone())),
        Arc::new(InvoiceExportCsvStep::new(deps.results.clone())),
        Arc::new(ExportJsonStep::new(deps.results)),
    ];
    StepRegistry::new(steps)
}

fn store_fault(err: impl std::fmt::Display) -> StepError {
    StepError::new(format!("result store error: {err}"))
}

/// The latest `InvoiceExtract` of the run, if any.
async fn latest_invoice(
    results: &dyn ResultStore,
    run_id: RunId,
) -> Result<Option<(InvoiceExtract, serde_json::Value)>, StepError> {
    let Some(record) = results
        .latest_in_run(run_id, INVOICE_EXTRACT, None)
        .await
        .map_err(store_fault)?
    else {
        return Ok(None);
    };
    let invoice = serde_json::from_value(record.payload.clone())
        .map_err(|e| StepError::new(format!("stored InvoiceExtract is unreadable: {e}")))?;
    Ok(Some((invoice, record.payload)))
}

/// A downloadable file result: `{fileName, contentType, <data_key>: base64}`.
fn file_result(
    result_type: &str,
    file_name: String,
    content_type: &str,
    data_key: &str,
    bytes: &[u8],
) -> ResultEnvelope {
    let mut payload = json!({
        "fileName": file_name,
        "contentType": content_type,
    });
    payload[data_key] = json!(STANDARD.encode(bytes));
    ResultEnvelope::new(result_type, "v1", payload)
}

#[cfg(test)]
pub(crate) mod testing {
    use docflow_core::{CorrelationId, CustomerId, DocumentId, RunId};
    use docflow_workflow::{ContextItems, StepContext};

    pub fn context(document_id: DocumentId) -> StepContext {
        StepContext {
            document_id,
            customer_id: CustomerId::new("acme").unwrap(),
            workflow_name: "invoice".to_string(),
            workflow_version: "v2".to_string(),
            correlation_id: CorrelationId::new(),
            run_id: RunId::new(),
            items: ContextItems::new(),
        }
    }
}
