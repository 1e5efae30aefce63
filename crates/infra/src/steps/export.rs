//! File exports of the extracted invoice.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use docflow_invoicing::render_csv;
use docflow_workflow::{ResultStore, StepContext, StepError, StepOutcome, WorkflowStep};

use super::{INVOICE_CSV, INVOICE_JSON, file_result, latest_invoice};

pub struct InvoiceExportCsvStep {
    results: Arc<dyn ResultStore>,
}

impl InvoiceExportCsvStep {
    pub fn new(results: Arc<dyn ResultStore>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl WorkflowStep for InvoiceExportCsvStep {
    fn name(&self) -> &str {
        "invoice.export.csv.v1"
    }

    async fn execute(
        &self,
        ctx: &mut StepContext,
        _cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError> {
        let Some((invoice, _)) = latest_invoice(self.results.as_ref(), ctx.run_id).await? else {
            warn!(run_id = %ctx.run_id, "no InvoiceExtract to export");
            return Ok(StepOutcome::failed("missing InvoiceExtract result"));
        };

        let csv = render_csv(&invoice);
        Ok(StepOutcome::succeeded_with(file_result(
            INVOICE_CSV,
            format!("invoice_{}.csv", ctx.document_id),
            "text/csv",
            "csvBase64",
            csv.as_bytes(),
        )))
    }
}

/// JSON download of the extract; skipped when nothing was extracted.
pub struct ExportJsonStep {
    results: Arc<dyn ResultStore>,
}

impl ExportJsonStep {
    pub fn new(results: Arc<dyn ResultStore>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl WorkflowStep for ExportJsonStep {
    fn name(&self) -> &str {
        "export.json"
    }

    async fn execute(
        &self,
        ctx: &mut StepContext,
        _cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError> {
        let Some((_, payload)) = latest_invoice(self.results.as_ref(), ctx.run_id).await? else {
            debug!(run_id = %ctx.run_id, "nothing to export as JSON");
            return Ok(StepOutcome::skipped());
        };

        let bytes = serde_json::to_vec_pretty(&payload)
            .map_err(|e| StepError::new(format!("invoice serialization failed: {e}")))?;
        Ok(StepOutcome::succeeded_with(file_result(
            INVOICE_JSON,
            format!("invoice_{}.json", ctx.document_id),
            "application/json",
            "jsonBase64",
            &bytes,
        )))
    }
}
