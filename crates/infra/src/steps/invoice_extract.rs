use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docflow_ai::{GenerationError, TextGenerator};
use docflow_invoicing::{parse_generated, prompt};
use docflow_workflow::{
    ResultEnvelope, ResultStore, StepContext, StepError, StepOutcome, WorkflowStep,
};

use super::{DOC_TEXT, INVOICE_EXTRACT, INVOICE_EXTRACT_DIAGNOSTICS, INVOICE_EXTRACT_KEY, store_fault};

/// Turns the run's `DocText` into a structured `InvoiceExtract` via the generator.
///
/// Generator output that is not JSON, or that does not fit the schema, is kept
/// as an `InvoiceExtractDiagnostics` result and fails the step.
pub struct InvoiceExtractStep {
    generator: Arc<dyn TextGenerator>,
    results: Arc<dyn ResultStore>,
}

impl InvoiceExtractStep {
    pub fn new(generator: Arc<dyn TextGenerator>, results: Arc<dyn ResultStore>) -> Self {
        Self { generator, results }
    }

    async fn document_text(&self, ctx: &StepContext) -> Result<String, StepError> {
        let record = self
            .results
            .latest_in_run(ctx.run_id, DOC_TEXT, None)
            .await
            .map_err(store_fault)?;
        Ok(record
            .and_then(|r| r.payload.get("text").and_then(|t| t.as_str()).map(str::to_string))
            .unwrap_or_default())
    }
}

#[async_trait]
impl WorkflowStep for InvoiceExtractStep {
    fn name(&self) -> &str {
        "invoice.extract.v1"
    }

    async fn execute(
        &self,
        ctx: &mut StepContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError> {
        let text = self.document_text(ctx).await?;
        if text.trim().is_empty() {
            warn!(run_id = %ctx.run_id, "no document text to extract from");
            return Ok(StepOutcome::failed("no document text available for extraction"));
        }

        let raw = match self
            .generator
            .generate(prompt::INSTRUCTIONS, &prompt::build_prompt(&text), cancel)
            .await
        {
            Ok(raw) => raw,
            Err(GenerationError::Cancelled) => return Ok(StepOutcome::failed("cancelled")),
            Err(e) => {
                warn!(run_id = %ctx.run_id, error = %e, "invoice generation failed");
                return Ok(StepOutcome::failed(format!("generation failure: {e}")));
            }
        };

        let invoice = match parse_generated(&raw) {
            Ok(invoice) => invoice,
            Err(e) => {
                warn!(run_id = %ctx.run_id, error = %e, "generator returned an unusable invoice");
                self.results
                    .save(
                        ctx.run_id,
                        INVOICE_EXTRACT_DIAGNOSTICS,
                        "v1",
                        json!({ "error": e.to_string(), "raw": raw }),
                    )
                    .await
                    .map_err(store_fault)?;
                return Ok(StepOutcome::failed(format!("invalid JSON from generator: {e}")));
            }
        };

        let payload = serde_json::to_value(&invoice)
            .map_err(|e| StepError::new(format!("invoice serialization failed: {e}")))?;
        ctx.items.insert(INVOICE_EXTRACT_KEY, payload.clone());
        info!(
            run_id = %ctx.run_id,
            line_items = invoice.line_items.len(),
            "invoice extracted"
        );
        Ok(StepOutcome::succeeded_with(ResultEnvelope::new(INVOICE_EXTRACT, "v1", payload)))
    }
}
