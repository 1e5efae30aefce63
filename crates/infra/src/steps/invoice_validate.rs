use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use docflow_invoicing::validate;
use docflow_workflow::{
    ResultEnvelope, ResultStore, StepContext, StepError, StepOutcome, WorkflowStep,
};

use super::{VALIDATION_REPORT, latest_invoice};

/// Business checks over the run's `InvoiceExtract`. Issues are reported, not fatal.
pub struct InvoiceValidateStep {
    results: Arc<dyn ResultStore>,
}

impl InvoiceValidateStep {
    pub fn new(results: Arc<dyn ResultStore>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl WorkflowStep for InvoiceValidateStep {
    fn name(&self) -> &str {
        "invoice.validate.v1"
    }

    async fn execute(
        &self,
        ctx: &mut StepContext,
        _cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError> {
        let Some((invoice, _)) = latest_invoice(self.results.as_ref(), ctx.run_id).await? else {
            return Ok(StepOutcome::failed("missing InvoiceExtract result"));
        };

        let report = validate(&invoice);
        let message = if report.is_valid {
            "validation passed".to_string()
        } else {
            format!("validation found {} issues", report.issues.len())
        };
        info!(run_id = %ctx.run_id, valid = report.is_valid, issues = report.issues.len(), "invoice validated");

        let envelope = ResultEnvelope::from_serialize(VALIDATION_REPORT, "v1", &report)?;
        Ok(StepOutcome::succeeded_with(envelope).with_message(message))
    }
}
