use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use docflow_workflow::{ResultEnvelope, StepContext, StepError, StepOutcome, WorkflowStep};

/// Liveness step: proves the pipeline runs end to end.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoStep;

#[async_trait]
impl WorkflowStep for EchoStep {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(
        &self,
        ctx: &mut StepContext,
        _cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError> {
        let payload = json!({
            "ok": true,
            "at": Utc::now(),
            "documentId": ctx.document_id,
        });
        Ok(
            StepOutcome::succeeded_with(ResultEnvelope::new("Echo", "v1", payload))
                .with_message("echo ok"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::context;
    use docflow_core::DocumentId;
    use docflow_workflow::StepResult;

    #[tokio::test]
    async fn echo_reports_the_document() {
        let document_id = DocumentId::new();
        let mut ctx = context(document_id);
        let outcome = EchoStep
            .execute(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        let (message, envelope) = match outcome {
            StepOutcome::Succeeded {
                message,
                result: Some(StepResult::Typed(envelope)),
            } => (message, envelope),
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(message.as_deref(), Some("echo ok"));
        assert_eq!((envelope.result_type.as_str(), envelope.version.as_str()), ("Echo", "v1"));
        assert_eq!(envelope.payload["ok"], true);
        assert_eq!(envelope.payload["documentId"], document_id.to_string());
    }
}
