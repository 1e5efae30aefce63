//! The step capability, its outcomes, and the static step map.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::StepContext;
use crate::registry::{RegistryError, WorkflowRegistry};

/// A step output tagged with an explicit type and version.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    pub result_type: String,
    pub version: String,
    pub payload: serde_json::Value,
}

impl ResultEnvelope {
    pub fn new(
        result_type: impl Into<String>,
        version: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            result_type: result_type.into(),
            version: version.into(),
            payload,
        }
    }

    /// Serialize `payload` into an envelope.
    pub fn from_serialize<T: Serialize>(
        result_type: impl Into<String>,
        version: impl Into<String>,
        payload: &T,
    ) -> Result<Self, StepError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| StepError::new(format!("result serialization failed: {e}")))?;
        Ok(Self::new(result_type, version, payload))
    }
}

/// What a succeeding step hands back for the result log.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Typed(ResultEnvelope),
    /// Stored under [`synthesized_result_type`] of the step name, version `v1`.
    Untyped(serde_json::Value),
}

impl From<ResultEnvelope> for StepResult {
    fn from(envelope: ResultEnvelope) -> Self {
        StepResult::Typed(envelope)
    }
}

/// The four ways a step can finish.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded {
        message: Option<String>,
        result: Option<StepResult>,
    },
    Failed {
        message: String,
    },
    /// Ask the caller to retry the whole workflow later.
    Retry {
        message: String,
        retry_after: Option<Duration>,
    },
    Skipped,
}

impl StepOutcome {
    pub fn succeeded() -> Self {
        StepOutcome::Succeeded {
            message: None,
            result: None,
        }
    }

    pub fn succeeded_with(result: impl Into<StepResult>) -> Self {
        StepOutcome::Succeeded {
            message: None,
            result: Some(result.into()),
        }
    }

    pub fn with_message(self, message: impl Into<String>) -> Self {
        match self {
            StepOutcome::Succeeded { result, .. } => StepOutcome::Succeeded {
                message: Some(message.into()),
                result,
            },
            other => other,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        StepOutcome::Failed {
            message: message.into(),
        }
    }

    pub fn retry(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        StepOutcome::Retry {
            message: message.into(),
            retry_after,
        }
    }

    pub fn skipped() -> Self {
        StepOutcome::Skipped
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Succeeded { .. } => "succeeded",
            StepOutcome::Failed { .. } => "failed",
            StepOutcome::Retry { .. } => "retry",
            StepOutcome::Skipped => "skipped",
        }
    }
}

/// An unexpected fault inside a step (as opposed to a `Failed` outcome).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct StepError {
    message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A unit of work inside a workflow.
///
/// Steps are resolved by [`name`](WorkflowStep::name) and must be idempotent:
/// delivery is at-least-once, so a step may run again in a later run for the
/// same document.
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        ctx: &mut StepContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepError>;
}

/// `"text.extract"` becomes `"TextExtractResult"`.
pub fn synthesized_result_type(step_name: &str) -> String {
    let mut out: String = step_name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    out.push_str("Result");
    out
}

/// Static map from step name (case-insensitive) to implementation.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn WorkflowStep>>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.steps.values().map(|s| s.name()).collect();
        names.sort_unstable();
        f.debug_struct("StepRegistry").field("steps", &names).finish()
    }
}

impl StepRegistry {
    pub fn new(
        steps: impl IntoIterator<Item = Arc<dyn WorkflowStep>>,
    ) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for step in steps {
            let key = step.name().to_lowercase();
            if map.contains_key(&key) {
                return Err(RegistryError::DuplicateStep(step.name().to_string()));
            }
            map.insert(key, step);
        }
        Ok(Self { steps: map })
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn WorkflowStep>> {
        self.steps.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.steps.values().map(|s| s.name().to_string()).collect();
        names.sort();
        names
    }

    /// `(workflow, version, step)` triples referencing steps that are not registered.
    pub fn missing_steps(&self, workflows: &WorkflowRegistry) -> Vec<(String, String, String)> {
        let mut missing: Vec<_> = workflows
            .definitions()
            .flat_map(|definition| {
                definition
                    .steps()
                    .iter()
                    .filter(|step| self.resolve(step).is_none())
                    .map(|step| {
                        (
                            definition.name().to_string(),
                            definition.version().to_string(),
                            step.clone(),
                        )
                    })
            })
            .collect();
        missing.sort();
        missing
    }
}
