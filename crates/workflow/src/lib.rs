//! `docflow-workflow`: workflow definitions and the step executor.
//!
//! A workflow is a named, versioned, ordered list of step names. The
//! [`WorkflowExecutor`] resolves a definition from the [`WorkflowRegistry`],
//! resolves each step from the [`StepRegistry`], and drives them one after
//! another against a shared [`StepContext`], recording every run and step
//! transition in a [`RunStore`] and every step output in a [`ResultStore`].
//!
//! Storage is abstracted behind traits; the in-memory implementations here
//! back tests and the non-persistent process mode.

pub mod context;
pub mod executor;
pub mod in_memory;
pub mod registry;
pub mod step;
pub mod store;

pub use context::{ContextItems, ContextValue, StepContext};
pub use executor::{ExecutionError, ExecutionRequest, RunOutcome, WorkflowExecutor};
pub use in_memory::{InMemoryResultStore, InMemoryRunStore};
pub use registry::{DEFAULT_VERSION, RegistryError, WorkflowDefinition, WorkflowRegistry};
pub use step::{
    ResultEnvelope, StepError, StepOutcome, StepRegistry, StepResult, WorkflowStep,
    synthesized_result_type,
};
pub use store::{ResultStore, RunStore, StoreError};
