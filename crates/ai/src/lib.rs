//! `docflow-ai`
//!
//! **Responsibility:** the text-generation boundary used by extraction steps.
//!
//! This crate knows nothing about workflows, runs or documents:
//! - [`TextGenerator`] is the capability steps consume.
//! - [`RetryingGenerator`] adds bounded exponential backoff with jitter and
//!   honours retry-after hints, so transient failures never escape a step.
//! - [`OpenAiClient`] talks to an OpenAI-compatible Responses endpoint.

pub mod error;
pub mod generator;
pub mod openai;
pub mod retry;

pub use error::GenerationError;
pub use generator::{DisabledGenerator, ScriptedGenerator, TextGenerator};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use retry::RetryingGenerator;
