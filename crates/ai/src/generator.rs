//! The generation capability and two trivial implementations.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::GenerationError;

/// Produces text from system-level instructions and a user prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        instructions: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError>;
}

#[async_trait]
impl<T> TextGenerator for Arc<T>
where
    T: TextGenerator + ?Sized,
{
    async fn generate(
        &self,
        instructions: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        (**self).generate(instructions, prompt, cancel).await
    }
}

/// Used when no generation backend is configured. Every call fails permanently.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn generate(
        &self,
        _instructions: &str,
        _prompt: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::permanent("text generation is not configured"))
    }
}

/// Replays a fixed queue of responses, then repeats the last one.
///
/// Useful for deterministic pipelines in tests and offline runs.
#[derive(Debug)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    last: Mutex<Option<Result<String, GenerationError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: impl IntoIterator<Item = Result<String, GenerationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new([Ok(text.into())])
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _instructions: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.to_owned());
        }

        let next = self
            .responses
            .lock()
            .map_err(|_| GenerationError::permanent("scripted generator poisoned"))?
            .pop_front();
        let mut last = self
            .last
            .lock()
            .map_err(|_| GenerationError::permanent("scripted generator poisoned"))?;

        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(GenerationError::permanent("no scripted response"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_generator_replays_then_repeats_last() {
        let generator = ScriptedGenerator::new([
            Err(GenerationError::transient("busy")),
            Ok("{}".to_string()),
        ]);
        let cancel = CancellationToken::new();

        assert!(generator.generate("i", "a", &cancel).await.is_err());
        assert_eq!(generator.generate("i", "b", &cancel).await.unwrap(), "{}");
        assert_eq!(generator.generate("i", "c", &cancel).await.unwrap(), "{}");
        assert_eq!(generator.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn disabled_generator_fails_permanently() {
        let err = DisabledGenerator
            .generate("i", "p", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Permanent(_)));
    }
}
