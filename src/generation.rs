//! Text-generation capability
//!
//! The pipeline only ever sees `TextGenerator`. Backend calls are dispatched
//! through `GenerationPool`, which runs each call as its own task and bounds
//! how many are in flight at once.

use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Sampling constraints passed to the backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_output_tokens: 1024,
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

impl GenerationOptions {
    /// Options used for free-form conversational answers
    pub fn conversational(max_output_tokens: u32) -> Self {
        Self {
            max_output_tokens,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for `prompt`. Implementations return trimmed output.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;
}

/// Bounded dispatcher in front of a generator
pub struct GenerationPool {
    inner: Arc<dyn TextGenerator>,
    permits: Arc<Semaphore>,
}

impl GenerationPool {
    pub fn new(inner: Arc<dyn TextGenerator>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(size)),
        }
    }
}

#[async_trait]
impl TextGenerator for GenerationPool {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Generation(format!("generation pool closed: {}", e)))?;

        let inner = Arc::clone(&self.inner);
        let prompt = prompt.to_string();
        let options = *options;

        let handle = tokio::spawn(async move {
            let _permit = permit;
            inner.generate(&prompt, &options).await
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Generation task failed to complete: {}", e);
                Err(PipelineError::Generation(format!(
                    "generation task aborted: {}",
                    e
                )))
            }
        }
    }
}

type Responder = Box<dyn Fn(&str) -> String + Send + Sync>;

struct Rule {
    needle: String,
    respond: Responder,
}

/// Deterministic generator for tests and offline runs.
///
/// Replies come from the first rule whose needle occurs in the prompt;
/// prompts matching no rule get the fallback reply.
pub struct ScriptedGenerator {
    rules: Vec<Rule>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply with fixed text when the prompt contains `needle`
    pub fn reply(self, needle: &str, text: &str) -> Self {
        let text = text.to_string();
        self.on(needle, move |_| text.clone())
    }

    /// Reply with computed text when the prompt contains `needle`
    pub fn on<F>(mut self, needle: &str, respond: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            needle: needle.to_string(),
            respond: Box::new(respond),
        });
        self
    }

    /// Reply used when no rule matches; without one, unmatched prompts fail
    pub fn otherwise(mut self, text: &str) -> Self {
        self.fallback = Some(text.to_string());
        self
    }

    /// Every prompt received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if let Some(rule) = self.rules.iter().find(|r| prompt.contains(&r.needle)) {
            debug!(needle = %rule.needle, "Scripted reply");
            return Ok((rule.respond)(prompt).trim().to_string());
        }

        self.fallback
            .as_deref()
            .map(|text| text.trim().to_string())
            .ok_or_else(|| PipelineError::Generation("no scripted reply for prompt".to_string()))
    }
}
