//! Adapter layer for kbsync-model infrastructure.
//!
//! This module bridges kbsync-model clients with kbsync-core's collaborator
//! traits. It provides:
//!
//! - Error conversion from `ModelError` to `KbError`
//! - Wrapper types that implement [`Summarizer`], [`Embedder`] and
//!   [`ResponseGenerator`] on top of kbsync-model backends
//! - Factories that build those wrappers from a [`KbConfig`]
//!
//! ## Architecture
//!
//! ```text
//! kbsync-core domain code (store, responder)
//!        ↓
//!   model_adapter (this module) - wrappers + conversions
//!        ↓
//!     kbsync-model implementations (Ollama over HTTP)
//! ```

use std::sync::Arc;

use kbsync_model::prompt::{answer_prompt, summary_prompt, truncate_chars};
use kbsync_model::{EmbeddingModel, ModelError, OllamaConfig, ProviderKind, TextModel};
use tracing::debug;

use crate::collaborators::{Embedder, ResponseGenerator, Summarizer};
use crate::config::KbConfig;
use crate::errors::{KbError, KbResult};

/// Characters of file content placed in a summary prompt.
pub const MAX_PROMPT_CONTENT_CHARS: usize = 16_000;

// ============================================================================
// Error Conversion
// ============================================================================

/// Convert a kbsync-model error to a kbsync-core error.
///
/// `collaborator` names the role (summarizer, embedder, generator) in messages.
pub fn from_model_error(err: ModelError, collaborator: &str) -> KbError {
    let retryable = err.is_retryable();

    match err {
        ModelError::Unreachable { url, message } => {
            KbError::transport(collaborator, format!("{}: {}", url, message))
        }

        ModelError::Http { .. } => KbError::collaborator(collaborator, err.to_string(), retryable),

        ModelError::DimensionMismatch {
            expected, actual, ..
        } => KbError::DimensionMismatch { expected, actual },

        ModelError::ProviderNotAvailable { provider, reason } => KbError::invalid_config(
            format!("provider '{}' is not available: {}", provider, reason),
            "Rebuild with the provider feature or set collaborators.provider",
        ),

        ModelError::InvalidConfig { message } => KbError::invalid_config(
            message,
            "Check the collaborators section of .kbsync/config.yaml",
        ),

        ModelError::InvalidResponse { .. } | ModelError::Json(_) => {
            KbError::collaborator(collaborator, err.to_string(), false)
        }
    }
}

/// The kbsync-model client settings implied by a [`KbConfig`].
pub fn ollama_config(config: &KbConfig) -> OllamaConfig {
    OllamaConfig {
        url: config.collaborators.url.clone(),
        embedding_model: config.collaborators.embedding_model.clone(),
        text_model: config.collaborators.text_model.clone(),
        dimension: config.store.dimension,
        request_timeout_secs: config.collaborators.timeout_secs,
    }
}

// ============================================================================
// Embedder
// ============================================================================

/// [`Embedder`] backed by a kbsync-model embedding model.
#[derive(Debug)]
pub struct ModelEmbedder {
    model: Box<dyn EmbeddingModel>,
}

impl ModelEmbedder {
    pub fn new(model: Box<dyn EmbeddingModel>) -> Self {
        Self { model }
    }
}

impl Embedder for ModelEmbedder {
    fn embed(&self, text: &str) -> KbResult<Vec<f32>> {
        self.model
            .embed_one(text)
            .map_err(|e| from_model_error(e, "embedder"))
    }

    fn dimension(&self) -> usize {
        self.model.dimension()
    }
}

// ============================================================================
// Summarizers
// ============================================================================

/// [`Summarizer`] that asks a text model for a short description.
#[derive(Debug)]
pub struct ModelSummarizer {
    model: Box<dyn TextModel>,
    max_chars: usize,
}

impl ModelSummarizer {
    pub fn new(model: Box<dyn TextModel>, max_chars: usize) -> Self {
        Self { model, max_chars }
    }
}

impl Summarizer for ModelSummarizer {
    fn summarize(&self, text: &str) -> KbResult<String> {
        let prompt = summary_prompt(text, MAX_PROMPT_CONTENT_CHARS);
        let summary = self
            .model
            .generate(&prompt)
            .map_err(|e| from_model_error(e, "summarizer"))?;

        if summary.is_empty() {
            return Err(KbError::collaborator(
                "summarizer",
                format!("model '{}' returned an empty summary", self.model.model_id()),
                false,
            ));
        }
        Ok(truncate_chars(&summary, self.max_chars).to_string())
    }
}

/// [`Summarizer`] that uses the leading text of the file itself.
///
/// Needs no model server; used when `collaborators.provider` is `excerpt`.
#[derive(Debug, Clone, Copy)]
pub struct ExcerptSummarizer {
    max_chars: usize,
}

impl ExcerptSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Summarizer for ExcerptSummarizer {
    fn summarize(&self, text: &str) -> KbResult<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok("(empty file)".to_string());
        }
        Ok(truncate_chars(trimmed, self.max_chars).to_string())
    }
}

// ============================================================================
// Response generator
// ============================================================================

/// [`ResponseGenerator`] backed by a text model.
#[derive(Debug)]
pub struct ModelResponseGenerator {
    model: Box<dyn TextModel>,
}

impl ModelResponseGenerator {
    pub fn new(model: Box<dyn TextModel>) -> Self {
        Self { model }
    }
}

impl ResponseGenerator for ModelResponseGenerator {
    fn generate(&self, issue_text: &str, context: &[String]) -> KbResult<String> {
        self.model
            .generate(&answer_prompt(issue_text, context))
            .map_err(|e| from_model_error(e, "generator"))
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Create the configured summarizer.
pub fn create_summarizer(config: &KbConfig) -> KbResult<Arc<dyn Summarizer>> {
    let max_chars = config.collaborators.summary_max_chars;
    match config.collaborators.provider {
        ProviderKind::Excerpt => {
            debug!("Using excerpt summaries ({} chars)", max_chars);
            Ok(Arc::new(ExcerptSummarizer::new(max_chars)))
        }
        ProviderKind::Ollama => {
            let model = kbsync_model::create_text_model(&ollama_config(config))
                .map_err(|e| from_model_error(e, "summarizer"))?;
            debug!("Using model summaries from '{}'", model.model_id());
            Ok(Arc::new(ModelSummarizer::new(model, max_chars)))
        }
    }
}

/// Create the configured embedder.
pub fn create_embedder(config: &KbConfig) -> KbResult<Arc<dyn Embedder>> {
    let model = kbsync_model::create_embedding_model(&ollama_config(config))
        .map_err(|e| from_model_error(e, "embedder"))?;
    debug!(
        "Using embeddings from '{}' ({} dims)",
        model.model_id(),
        model.dimension()
    );
    Ok(Arc::new(ModelEmbedder::new(model)))
}

/// Create the configured response generator.
pub fn create_generator(config: &KbConfig) -> KbResult<Arc<dyn ResponseGenerator>> {
    let model = kbsync_model::create_text_model(&ollama_config(config))
        .map_err(|e| from_model_error(e, "generator"))?;
    Ok(Arc::new(ModelResponseGenerator::new(model)))
}

// ============================================================================
// Tests
// ============================================================================
