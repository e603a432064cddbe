//! # kbsync-model
//!
//! Model layer for kbsync - the hosted services that summarize, embed and
//! answer.
//!
//! kbsync-core never talks to a model directly. It depends on its own
//! collaborator traits and adapts the clients in this crate to them (see
//! `kbsync_core::model_adapter`). This crate provides:
//!
//! - **Traits**: [`EmbeddingModel`] and [`TextModel`], free of any HTTP detail
//! - **Ollama clients**: `/api/embed` and `/api/generate` over blocking HTTP
//! - **Prompts**: the summary and answer prompts sent to text models
//!
//! ## Design Principles
//!
//! 1. **Production-only**: No mock implementations. Test doubles live in consuming crates.
//! 2. **Single attempt**: Clients make one request and classify the failure;
//!    retries and timeouts are the caller's policy.
//!
//! ## Features
//!
//! - `ollama` (default): Remote inference via the Ollama API
//!
//! ## Usage
//!
//! ```ignore
//! use kbsync_model::{create_embedding_model, EmbeddingModel, OllamaConfig};
//!
//! let model = create_embedding_model(&OllamaConfig::default())?;
//! let vector = model.embed_one("fn main() {}")?;
//! assert_eq!(vector.len(), model.dimension());
//! ```

pub mod config;
pub mod error;
pub mod prompt;

#[cfg(feature = "ollama")]
mod ollama;

pub use config::{
    OllamaConfig, ProviderKind, DEFAULT_DIMENSION, DEFAULT_EMBEDDING_MODEL, DEFAULT_OLLAMA_URL,
    DEFAULT_TEXT_MODEL,
};
pub use error::{ModelError, ModelResult};

#[cfg(feature = "ollama")]
pub use ollama::{OllamaEmbeddingModel, OllamaTextModel};

// ============================================================================
// Embedding Model Trait
// ============================================================================

/// Trait for embedding models.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow use across threads.
pub trait EmbeddingModel: Send + Sync + std::fmt::Debug {
    /// Generate embeddings for a batch of texts, one per input in order.
    fn embed(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>>;

    /// Generate the embedding for a single text.
    fn embed_one(&self, text: &str) -> ModelResult<Vec<f32>> {
        let mut vectors = self.embed(&[text])?;
        match vectors.pop() {
            Some(v) if vectors.is_empty() => Ok(v),
            _ => Err(ModelError::invalid_response(
                self.model_id(),
                "expected exactly one embedding",
            )),
        }
    }

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the model ID.
    fn model_id(&self) -> &str;
}

// ============================================================================
// Text Model Trait
// ============================================================================

/// Trait for text generation models.
pub trait TextModel: Send + Sync + std::fmt::Debug {
    /// Generate a completion for `prompt`.
    fn generate(&self, prompt: &str) -> ModelResult<String>;

    /// Get the model ID.
    fn model_id(&self) -> &str;
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Create an embedding model from configuration.
#[cfg(feature = "ollama")]
pub fn create_embedding_model(config: &OllamaConfig) -> ModelResult<Box<dyn EmbeddingModel>> {
    Ok(Box::new(OllamaEmbeddingModel::new(config)?))
}

/// Create an embedding model from configuration.
#[cfg(not(feature = "ollama"))]
pub fn create_embedding_model(_config: &OllamaConfig) -> ModelResult<Box<dyn EmbeddingModel>> {
    Err(ModelError::ProviderNotAvailable {
        provider: "ollama".to_string(),
        reason: "kbsync-model was built without the 'ollama' feature".to_string(),
    })
}

/// Create a text model from configuration.
#[cfg(feature = "ollama")]
pub fn create_text_model(config: &OllamaConfig) -> ModelResult<Box<dyn TextModel>> {
    Ok(Box::new(OllamaTextModel::new(config)?))
}

/// Create a text model from configuration.
#[cfg(not(feature = "ollama"))]
pub fn create_text_model(_config: &OllamaConfig) -> ModelResult<Box<dyn TextModel>> {
    Err(ModelError::ProviderNotAvailable {
        provider: "ollama".to_string(),
        reason: "kbsync-model was built without the 'ollama' feature".to_string(),
    })
}
