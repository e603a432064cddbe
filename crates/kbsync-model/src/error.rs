//! Error types for kbsync-model.
//!
//! Every error knows whether repeating the same request could succeed, so
//! callers can decide on retries without inspecting messages.

use thiserror::Error;

/// Result type alias for kbsync-model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur in kbsync-model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    // ========================================================================
    // Transport errors
    // ========================================================================
    /// The model server could not be reached.
    #[error("Model server unreachable at {url}: {message}\n\nIs the server running? Check `collaborators.url` in .kbsync/config.yaml.")]
    Unreachable { url: String, message: String },

    /// The model server answered with a non-success status.
    #[error("Model server returned HTTP {status} for '{model_id}': {message}")]
    Http {
        model_id: String,
        status: u16,
        message: String,
    },

    // ========================================================================
    // Response errors
    // ========================================================================
    /// The response body was not what the API promises.
    #[error("Invalid response from model '{model_id}': {message}")]
    InvalidResponse { model_id: String, message: String },

    /// The embedding has the wrong length for the configured model.
    #[error("Embedding dimension mismatch for model '{model_id}': expected {expected}, got {actual}")]
    DimensionMismatch {
        model_id: String,
        expected: usize,
        actual: usize,
    },

    // ========================================================================
    // Provider errors
    // ========================================================================
    /// Provider not available in this build.
    #[error("Provider '{provider}' not available: {reason}")]
    ProviderNotAvailable { provider: String, reason: String },

    /// Client configuration is unusable.
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Create an unreachable-server error.
    pub fn unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-response error.
    pub fn invalid_response(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether the same request may succeed if repeated.
    ///
    /// Connection failures, HTTP 429 and 5xx responses are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable { .. } => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Whether the failure happened before the server produced an answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}
