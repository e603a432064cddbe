//! Configuration types for kbsync-model.

use serde::{Deserialize, Serialize};

/// Default Ollama server URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default embedding model (768-dimensional).
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Default text model for summaries and answers.
pub const DEFAULT_TEXT_MODEL: &str = "llama3.2";

/// Default embedding dimension, matching [`DEFAULT_EMBEDDING_MODEL`].
pub const DEFAULT_DIMENSION: usize = 768;

// ============================================================================
// ProviderKind
// ============================================================================

/// Which backend produces summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote Ollama API.
    #[default]
    Ollama,
    /// Leading excerpt of the file, no model involved.
    Excerpt,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Excerpt => write!(f, "excerpt"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "excerpt" | "none" => Ok(Self::Excerpt),
            _ => Err(format!(
                "Unknown provider: '{}'. Use 'ollama' or 'excerpt'.",
                s
            )),
        }
    }
}

// ============================================================================
// OllamaConfig
// ============================================================================

/// Connection settings for an Ollama server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaConfig {
    /// Base URL of the server.
    pub url: String,

    /// Model used for `/api/embed`.
    pub embedding_model: String,

    /// Model used for `/api/generate`.
    pub text_model: String,

    /// Expected embedding dimension.
    pub dimension: usize,

    /// HTTP request timeout in seconds (0 disables it).
    pub request_timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_OLLAMA_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            request_timeout_secs: 60,
        }
    }
}

impl OllamaConfig {
    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("ollama".parse::<ProviderKind>(), Ok(ProviderKind::Ollama));
        assert_eq!("Excerpt".parse::<ProviderKind>(), Ok(ProviderKind::Excerpt));
        assert!("candle".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::Excerpt.to_string(), "excerpt");
    }

    #[test]
    fn test_ollama_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.dimension, 768);
        assert_eq!(config.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_base_url_trims_slash() {
        let config = OllamaConfig {
            url: "http://gpu-box:11434/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "http://gpu-box:11434");
    }

    #[test]
    fn test_ollama_config_yaml_keys() {
        let yaml = "url: http://h:1\nembeddingModel: e\ntextModel: t\ndimension: 4\nrequestTimeoutSecs: 5\n";
        let config: OllamaConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.embedding_model, "e");
        assert_eq!(config.request_timeout_secs, 5);
    }
}
