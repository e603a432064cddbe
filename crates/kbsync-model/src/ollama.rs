//! Ollama HTTP clients.
//!
//! - `POST /api/embed` with `{"model", "input": [..]}` returns `{"embeddings": [[..]]}`
//! - `POST /api/generate` with `{"model", "prompt", "stream": false}` returns `{"response": ".."}`

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::config::OllamaConfig;
use crate::error::{ModelError, ModelResult};
use crate::{EmbeddingModel, TextModel};

fn http_client(config: &OllamaConfig) -> ModelResult<Client> {
    let mut builder = Client::builder();
    if config.request_timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
    }
    builder
        .build()
        .map_err(|e| ModelError::invalid_config(format!("failed to build HTTP client: {}", e)))
}

/// POST a JSON body and return the parsed JSON response.
fn post_json(client: &Client, base_url: &str, endpoint: &str, model: &str, body: &Value) -> ModelResult<Value> {
    let url = format!("{}{}", base_url, endpoint);
    trace!("POST {} (model {})", url, model);

    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .map_err(|e| ModelError::unreachable(base_url, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().unwrap_or_default();
        return Err(ModelError::Http {
            model_id: model.to_string(),
            status: status.as_u16(),
            message: body_text,
        });
    }

    response
        .json::<Value>()
        .map_err(|e| ModelError::invalid_response(model, e.to_string()))
}

// ============================================================================
// Embeddings
// ============================================================================

/// Embedding model served by Ollama.
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingModel {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingModel {
    /// Create a client for `config.embedding_model`.
    pub fn new(config: &OllamaConfig) -> ModelResult<Self> {
        if config.embedding_model.trim().is_empty() {
            return Err(ModelError::invalid_config("embedding model name is empty"));
        }
        debug!(
            "Ollama embedding model '{}' at {}",
            config.embedding_model,
            config.base_url()
        );
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url().to_string(),
            model: config.embedding_model.clone(),
            dimension: config.dimension,
        })
    }
}

impl EmbeddingModel for OllamaEmbeddingModel {
    fn embed(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.model,
            "input": texts,
        });
        let response = post_json(&self.client, &self.base_url, "/api/embed", &self.model, &body)?;
        let vectors = parse_embed_response(&self.model, &response)?;

        if vectors.len() != texts.len() {
            return Err(ModelError::invalid_response(
                &self.model,
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(ModelError::DimensionMismatch {
                    model_id: self.model.clone(),
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn parse_embed_response(model: &str, json: &Value) -> ModelResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ModelError::invalid_response(model, "missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let values = embedding
            .as_array()
            .ok_or_else(|| ModelError::invalid_response(model, "embedding is not an array"))?;
        let vector = values
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| ModelError::invalid_response(model, "embedding value is not a number"))
            })
            .collect::<ModelResult<Vec<f32>>>()?;
        result.push(vector);
    }
    Ok(result)
}

// ============================================================================
// Generation
// ============================================================================

/// Text model served by Ollama.
#[derive(Debug, Clone)]
pub struct OllamaTextModel {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaTextModel {
    /// Create a client for `config.text_model`.
    pub fn new(config: &OllamaConfig) -> ModelResult<Self> {
        if config.text_model.trim().is_empty() {
            return Err(ModelError::invalid_config("text model name is empty"));
        }
        debug!("Ollama text model '{}' at {}", config.text_model, config.base_url());
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url().to_string(),
            model: config.text_model.clone(),
        })
    }
}

impl TextModel for OllamaTextModel {
    fn generate(&self, prompt: &str) -> ModelResult<String> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let response = post_json(&self.client, &self.base_url, "/api/generate", &self.model, &body)?;
        parse_generate_response(&self.model, &response)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn parse_generate_response(model: &str, json: &Value) -> ModelResult<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ModelError::invalid_response(model, "missing response text"))
}
