use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedding, RecallError};
use crate::config::EmbeddingConfig;

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding, RecallError>;
}

pub fn from_config(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>, RecallError> {
    match config.backend.as_str() {
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config))),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        other => Err(RecallError::Config(format!(
            "Unsupported embedding backend: {}",
            other
        ))),
    }
}

/// Ollama's `/api/embeddings`; `all-minilm` gives 384-dimension vectors.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Embedding,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434/api/embeddings".to_string()),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, RecallError> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&OllamaEmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| RecallError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RecallError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let parsed: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            RecallError::Embedding(format!("Failed to parse embedding response: {}", e))
        })?;

        non_empty(parsed.embedding)
    }
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RecallError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            RecallError::Config("API key is required for the openai embedding backend".to_string())
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, RecallError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| RecallError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RecallError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            RecallError::Embedding(format!("Failed to parse embedding response: {}", e))
        })?;

        non_empty(parse_openai_embedding(&response_json)?)
    }
}

fn parse_openai_embedding(response_json: &serde_json::Value) -> Result<Embedding, RecallError> {
    let data = response_json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| RecallError::Embedding("No embedding data in response".to_string()))?;

    let embedding = data
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RecallError::Embedding("No embedding vector in response".to_string()))?
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    Ok(embedding)
}

fn non_empty(embedding: Embedding) -> Result<Embedding, RecallError> {
    if embedding.is_empty() {
        return Err(RecallError::Embedding("Embedding model returned an empty vector".to_string()));
    }
    debug!("Embedded text into {} dimensions", embedding.len());
    Ok(embedding)
}
