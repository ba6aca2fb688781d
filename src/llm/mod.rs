pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

/// Sends the schema instructions and the user's question to a model.
///
/// Implementations send the instructions first and the question second and
/// return the trimmed text of the reply.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, question: &str, instructions: &str) -> Result<String, LlmError>;
}

pub struct LlmManager {
    generator: Box<dyn SqlGenerator + Send + Sync>,
    backend: String,
    model: String,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let generator: Box<dyn SqlGenerator + Send + Sync> = match config.backend.as_str() {
            "gemini" => Box::new(providers::gemini::GeminiProvider::new(config)?),
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self {
            generator,
            backend: config.backend.clone(),
            model: config.model.clone(),
        })
    }

    /// Wraps an already constructed generator.
    #[cfg(test)]
    pub fn with_generator(generator: Box<dyn SqlGenerator + Send + Sync>, model: &str) -> Self {
        Self {
            generator,
            backend: "custom".to_string(),
            model: model.to_string(),
        }
    }

    pub async fn generate(&self, question: &str, instructions: &str) -> Result<String, LlmError> {
        self.generator.generate(question, instructions).await
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// reqwest client honouring the optional configured timeout.
pub(crate) fn http_client(config: &LlmConfig) -> Result<reqwest::Client, LlmError> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder
        .build()
        .map_err(|e| LlmError::ConnectionError(e.to_string()))
}

/// Trims a reply and rejects one that is empty.
pub(crate) fn finish_reply(content: &str) -> Result<String, LlmError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(LlmError::ResponseError("Model returned an empty reply".to_string()));
    }
    Ok(trimmed.to_string())
}
