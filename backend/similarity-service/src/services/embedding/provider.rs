//! Embedding provider client.
//!
//! Talks to an OpenAI-compatible `/embeddings` endpoint. Each call is a
//! single awaited request; there is no internal retry or rate limiting.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Vector returned by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedEmbedding {
    pub vector: Vec<f32>,
    pub dims: usize,
    /// Whether the provider already returns unit-length vectors
    pub normalized: bool,
    pub model: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn generate(&self, text: &str, model: &str) -> Result<GeneratedEmbedding>;
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    /// Requested output dimensions
    pub dims: usize,
    pub normalized: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpEmbeddingProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn generate(&self, text: &str, model: &str) -> Result<GeneratedEmbedding> {
        debug!(model = model, chars = text.len(), "Requesting embedding");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&EmbeddingRequest {
                model,
                input: text,
                dimensions: self.config.dims,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(AppError::Provider(format!(
                "embedding request failed with {status}: {snippet}"
            )));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::Provider("embedding response had no data".into()))?;

        Ok(GeneratedEmbedding {
            dims: vector.len(),
            vector,
            normalized: self.config.normalized,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
        })
    }
}
