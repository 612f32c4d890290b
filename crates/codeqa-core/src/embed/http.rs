//! Embedder backed by an OpenAI-compatible embeddings service

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{CodeQaError, Phase, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Embedder that uses an external HTTP service (vLLM, OpenAI, etc.)
pub struct HttpEmbedder {
    http_client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Create from configuration
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.clone().ok_or_else(|| {
            CodeQaError::Config("embedding.url is required for the http backend".to_string())
        })?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http_client,
            url: format!("{}/v1/embeddings", base.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| CodeQaError::model_unavailable(Phase::Embed, "no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let mut req = self.http_client.post(&self.url).json(&request);
        if let Some(ref api_key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CodeQaError::model_unavailable(
                Phase::Embed,
                format!("embedding service error (HTTP {status}): {body}"),
            ));
        }

        let mut data = response.json::<EmbedResponse>().await?.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }

        tracing::debug!(texts = texts.len(), model = %self.model, "embedded via http");
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
