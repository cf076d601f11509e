//! Utterance embedding behind a trait seam so tests can inject fixed vectors.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// OpenAI-compatible `/embeddings` client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingReply {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building embeddings HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&json!({
            "model": self.model,
            "input": [text],
        }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let reply: EmbeddingReply = request
            .send()
            .await
            .context("embedding request failed")?
            .error_for_status()
            .context("embedding endpoint returned an error status")?
            .json()
            .await
            .context("decoding embedding reply")?;

        reply
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| anyhow!("embedding reply carried no vectors"))
    }
}
