//! OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BatchEmbedder, check_status, http_client, read_json, tag_vectors};
use crate::error::EmbeddingError;
use crate::models::{Batch, ItemEmbedding, ProviderConfig};

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &ProviderConfig) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension as usize,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl BatchEmbedder for OpenAiEmbedder {
    async fn embed_batch(&self, batch: &Batch) -> Result<Vec<ItemEmbedding>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingsRequest {
            model: &self.model,
            input: batch.texts(),
        };

        let response = self
            .authorize(self.client.post(&url))
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: EmbeddingsResponse = read_json(response).await?;

        // entries may come back in any order; `index` is the request position
        let mut data = body.data;
        data.sort_by_key(|d| d.index);
        let vectors = data.into_iter().map(|d| d.embedding).collect();

        tag_vectors(
            batch,
            vectors,
            body.usage.map(|u| u.prompt_tokens),
            self.dimension,
        )
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/models", self.base_url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        check_status(response).await.map(|_| ())
    }
}
