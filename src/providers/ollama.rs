//! Ollama `/api/embed` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BatchEmbedder, check_status, http_client, read_json, tag_vectors};
use crate::error::EmbeddingError;
use crate::models::{Batch, ItemEmbedding, ProviderConfig};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &ProviderConfig) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension as usize,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BatchEmbedder for OllamaEmbedder {
    async fn embed_batch(&self, batch: &Batch) -> Result<Vec<ItemEmbedding>, EmbeddingError> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: batch.texts(),
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let response = check_status(response).await?;

        let body: EmbedResponse = read_json(response).await?;

        tag_vectors(batch, body.embeddings, body.prompt_eval_count, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;
        check_status(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InputItem;
    use crate::providers::test_servers;
    use crate::utils::Retryable;

    fn config(url: String) -> ProviderConfig {
        ProviderConfig {
            url,
            dimension: 3,
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn batch(texts: &[&str]) -> Batch {
        Batch {
            batch_index: 1,
            items: InputItem::from_texts(texts.iter().copied()),
        }
    }

    #[test]
    fn test_base_url_trimming() {
        let embedder = OllamaEmbedder::new(&config("http://localhost:11434/".into())).unwrap();
        assert_eq!(embedder.base_url(), "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_embed_batch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embed")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model": "nomic-embed-text", "input": ["alpha", "beta"]}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                "model": "nomic-embed-text",
                "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]],
                "prompt_eval_count": 4
            }"#,
            )
            .create_async()
            .await;

        let embedder = OllamaEmbedder::new(&config(server.url())).unwrap();
        let result = embedder.embed_batch(&batch(&["alpha", "beta"])).await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.len(), 2);
        assert_eq!(result[1].item_index, 1);
        assert_eq!(result[1].vector, vec![0.4, 0.5, 0.6]);
        assert_eq!(result[0].token_count + result[1].token_count, 4);
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embed")
            .with_status(503)
            .with_body("model is loading")
            .create_async()
            .await;

        let embedder = OllamaEmbedder::new(&config(server.url())).unwrap();
        let err = embedder.embed_batch(&batch(&["alpha"])).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ServerError { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_missing_model_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embed")
            .with_status(404)
            .with_body(r#"{"error": "model \"nomic-embed-text\" not found"}"#)
            .create_async()
            .await;

        let embedder = OllamaEmbedder::new(&config(server.url())).unwrap();
        let err = embedder.embed_batch(&batch(&["alpha"])).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::BadRequest { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_short_response_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_body(r#"{"embeddings": [[0.1, 0.2, 0.3]]}"#)
            .create_async()
            .await;

        let embedder = OllamaEmbedder::new(&config(server.url())).unwrap();
        let err = embedder
            .embed_batch(&batch(&["alpha", "beta"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let embedder = OllamaEmbedder::new(&config("http://127.0.0.1:9".into())).unwrap();
        let err = embedder.health_check().await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout
        ));
    }

    #[tokio::test]
    async fn test_stalled_body_is_retryable_timeout() {
        let url = test_servers::stalled_body().await;
        let embedder = OllamaEmbedder::new(&ProviderConfig {
            timeout_secs: 1,
            ..config(url)
        })
        .unwrap();

        let err = embedder.embed_batch(&batch(&["alpha"])).await.unwrap_err();
        assert_eq!(err, EmbeddingError::Timeout);
        assert!(err.is_retryable());
    }
}
