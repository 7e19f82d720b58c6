//! Embedding providers: the single-batch network call behind the pipeline.

mod ollama;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::EmbeddingError;
use crate::models::{Batch, ItemEmbedding, ProviderConfig, ProviderKind};
use crate::utils::distribute_tokens;

pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

/// Performs exactly one provider request for one batch.
///
/// Returned embeddings are tagged with their position inside the batch
/// (`0..batch.len()`), not the global item index.
#[async_trait]
pub trait BatchEmbedder: Send + Sync {
    async fn embed_batch(&self, batch: &Batch) -> Result<Vec<ItemEmbedding>, EmbeddingError>;

    /// Declared vector size.
    fn dimension(&self) -> usize;

    fn model(&self) -> &str;

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}

pub type SharedEmbedder = Arc<dyn BatchEmbedder>;

pub fn create_provider(config: &ProviderConfig) -> Result<SharedEmbedder, EmbeddingError> {
    let provider: SharedEmbedder = match config.kind {
        ProviderKind::Ollama => Arc::new(OllamaEmbedder::new(config)?),
        ProviderKind::OpenAi => Arc::new(OpenAiEmbedder::new(config)?),
    };
    Ok(provider)
}

fn http_client(config: &ProviderConfig) -> Result<reqwest::Client, EmbeddingError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))
}

/// Turn a non-success response into the matching error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EmbeddingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EmbeddingError::from_status(status.as_u16(), body))
}

/// Read the whole body, then decode it. Only a malformed payload is a
/// `ParseError`; a body that stalls or breaks off keeps the transport
/// classification from `From<reqwest::Error>`.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, EmbeddingError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| EmbeddingError::ParseError(e.to_string()))
}

/// Pair vectors (already in request order) with batch-local indices.
fn tag_vectors(
    batch: &Batch,
    vectors: Vec<Vec<f32>>,
    total_tokens: Option<u32>,
    dimension: usize,
) -> Result<Vec<ItemEmbedding>, EmbeddingError> {
    if vectors.len() != batch.len() {
        return Err(EmbeddingError::ParseError(format!(
            "expected {} embeddings, got {}",
            batch.len(),
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::ParseError(format!(
            "expected {dimension}-dimensional vectors, got {}",
            bad.len()
        )));
    }

    let tokens = distribute_tokens(&batch.texts(), total_tokens);
    Ok(vectors
        .into_iter()
        .zip(tokens)
        .enumerate()
        .map(|(item_index, (vector, token_count))| ItemEmbedding {
            item_index,
            vector,
            token_count,
        })
        .collect())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InputItem;

    fn batch(texts: &[&str]) -> Batch {
        Batch {
            batch_index: 3,
            items: InputItem::from_texts(texts.iter().copied()),
        }
    }

    #[test]
    fn test_tag_vectors_uses_local_indices() {
        let tagged = tag_vectors(
            &batch(&["abcd", "abcdabcd"]),
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            Some(6),
            2,
        )
        .unwrap();

        assert_eq!(tagged[0].item_index, 0);
        assert_eq!(tagged[1].item_index, 1);
        assert_eq!(tagged[0].token_count + tagged[1].token_count, 6);
    }

    #[test]
    fn test_tag_vectors_rejects_count_mismatch() {
        let err = tag_vectors(&batch(&["a", "b"]), vec![vec![1.0]], None, 1).unwrap_err();
        assert!(matches!(err, EmbeddingError::ParseError(_)));
    }

    #[test]
    fn test_tag_vectors_rejects_wrong_dimension() {
        let err = tag_vectors(&batch(&["a"]), vec![vec![1.0, 2.0]], None, 3).unwrap_err();
        assert!(matches!(err, EmbeddingError::ParseError(_)));
    }

    #[test]
    fn test_create_provider_per_kind() {
        let mut config = ProviderConfig::default();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model(), config.model);

        config.kind = ProviderKind::OpenAi;
        config.dimension = 1536;
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.dimension(), 1536);
    }
}
