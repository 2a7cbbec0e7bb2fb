//! # docrag-embed
//!
//! Embedding client for docrag. Talks to an OpenAI-compatible `/embeddings`
//! endpoint and implements the [`docrag_core::Embedder`] seam. Batching for
//! ingestion lives in [`embed_in_batches`], which callers drive with their
//! configured batch size.

use std::time::Duration;

use async_trait::async_trait;
use docrag_core::{EmbedError, Embedder};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for the embedding client.
#[derive(Debug, Clone)]
pub struct EmbedClientConfig {
    /// Provider base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Bearer token
    pub api_key: String,
    /// Model identifier
    pub model: String,
    /// Expected vector dimension
    pub dimension: usize,
    /// Request deadline
    pub timeout: Duration,
}

/// OpenAI-compatible embedding client.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    config: EmbedClientConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbedClientConfig) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbedError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbedError::InvalidResponse(
                "cannot embed empty text".to_string(),
            ));
        }

        debug!("embedding {} texts with {}", texts.len(), self.config.model);

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Unavailable(format!(
                "provider returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbedError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // Providers return data indexed; restore request order explicitly.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        for datum in &data {
            if datum.embedding.len() != self.config.dimension {
                return Err(EmbedError::InvalidResponse(format!(
                    "expected dimension {}, got {}",
                    self.config.dimension,
                    datum.embedding.len()
                )));
            }
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Embed texts through `embedder` in request batches of `batch_size`,
/// preserving input order. The ingestion worker drives this with its
/// configured batch size (default 100).
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[&str],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if texts.is_empty() {
        return Ok(vec![]);
    }
    let batch_size = batch_size.max(1);

    let mut vectors = Vec::with_capacity(texts.len());
    for (i, batch) in texts.chunks(batch_size).enumerate() {
        debug!("embedding batch {} ({} texts)", i + 1, batch.len());
        let mut batch_vectors = embedder.embed(batch).await?;
        vectors.append(&mut batch_vectors);
    }

    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder that records call counts.
    struct CountingEmbedder {
        dimension: usize,
        calls: AtomicUsize,
        max_batch: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
                max_batch: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting-embedder"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.max_batch.fetch_max(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let seed = t.len() as f32;
                    (0..self.dimension).map(|i| seed + i as f32).collect()
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_embed_in_batches_splits_requests() {
        let embedder = CountingEmbedder::new(4);
        let texts: Vec<String> = (0..25).map(|i| format!("text {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let vectors = embed_in_batches(&embedder, &refs, 10).await.unwrap();

        assert_eq!(vectors.len(), 25);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(embedder.max_batch.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_embed_in_batches_preserves_order() {
        let embedder = CountingEmbedder::new(2);
        let texts = ["a", "bb", "ccc", "dddd"];

        let vectors = embed_in_batches(&embedder, &texts, 2).await.unwrap();

        // First component encodes input length in the mock.
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_embed_in_batches_empty() {
        let embedder = CountingEmbedder::new(2);
        let vectors = embed_in_batches(&embedder, &[], 10).await.unwrap();
        assert!(vectors.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embedder_rejects_empty_text() {
        let embedder = OpenAiEmbedder::new(EmbedClientConfig {
            base_url: "http://localhost:9999/v1".to_string(),
            api_key: "test".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        let result = embedder.embed(&["valid", "  "]).await;
        assert!(matches!(result.unwrap_err(), EmbedError::InvalidResponse(_)));
    }

    #[test]
    fn test_response_parsing_restores_order() {
        let json = r#"{"data": [
            {"index": 1, "embedding": [2.0]},
            {"index": 0, "embedding": [1.0]}
        ]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0]);
        assert_eq!(parsed.data[1].embedding, vec![2.0]);
    }
}
