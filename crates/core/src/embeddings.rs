use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1_536;

/// Provider-side input cap; longer text is truncated before the request.
const MAX_EMBED_CHARS: usize = 8_000;

/// Turns text into a fixed-length vector. One deployment uses one embedding
/// model; the ingestion worker calls this once per chunk and the answer
/// composer once per question.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        (**self).embed(text).await
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        api_key: Option<String>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            model: model.into(),
            dimensions,
            api_key,
            client: Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        if text.trim().is_empty() {
            return Err(BackendError::Request(
                "cannot embed empty text".to_string(),
            ));
        }

        let truncated = truncate_chars(text, MAX_EMBED_CHARS);
        if truncated.len() < text.len() {
            tracing::warn!(
                original_chars = text.chars().count(),
                limit = MAX_EMBED_CHARS,
                "text truncated before embedding"
            );
        }

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&EmbeddingsRequest {
                model: &self.model,
                input: truncated,
            });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "embeddings".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: EmbeddingsResponse = response.json().await?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| BackendError::BackendResponse {
                backend: "embeddings".to_string(),
                details: "response contained no embedding".to_string(),
            })?;

        if vector.len() != self.dimensions {
            return Err(BackendError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!(
                    "embedding dimension {} does not match configured {}",
                    vector.len(),
                    self.dimensions
                ),
            });
        }

        Ok(vector)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

/// Deterministic local embedder: hashed word and character-trigram buckets,
/// L2-normalized. No network, stable across runs; suitable for offline
/// deployments and tests rather than semantic quality.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();

        for word in lowered.split_whitespace() {
            vector[bucket(word.as_bytes(), self.dimensions)] += 1.0;

            let characters: Vec<char> = word.chars().collect();
            for window in characters.windows(3) {
                let trigram: String = window.iter().collect();
                vector[bucket(trigram.as_bytes(), self.dimensions)] += 1.0;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

fn bucket(bytes: &[u8], dimensions: usize) -> usize {
    // FNV-1a keeps the bucketing stable across platforms and runs.
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    (hash % dimensions as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let first = embedder.embed("quarterly revenue report").await.expect("embed");
        let second = embedder.embed("quarterly revenue report").await.expect("embed");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn hash_embedder_outputs_configured_length() {
        let embedder = HashEmbedder::new(64);
        let vector = embedder.embed("hello world").await.expect("embed");
        assert_eq!(vector.len(), 64);
        assert_eq!(embedder.dimensions(), 64);
    }

    #[tokio::test]
    async fn hash_embedder_vectors_are_normalized() {
        let embedder = HashEmbedder::new(64);
        let vector = embedder.embed("normalize me please").await.expect("embed");
        let magnitude: f32 = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "aéiöu".repeat(4);
        let truncated = truncate_chars(&text, 7);
        assert_eq!(truncated.chars().count(), 7);
        assert!(text.starts_with(truncated));
    }
}
