//! Text embedders.
//!
//! `HashingEmbedder` is deterministic and offline; `HttpEmbedder` calls an
//! OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, RetrievalError};

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output dimension.
    fn dimension(&self) -> usize;

    /// Embed a batch. Output order matches input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

// ── Feature hashing ─────────────────────────────────────────────────

/// Signed feature-hashing embedder over lower-cased word unigrams and bigrams.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSION: usize = 384;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        let mut add = |feature: &str, weight: f32| {
            let hash = fnv1a(feature.as_bytes());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign * weight;
        };

        for token in &tokens {
            add(token, 1.0);
        }
        for pair in tokens.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// 64-bit FNV-1a. Stable across builds, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

// ── HTTP embeddings ─────────────────────────────────────────────────

/// Settings for a remote embeddings endpoint.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Full URL of the `/embeddings` endpoint.
    pub url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub dimension: usize,
}

impl EmbeddingConfig {
    /// `None` when `CARE_ASSIST_EMBEDDINGS_URL` is unset.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(url) = std::env::var("CARE_ASSIST_EMBEDDINGS_URL") else {
            return Ok(None);
        };
        let model = std::env::var("CARE_ASSIST_EMBEDDINGS_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let dimension = match std::env::var("CARE_ASSIST_EMBEDDINGS_DIM") {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "CARE_ASSIST_EMBEDDINGS_DIM".into(),
                message: format!("'{raw}' is not a positive integer"),
            })?,
            Err(_) => 1536,
        };
        Ok(Some(Self {
            url,
            api_key: std::env::var("CARE_ASSIST_EMBEDDINGS_KEY").ok().map(SecretString::from),
            model,
            dimension,
        }))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible embeddings client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut request = self.client.post(&self.config.url).json(&EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::Unavailable(format!("embeddings request: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Embedding(format!("embeddings endpoint returned {status}")));
        }
        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("embeddings body: {e}")))?;

        if body.data.len() != texts.len() {
            return Err(RetrievalError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }
        body.data.sort_by_key(|d| d.index);
        for d in &body.data {
            if d.embedding.len() != self.config.dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: self.config.dimension,
                    got: d.embedding.len(),
                });
            }
        }
        debug!(count = body.data.len(), model = %self.config.model, "Embedded batch");
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_one("Feeling anxious before exams");
        let b = embedder.embed_one("feeling ANXIOUS before exams!");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let v = HashingEmbedder::new(16).embed_one("   ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn fnv_known_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let embedder = HashingEmbedder::new(32);
        let texts = vec!["sleep".to_string(), "worry".to_string()];
        let out = embedder.embed(&texts).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], embedder.embed_one("sleep"));
        assert_eq!(out[1], embedder.embed_one("worry"));
    }
}
