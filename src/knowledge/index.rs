//! In-memory cosine-similarity index over knowledge chunks.
//!
//! Brute-force search is fine at the corpus sizes a support bot carries.
//! Chunks are kept in insertion order so equal scores rank stably.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::RetrievalError;
use crate::knowledge::{Embedder, KnowledgeChunk, KnowledgeIndex, RetrievedPassage};

pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    chunks: RwLock<Vec<KnowledgeChunk>>,
}

impl EmbeddingIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Append chunks, replacing any earlier chunks of the same documents.
    pub async fn insert(&self, chunks: Vec<KnowledgeChunk>) -> Result<usize, RetrievalError> {
        let dimension = self.embedder.dimension();
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimension) {
            return Err(RetrievalError::DimensionMismatch {
                expected: dimension,
                got: bad.embedding.len(),
            });
        }

        let mut stored = self.chunks.write().await;
        stored.retain(|existing| !chunks.iter().any(|c| c.document_id == existing.document_id));
        let count = chunks.len();
        stored.extend(chunks);
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

#[async_trait]
impl KnowledgeIndex for EmbeddingIndex {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding("embedder returned no vector".into()))?;
        if query_vec.len() != self.embedder.dimension() {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.embedder.dimension(),
                got: query_vec.len(),
            });
        }

        let chunks = self.chunks.read().await;
        let mut scored: Vec<(usize, f32)> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(&query_vec, &c.embedding)))
            .collect();

        // `sort_by` is stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| {
                let chunk = &chunks[i];
                RetrievedPassage {
                    document_id: chunk.document_id.clone(),
                    title: chunk.title.clone(),
                    source: chunk.source.clone(),
                    text: chunk.text.clone(),
                    score,
                }
            })
            .collect())
    }
}

/// Cosine similarity, or 0.0 for mismatched, zero-length, or non-finite
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a * norm_b);
    if similarity.is_finite() { similarity } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::HashingEmbedder;

    fn chunk(doc: &str, ordinal: u32, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            document_id: doc.into(),
            ordinal,
            title: None,
            source: None,
            text: format!("{doc}#{ordinal}"),
            embedding,
        }
    }

    /// Embedder mapping every text to the same unit vector.
    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn ranks_descending_with_stable_ties() {
        let index = EmbeddingIndex::new(Arc::new(ConstEmbedder));
        index
            .insert(vec![
                chunk("a", 0, vec![0.0, 1.0]),
                chunk("b", 0, vec![1.0, 1.0]),
                chunk("c", 0, vec![1.0, 1.0]),
                chunk("d", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = index.search("anything", 10).await.unwrap();
        let order: Vec<&str> = results.iter().map(|p| p.document_id.as_str()).collect();
        assert_eq!(order, ["d", "b", "c", "a"]);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn nan_embedding_ranks_last_without_panicking() {
        let index = EmbeddingIndex::new(Arc::new(ConstEmbedder));
        index
            .insert(vec![
                chunk("broken", 0, vec![f32::NAN, 0.0]),
                chunk("weak", 0, vec![1.0, 1.0]),
                chunk("strong", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = index.search("anything", 10).await.unwrap();
        let order: Vec<&str> = results.iter().map(|p| p.document_id.as_str()).collect();
        assert_eq!(order, ["strong", "weak", "broken"]);
        assert_eq!(results[2].score, 0.0);
    }

    #[test]
    fn cosine_of_nan_is_zero() {
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[f32::INFINITY, 1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn top_k_bounds_results() {
        let index = EmbeddingIndex::new(Arc::new(ConstEmbedder));
        index
            .insert((0..5).map(|i| chunk(&format!("doc{i}"), 0, vec![1.0, 0.0])).collect())
            .await
            .unwrap();
        assert_eq!(index.search("q", 3).await.unwrap().len(), 3);
        assert_eq!(index.search("q", 10).await.unwrap().len(), 5);
        assert!(index.search("q", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reinserting_document_replaces_chunks() {
        let index = EmbeddingIndex::new(Arc::new(ConstEmbedder));
        index
            .insert(vec![chunk("a", 0, vec![1.0, 0.0]), chunk("a", 1, vec![1.0, 0.0])])
            .await
            .unwrap();
        index.insert(vec![chunk("a", 0, vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let index = EmbeddingIndex::new(Arc::new(ConstEmbedder));
        let err = index.insert(vec![chunk("a", 0, vec![1.0, 0.0, 0.0])]).await.unwrap_err();
        assert!(matches!(err, RetrievalError::DimensionMismatch { expected: 2, got: 3 }));
    }

    #[tokio::test]
    async fn hashing_embedder_finds_relevant_passage() {
        let embedder = Arc::new(HashingEmbedder::new(256));
        let texts = [
            "Breathing exercises can calm anxiety and panic attacks.",
            "Regular sleep routines improve mood in depression.",
            "Budgeting tips for monthly household expenses.",
        ];
        let vectors = embedder
            .embed(&texts.iter().map(|t| t.to_string()).collect::<Vec<_>>())
            .await
            .unwrap();
        let chunks = texts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (t, v))| KnowledgeChunk {
                document_id: format!("doc{i}"),
                ordinal: 0,
                title: None,
                source: None,
                text: t.to_string(),
                embedding: v,
            })
            .collect();
        let index = EmbeddingIndex::new(embedder);
        index.insert(chunks).await.unwrap();

        let results = index.search("panic attacks and anxiety", 1).await.unwrap();
        assert_eq!(results[0].document_id, "doc0");
    }
}
