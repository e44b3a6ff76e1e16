//! Knowledge corpus: ingestion, embeddings, similarity index, retrieval.

pub mod embedding;
pub mod index;
pub mod ingest;
pub mod query;
pub mod rerank;
pub mod retriever;

pub use embedding::{Embedder, EmbeddingConfig, HashingEmbedder, HttpEmbedder};
pub use index::EmbeddingIndex;
pub use ingest::{Ingestor, chunk_text, load_dir};
pub use query::refine_query;
pub use rerank::{HybridReranker, Reranker};
pub use retriever::{KnowledgeRetriever, Retrieval};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// A source document before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub text: String,
}

/// A stored passage with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeChunk {
    pub document_id: String,
    /// Position of this passage within its document.
    pub ordinal: u32,
    pub title: Option<String>,
    pub source: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A ranked passage returned for one query. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub text: String,
    pub score: f32,
}

/// Similarity search over the corpus.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Up to `top_k` passages, best first; ties keep insertion order.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError>;
}
