//! Timeout-bounded retrieval that never fails the turn.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RetrievalError;
use crate::knowledge::{KnowledgeIndex, Reranker, RetrievedPassage};

/// With a reranker, similarity search fetches this many candidates per
/// requested passage.
const RERANK_POOL_FACTOR: usize = 3;

/// Passages for one turn, plus whether the backend let us down.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub passages: Vec<RetrievedPassage>,
    pub degraded: bool,
}

pub struct KnowledgeRetriever {
    index: Arc<dyn KnowledgeIndex>,
    reranker: Option<Arc<dyn Reranker>>,
    timeout: Duration,
}

impl KnowledgeRetriever {
    pub fn new(index: Arc<dyn KnowledgeIndex>, timeout: Duration) -> Self {
        Self {
            index,
            reranker: None,
            timeout,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Ranked passages for `query_terms`, at most `top_k`.
    ///
    /// Backend errors and timeouts yield an empty, degraded result.
    pub async fn retrieve(&self, query_terms: &str, top_k: usize) -> Retrieval {
        if top_k == 0 || query_terms.trim().is_empty() {
            return Retrieval::default();
        }
        let pool = if self.reranker.is_some() {
            top_k.saturating_mul(RERANK_POOL_FACTOR)
        } else {
            top_k
        };
        let outcome = tokio::time::timeout(self.timeout, self.index.search(query_terms, pool))
            .await
            .unwrap_or(Err(RetrievalError::Timeout(self.timeout)));

        match outcome {
            Ok(passages) => {
                let mut passages = self.rerank(query_terms, passages).await;
                passages.truncate(top_k);
                debug!(count = passages.len(), top_k, "Retrieved passages");
                Retrieval {
                    passages,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "Knowledge retrieval failed, continuing without passages");
                Retrieval {
                    passages: Vec::new(),
                    degraded: true,
                }
            }
        }
    }

    /// Reranked candidates, or the similarity order if reranking fails.
    async fn rerank(&self, query_terms: &str, passages: Vec<RetrievedPassage>) -> Vec<RetrievedPassage> {
        let Some(reranker) = &self.reranker else {
            return passages;
        };
        if passages.len() < 2 {
            return passages;
        }
        match tokio::time::timeout(self.timeout, reranker.rerank(query_terms, passages.clone())).await {
            Ok(Ok(ranked)) => ranked,
            Ok(Err(e)) => {
                warn!(error = %e, "Reranking failed, keeping similarity order");
                passages
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Reranking timed out, keeping similarity order");
                passages
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    enum Behaviour {
        Ok(usize),
        Fail,
        Hang,
    }

    struct FakeIndex(Behaviour);

    #[async_trait]
    impl KnowledgeIndex for FakeIndex {
        async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
            match self.0 {
                // Ignores top_k.
                Behaviour::Ok(n) => Ok((0..n)
                    .map(|i| RetrievedPassage {
                        document_id: format!("doc{i}"),
                        title: None,
                        source: None,
                        text: "passage".into(),
                        score: 1.0 - i as f32 * 0.1,
                    })
                    .collect()),
                Behaviour::Fail => Err(RetrievalError::Unavailable("connection refused".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn retriever(behaviour: Behaviour) -> KnowledgeRetriever {
        KnowledgeRetriever::new(Arc::new(FakeIndex(behaviour)), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn never_exceeds_top_k() {
        let result = retriever(Behaviour::Ok(10)).retrieve("sleep", 3).await;
        assert_eq!(result.passages.len(), 3);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn smaller_corpus_returns_fewer() {
        let result = retriever(Behaviour::Ok(2)).retrieve("sleep", 3).await;
        assert_eq!(result.passages.len(), 2);
    }

    #[tokio::test]
    async fn backend_failure_returns_empty() {
        let result = retriever(Behaviour::Fail).retrieve("sleep", 3).await;
        assert!(result.passages.is_empty());
        assert!(result.degraded);
    }

    #[tokio::test]
    async fn timeout_returns_empty() {
        let result = retriever(Behaviour::Hang).retrieve("sleep", 3).await;
        assert!(result.passages.is_empty());
        assert!(result.degraded);
    }

    /// Reverses the candidates, or fails.
    struct ReverseReranker {
        fail: bool,
    }

    #[async_trait]
    impl Reranker for ReverseReranker {
        async fn rerank(
            &self,
            _query: &str,
            mut passages: Vec<RetrievedPassage>,
        ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
            if self.fail {
                return Err(RetrievalError::Unavailable("model not loaded".into()));
            }
            passages.reverse();
            Ok(passages)
        }
    }

    #[tokio::test]
    async fn reranker_reorders_before_truncation() {
        let result = retriever(Behaviour::Ok(9))
            .with_reranker(Arc::new(ReverseReranker { fail: false }))
            .retrieve("sleep", 3)
            .await;
        let ids: Vec<&str> = result.passages.iter().map(|p| p.document_id.as_str()).collect();
        assert_eq!(ids, ["doc8", "doc7", "doc6"]);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn reranker_failure_keeps_similarity_order() {
        let result = retriever(Behaviour::Ok(5))
            .with_reranker(Arc::new(ReverseReranker { fail: true }))
            .retrieve("sleep", 2)
            .await;
        let ids: Vec<&str> = result.passages.iter().map(|p| p.document_id.as_str()).collect();
        assert_eq!(ids, ["doc0", "doc1"]);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn zero_top_k_is_empty() {
        let result = retriever(Behaviour::Ok(5)).retrieve("sleep", 0).await;
        assert!(result.passages.is_empty());
        assert!(!result.degraded);
    }
}
