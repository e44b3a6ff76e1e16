//! Second-pass ordering of retrieved passages.
//!
//! Similarity search casts a wider net than the caller asked for; a
//! reranker then reorders the candidates before they are cut to `top_k`.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::RetrievalError;
use crate::knowledge::RetrievedPassage;

/// Reorders candidate passages for a query, best first.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        passages: Vec<RetrievedPassage>,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError>;
}

/// Weight of the similarity score in the combined score.
const SEMANTIC_WEIGHT: f32 = 0.6;
/// Weight of query-term coverage in the combined score.
const TEXT_WEIGHT: f32 = 0.4;
/// Shorter words carry little signal.
const MIN_TERM_LEN: usize = 3;

/// Blends the similarity score with how many query terms a passage contains.
#[derive(Debug, Default)]
pub struct HybridReranker;

impl HybridReranker {
    pub fn new() -> Self {
        Self
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TERM_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// Share of `query_terms` present in `passage`, in `0.0..=1.0`.
fn text_match(query_terms: &HashSet<String>, passage: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let passage_terms = terms(passage);
    let matched = query_terms.iter().filter(|t| passage_terms.contains(*t)).count();
    matched as f32 / query_terms.len() as f32
}

#[async_trait]
impl Reranker for HybridReranker {
    async fn rerank(
        &self,
        query: &str,
        mut passages: Vec<RetrievedPassage>,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let query_terms = terms(query);
        for passage in &mut passages {
            let semantic = if passage.score.is_finite() { passage.score } else { 0.0 };
            passage.score = semantic * SEMANTIC_WEIGHT + text_match(&query_terms, &passage.text) * TEXT_WEIGHT;
        }
        // Stable: equal scores keep the similarity order.
        passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: &str, text: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            document_id: id.into(),
            title: None,
            source: None,
            text: text.into(),
            score,
        }
    }

    #[test]
    fn text_match_counts_shared_terms() {
        let query = terms("sleep schedule tips");
        assert_eq!(text_match(&query, "A steady sleep schedule helps."), 2.0 / 3.0);
        assert_eq!(text_match(&query, "Unrelated budgeting advice."), 0.0);
        assert_eq!(text_match(&HashSet::new(), "anything"), 0.0);
    }

    #[tokio::test]
    async fn term_coverage_can_overtake_similarity() {
        let ranked = HybridReranker::new()
            .rerank(
                "panic attack breathing",
                vec![
                    passage("general", "Talking to friends can lift your mood.", 0.55),
                    passage("specific", "Slow breathing shortens a panic attack.", 0.50),
                ],
            )
            .await
            .unwrap();
        let order: Vec<&str> = ranked.iter().map(|p| p.document_id.as_str()).collect();
        assert_eq!(order, ["specific", "general"]);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[tokio::test]
    async fn ties_keep_incoming_order() {
        let ranked = HybridReranker::new()
            .rerank(
                "walking",
                vec![passage("a", "Rest well.", 0.4), passage("b", "Eat well.", 0.4)],
            )
            .await
            .unwrap();
        assert_eq!(ranked[0].document_id, "a");
        assert_eq!(ranked[1].document_id, "b");
    }
}
