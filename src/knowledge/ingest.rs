//! Document chunking, embedding, and persistence.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{info, warn};

use crate::error::{ConfigError, RetrievalError};
use crate::knowledge::{Document, EmbeddingIndex, KnowledgeChunk};
use crate::store::KnowledgeStore;

/// Default passage budget in characters.
pub const DEFAULT_CHUNK_CHARS: usize = 1200;
/// Default overlap carried into the next passage.
pub const DEFAULT_OVERLAP_CHARS: usize = 200;

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+\s+").unwrap());

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        let sentence = text[start..m.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = m.end();
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Hard-split on char boundaries, for sentences longer than the budget.
fn split_chars(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max_chars).map(|c| c.iter().collect()).collect()
}

/// Split text into passages of at most `max_chars` (plus overlap).
///
/// Paragraphs are packed whole where they fit; oversized paragraphs fall
/// back to sentences. Each new passage starts with the previous passage's
/// trailing sentences, up to `overlap_chars`.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut units: Vec<String> = Vec::new();
    for paragraph in PARAGRAPH_BREAK.split(text) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if paragraph.chars().count() <= max_chars {
            units.push(paragraph.to_string());
            continue;
        }
        for sentence in split_sentences(paragraph) {
            if sentence.chars().count() <= max_chars {
                units.push(sentence);
            } else {
                units.extend(split_chars(&sentence, max_chars));
            }
        }
    }

    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;
    let mut fresh = 0usize;

    for unit in units {
        let unit_len = unit.chars().count();
        if fresh > 0 && current_len + unit_len > max_chars {
            let chunk = current.join("\n\n");
            current = overlap_tail(&chunk, overlap_chars);
            current_len = current.iter().map(|s| s.chars().count()).sum();
            chunks.push(chunk);
            fresh = 0;
        }
        current_len += unit_len;
        current.push(unit);
        fresh += 1;
    }
    if fresh > 0 {
        chunks.push(current.join("\n\n"));
    }
    chunks
}

fn overlap_tail(chunk: &str, overlap_chars: usize) -> Vec<String> {
    if overlap_chars == 0 {
        return Vec::new();
    }
    let mut tail = Vec::new();
    let mut len = 0;
    for sentence in split_sentences(chunk).into_iter().rev() {
        let n = sentence.chars().count();
        if len + n > overlap_chars {
            break;
        }
        len += n;
        tail.push(sentence);
    }
    tail.reverse();
    tail
}

/// Read every `.md` / `.txt` file in `dir` as a document, sorted by file name.
pub fn load_dir(dir: &Path) -> Result<Vec<Document>, ConfigError> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"))
        })
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)?;
        let id = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let title = path.file_stem().and_then(|s| s.to_str()).map(|s| s.replace(['_', '-'], " "));
        documents.push(Document {
            id,
            title,
            source: Some(path.display().to_string()),
            text,
        });
    }
    Ok(documents)
}

/// Chunks, embeds, persists, and indexes documents.
pub struct Ingestor {
    index: Arc<EmbeddingIndex>,
    store: Arc<dyn KnowledgeStore>,
}

impl Ingestor {
    pub fn new(index: Arc<EmbeddingIndex>, store: Arc<dyn KnowledgeStore>) -> Self {
        Self { index, store }
    }

    /// Ingest documents, replacing earlier versions with the same id.
    /// Returns the number of passages stored.
    pub async fn ingest(&self, documents: Vec<Document>) -> Result<usize, RetrievalError> {
        let mut total = 0;
        for document in documents {
            let passages = chunk_text(&document.text, DEFAULT_CHUNK_CHARS, DEFAULT_OVERLAP_CHARS);
            if passages.is_empty() {
                warn!(document_id = %document.id, "Document has no text, skipping");
                continue;
            }
            let embeddings = self.index.embedder().embed(&passages).await?;
            if embeddings.len() != passages.len() {
                return Err(RetrievalError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    passages.len(),
                    embeddings.len()
                )));
            }
            let chunks: Vec<KnowledgeChunk> = passages
                .into_iter()
                .zip(embeddings)
                .enumerate()
                .map(|(ordinal, (text, embedding))| KnowledgeChunk {
                    document_id: document.id.clone(),
                    ordinal: ordinal as u32,
                    title: document.title.clone(),
                    source: document.source.clone(),
                    text,
                    embedding,
                })
                .collect();

            self.store.replace_document_chunks(&document.id, &chunks).await?;
            total += self.index.insert(chunks).await?;
            info!(document_id = %document.id, "Ingested document");
        }
        Ok(total)
    }

    /// Load previously persisted passages into the index. Passages embedded
    /// with a different dimension are skipped.
    pub async fn load_persisted(&self) -> Result<usize, RetrievalError> {
        let dimension = self.index.embedder().dimension();
        let (usable, stale): (Vec<_>, Vec<_>) = self
            .store
            .list_chunks()
            .await?
            .into_iter()
            .partition(|c| c.embedding.len() == dimension);
        if !stale.is_empty() {
            warn!(
                count = stale.len(),
                dimension, "Skipping persisted passages with a different embedding dimension"
            );
        }
        self.index.insert(usable).await
    }
}
