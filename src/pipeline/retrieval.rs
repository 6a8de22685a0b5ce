//! Evidence Source over an embedded passage index.
//!
//! The question is embedded, the top-K passages by cosine similarity are
//! taken from the index, and a reranker keeps the best top-N.

use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::pipeline::collaborators::{CollaboratorError, EvidenceSource, Passage};
use crate::pipeline::ollama::LlmClient;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corpus I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corpus line {line}: {reason}")]
    Corpus { line: usize, reason: String },

    #[error("Embedding cache error: {0}")]
    Cache(String),
}

impl From<rusqlite::Error> for RetrievalError {
    fn from(err: rusqlite::Error) -> Self {
        RetrievalError::Cache(err.to_string())
    }
}

impl From<RetrievalError> for CollaboratorError {
    fn from(err: RetrievalError) -> Self {
        CollaboratorError::Unavailable(err.to_string())
    }
}

// ═══════════════════════════════════════════════════════════
// Embedding
// ═══════════════════════════════════════════════════════════

pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Embeddings from an Ollama embedding model.
pub struct OllamaEmbedder {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: Arc<dyn LlmClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

impl EmbeddingModel for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.client
            .embed(&self.model, text)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))
    }
}

/// Embeddings memoised in the `embedding_cache` table, keyed on model and
/// text, so an unchanged corpus is embedded once per database.
pub struct CachedEmbedder {
    inner: Box<dyn EmbeddingModel>,
    model: String,
    conn: Mutex<Connection>,
}

impl CachedEmbedder {
    /// `conn` must already carry the `embedding_cache` migration.
    pub fn new(inner: Box<dyn EmbeddingModel>, model: &str, conn: Connection) -> Self {
        Self {
            inner,
            model: model.to_string(),
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RetrievalError> {
        self.conn
            .lock()
            .map_err(|_| RetrievalError::Cache("connection lock poisoned".into()))
    }

    fn cached(&self, text: &str) -> Result<Option<Vec<f32>>, RetrievalError> {
        let json: Option<String> = self
            .lock()?
            .query_row(
                "SELECT embedding_json FROM embedding_cache WHERE model = ?1 AND content = ?2",
                params![self.model, text],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(|e| RetrievalError::Cache(e.to_string())))
            .transpose()
    }

    fn store(&self, text: &str, embedding: &[f32]) -> Result<(), RetrievalError> {
        let json =
            serde_json::to_string(embedding).map_err(|e| RetrievalError::Cache(e.to_string()))?;
        self.lock()?.execute(
            "INSERT OR REPLACE INTO embedding_cache (model, content, embedding_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![self.model, text, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl EmbeddingModel for CachedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        if let Some(embedding) = self.cached(text)? {
            return Ok(embedding);
        }
        let embedding = self.inner.embed(text)?;
        if let Err(e) = self.store(text, &embedding) {
            tracing::warn!(error = %e, "Failed to cache embedding");
        }
        Ok(embedding)
    }
}

// ═══════════════════════════════════════════════════════════
// Index
// ═══════════════════════════════════════════════════════════

/// A passage with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

pub trait VectorIndex: Send + Sync {
    /// Up to `top_k` passages, most similar first.
    fn search(&self, query_embedding: &[f32], top_k: usize)
        -> Result<Vec<ScoredPassage>, RetrievalError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Brute-force cosine index held in memory.
pub struct InMemoryVectorIndex {
    entries: Vec<IndexEntry>,
}

struct IndexEntry {
    passage: Passage,
    embedding: Vec<f32>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Embed and index every passage.
    pub fn from_passages(
        embedder: &dyn EmbeddingModel,
        passages: Vec<Passage>,
    ) -> Result<Self, RetrievalError> {
        let mut index = Self::new();
        for passage in passages {
            let embedding = embedder.embed(&passage.content)?;
            index.add(passage, embedding)?;
        }
        tracing::info!(passages = index.len(), "Built vector index");
        Ok(index)
    }

    pub fn add(&mut self, passage: Passage, embedding: Vec<f32>) -> Result<(), RetrievalError> {
        if let Some(first) = self.entries.first() {
            if first.embedding.len() != embedding.len() {
                return Err(RetrievalError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: embedding.len(),
                });
            }
        }
        self.entries.push(IndexEntry { passage, embedding });
        Ok(())
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, RetrievalError> {
        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(query_embedding, &entry.embedding), entry))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, entry)| ScoredPassage {
                passage: entry.passage.clone(),
                score,
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

// ═══════════════════════════════════════════════════════════
// Reranking
// ═══════════════════════════════════════════════════════════

pub trait Reranker: Send + Sync {
    /// Reorder candidates for the question and keep at most `top_n`.
    fn rerank(&self, question: &str, candidates: Vec<ScoredPassage>, top_n: usize) -> Vec<Passage>;
}

/// Reranks by question-term overlap, breaking ties on vector similarity.
///
/// Writes the overlap into `metadata["relevance_score"]`.
pub struct LexicalReranker;

impl LexicalReranker {
    fn terms(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_lowercase)
            .collect()
    }

    fn overlap(question_terms: &HashSet<String>, content: &str) -> f64 {
        if question_terms.is_empty() {
            return 0.0;
        }
        let content_terms = Self::terms(content);
        let hits = question_terms.intersection(&content_terms).count();
        hits as f64 / question_terms.len() as f64
    }
}

impl Reranker for LexicalReranker {
    fn rerank(&self, question: &str, candidates: Vec<ScoredPassage>, top_n: usize) -> Vec<Passage> {
        let question_terms = Self::terms(question);
        let mut ranked: Vec<(f64, ScoredPassage)> = candidates
            .into_iter()
            .map(|c| (Self::overlap(&question_terms, &c.passage.content), c))
            .collect();

        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.score.partial_cmp(&a.1.score).unwrap_or(std::cmp::Ordering::Equal))
        });

        ranked
            .into_iter()
            .take(top_n)
            .map(|(relevance, scored)| {
                let rounded = (relevance * 10_000.0).round() / 10_000.0;
                scored.passage.with_metadata("relevance_score", rounded)
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════
// Evidence Source
// ═══════════════════════════════════════════════════════════

pub struct VectorEvidenceSource {
    embedder: Box<dyn EmbeddingModel>,
    index: Box<dyn VectorIndex>,
    reranker: Box<dyn Reranker>,
    top_k: usize,
    top_n: usize,
}

impl VectorEvidenceSource {
    pub fn new(
        embedder: Box<dyn EmbeddingModel>,
        index: Box<dyn VectorIndex>,
        reranker: Box<dyn Reranker>,
        top_k: usize,
        top_n: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            reranker,
            top_k,
            top_n,
        }
    }
}

impl EvidenceSource for VectorEvidenceSource {
    fn search(&self, question: &str) -> Result<Vec<Passage>, CollaboratorError> {
        if self.index.is_empty() {
            tracing::warn!("Vector index is empty");
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(question)?;
        let candidates = self.index.search(&query_embedding, self.top_k)?;
        let candidate_count = candidates.len();
        let passages = self.reranker.rerank(question, candidates, self.top_n);

        tracing::info!(candidates = candidate_count, kept = passages.len(), "Retrieved evidence");
        Ok(passages)
    }
}

// ═══════════════════════════════════════════════════════════
// Corpus
// ═══════════════════════════════════════════════════════════

/// Read pre-chunked passages, one JSON object per line
/// (`{"content": "...", "metadata": {...}}`). Blank lines are skipped.
pub fn load_corpus(path: &Path) -> Result<Vec<Passage>, RetrievalError> {
    let file = std::fs::File::open(path)?;
    let mut passages = Vec::new();

    for (i, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let passage: Passage = serde_json::from_str(&line).map_err(|e| RetrievalError::Corpus {
            line: i + 1,
            reason: e.to_string(),
        })?;
        passages.push(passage);
    }

    tracing::info!(path = %path.display(), passages = passages.len(), "Loaded corpus");
    Ok(passages)
}
