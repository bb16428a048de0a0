//! Hybrid lexical + vector retrieval.
//!
//! Merges a BM25-style lexical matcher over chunk content with vector
//! search results. Scores combine as `α·vector + (1−α)·lexical` with
//! α = 0.7 by default; lexical scores are max-normalized into [0, 1]
//! before mixing. Post-filters constrain file extension and path prefix.
//! Ties break by lexicographic file path, and results dedupe by chunk id.

use ahash::{AHashMap, AHashSet};

use crate::core::chunks::CodeChunk;
use crate::core::errors::Result;
use crate::retrieval::embedding::EmbeddingGenerator;
use crate::retrieval::vector_store::{SearchFilter, SearchResult, VectorStore};

/// BM25 parameters.
const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Options for one hybrid query.
#[derive(Debug, Clone)]
pub struct HybridSearchOptions {
    /// Weight of the vector score; the lexical arm gets `1 − α`
    pub alpha: f64,
    /// Results to return
    pub limit: usize,
    /// Restrict results to these extensions (without dots)
    pub extensions: Vec<String>,
    /// Restrict results to paths under this prefix
    pub path_prefix: Option<String>,
    /// Attribute filter forwarded to the vector arm
    pub filter: Option<SearchFilter>,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            limit: 10,
            extensions: Vec::new(),
            path_prefix: None,
            filter: None,
        }
    }
}

/// A merged search hit.
#[derive(Debug, Clone)]
pub struct HybridHit {
    /// The matching chunk
    pub chunk: CodeChunk,
    /// Combined score in [0, 1]
    pub score: f64,
    /// Vector-arm score component
    pub vector_score: f64,
    /// Normalized lexical-arm score component
    pub lexical_score: f64,
}

/// Identifier-aware tokenizer shared by indexing and querying.
///
/// Splits on non-alphanumerics and camelCase boundaries, lowercases, and
/// drops single-character noise.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if raw.is_empty() {
            continue;
        }
        // split camelCase / PascalCase boundaries
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in raw.chars() {
            if ch.is_uppercase() && prev_lower {
                if current.len() > 1 {
                    tokens.push(current.to_ascii_lowercase());
                }
                current = String::new();
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.push(ch);
        }
        if current.len() > 1 {
            tokens.push(current.to_ascii_lowercase());
        }
    }
    tokens
}

/// In-memory BM25 index over a set of chunks.
pub struct LexicalIndex {
    /// token -> (chunk position, term frequency)
    postings: AHashMap<String, Vec<(usize, u32)>>,
    /// chunk position -> (chunk, token count)
    documents: Vec<(CodeChunk, usize)>,
    average_length: f64,
}

impl LexicalIndex {
    /// Build an index from chunks.
    pub fn build(chunks: Vec<CodeChunk>) -> Self {
        let mut postings: AHashMap<String, Vec<(usize, u32)>> = AHashMap::new();
        let mut documents = Vec::with_capacity(chunks.len());
        let mut total_length = 0usize;

        for (position, chunk) in chunks.into_iter().enumerate() {
            let tokens = tokenize(&chunk.content);
            total_length += tokens.len();

            let mut frequencies: AHashMap<String, u32> = AHashMap::new();
            for token in tokens.iter() {
                *frequencies.entry(token.clone()).or_insert(0) += 1;
            }
            for (token, tf) in frequencies {
                postings.entry(token).or_default().push((position, tf));
            }
            documents.push((chunk, tokens.len()));
        }

        let average_length = if documents.is_empty() {
            0.0
        } else {
            total_length as f64 / documents.len() as f64
        };

        Self {
            postings,
            documents,
            average_length,
        }
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// BM25-scored matches for a query, best first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(CodeChunk, f64)> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.documents.is_empty() {
            return Vec::new();
        }

        let n = self.documents.len() as f64;
        let mut scores: AHashMap<usize, f64> = AHashMap::new();

        for token in &query_tokens {
            let Some(posting) = self.postings.get(token) else {
                continue;
            };
            let df = posting.len() as f64;
            let idf = (((n - df + 0.5) / (df + 0.5)) + 1.0).ln();

            for &(position, tf) in posting {
                let doc_length = self.documents[position].1 as f64;
                let tf = f64::from(tf);
                let denom = tf
                    + BM25_K1
                        * (1.0 - BM25_B + BM25_B * doc_length / self.average_length.max(1.0));
                *scores.entry(position).or_insert(0.0) += idf * (tf * (BM25_K1 + 1.0)) / denom;
            }
        }

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    self.documents[a.0]
                        .0
                        .file_path
                        .cmp(&self.documents[b.0].0.file_path)
                })
        });

        ranked
            .into_iter()
            .take(limit)
            .map(|(position, score)| (self.documents[position].0.clone(), score))
            .collect()
    }
}

/// Hybrid searcher over a vector store and a lexical index.
pub struct HybridSearch<'a> {
    store: &'a VectorStore,
    lexical: &'a LexicalIndex,
    embeddings: &'a EmbeddingGenerator,
}

impl<'a> HybridSearch<'a> {
    /// Create a searcher borrowing the three retrieval components.
    pub fn new(
        store: &'a VectorStore,
        lexical: &'a LexicalIndex,
        embeddings: &'a EmbeddingGenerator,
    ) -> Self {
        Self {
            store,
            lexical,
            embeddings,
        }
    }

    /// Run a hybrid query.
    pub async fn search(
        &self,
        query: &str,
        options: &HybridSearchOptions,
    ) -> Result<Vec<HybridHit>> {
        // Over-fetch both arms so post-filtering still fills the limit.
        let fetch = options.limit * 3;

        let query_vector = self.embeddings.embed_text(query).await?;
        let vector_hits: Vec<SearchResult> = self
            .store
            .search(&query_vector, fetch, options.filter.as_ref())
            .await?;

        let lexical_hits = self.lexical.search(query, fetch);
        let max_lexical = lexical_hits
            .iter()
            .map(|(_, s)| *s)
            .fold(0.0f64, f64::max)
            .max(f64::EPSILON);

        let mut merged: AHashMap<String, HybridHit> = AHashMap::new();

        for hit in vector_hits {
            merged.insert(
                hit.chunk.id.clone(),
                HybridHit {
                    vector_score: hit.score,
                    lexical_score: 0.0,
                    score: 0.0,
                    chunk: hit.chunk,
                },
            );
        }

        for (chunk, raw_score) in lexical_hits {
            let normalized = raw_score / max_lexical;
            merged
                .entry(chunk.id.clone())
                .and_modify(|hit| hit.lexical_score = normalized)
                .or_insert(HybridHit {
                    vector_score: 0.0,
                    lexical_score: normalized,
                    score: 0.0,
                    chunk,
                });
        }

        let mut hits: Vec<HybridHit> = merged
            .into_values()
            .filter(|hit| accepts(&hit.chunk, options))
            .map(|mut hit| {
                hit.score =
                    options.alpha * hit.vector_score + (1.0 - options.alpha) * hit.lexical_score;
                hit
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
        });

        // Dedup by id survives the map merge by construction; keep the
        // safety net for identical chunks indexed under two names.
        let mut seen: AHashSet<String> = AHashSet::new();
        hits.retain(|hit| seen.insert(hit.chunk.id.clone()));
        hits.truncate(options.limit);
        Ok(hits)
    }
}

fn accepts(chunk: &CodeChunk, options: &HybridSearchOptions) -> bool {
    if !options.extensions.is_empty() {
        let ext = chunk.file_path.rsplit('.').next().unwrap_or("");
        if !options.extensions.iter().any(|e| e == ext) {
            return false;
        }
    }
    if let Some(prefix) = &options.path_prefix {
        if !(chunk.file_path == *prefix
            || chunk
                .file_path
                .starts_with(&format!("{}/", prefix.trim_end_matches('/'))))
        {
            return false;
        }
    }
    true
}
