//! Two-tier semantic cache for LLM responses.
//!
//! L1 is an exact LRU keyed by a stable hash of `(provider, model,
//! temperature, normalized prompt)`. L2 holds embeddings of cached
//! prompts and answers on cosine similarity at or above a threshold
//! (default 0.85); an L2 hit is copied forward into L1. TTL-expired
//! entries are pruned lazily on access.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::config::ProviderKind;
use crate::core::errors::Result;
use crate::retrieval::embedding::EmbeddingGenerator;
use crate::retrieval::vector_store::cosine_similarity;

/// Key material for a cache lookup.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// Provider the request targets
    pub provider: ProviderKind,
    /// Model id
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Full prompt text
    pub prompt: String,
}

impl CacheRequest {
    /// Stable hash key over the normalized request.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.as_str().as_bytes());
        hasher.update(self.model.as_bytes());
        hasher.update(self.temperature.to_bits().to_le_bytes());
        hasher.update(normalize_prompt(&self.prompt).as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Whitespace-insensitive prompt normalization for keying.
fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Exact-match key
    pub key: String,
    /// Cached response text
    pub value: String,
    /// Prompt embedding, when the similarity tier is active
    pub embedding: Option<Vec<f32>>,
    /// Insertion time
    pub timestamp: DateTime<Utc>,
    /// Hit counter
    pub hits: u64,
    /// Time-to-live, unlimited when absent
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => {
                let age = now.signed_duration_since(self.timestamp);
                age.to_std().map_or(false, |age| age > ttl)
            }
            None => false,
        }
    }
}

/// Cache hit statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Exact-tier hits
    pub exact_hits: u64,
    /// Similarity-tier hits
    pub similar_hits: u64,
    /// Misses
    pub misses: u64,
    /// Entries currently in the exact tier
    pub l1_entries: usize,
    /// Entries currently in the similarity tier
    pub l2_entries: usize,
}

/// Two-tier semantic response cache. Session-scoped; safe to share across
/// concurrent generations.
pub struct SemanticCache {
    l1: Mutex<LruCache<String, CacheEntry>>,
    l2: Mutex<Vec<CacheEntry>>,
    embeddings: Option<Arc<EmbeddingGenerator>>,
    similarity_threshold: f64,
    exact_hits: AtomicU64,
    similar_hits: AtomicU64,
    misses: AtomicU64,
}

impl SemanticCache {
    /// Default L1 capacity.
    pub const DEFAULT_L1_CAPACITY: usize = 256;

    /// Default similarity threshold for the L2 tier.
    pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

    /// Create a cache. Without an embedding generator, only the exact tier
    /// operates.
    pub fn new(
        embeddings: Option<Arc<EmbeddingGenerator>>,
        similarity_threshold: f64,
    ) -> Self {
        Self {
            l1: Mutex::new(LruCache::new(
                NonZeroUsize::new(Self::DEFAULT_L1_CAPACITY).unwrap(),
            )),
            l2: Mutex::new(Vec::new()),
            embeddings,
            similarity_threshold: similarity_threshold.clamp(0.0, 1.0),
            exact_hits: AtomicU64::new(0),
            similar_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a response for a request.
    pub async fn get(&self, request: &CacheRequest) -> Result<Option<String>> {
        let key = request.key();
        let now = Utc::now();

        // L1 exact tier.
        {
            let mut l1 = self.l1.lock();
            match l1.get_mut(&key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.hits += 1;
                    self.exact_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %&key[..12], "semantic cache exact hit");
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {
                    l1.pop(&key);
                }
                None => {}
            }
        }

        // L2 similarity tier.
        if let Some(embeddings) = &self.embeddings {
            let query = embeddings.embed_text(&request.prompt).await?;
            let mut l2 = self.l2.lock();
            l2.retain(|entry| !entry.is_expired(now));

            let mut best: Option<(f64, usize)> = None;
            for (index, entry) in l2.iter().enumerate() {
                let Some(embedding) = &entry.embedding else {
                    continue;
                };
                let similarity = cosine_similarity(&query, embedding);
                if similarity >= self.similarity_threshold
                    && best.is_none_or(|(s, _)| similarity > s)
                {
                    best = Some((similarity, index));
                }
            }

            if let Some((similarity, index)) = best {
                let entry = &mut l2[index];
                entry.hits += 1;
                let promoted = entry.clone();
                self.similar_hits.fetch_add(1, Ordering::Relaxed);
                debug!(similarity, "semantic cache similarity hit");

                // Promote into L1 under the requested key.
                self.l1.lock().put(key, promoted.clone());
                return Ok(Some(promoted.value));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Store a response in both tiers.
    pub async fn set(
        &self,
        request: &CacheRequest,
        response: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let key = request.key();
        let embedding = match &self.embeddings {
            Some(embeddings) => Some(embeddings.embed_text(&request.prompt).await?),
            None => None,
        };

        let entry = CacheEntry {
            key: key.clone(),
            value: response.to_string(),
            embedding,
            timestamp: Utc::now(),
            hits: 0,
            ttl,
        };

        self.l1.lock().put(key.clone(), entry.clone());
        if entry.embedding.is_some() {
            let mut l2 = self.l2.lock();
            l2.retain(|existing| existing.key != key);
            l2.push(entry);
        }
        Ok(())
    }

    /// Hit/miss statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            exact_hits: self.exact_hits.load(Ordering::Relaxed),
            similar_hits: self.similar_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            l1_entries: self.l1.lock().len(),
            l2_entries: self.l2.lock().len(),
        }
    }
}
