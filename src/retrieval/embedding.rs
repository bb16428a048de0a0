//! Batched vector embeddings over code chunks.
//!
//! Providers sit behind the [`EmbeddingProvider`] trait: an
//! OpenAI-compatible HTTP endpoint, the local fastembed backend, or the
//! deterministic hashing embedder used for offline smoke runs and tests.
//! The generator batches chunks (default 16) and retries failed batches
//! with exponential backoff; a failed batch is never silently skipped.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::core::chunks::CodeChunk;
use crate::core::errors::{Result, TestMindError};

/// Embedding backend contract.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimension of the vectors this provider produces.
    fn dimension(&self) -> usize;
}

/// Retry policy for batch embedding calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per batch
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per retry
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * self.factor.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Batched embedding generator.
pub struct EmbeddingGenerator {
    provider: Box<dyn EmbeddingProvider>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl EmbeddingGenerator {
    /// Default chunk batch size.
    pub const DEFAULT_BATCH_SIZE: usize = 16;

    /// Create a generator over a provider.
    pub fn new(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Dimension of the configured provider.
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed one free-form text (queries, cached prompts).
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .embed_with_retry(std::slice::from_ref(&text.to_string()))
            .await?;
        vectors
            .pop()
            .ok_or_else(|| TestMindError::internal("provider returned empty embedding batch"))
    }

    /// Populate `embedding` on every chunk, batching provider calls.
    pub async fn embed_chunks(&self, chunks: &mut [CodeChunk]) -> Result<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        let mut offset = 0;
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embed_with_retry(batch).await?;
            if vectors.len() != batch.len() {
                return Err(TestMindError::internal(format!(
                    "provider returned {} vectors for a batch of {}",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (i, vector) in vectors.into_iter().enumerate() {
                chunks[offset + i].embedding = Some(vector);
            }
            offset += batch.len();
            debug!(embedded = offset, total = chunks.len(), "embedding progress");
        }

        Ok(())
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.embed_batch(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "embedding batch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// OpenAI-compatible `/embeddings` endpoint provider.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    /// Create a provider against a base URL (without the `/embeddings`
    /// suffix).
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&json!({
            "model": self.model,
            "input": texts,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TestMindError::resource(
                format!("embedding endpoint returned {status}"),
                "embedding-endpoint",
            ));
        }

        let parsed: EmbeddingsResponse = response.json().await?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Local fastembed backend.
///
/// Model initialization downloads weights on first use; the embedding call
/// itself is CPU-bound and runs inside `block_in_place` so it never stalls
/// the async runtime.
pub struct LocalEmbeddingProvider {
    model: Mutex<fastembed::TextEmbedding>,
    dimension: usize,
}

impl LocalEmbeddingProvider {
    /// Initialize the default local model.
    pub fn new() -> Result<Self> {
        let options =
            fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
                .with_show_download_progress(false);
        let model = fastembed::TextEmbedding::try_new(options).map_err(|e| {
            TestMindError::resource(
                format!("failed to initialize local embedding model: {e}"),
                "fastembed",
            )
        })?;

        Ok(Self {
            model: Mutex::new(model),
            dimension: 384,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts = texts.to_vec();
        tokio::task::block_in_place(|| {
            let mut model = self.model.lock();
            model
                .embed(texts, None)
                .map_err(|e| TestMindError::internal(format!("local embedding failed: {e}")))
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic hashing embedder for tests and offline smoke runs.
///
/// Produces stable unit-norm vectors from token hashes. Similar texts get
/// similar vectors because they share token buckets; that is all the
/// retrieval tests rely on.
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    /// Create a hashing embedder with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in token.to_ascii_lowercase().bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
            let bucket = (hash as usize) % self.dimension;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
