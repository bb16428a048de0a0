//! Persistent vector index with filterable attributes.
//!
//! Records live in per-source-file segment files (bincode) under the store
//! directory, with a JSON manifest naming the live segments. Per-file
//! writes are delete-then-insert: the new segment is written to a
//! temporary name and renamed into place, and the manifest is rewritten
//! last, so readers never observe a half-replaced file. A segment on disk
//! that the manifest no longer references is dead and is swept by
//! `optimize`.
//!
//! Search is cosine similarity. Small stores scan linearly; larger stores
//! build coarse centroid partitions sized by [`recommend_partitions`] and
//! probe the nearest few partitions.

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::chunks::{ChunkKind, CodeChunk};
use crate::core::errors::{Result, TestMindError};

/// Manifest schema version.
const MANIFEST_VERSION: u32 = 1;

/// One persisted vector record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Chunk id (content hash)
    pub id: String,
    /// Normalized source file path
    pub file_path: String,
    /// Entity name, when the chunk has one
    pub function_name: Option<String>,
    /// Raw chunk content
    pub code: String,
    /// Embedding vector
    pub vector: Vec<f32>,
    /// Chunk kind as its canonical lowercase name
    pub chunk_type: String,
    /// Cyclomatic complexity, when known
    pub complexity: Option<f64>,
    /// Line count of the chunk
    pub loc: Option<usize>,
    /// Insertion timestamp (unix seconds)
    pub timestamp: i64,
    /// Opaque metadata blob (JSON text)
    pub metadata: String,

    /// Start line of the chunk in its file
    pub start_line: usize,
    /// End line of the chunk in its file
    pub end_line: usize,
}

impl VectorRecord {
    /// Build a record from an embedded chunk.
    pub fn from_chunk(chunk: &CodeChunk) -> Result<Self> {
        let vector = chunk.embedding.clone().ok_or_else(|| {
            TestMindError::internal(format!("chunk {} has no embedding", chunk.id))
        })?;

        Ok(Self {
            id: chunk.id.clone(),
            file_path: chunk.file_path.clone(),
            function_name: chunk.name.clone(),
            code: chunk.content.clone(),
            vector,
            chunk_type: chunk.kind.as_str().to_string(),
            complexity: chunk.complexity,
            loc: Some(chunk.end_line - chunk.start_line + 1),
            timestamp: chrono::Utc::now().timestamp(),
            metadata: serde_json::to_string(&chunk.metadata)?,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
        })
    }

    /// Reconstruct the chunk this record was built from.
    pub fn to_chunk(&self) -> CodeChunk {
        let kind = match self.chunk_type.as_str() {
            "class" => ChunkKind::Class,
            "method" => ChunkKind::Method,
            "module" => ChunkKind::Module,
            _ => ChunkKind::Function,
        };

        let mut chunk = CodeChunk::new(
            self.file_path.clone(),
            self.code.clone(),
            self.start_line,
            self.end_line,
            kind,
        );
        chunk.name = self.function_name.clone();
        chunk.complexity = self.complexity;
        chunk.embedding = Some(self.vector.clone());
        if let Ok(metadata) = serde_json::from_str(&self.metadata) {
            chunk.metadata = metadata;
        }
        chunk
    }
}

/// Attribute filter applied during search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict to one source file
    pub file_path: Option<String>,
    /// Restrict to one chunk kind
    pub kind: Option<ChunkKind>,
    /// Minimum cyclomatic complexity
    pub min_complexity: Option<f64>,
}

impl SearchFilter {
    fn accepts(&self, record: &VectorRecord) -> bool {
        if let Some(path) = &self.file_path {
            if &record.file_path != path {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if record.chunk_type != kind.as_str() {
                return false;
            }
        }
        if let Some(min) = self.min_complexity {
            if record.complexity.unwrap_or(0.0) < min {
                return false;
            }
        }
        true
    }
}

/// One search hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The matching chunk
    pub chunk: CodeChunk,
    /// Similarity score in [0, 1]
    pub score: f64,
    /// Coarse relevance label derived from the score
    pub relevance: &'static str,
}

/// Store statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreStats {
    /// Total live vectors
    pub total_vectors: usize,
    /// Distinct indexed files
    pub files: usize,
    /// Vector dimension
    pub dimension: usize,
    /// Current partition count (1 means linear scan)
    pub partitions: usize,
}

/// Recommended partition count for a store of `n` vectors.
///
/// Below 1000 vectors a linear scan wins; between 1k and 10k, √N
/// partitions; between 10k and 100k, N/100; above that, N/200.
pub fn recommend_partitions(n: usize) -> usize {
    if n < 1_000 {
        1
    } else if n < 10_000 {
        (n as f64).sqrt().round() as usize
    } else if n < 100_000 {
        n / 100
    } else {
        n / 200
    }
}

/// Cosine similarity between two vectors of equal dimension.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Map a cosine value to the [0, 1] score surfaced in results.
fn score_of(cosine: f64) -> f64 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn relevance_of(score: f64) -> &'static str {
    if score >= 0.85 {
        "high"
    } else if score >= 0.7 {
        "medium"
    } else {
        "low"
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    dimension: usize,
    /// file path -> segment file name
    segments: IndexMap<String, String>,
}

/// Coarse IVF-style partitioning over the live records.
struct Partitions {
    centroids: Vec<Vec<f32>>,
    /// record ids per centroid
    members: Vec<Vec<String>>,
}

struct StoreState {
    records: IndexMap<String, VectorRecord>,
    by_file: AHashMap<String, Vec<String>>,
    partitions: Option<Partitions>,
}

/// Persistent vector store.
pub struct VectorStore {
    root: PathBuf,
    dimension: usize,
    state: RwLock<StoreState>,
}

impl VectorStore {
    /// Open (or create) a store rooted at a directory.
    pub async fn open(root: impl Into<PathBuf>, dimension: usize) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| TestMindError::io(format!("failed to create {}", root.display()), e))?;

        let manifest = Self::read_manifest(&root).await?;
        let mut records = IndexMap::new();
        let mut by_file: AHashMap<String, Vec<String>> = AHashMap::new();

        if let Some(manifest) = &manifest {
            if manifest.dimension != dimension {
                return Err(TestMindError::config(format!(
                    "vector store dimension mismatch: store has {}, requested {}",
                    manifest.dimension, dimension
                )));
            }
            for (file_path, segment) in &manifest.segments {
                let path = root.join(segment);
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    TestMindError::io(format!("failed to read segment {}", path.display()), e)
                })?;
                let segment_records: Vec<VectorRecord> = bincode::deserialize(&bytes)?;
                let ids: Vec<String> = segment_records.iter().map(|r| r.id.clone()).collect();
                by_file.insert(file_path.clone(), ids);
                for record in segment_records {
                    records.insert(record.id.clone(), record);
                }
            }
        }

        info!(
            vectors = records.len(),
            files = by_file.len(),
            "vector store opened"
        );

        Ok(Self {
            root,
            dimension,
            state: RwLock::new(StoreState {
                records,
                by_file,
                partitions: None,
            }),
        })
    }

    /// Insert embedded chunks, appending to their files' segments.
    pub async fn insert(&self, chunks: &[CodeChunk]) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut touched: Vec<String> = Vec::new();

        for chunk in chunks {
            let record = VectorRecord::from_chunk(chunk)?;
            if record.vector.len() != self.dimension {
                return Err(TestMindError::config(format!(
                    "vector dimension {} does not match store dimension {}",
                    record.vector.len(),
                    self.dimension
                )));
            }
            let file_path = record.file_path.clone();
            let ids = state.by_file.entry(file_path.clone()).or_default();
            if !ids.contains(&record.id) {
                ids.push(record.id.clone());
            }
            state.records.insert(record.id.clone(), record);
            if !touched.contains(&file_path) {
                touched.push(file_path);
            }
        }

        state.partitions = None;
        for file_path in &touched {
            self.persist_file(&state, file_path).await?;
        }
        self.persist_manifest(&state).await?;
        Ok(chunks.len())
    }

    /// Replace every record of a file (delete-then-insert).
    ///
    /// Runs under a single write lock so readers observe either the old
    /// records or the new ones, never a half-replaced file.
    pub async fn update_file(&self, file_path: &str, chunks: &[CodeChunk]) -> Result<()> {
        let mut state = self.state.write().await;
        Self::remove_file_records(&mut state, file_path);

        for chunk in chunks {
            let record = VectorRecord::from_chunk(chunk)?;
            if record.vector.len() != self.dimension {
                return Err(TestMindError::config(format!(
                    "vector dimension {} does not match store dimension {}",
                    record.vector.len(),
                    self.dimension
                )));
            }
            state
                .by_file
                .entry(record.file_path.clone())
                .or_default()
                .push(record.id.clone());
            state.records.insert(record.id.clone(), record);
        }

        state.partitions = None;
        self.persist_file(&state, file_path).await?;
        self.persist_manifest(&state).await?;
        debug!(file = file_path, chunks = chunks.len(), "file re-indexed");
        Ok(())
    }

    /// Delete every record of a file.
    pub async fn delete_file(&self, file_path: &str) -> Result<usize> {
        let removed;
        {
            let mut state = self.state.write().await;
            removed = Self::remove_file_records(&mut state, file_path);
            state.partitions = None;
            self.persist_manifest(&state).await?;
        }

        // The manifest no longer references the segment; removing the file
        // afterwards cannot break readers.
        let segment = self.root.join(segment_name(file_path));
        let _ = tokio::fs::remove_file(segment).await;
        Ok(removed)
    }

    /// Search by vector with an optional attribute filter.
    pub async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        if vector.len() != self.dimension {
            return Err(TestMindError::config(format!(
                "query dimension {} does not match store dimension {}",
                vector.len(),
                self.dimension
            )));
        }

        let mut state = self.state.write().await;
        if state.partitions.is_none() && recommend_partitions(state.records.len()) > 1 {
            state.partitions = Some(build_partitions(&state.records));
        }

        let candidate_ids: Vec<String> = match &state.partitions {
            Some(partitions) => probe_partitions(partitions, vector),
            None => state.records.keys().cloned().collect(),
        };

        let mut hits: Vec<(f64, &VectorRecord)> = candidate_ids
            .iter()
            .filter_map(|id| state.records.get(id))
            .filter(|record| filter.is_none_or(|f| f.accepts(record)))
            .map(|record| (cosine_similarity(vector, &record.vector), record))
            .collect();

        hits.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.file_path.cmp(&b.1.file_path))
        });

        Ok(hits
            .into_iter()
            .take(k)
            .map(|(cosine, record)| {
                let score = score_of(cosine);
                SearchResult {
                    chunk: record.to_chunk(),
                    score,
                    relevance: relevance_of(score),
                }
            })
            .collect())
    }

    /// Every live chunk, in insertion order. Feeds the lexical index.
    pub async fn all_chunks(&self) -> Vec<CodeChunk> {
        let state = self.state.read().await;
        state.records.values().map(VectorRecord::to_chunk).collect()
    }

    /// Store statistics.
    pub async fn get_stats(&self) -> VectorStoreStats {
        let state = self.state.read().await;
        VectorStoreStats {
            total_vectors: state.records.len(),
            files: state.by_file.len(),
            dimension: self.dimension,
            partitions: state
                .partitions
                .as_ref()
                .map_or(1, |p| p.centroids.len().max(1)),
        }
    }

    /// Compact the store: rebuild partitions, rewrite live segments, and
    /// sweep dead segment files. Idempotent.
    pub async fn optimize(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.partitions = (recommend_partitions(state.records.len()) > 1)
            .then(|| build_partitions(&state.records));

        let live: Vec<String> = state.by_file.keys().cloned().collect();
        for file_path in &live {
            self.persist_file(&state, file_path).await?;
        }
        self.persist_manifest(&state).await?;

        let live_segments: ahash::AHashSet<String> =
            live.iter().map(|p| segment_name(p)).collect();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| TestMindError::io("failed to list vector store", e))?;
        while let Ok(Some(entry)) = dir.next_entry().await.map_err(TestMindError::from) {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("seg-") && !live_segments.contains(&name) {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    fn remove_file_records(state: &mut StoreState, file_path: &str) -> usize {
        let Some(ids) = state.by_file.remove(file_path) else {
            return 0;
        };
        let removed = ids.len();
        for id in ids {
            state.records.shift_remove(&id);
        }
        removed
    }

    /// Write one file's segment atomically (temp + rename).
    async fn persist_file(&self, state: &StoreState, file_path: &str) -> Result<()> {
        let Some(ids) = state.by_file.get(file_path) else {
            return Ok(());
        };
        let records: Vec<&VectorRecord> =
            ids.iter().filter_map(|id| state.records.get(id)).collect();
        let bytes = bincode::serialize(&records)?;

        let final_path = self.root.join(segment_name(file_path));
        let tmp_path = final_path.with_extension("bin.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| TestMindError::io("failed to write segment", e))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| TestMindError::io("failed to commit segment", e))?;
        Ok(())
    }

    async fn persist_manifest(&self, state: &StoreState) -> Result<()> {
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            dimension: self.dimension,
            segments: state
                .by_file
                .keys()
                .map(|path| (path.clone(), segment_name(path)))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&manifest)?;

        let final_path = self.root.join("manifest.json");
        let tmp_path = self.root.join("manifest.json.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| TestMindError::io("failed to write manifest", e))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| TestMindError::io("failed to commit manifest", e))?;
        Ok(())
    }

    async fn read_manifest(root: &Path) -> Result<Option<Manifest>> {
        let path = root.join("manifest.json");
        if !path.exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| TestMindError::io("failed to read manifest", e))?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Segment file name for a source path.
fn segment_name(file_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
    format!("seg-{hex}.bin")
}

/// Build coarse partitions: centroids are records sampled at an even
/// stride, members assigned by best cosine.
fn build_partitions(records: &IndexMap<String, VectorRecord>) -> Partitions {
    let k = recommend_partitions(records.len()).max(1);
    let stride = (records.len() / k).max(1);

    let centroids: Vec<Vec<f32>> = records
        .values()
        .step_by(stride)
        .take(k)
        .map(|r| r.vector.clone())
        .collect();

    let mut members: Vec<Vec<String>> = vec![Vec::new(); centroids.len()];
    for record in records.values() {
        let best = centroids
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                cosine_similarity(a, &record.vector)
                    .partial_cmp(&cosine_similarity(b, &record.vector))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        members[best].push(record.id.clone());
    }

    Partitions { centroids, members }
}

/// Candidate ids from the nearest few partitions.
fn probe_partitions(partitions: &Partitions, vector: &[f32]) -> Vec<String> {
    let nprobe = (partitions.centroids.len() / 4).max(1);

    let mut ranked: Vec<(f64, usize)> = partitions
        .centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (cosine_similarity(c, vector), i))
        .collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    ranked
        .into_iter()
        .take(nprobe)
        .flat_map(|(_, i)| partitions.members[i].iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::embedding::{EmbeddingProvider, HashEmbeddingProvider};

    const DIM: usize = 64;

    async fn embedded_chunk(path: &str, content: &str, line: usize) -> CodeChunk {
        let provider = HashEmbeddingProvider::new(DIM);
        let mut chunk = CodeChunk::new(path, content, line, line + 3, ChunkKind::Function);
        chunk.embedding = Some(
            provider
                .embed_batch(&[content.to_string()])
                .await
                .unwrap()
                .remove(0),
        );
        chunk
    }

    #[tokio::test]
    async fn test_insert_search_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path(), DIM).await.unwrap();

        let add = embedded_chunk("src/math.ts", "function add(a, b) { return a + b; }", 1).await;
        let server =
            embedded_chunk("src/server.ts", "class Server { listen(port) {} }", 10).await;
        store.insert(&[add.clone(), server]).await.unwrap();

        let query = add.embedding.clone().unwrap();
        let results = store.search(&query, 2, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.file_path, "src/math.ts");
        assert!(results[0].score >= results[1].score);
        assert!(results[0].score <= 1.0);
    }

    #[tokio::test]
    async fn test_update_file_replaces_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path(), DIM).await.unwrap();

        let old = embedded_chunk("src/a.ts", "function old() {}", 1).await;
        store.insert(&[old]).await.unwrap();

        let new = embedded_chunk("src/a.ts", "function renamed() { return 1; }", 1).await;
        store.update_file("src/a.ts", &[new]).await.unwrap();

        let stats = store.get_stats().await;
        assert_eq!(stats.total_vectors, 1);
        assert_eq!(stats.files, 1);
    }

    #[tokio::test]
    async fn test_delete_file_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::open(dir.path(), DIM).await.unwrap();
            let a = embedded_chunk("src/a.ts", "function a() {}", 1).await;
            let b = embedded_chunk("src/b.ts", "function b() {}", 1).await;
            store.insert(&[a, b]).await.unwrap();
            store.delete_file("src/a.ts").await.unwrap();
        }

        // Re-open from disk: only b survives.
        let store = VectorStore::open(dir.path(), DIM).await.unwrap();
        let stats = store.get_stats().await;
        assert_eq!(stats.total_vectors, 1);
        assert_eq!(stats.files, 1);
    }

    #[tokio::test]
    async fn test_search_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path(), DIM).await.unwrap();

        let mut complex =
            embedded_chunk("src/a.ts", "function gnarly(x) { if (x) { return 1; } }", 1).await;
        complex.complexity = Some(12.0);
        let simple = embedded_chunk("src/b.ts", "function simple() { return 2; }", 1).await;
        store.insert(&[complex, simple]).await.unwrap();

        let query = vec![0.1f32; DIM];
        let filter = SearchFilter {
            min_complexity: Some(10.0),
            ..Default::default()
        };
        let results = store.search(&query, 10, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "src/a.ts");

        let filter = SearchFilter {
            file_path: Some("src/b.ts".to_string()),
            ..Default::default()
        };
        let results = store.search(&query, 10, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "src/b.ts");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path(), DIM).await.unwrap();
        let err = store.search(&vec![0.0; 8], 5, None).await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[tokio::test]
    async fn test_optimize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path(), DIM).await.unwrap();
        let a = embedded_chunk("src/a.ts", "function a() {}", 1).await;
        store.insert(&[a.clone()]).await.unwrap();

        store.optimize().await.unwrap();
        store.optimize().await.unwrap();

        let query = a.embedding.clone().unwrap();
        let results = store.search(&query, 1, None).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_partition_recommendation_bands() {
        assert_eq!(recommend_partitions(500), 1);
        assert_eq!(recommend_partitions(2_500), 50);
        assert_eq!(recommend_partitions(50_000), 500);
        assert_eq!(recommend_partitions(400_000), 2_000);
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0f32, 0.0];
        let b = vec![1.0f32, 0.0];
        let c = vec![-1.0f32, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&a, &c) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }
}
