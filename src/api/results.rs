//! Result types surfaced by the high-level engine.

use serde::{Deserialize, Serialize};

use crate::generation::cache::CacheStats;
use crate::generation::generator::TestSuite;
use crate::generation::llm::UsageTotals;
use crate::review::diff::DiffResult;
use crate::retrieval::vector_store::VectorStoreStats;

/// Summary of one indexing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Files discovered under the include/exclude patterns
    pub files_discovered: usize,
    /// Files actually (re-)indexed
    pub files_indexed: usize,
    /// Files skipped because their content hash was unchanged
    pub files_unchanged: usize,
    /// Files skipped for size or parse-tolerance reasons
    pub files_skipped: usize,
    /// Chunks written to the vector store
    pub chunks_indexed: usize,
}

/// Outcome of one generation: the suite plus its rendered diff.
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    /// The generated suite
    pub suite: TestSuite,
    /// Diff against the target filesystem
    pub diff: DiffResult,
}

/// Aggregated engine statistics for the `stats` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    /// Vector store statistics
    pub vectors: VectorStoreStats,
    /// Session LLM usage totals
    pub usage: UsageTotals,
    /// Semantic cache counters
    pub cache: CacheStats,
    /// Indexed files tracked in the metadata manifest
    pub indexed_files: usize,
}
