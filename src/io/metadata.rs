//! Metadata store for a target project.
//!
//! One JSON document under `<root>/.testmind/metadata.json` holding the
//! project id, the indexed-file manifest (content hashes, so re-indexing
//! skips unchanged files), generated test-suite records, and improvement
//! suggestions. The schema is internal; callers go through this
//! interface. Writes are whole-document and atomic (temp + rename).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::errors::{Result, TestMindError};
use crate::generation::generator::TestSuite;

/// One indexed file's manifest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedFile {
    /// Content hash at index time
    pub content_hash: String,
    /// Chunks produced from the file
    pub chunk_count: usize,
    /// When the file was last indexed
    pub indexed_at: DateTime<Utc>,
}

/// An improvement suggestion attached to the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementSuggestion {
    /// Subject file or function
    pub target: String,
    /// Suggestion text
    pub suggestion: String,
    /// When it was recorded
    pub created_at: DateTime<Utc>,
}

/// Full metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    /// Schema version
    pub version: u32,
    /// Stable project id
    pub project_id: String,
    /// Indexed-file manifest keyed by normalized path
    #[serde(default)]
    pub indexed_files: HashMap<String, IndexedFile>,
    /// Generated suites, newest last
    #[serde(default)]
    pub test_suites: Vec<TestSuite>,
    /// Recorded improvement suggestions
    #[serde(default)]
    pub suggestions: Vec<ImprovementSuggestion>,
}

impl ProjectMetadata {
    fn new() -> Self {
        Self {
            version: 1,
            project_id: uuid::Uuid::new_v4().to_string(),
            indexed_files: HashMap::new(),
            test_suites: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

/// Metadata store bound to one document path.
pub struct MetadataStore {
    path: PathBuf,
    document: ProjectMetadata,
}

impl MetadataStore {
    /// Open (or create) the store at a document path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                TestMindError::io(format!("failed to read {}", path.display()), e)
            })?;
            serde_json::from_str(&raw)?
        } else {
            ProjectMetadata::new()
        };

        Ok(Self { path, document })
    }

    /// Stable project id.
    pub fn project_id(&self) -> &str {
        &self.document.project_id
    }

    /// Whether a file changed since it was last indexed.
    pub fn needs_reindex(&self, file_path: &str, content: &str) -> bool {
        match self.document.indexed_files.get(file_path) {
            Some(entry) => entry.content_hash != content_hash(content),
            None => true,
        }
    }

    /// Record a file as indexed.
    pub fn record_indexed(&mut self, file_path: &str, content: &str, chunk_count: usize) {
        self.document.indexed_files.insert(
            file_path.to_string(),
            IndexedFile {
                content_hash: content_hash(content),
                chunk_count,
                indexed_at: Utc::now(),
            },
        );
    }

    /// Drop a file from the manifest.
    pub fn remove_indexed(&mut self, file_path: &str) {
        self.document.indexed_files.remove(file_path);
    }

    /// Number of indexed files.
    pub fn indexed_count(&self) -> usize {
        self.document.indexed_files.len()
    }

    /// Append a generated suite record.
    pub fn record_suite(&mut self, suite: TestSuite) {
        self.document.test_suites.push(suite);
    }

    /// Recorded suites, newest last.
    pub fn suites(&self) -> &[TestSuite] {
        &self.document.test_suites
    }

    /// Append an improvement suggestion.
    pub fn record_suggestion(&mut self, target: impl Into<String>, suggestion: impl Into<String>) {
        self.document.suggestions.push(ImprovementSuggestion {
            target: target.into(),
            suggestion: suggestion.into(),
            created_at: Utc::now(),
        });
    }

    /// Persist the document atomically.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TestMindError::io(format!("failed to create {}", parent.display()), e)
            })?;
        }

        let raw = serde_json::to_string_pretty(&self.document)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)
            .map_err(|e| TestMindError::io("failed to write metadata", e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| TestMindError::io("failed to commit metadata", e))?;

        debug!(path = %self.path.display(), "metadata saved");
        Ok(())
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolve the metadata path for a project root.
pub fn metadata_path(project_root: &Path) -> PathBuf {
    crate::core::config::TestMindConfig::metadata_path(project_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_reindex_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".testmind/metadata.json");

        let project_id;
        {
            let mut store = MetadataStore::open(&path).unwrap();
            project_id = store.project_id().to_string();

            assert!(store.needs_reindex("src/a.ts", "content v1"));
            store.record_indexed("src/a.ts", "content v1", 3);
            assert!(!store.needs_reindex("src/a.ts", "content v1"));
            assert!(store.needs_reindex("src/a.ts", "content v2"));

            store.record_suggestion("src/a.ts", "cover the error branch");
            store.save().unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        assert_eq!(store.project_id(), project_id);
        assert_eq!(store.indexed_count(), 1);
        assert!(!store.needs_reindex("src/a.ts", "content v1"));
    }

    #[test]
    fn test_missing_document_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("metadata.json")).unwrap();
        assert_eq!(store.indexed_count(), 0);
        assert!(!store.project_id().is_empty());
    }
}
