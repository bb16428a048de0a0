//! File-level AST analysis service.
//!
//! Thin facade over the language adapters: reads a file, picks the grammar
//! from the path, and caches the parse by content hash so repeated
//! analysis of an unchanged file is free. Parse errors inside a file never
//! fail analysis; only I/O does.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::errors::{Result, TestMindError};
use crate::lang::common::ParsedFile;
use crate::lang::registry::adapter_for_file;

/// Cached, shareable AST analysis service.
#[derive(Default)]
pub struct AstAnalyzer {
    /// Parse cache keyed by file path; entries carry the content hash they
    /// were computed from.
    cache: DashMap<String, (String, Arc<ParsedFile>)>,
}

impl AstAnalyzer {
    /// Create a new analyzer with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a file from disk.
    pub async fn analyze_file(&self, path: &Path) -> Result<Arc<ParsedFile>> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TestMindError::io(format!("failed to read {}", path.display()), e))?;
        self.analyze_source(path, &source)
    }

    /// Parse already-loaded source for a path.
    pub fn analyze_source(&self, path: &Path, source: &str) -> Result<Arc<ParsedFile>> {
        let key = path.to_string_lossy().replace('\\', "/");
        let content_hash = hash_content(source);

        if let Some(entry) = self.cache.get(&key) {
            let (cached_hash, parsed) = entry.value();
            if *cached_hash == content_hash {
                return Ok(parsed.clone());
            }
        }

        debug!(file = %key, "parsing file");
        let mut adapter = adapter_for_file(path)?;
        let parsed = Arc::new(adapter.parse_source(source, &key)?);
        self.cache.insert(key, (content_hash, parsed.clone()));
        Ok(parsed)
    }

    /// Drop every cached parse (used when the target tree changes wholesale).
    pub fn clear(&self) {
        self.cache.clear();
    }
}

fn hash_content(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_analyze_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("math.ts");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "export function add(a: number, b: number) {{ return a + b; }}").unwrap();

        let analyzer = AstAnalyzer::new();
        let parsed = analyzer.analyze_file(&path).await.unwrap();
        assert_eq!(parsed.functions.len(), 1);
        assert_eq!(parsed.functions[0].signature.name, "add");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let analyzer = AstAnalyzer::new();
        let err = analyzer
            .analyze_file(Path::new("/nonexistent/file.ts"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_cache_hit_returns_same_parse() {
        let analyzer = AstAnalyzer::new();
        let source = "function f() {}";
        let a = analyzer
            .analyze_source(Path::new("src/f.ts"), source)
            .unwrap();
        let b = analyzer
            .analyze_source(Path::new("src/f.ts"), source)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = analyzer
            .analyze_source(Path::new("src/f.ts"), "function g() {}")
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.functions[0].signature.name, "g");
    }
}
