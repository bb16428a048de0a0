//! Core data model: code chunks, function signatures, and function context.
//!
//! A [`CodeChunk`] is a content-addressed fragment of source. Chunks are
//! immutable after creation and are re-created whenever a file revision is
//! indexed. [`FunctionContext`] is the composite handed to the strategy
//! planner and prompt builder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of source fragment a chunk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Class,
    Method,
    Module,
}

impl ChunkKind {
    /// Canonical lowercase name, matching the persisted record schema.
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Method => "method",
            ChunkKind::Module => "module",
        }
    }
}

/// A content-addressed fragment of source code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    /// Stable content-hash identifier
    pub id: String,

    /// Forward-slash normalized file path
    pub file_path: String,

    /// Raw source content of the fragment
    pub content: String,

    /// Start line (1-based, inclusive)
    pub start_line: usize,

    /// End line (1-based, inclusive)
    pub end_line: usize,

    /// Fragment kind
    pub kind: ChunkKind,

    /// Entity name, when the fragment has one
    pub name: Option<String>,

    /// Cyclomatic complexity, when computed
    pub complexity: Option<f64>,

    /// Embedding vector, populated by the embedding generator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CodeChunk {
    /// Create a chunk with a content-derived id.
    ///
    /// The id hashes `(file_path, start_line, end_line, content)` so the
    /// same fragment always produces the same id across runs.
    pub fn new(
        file_path: impl Into<String>,
        content: impl Into<String>,
        start_line: usize,
        end_line: usize,
        kind: ChunkKind,
    ) -> Self {
        let file_path = normalize_path(&file_path.into());
        let content = content.into();
        let id = chunk_id(&file_path, start_line, end_line, &content);

        Self {
            id,
            file_path,
            content,
            start_line,
            end_line,
            kind,
            name: None,
            complexity: None,
            embedding: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach an entity name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a complexity score.
    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = Some(complexity);
        self
    }

    /// Estimated token count for this chunk's content (`⌈chars/4⌉`).
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }

    /// Dedup key used by context fusion: `(path, start, end)`.
    pub fn span_key(&self) -> (String, usize, usize) {
        (self.file_path.clone(), self.start_line, self.end_line)
    }
}

/// Compute the stable content hash id for a chunk.
pub fn chunk_id(file_path: &str, start_line: usize, end_line: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(start_line.to_le_bytes());
    hasher.update(end_line.to_le_bytes());
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

/// Normalize a path to forward slashes.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Token estimation used across the context subsystem: `⌈chars/4⌉`.
///
/// Provider tokenizers differ; this estimate is deliberately conservative
/// and is the single place a precise tokenizer would be substituted.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len * 2);
    for byte in bytes.iter().take(len) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// A single declared parameter of a function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name
    pub name: String,

    /// Type annotation, verbatim from source (without leading `:`)
    pub param_type: Option<String>,

    /// Whether the parameter is optional (`?` marker or default value)
    pub optional: bool,

    /// Default value expression, verbatim
    pub default_value: Option<String>,
}

/// Declared signature of a function, derived from the AST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSignature {
    /// Function name (assignment name for arrow functions)
    pub name: String,

    /// Forward-slash normalized file path
    pub file_path: String,

    /// Declared parameters, in order
    pub parameters: Vec<Parameter>,

    /// Return type annotation, verbatim
    pub return_type: Option<String>,

    /// Whether the function is declared `async`
    pub is_async: bool,

    /// Leading doc comment, when present
    pub documentation: Option<String>,
}

/// Classification of a dependency used by a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Defined elsewhere in the target project
    Internal,
    /// Imported from a package
    External,
    /// Language or runtime builtin
    Builtin,
}

/// A dependency referenced by a function body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    /// Dependency name as referenced in source
    pub name: String,

    /// Dependency classification
    pub kind: DependencyKind,

    /// Call sites or expressions where the dependency is used
    pub used_in: Vec<String>,
}

/// Kind of side effect a function performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffectKind {
    Io,
    Network,
    State,
    Database,
    Filesystem,
}

impl SideEffectKind {
    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            SideEffectKind::Io => "io",
            SideEffectKind::Network => "network",
            SideEffectKind::State => "state",
            SideEffectKind::Database => "database",
            SideEffectKind::Filesystem => "filesystem",
        }
    }
}

/// A detected side effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideEffect {
    /// Effect classification
    pub kind: SideEffectKind,

    /// Human-readable description of the effect
    pub description: String,

    /// Source location (`file:line`) where the effect occurs
    pub location: String,
}

/// Structural complexity metrics for a single function.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComplexityMetrics {
    /// McCabe cyclomatic complexity (decision points + 1)
    pub cyclomatic: u32,

    /// Cognitive complexity (nesting-weighted)
    pub cognitive: u32,

    /// Non-blank lines of code
    pub loc: usize,

    /// Derived maintainability index in [0, 100]
    pub maintainability_index: f64,
}

impl Default for ComplexityMetrics {
    fn default() -> Self {
        Self {
            cyclomatic: 1,
            cognitive: 0,
            loc: 0,
            maintainability_index: 100.0,
        }
    }
}

/// The composite context passed to planners and prompters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionContext {
    /// Declared signature
    pub signature: FunctionSignature,

    /// Dependencies referenced by the body
    pub dependencies: Vec<Dependency>,

    /// Qualified names of callers within the project
    pub callers: Vec<String>,

    /// Detected side effects
    pub side_effects: Vec<SideEffect>,

    /// Paths of existing test files that reference this function
    pub existing_tests: Vec<String>,

    /// Line coverage ratio, when known
    pub coverage: Option<f64>,

    /// Structural complexity metrics
    pub complexity: ComplexityMetrics,

    /// Full source of the function body
    pub source: String,
}

impl FunctionContext {
    /// External dependencies only.
    pub fn external_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::External)
    }

    /// A function is pure iff it has no side effects and no external
    /// dependencies. Purity implies the strategy plan contains no mocks.
    pub fn is_pure(&self) -> bool {
        self.side_effects.is_empty() && self.external_dependencies().next().is_none()
    }

    /// Unique side-effect kinds, in stable order.
    pub fn side_effect_kinds(&self) -> Vec<SideEffectKind> {
        let mut kinds: Vec<SideEffectKind> = self.side_effects.iter().map(|e| e.kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}
