//! Common parsing abstractions shared by the language adapters.
//!
//! Adapters translate a tree-sitter parse into the language-agnostic
//! [`ParsedFile`] model consumed by the analyzers. Parsing is best-effort:
//! tree-sitter error nodes degrade the result instead of failing it, so a
//! syntactically incomplete file still yields every entity that did parse.

use serde::{Deserialize, Serialize};

use crate::core::chunks::{ChunkKind, CodeChunk, FunctionSignature};
use crate::core::errors::Result;

/// A single call site inside a function body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSite {
    /// Callee expression text (`axios.get`, `helper`, `fs.readFile`)
    pub callee: String,

    /// 1-based line of the call
    pub line: usize,
}

/// A parsed function, method, or named arrow function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Declared signature
    pub signature: FunctionSignature,

    /// Start line (1-based, inclusive)
    pub start_line: usize,

    /// End line (1-based, inclusive)
    pub end_line: usize,

    /// Full source text of the function, including the signature
    pub body: String,

    /// Calls made inside the body
    pub calls: Vec<CallSite>,

    /// Enclosing class or function name, when nested
    pub parent: Option<String>,

    /// Whether the function is exported from the module
    pub is_exported: bool,

    /// Whether this is a class method
    pub is_method: bool,
}

impl FunctionInfo {
    /// Qualified name (`Class.method` or bare function name).
    pub fn qualified_name(&self) -> String {
        match (&self.parent, self.is_method) {
            (Some(parent), true) => format!("{}.{}", parent, self.signature.name),
            _ => self.signature.name.clone(),
        }
    }
}

/// A parsed class declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassInfo {
    /// Class name
    pub name: String,

    /// Start line (1-based, inclusive)
    pub start_line: usize,

    /// End line (1-based, inclusive)
    pub end_line: usize,

    /// Method names declared on the class
    pub methods: Vec<String>,

    /// Whether the class is exported
    pub is_exported: bool,
}

/// A parsed import statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportInfo {
    /// Module specifier (`./utils`, `axios`)
    pub source: String,

    /// Imported binding names (default import included)
    pub names: Vec<String>,

    /// 1-based line of the statement
    pub line: usize,
}

impl ImportInfo {
    /// Whether the specifier points inside the project.
    pub fn is_relative(&self) -> bool {
        self.source.starts_with('.') || self.source.starts_with('/')
    }
}

/// A parsed export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportInfo {
    /// Exported binding name (`default` for default exports)
    pub name: String,

    /// 1-based line of the export
    pub line: usize,
}

/// Language-agnostic parse result for one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedFile {
    /// Forward-slash normalized file path
    pub file_path: String,

    /// Language key the file was parsed as
    pub language: String,

    /// All functions, at every nesting depth
    pub functions: Vec<FunctionInfo>,

    /// All class declarations
    pub classes: Vec<ClassInfo>,

    /// All import statements
    pub imports: Vec<ImportInfo>,

    /// All exported bindings
    pub exports: Vec<ExportInfo>,

    /// Whether the parse tree contained error nodes
    pub had_errors: bool,
}

impl ParsedFile {
    /// Find a function by bare or qualified name.
    pub fn find_function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions
            .iter()
            .find(|f| f.signature.name == name || f.qualified_name() == name)
    }

    /// Whether a binding name is exported from this module.
    pub fn is_exported(&self, name: &str) -> bool {
        self.exports.iter().any(|e| e.name == name)
    }

    /// Convert the parse into indexable chunks: one per function and class,
    /// plus a module-level chunk for the import header when present.
    pub fn to_chunks(&self, source: &str) -> Vec<CodeChunk> {
        let mut chunks = Vec::with_capacity(self.functions.len() + self.classes.len());

        for function in &self.functions {
            let kind = if function.is_method {
                ChunkKind::Method
            } else {
                ChunkKind::Function
            };
            chunks.push(
                CodeChunk::new(
                    self.file_path.clone(),
                    function.body.clone(),
                    function.start_line,
                    function.end_line,
                    kind,
                )
                .with_name(function.qualified_name()),
            );
        }

        for class in &self.classes {
            let content = slice_lines(source, class.start_line, class.end_line);
            chunks.push(
                CodeChunk::new(
                    self.file_path.clone(),
                    content,
                    class.start_line,
                    class.end_line,
                    ChunkKind::Class,
                )
                .with_name(class.name.clone()),
            );
        }

        if let Some(last_import) = self.imports.iter().map(|i| i.line).max() {
            let content = slice_lines(source, 1, last_import);
            chunks.push(
                CodeChunk::new(self.file_path.clone(), content, 1, last_import, ChunkKind::Module)
                    .with_name("imports"),
            );
        }

        chunks
    }
}

/// Extract an inclusive 1-based line range from source text.
pub fn slice_lines(source: &str, start_line: usize, end_line: usize) -> String {
    source
        .lines()
        .skip(start_line.saturating_sub(1))
        .take(end_line.saturating_sub(start_line) + 1)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Language adapter contract.
///
/// Adapters are synchronous; parsing is CPU-bound and bounded by file size.
pub trait LanguageAdapter: Send {
    /// Canonical language key (`ts`, `js`).
    fn language_key(&self) -> &'static str;

    /// Parse source text into the language-agnostic model.
    ///
    /// Must not fail on malformed syntax; only I/O-level problems (such as
    /// invalid UTF-8 handled upstream) are errors.
    fn parse_source(&mut self, source: &str, file_path: &str) -> Result<ParsedFile>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_lines_inclusive() {
        let source = "a\nb\nc\nd";
        assert_eq!(slice_lines(source, 2, 3), "b\nc");
        assert_eq!(slice_lines(source, 1, 1), "a");
        assert_eq!(slice_lines(source, 4, 9), "d");
    }

    #[test]
    fn test_relative_import_detection() {
        let relative = ImportInfo {
            source: "./utils".to_string(),
            names: vec!["helper".to_string()],
            line: 1,
        };
        let external = ImportInfo {
            source: "axios".to_string(),
            names: vec!["axios".to_string()],
            line: 2,
        };
        assert!(relative.is_relative());
        assert!(!external.is_relative());
    }
}
