//! JavaScript language adapter with tree-sitter integration.

use tree_sitter::{Language, Parser};

use crate::core::errors::{Result, TestMindError};
use crate::lang::common::{LanguageAdapter, ParsedFile};
use crate::lang::extract::Extractor;
use crate::lang::registry::create_parser;

/// JavaScript-specific parsing (covers JSX; the grammar accepts both).
pub struct JavaScriptAdapter {
    parser: Parser,
}

impl JavaScriptAdapter {
    /// Create a new JavaScript adapter.
    pub fn new() -> Result<Self> {
        let language: Language = tree_sitter_javascript::LANGUAGE.into();
        Ok(Self {
            parser: create_parser(&language)?,
        })
    }
}

impl LanguageAdapter for JavaScriptAdapter {
    fn language_key(&self) -> &'static str {
        "js"
    }

    fn parse_source(&mut self, source: &str, file_path: &str) -> Result<ParsedFile> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| TestMindError::parse("javascript", "parser produced no tree"))?;

        Ok(Extractor::new(source, file_path, "js").extract(&tree))
    }
}
