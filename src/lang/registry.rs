//! Factory utilities and metadata for language adapters.

use std::path::Path;

use tree_sitter::{Language, Parser};

use crate::core::errors::{Result, TestMindError};
use crate::lang::common::LanguageAdapter;
use crate::lang::javascript::JavaScriptAdapter;
use crate::lang::typescript::TypeScriptAdapter;

/// Metadata describing one of the built-in language adapters.
#[derive(Debug, Clone, Copy)]
pub struct LanguageInfo {
    /// Canonical short key (matches CLI/config usage, e.g. "ts").
    pub key: &'static str,
    /// Human-friendly display name.
    pub name: &'static str,
    /// Supported file extensions (without leading dots).
    pub extensions: &'static [&'static str],
}

const REGISTERED_LANGUAGES: &[LanguageInfo] = &[
    LanguageInfo {
        key: "ts",
        name: "TypeScript",
        extensions: &["ts", "tsx", "cts", "mts"],
    },
    LanguageInfo {
        key: "js",
        name: "JavaScript",
        extensions: &["js", "jsx", "mjs", "cjs"],
    },
];

/// Return the languages compiled into this build.
pub fn registered_languages() -> &'static [LanguageInfo] {
    REGISTERED_LANGUAGES
}

/// Identify the canonical language key for a file path.
pub fn language_key_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    REGISTERED_LANGUAGES
        .iter()
        .find(|info| info.extensions.contains(&ext.as_str()))
        .map(|info| info.key)
}

/// Whether a file path is supported by a registered adapter.
pub fn is_supported_path(path: &Path) -> bool {
    language_key_for_path(path).is_some()
}

/// Resolve the tree-sitter grammar for a file path.
pub(crate) fn grammar_for_path(path: &Path) -> Result<Language> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "ts" | "cts" | "mts" => Ok(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Ok(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "js" | "jsx" | "mjs" | "cjs" => Ok(tree_sitter_javascript::LANGUAGE.into()),
        _ => Err(TestMindError::analysis_at(
            format!("no language adapter registered for extension '.{ext}'"),
            path.to_string_lossy(),
        )),
    }
}

/// Create a parser bound to a grammar.
pub(crate) fn create_parser(language: &Language) -> Result<Parser> {
    let mut parser = Parser::new();
    parser.set_language(language).map_err(|e| {
        TestMindError::parse("javascript-family", format!("failed to set grammar: {e}"))
    })?;
    Ok(parser)
}

/// Create a language adapter suitable for analysing the provided file.
pub fn adapter_for_file(path: &Path) -> Result<Box<dyn LanguageAdapter>> {
    match language_key_for_path(path) {
        Some("ts") => {
            let tsx = path
                .extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case("tsx"));
            Ok(Box::new(TypeScriptAdapter::with_dialect(tsx)?))
        }
        Some("js") => Ok(Box::new(JavaScriptAdapter::new()?)),
        _ => Err(TestMindError::analysis_at(
            "unsupported source language",
            path.to_string_lossy(),
        )),
    }
}

/// Create a language adapter for a canonical language key.
pub fn adapter_for_language(key: &str) -> Result<Box<dyn LanguageAdapter>> {
    match key {
        "ts" | "typescript" => Ok(Box::new(TypeScriptAdapter::new()?)),
        "js" | "javascript" => Ok(Box::new(JavaScriptAdapter::new()?)),
        other => Err(TestMindError::analysis(format!(
            "no language adapter registered for '{other}'"
        ))),
    }
}
