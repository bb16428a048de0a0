//! Function-context assembly.
//!
//! Combines the per-function outputs of the analyzers into the composite
//! [`FunctionContext`] handed to the strategy planner and prompt builder.

use crate::analysis::complexity::ComplexityAnalyzer;
use crate::analysis::dependency::DependencyGraph;
use crate::analysis::side_effects::SideEffectInferencer;
use crate::core::chunks::FunctionContext;
use crate::core::errors::{Result, TestMindError};
use crate::lang::common::ParsedFile;

/// Depth of the reverse-caller closure included in context.
const CALLER_DEPTH: usize = 3;

/// Builder producing [`FunctionContext`] values for one project.
pub struct ContextBuilder {
    inferencer: SideEffectInferencer,
    complexity: ComplexityAnalyzer,
}

impl ContextBuilder {
    /// Create a builder for a language.
    pub fn new(language: &str) -> Result<Self> {
        Ok(Self {
            inferencer: SideEffectInferencer::new(),
            complexity: ComplexityAnalyzer::new(language)?,
        })
    }

    /// Build the context for a named function in a parsed file.
    ///
    /// `existing_tests` and `coverage` come from the project manifest; they
    /// are caller-provided because this builder never scans the tree.
    pub fn build(
        &mut self,
        file: &ParsedFile,
        function_name: &str,
        graph: &DependencyGraph,
        existing_tests: Vec<String>,
        coverage: Option<f64>,
    ) -> Result<FunctionContext> {
        let function = file.find_function(function_name).ok_or_else(|| {
            TestMindError::function_not_found(file.file_path.clone(), function_name)
        })?;

        let dependencies = graph.classify_dependencies(file, function);
        let callers =
            graph.function_callers(&file.file_path, &function.qualified_name(), CALLER_DEPTH);
        let side_effects = self.inferencer.infer(function);
        let complexity = self.complexity.analyze_function(&function.body)?;

        Ok(FunctionContext {
            signature: function.signature.clone(),
            dependencies,
            callers,
            side_effects,
            existing_tests,
            coverage,
            complexity,
            source: function.body.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunks::{DependencyKind, SideEffectKind};
    use crate::lang::registry::adapter_for_language;
    use std::sync::Arc;

    fn parse(path: &str, source: &str) -> Arc<ParsedFile> {
        let mut adapter = adapter_for_language("ts").unwrap();
        Arc::new(adapter.parse_source(source, path).unwrap())
    }

    #[test]
    fn test_pure_function_context() {
        let files = vec![parse(
            "src/math.ts",
            "export function add(a: number, b: number): number { return a + b; }\n",
        )];
        let graph = DependencyGraph::build(&files);
        let mut builder = ContextBuilder::new("ts").unwrap();

        let context = builder
            .build(&files[0], "add", &graph, vec![], None)
            .unwrap();

        assert!(context.is_pure());
        assert_eq!(context.complexity.cyclomatic, 1);
        assert_eq!(context.signature.parameters.len(), 2);
    }

    #[test]
    fn test_effectful_function_context() {
        let files = vec![parse(
            "src/user.ts",
            "import axios from 'axios';\n\
             export async function fetchUserData(userId: string): Promise<User> {\n\
                 const res = await axios.get(`/users/${userId}`);\n\
                 return res.data;\n\
             }\n",
        )];
        let graph = DependencyGraph::build(&files);
        let mut builder = ContextBuilder::new("ts").unwrap();

        let context = builder
            .build(&files[0], "fetchUserData", &graph, vec![], Some(0.2))
            .unwrap();

        assert!(!context.is_pure());
        assert!(context.signature.is_async);
        assert_eq!(context.side_effects[0].kind, SideEffectKind::Network);
        assert!(context
            .dependencies
            .iter()
            .any(|d| d.name == "axios" && d.kind == DependencyKind::External));
    }

    #[test]
    fn test_missing_function_is_analysis_error() {
        let files = vec![parse("src/empty.ts", "const x = 1;\n")];
        let graph = DependencyGraph::build(&files);
        let mut builder = ContextBuilder::new("ts").unwrap();

        let err = builder
            .build(&files[0], "missing", &graph, vec![], None)
            .unwrap_err();
        assert_eq!(err.kind(), "analysis");
    }
}
