//! Cross-file dependency analysis.
//!
//! Builds a directed multigraph over files and functions:
//!
//! - **Imports**: file → file edges, resolved for relative specifiers
//! - **Calls**: function → function edges, resolved only when the callee is
//!   defined inside the project
//!
//! Cycles are permitted and detected with Kosaraju's algorithm; every
//! traversal carries an explicit visited set so cyclic graphs never cause
//! unbounded recursion. Back-edges are recorded like any other edge and do
//! not alter callee resolution.

use std::collections::VecDeque;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::core::chunks::{Dependency, DependencyKind};
use crate::lang::common::{FunctionInfo, ParsedFile};

/// Node modules treated as runtime builtins.
const BUILTIN_MODULES: &[&str] = &[
    "fs",
    "fs/promises",
    "path",
    "http",
    "https",
    "os",
    "crypto",
    "util",
    "url",
    "stream",
    "child_process",
    "zlib",
    "events",
    "buffer",
    "assert",
    "net",
    "readline",
];

/// Global identifiers available without import.
const GLOBAL_BUILTINS: &[&str] = &[
    "console",
    "Math",
    "JSON",
    "Object",
    "Array",
    "Number",
    "String",
    "Boolean",
    "Date",
    "Promise",
    "RegExp",
    "Error",
    "Map",
    "Set",
    "WeakMap",
    "WeakSet",
    "Symbol",
    "Reflect",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "structuredClone",
    "setTimeout",
    "setInterval",
    "clearTimeout",
    "clearInterval",
    "encodeURIComponent",
    "decodeURIComponent",
];

/// A node in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphNode {
    /// A source file, by normalized path
    File(String),
    /// A function, by file path and qualified name
    Function {
        /// Normalized path of the defining file
        file_path: String,
        /// Qualified name (`Class.method` or bare name)
        qualified_name: String,
    },
}

impl GraphNode {
    /// Display label used in diagnostics.
    pub fn label(&self) -> String {
        match self {
            GraphNode::File(path) => path.clone(),
            GraphNode::Function {
                file_path,
                qualified_name,
            } => format!("{file_path}::{qualified_name}"),
        }
    }
}

/// Edge kinds in the multigraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// File-level import edge
    Imports,
    /// Function-level call edge
    Calls,
}

/// Project-wide dependency graph.
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, EdgeKind>,
    file_nodes: AHashMap<String, NodeIndex>,
    function_nodes: AHashMap<(String, String), NodeIndex>,
    /// Exported bindings per file, for cross-file call resolution
    exports_by_file: AHashMap<String, AHashSet<String>>,
    /// Import bindings per file: binding name → module specifier
    imports_by_file: AHashMap<String, AHashMap<String, String>>,
}

impl DependencyGraph {
    /// Build the graph from a set of parsed files.
    pub fn build(files: &[Arc<ParsedFile>]) -> Self {
        let mut graph = DiGraph::new();
        let mut file_nodes = AHashMap::new();
        let mut function_nodes = AHashMap::new();
        let mut exports_by_file: AHashMap<String, AHashSet<String>> = AHashMap::new();
        let mut imports_by_file: AHashMap<String, AHashMap<String, String>> = AHashMap::new();

        // First pass: nodes and per-file tables.
        for file in files {
            file_nodes
                .entry(file.file_path.clone())
                .or_insert_with(|| graph.add_node(GraphNode::File(file.file_path.clone())));

            exports_by_file.insert(
                file.file_path.clone(),
                file.exports.iter().map(|e| e.name.clone()).collect(),
            );

            let mut bindings = AHashMap::new();
            for import in &file.imports {
                for name in &import.names {
                    bindings.insert(name.clone(), import.source.clone());
                }
            }
            imports_by_file.insert(file.file_path.clone(), bindings);

            for function in &file.functions {
                let key = (file.file_path.clone(), function.qualified_name());
                function_nodes.entry(key.clone()).or_insert_with(|| {
                    graph.add_node(GraphNode::Function {
                        file_path: key.0.clone(),
                        qualified_name: key.1.clone(),
                    })
                });
            }
        }

        let known_paths: AHashSet<String> =
            files.iter().map(|f| f.file_path.clone()).collect();

        // Second pass: edges.
        for file in files {
            let from_file = file_nodes[&file.file_path];

            for import in &file.imports {
                if let Some(target) =
                    resolve_specifier(&file.file_path, &import.source, &known_paths)
                {
                    if let Some(&to_file) = file_nodes.get(&target) {
                        graph.add_edge(from_file, to_file, EdgeKind::Imports);
                    }
                }
            }

            for function in &file.functions {
                let from_key = (file.file_path.clone(), function.qualified_name());
                let from_idx = function_nodes[&from_key];

                for call in &function.calls {
                    if let Some(to_key) = resolve_call(
                        file,
                        function,
                        &call.callee,
                        &known_paths,
                        &exports_by_file,
                    ) {
                        if let Some(&to_idx) = function_nodes.get(&to_key) {
                            graph.add_edge(from_idx, to_idx, EdgeKind::Calls);
                        }
                    }
                }
            }
        }

        Self {
            graph,
            file_nodes,
            function_nodes,
            exports_by_file,
            imports_by_file,
        }
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Functions that (transitively) call the given function.
    ///
    /// Reverse-call closure via BFS, truncated at `max_depth` hops. The
    /// visited set makes the walk cycle-safe.
    pub fn function_callers(
        &self,
        file_path: &str,
        name: &str,
        max_depth: usize,
    ) -> Vec<String> {
        let Some(&start) = self
            .function_nodes
            .get(&(file_path.to_string(), name.to_string()))
        else {
            return Vec::new();
        };

        let mut visited: AHashSet<NodeIndex> = AHashSet::new();
        visited.insert(start);
        let mut queue = VecDeque::from([(start, 0usize)]);
        let mut callers = Vec::new();

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for caller in self.graph.neighbors_directed(node, Direction::Incoming) {
                if !visited.insert(caller) {
                    continue;
                }
                if let GraphNode::Function { qualified_name, .. } = &self.graph[caller] {
                    callers.push(qualified_name.clone());
                }
                queue.push_back((caller, depth + 1));
            }
        }

        callers.sort();
        callers
    }

    /// Files imported (directly) by a file.
    pub fn file_dependencies(&self, file_path: &str) -> Vec<String> {
        let Some(&node) = self.file_nodes.get(file_path) else {
            return Vec::new();
        };
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .filter_map(|n| match &self.graph[n] {
                GraphNode::File(path) => Some(path.clone()),
                GraphNode::Function { .. } => None,
            })
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Detected dependency cycles (strongly connected components of size
    /// greater than one), as lists of node labels.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut labels: Vec<String> =
                    scc.iter().map(|&idx| self.graph[idx].label()).collect();
                labels.sort();
                labels
            })
            .collect()
    }

    /// Classify the dependencies referenced by one function.
    ///
    /// Calls resolved inside the project are Internal; imported package
    /// bindings are External; Node core modules and ambient globals are
    /// Builtin. Unresolved bare names are ignored — locals and parameters
    /// are not dependencies.
    pub fn classify_dependencies(&self, file: &ParsedFile, function: &FunctionInfo) -> Vec<Dependency> {
        let empty = AHashMap::new();
        let bindings = self
            .imports_by_file
            .get(&file.file_path)
            .unwrap_or(&empty);

        let mut by_name: indexmap::IndexMap<String, Dependency> = indexmap::IndexMap::new();

        for call in &function.calls {
            let root = callee_root(&call.callee);
            if root.is_empty() || root == "this" {
                continue;
            }

            let kind = if let Some(specifier) = bindings.get(&root) {
                if BUILTIN_MODULES.contains(&specifier.as_str()) {
                    DependencyKind::Builtin
                } else if specifier.starts_with('.') || specifier.starts_with('/') {
                    DependencyKind::Internal
                } else {
                    DependencyKind::External
                }
            } else if GLOBAL_BUILTINS.contains(&root.as_str()) {
                DependencyKind::Builtin
            } else if file.find_function(&root).is_some() {
                DependencyKind::Internal
            } else {
                continue;
            };

            let entry = by_name.entry(root.clone()).or_insert_with(|| Dependency {
                name: root.clone(),
                kind,
                used_in: Vec::new(),
            });
            if !entry.used_in.contains(&call.callee) {
                entry.used_in.push(call.callee.clone());
            }
        }

        by_name.into_values().collect()
    }

    /// Exported names of a file, when known.
    pub fn exports_of(&self, file_path: &str) -> Option<&AHashSet<String>> {
        self.exports_by_file.get(file_path)
    }
}

/// Root identifier of a callee expression (`axios.get` → `axios`).
fn callee_root(callee: &str) -> String {
    let trimmed = callee.trim_start_matches("new ").trim();
    trimmed
        .split(['.', '(', '[', '<'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Resolve a relative import specifier against the known project files.
fn resolve_specifier(
    importer: &str,
    specifier: &str,
    known_paths: &AHashSet<String>,
) -> Option<String> {
    if !specifier.starts_with('.') {
        return None;
    }

    let base_dir = importer.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    let joined = join_normalize(base_dir, specifier);

    let candidates = [
        joined.clone(),
        format!("{joined}.ts"),
        format!("{joined}.tsx"),
        format!("{joined}.js"),
        format!("{joined}.jsx"),
        format!("{joined}/index.ts"),
        format!("{joined}/index.js"),
    ];

    candidates
        .into_iter()
        .find(|candidate| known_paths.contains(candidate))
}

/// Join a directory and a relative specifier, collapsing `.` and `..`.
fn join_normalize(base_dir: &str, specifier: &str) -> String {
    let mut segments: Vec<&str> = if base_dir.is_empty() {
        Vec::new()
    } else {
        base_dir.split('/').collect()
    };

    for part in specifier.split('/') {
        match part {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    segments.join("/")
}

/// Resolve a call to a project-defined function key.
fn resolve_call(
    file: &ParsedFile,
    caller: &FunctionInfo,
    callee: &str,
    known_paths: &AHashSet<String>,
    exports_by_file: &AHashMap<String, AHashSet<String>>,
) -> Option<(String, String)> {
    // `this.method()` resolves within the enclosing class.
    if let Some(method) = callee.strip_prefix("this.") {
        let class_name = caller.parent.as_deref()?;
        let qualified = format!("{class_name}.{method}");
        if file.find_function(&qualified).is_some() {
            return Some((file.file_path.clone(), qualified));
        }
        return None;
    }

    let root = callee_root(callee);

    // Locally defined function.
    if file
        .functions
        .iter()
        .any(|f| f.qualified_name() == root || f.signature.name == root)
    {
        return Some((file.file_path.clone(), root));
    }

    // Imported from a sibling module that exports it.
    let import = file.imports.iter().find(|i| i.names.contains(&root))?;
    let target = resolve_specifier(&file.file_path, &import.source, known_paths)?;
    if exports_by_file
        .get(&target)
        .is_some_and(|exports| exports.contains(&root))
    {
        return Some((target, root));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::registry::adapter_for_language;

    fn parse(path: &str, source: &str) -> Arc<ParsedFile> {
        let mut adapter = adapter_for_language("ts").unwrap();
        Arc::new(adapter.parse_source(source, path).unwrap())
    }

    fn sample_project() -> Vec<Arc<ParsedFile>> {
        vec![
            parse(
                "src/math.ts",
                "export function add(a: number, b: number) { return a + b; }\n\
                 export function sum(xs: number[]) { return xs.reduce(add, 0); }\n",
            ),
            parse(
                "src/stats.ts",
                "import { add } from './math';\n\
                 export function mean(xs: number[]) { return add(xs[0], xs[1]) / 2; }\n",
            ),
            parse(
                "src/report.ts",
                "import { mean } from './stats';\n\
                 export function report(xs: number[]) { return `${mean(xs)}`; }\n",
            ),
        ]
    }

    #[test]
    fn test_import_edges_resolve_relative_specifiers() {
        let graph = DependencyGraph::build(&sample_project());
        assert_eq!(graph.file_dependencies("src/stats.ts"), vec!["src/math.ts"]);
        assert_eq!(graph.file_dependencies("src/report.ts"), vec!["src/stats.ts"]);
    }

    #[test]
    fn test_reverse_caller_closure_with_depth() {
        let graph = DependencyGraph::build(&sample_project());

        let direct = graph.function_callers("src/math.ts", "add", 1);
        assert_eq!(direct, vec!["mean"]);

        let closure = graph.function_callers("src/math.ts", "add", 5);
        assert_eq!(closure, vec!["mean", "report"]);
    }

    #[test]
    fn test_cycles_detected_and_bounded() {
        let files = vec![
            parse(
                "src/a.ts",
                "import { b } from './b';\nexport function a() { return b(); }\n",
            ),
            parse(
                "src/b.ts",
                "import { a } from './a';\nexport function b() { return a(); }\n",
            ),
        ];
        let graph = DependencyGraph::build(&files);

        let cycles = graph.cycles();
        assert!(!cycles.is_empty());

        // Traversal over the cyclic graph terminates and reports both sides.
        let callers = graph.function_callers("src/a.ts", "a", 10);
        assert_eq!(callers, vec!["b"]);
    }

    #[test]
    fn test_dependency_classification() {
        let files = vec![
            parse(
                "src/user.ts",
                "import axios from 'axios';\n\
                 import { readFile } from 'fs/promises';\n\
                 import { helper } from './helper';\n\
                 export function load(id: string) {\n\
                     console.log(id);\n\
                     readFile(id);\n\
                     helper(id);\n\
                     return axios.get(id);\n\
                 }\n",
            ),
            parse("src/helper.ts", "export function helper(x: string) { return x; }\n"),
        ];
        let graph = DependencyGraph::build(&files);
        let file = &files[0];
        let function = file.find_function("load").unwrap();

        let deps = graph.classify_dependencies(file, function);
        let kind_of = |name: &str| deps.iter().find(|d| d.name == name).map(|d| d.kind);

        assert_eq!(kind_of("axios"), Some(DependencyKind::External));
        assert_eq!(kind_of("readFile"), Some(DependencyKind::Builtin));
        assert_eq!(kind_of("helper"), Some(DependencyKind::Internal));
        assert_eq!(kind_of("console"), Some(DependencyKind::Builtin));
    }

    #[test]
    fn test_this_calls_resolve_to_methods() {
        let files = vec![parse(
            "src/svc.ts",
            "export class Service {\n\
                 validate(x: number) { return x > 0; }\n\
                 run(x: number) { return this.validate(x); }\n\
             }\n",
        )];
        let graph = DependencyGraph::build(&files);

        let callers = graph.function_callers("src/svc.ts", "Service.validate", 3);
        assert_eq!(callers, vec!["Service.run"]);
    }
}
