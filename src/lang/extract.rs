//! Shared tree-sitter extraction walker for the JavaScript-family grammars.
//!
//! The TypeScript and JavaScript grammars share almost all statement and
//! expression node kinds; the TypeScript grammar adds typed parameter
//! wrappers and type annotations. One walker serves both adapters.
//!
//! Extraction rules:
//! - functions are reported at every nesting depth
//! - arrow functions and function expressions assigned to a declarator are
//!   indexed under the assignment name
//! - class methods are indexed under `Class.method`
//! - type annotations are carried verbatim from source text
//! - error nodes mark the parse as partial but never abort it

use tree_sitter::{Node, Tree};

use crate::core::chunks::{FunctionSignature, Parameter};
use crate::lang::common::{CallSite, ClassInfo, ExportInfo, FunctionInfo, ImportInfo, ParsedFile};

/// Tree walker translating a parse tree into a [`ParsedFile`].
pub(crate) struct Extractor<'a> {
    source: &'a str,
    file_path: &'a str,
    language: &'static str,
}

impl<'a> Extractor<'a> {
    pub(crate) fn new(source: &'a str, file_path: &'a str, language: &'static str) -> Self {
        Self {
            source,
            file_path,
            language,
        }
    }

    /// Run extraction over a parse tree.
    pub(crate) fn extract(&self, tree: &Tree) -> ParsedFile {
        let root = tree.root_node();
        let mut file = ParsedFile {
            file_path: self.file_path.replace('\\', "/"),
            language: self.language.to_string(),
            had_errors: root.has_error(),
            ..ParsedFile::default()
        };

        self.visit(root, None, false, &mut file);

        // Exported flags resolve after the walk so `export { foo }` at the
        // bottom of a module still marks a function declared at the top.
        let exported: ahash::AHashSet<String> =
            file.exports.iter().map(|e| e.name.clone()).collect();
        for function in &mut file.functions {
            if exported.contains(&function.signature.name) {
                function.is_exported = true;
            }
        }
        for class in &mut file.classes {
            if exported.contains(&class.name) {
                class.is_exported = true;
            }
        }

        file
    }

    fn text(&self, node: Node) -> &'a str {
        &self.source[node.byte_range()]
    }

    fn visit(&self, node: Node, parent: Option<&str>, exported: bool, file: &mut ParsedFile) {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                self.collect_function(node, node, None, parent, exported, false, file);
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.collect_class(node, exported, file);
            }
            "lexical_declaration" | "variable_declaration" => {
                self.collect_declarators(node, parent, exported, file);
            }
            "import_statement" => {
                self.collect_import(node, file);
            }
            "export_statement" => {
                self.collect_export(node, parent, file);
            }
            _ => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, parent, exported, file);
                }
            }
        }
    }

    /// Record one function and recurse into its body for nested functions.
    ///
    /// `outer` is the statement-level node whose text and span describe the
    /// function in listings (`const f = ...` for assigned arrows), while
    /// `func` is the function node itself.
    #[allow(clippy::too_many_arguments)]
    fn collect_function(
        &self,
        outer: Node,
        func: Node,
        assigned_name: Option<String>,
        parent: Option<&str>,
        exported: bool,
        is_method: bool,
        file: &mut ParsedFile,
    ) {
        let name = assigned_name.or_else(|| {
            func.child_by_field_name("name")
                .map(|n| self.text(n).to_string())
        });
        let name = match name {
            Some(name) => name,
            None => return, // anonymous and unassigned; nothing to index
        };

        let signature = FunctionSignature {
            name: name.clone(),
            file_path: self.file_path.replace('\\', "/"),
            parameters: self.parameters_of(func),
            return_type: self.return_type_of(func),
            is_async: has_keyword_child(func, "async"),
            documentation: self.doc_comment_before(outer),
        };

        let body_node = func.child_by_field_name("body").unwrap_or(func);
        let mut calls = Vec::new();
        self.collect_calls(body_node, &mut calls);

        file.functions.push(FunctionInfo {
            signature,
            start_line: outer.start_position().row + 1,
            end_line: outer.end_position().row + 1,
            body: self.text(outer).to_string(),
            calls,
            parent: parent.map(str::to_string),
            is_exported: exported,
            is_method,
        });

        self.visit_children_of(body_node, &name, file);
    }

    /// Recurse into a body looking for nested declarations.
    fn visit_children_of(&self, body: Node, parent: &str, file: &mut ParsedFile) {
        let mut cursor = body.walk();
        for child in body.children(&mut cursor) {
            self.visit(child, Some(parent), false, file);
        }
    }

    fn collect_class(&self, node: Node, exported: bool, file: &mut ParsedFile) {
        let name = match node.child_by_field_name("name") {
            Some(n) => self.text(n).to_string(),
            None => return,
        };

        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for member in body.children(&mut cursor) {
                if member.kind() == "method_definition" {
                    if let Some(method_name) = member.child_by_field_name("name") {
                        let method_name = self.text(method_name).to_string();
                        methods.push(method_name.clone());
                        self.collect_function(
                            member,
                            member,
                            Some(method_name),
                            Some(&name),
                            exported,
                            true,
                            file,
                        );
                    }
                } else if member.kind() == "public_field_definition" {
                    // Arrow-function class properties behave like methods.
                    if let (Some(prop), Some(value)) = (
                        member.child_by_field_name("name"),
                        member.child_by_field_name("value"),
                    ) {
                        if is_function_node(value) {
                            let method_name = self.text(prop).to_string();
                            methods.push(method_name.clone());
                            self.collect_function(
                                member,
                                value,
                                Some(method_name),
                                Some(&name),
                                exported,
                                true,
                                file,
                            );
                        }
                    }
                }
            }
        }

        file.classes.push(ClassInfo {
            name,
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            methods,
            is_exported: exported,
        });
    }

    /// `const f = () => ...` and `var g = function() {}` forms.
    fn collect_declarators(
        &self,
        node: Node,
        parent: Option<&str>,
        exported: bool,
        file: &mut ParsedFile,
    ) {
        let mut cursor = node.walk();
        for declarator in node.children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let (Some(name_node), Some(value)) = (
                declarator.child_by_field_name("name"),
                declarator.child_by_field_name("value"),
            ) else {
                continue;
            };
            if is_function_node(value) {
                let name = self.text(name_node).to_string();
                self.collect_function(node, value, Some(name), parent, exported, false, file);
            } else {
                // Initializers may still contain nested function literals
                // worth indexing (object methods are out of scope here).
                self.visit(value, parent, false, file);
            }
        }
    }

    fn collect_import(&self, node: Node, file: &mut ParsedFile) {
        let source = match node.child_by_field_name("source") {
            Some(s) => self.text(s).trim_matches(['"', '\'', '`']).to_string(),
            None => return,
        };

        let mut names = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "import_clause" {
                let mut inner = child.walk();
                for part in child.children(&mut inner) {
                    match part.kind() {
                        "identifier" => names.push(self.text(part).to_string()),
                        "namespace_import" => {
                            // `* as fs` binds the alias identifier
                            let mut ns = part.walk();
                            for piece in part.children(&mut ns) {
                                if piece.kind() == "identifier" {
                                    names.push(self.text(piece).to_string());
                                }
                            }
                        }
                        "named_imports" => {
                            let mut specs = part.walk();
                            for spec in part.children(&mut specs) {
                                if spec.kind() == "import_specifier" {
                                    let bound = spec
                                        .child_by_field_name("alias")
                                        .or_else(|| spec.child_by_field_name("name"));
                                    if let Some(bound) = bound {
                                        names.push(self.text(bound).to_string());
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        file.imports.push(ImportInfo {
            source,
            names,
            line: node.start_position().row + 1,
        });
    }

    fn collect_export(&self, node: Node, parent: Option<&str>, file: &mut ParsedFile) {
        let line = node.start_position().row + 1;
        let is_default = has_keyword_child(node, "default");

        if let Some(declaration) = node.child_by_field_name("declaration") {
            // Names bound by the declaration are exported directly.
            for name in self.declared_names(declaration) {
                file.exports.push(ExportInfo { name, line });
            }
            if is_default {
                file.exports.push(ExportInfo {
                    name: "default".to_string(),
                    line,
                });
            }
            self.visit(declaration, parent, true, file);
            return;
        }

        if let Some(value) = node.child_by_field_name("value") {
            // `export default <expression>`
            file.exports.push(ExportInfo {
                name: "default".to_string(),
                line,
            });
            self.visit(value, parent, true, file);
            return;
        }

        // `export { a, b as c }`
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "export_clause" {
                let mut specs = child.walk();
                for spec in child.children(&mut specs) {
                    if spec.kind() == "export_specifier" {
                        if let Some(name) = spec.child_by_field_name("name") {
                            file.exports.push(ExportInfo {
                                name: self.text(name).to_string(),
                                line,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Names bound at the top level of a declaration node.
    fn declared_names(&self, declaration: Node) -> Vec<String> {
        match declaration.kind() {
            "function_declaration"
            | "generator_function_declaration"
            | "class_declaration"
            | "abstract_class_declaration" => declaration
                .child_by_field_name("name")
                .map(|n| vec![self.text(n).to_string()])
                .unwrap_or_default(),
            "lexical_declaration" | "variable_declaration" => {
                let mut names = Vec::new();
                let mut cursor = declaration.walk();
                for declarator in declaration.children(&mut cursor) {
                    if declarator.kind() == "variable_declarator" {
                        if let Some(name) = declarator.child_by_field_name("name") {
                            names.push(self.text(name).to_string());
                        }
                    }
                }
                names
            }
            _ => Vec::new(),
        }
    }

    fn parameters_of(&self, func: Node) -> Vec<Parameter> {
        let mut parameters = Vec::new();

        if let Some(single) = func.child_by_field_name("parameter") {
            // `x => x + 1` arrow shorthand
            parameters.push(Parameter {
                name: self.text(single).to_string(),
                param_type: None,
                optional: false,
                default_value: None,
            });
            return parameters;
        }

        let Some(params) = func.child_by_field_name("parameters") else {
            return parameters;
        };

        let mut cursor = params.walk();
        for param in params.children(&mut cursor) {
            match param.kind() {
                // TypeScript grammar wraps every parameter
                "required_parameter" | "optional_parameter" => {
                    let name = param
                        .child_by_field_name("pattern")
                        .map(|p| self.text(p).to_string())
                        .unwrap_or_default();
                    if name.is_empty() || name == "this" {
                        continue;
                    }
                    let default_value = param
                        .child_by_field_name("value")
                        .map(|v| self.text(v).to_string());
                    parameters.push(Parameter {
                        name,
                        param_type: param
                            .child_by_field_name("type")
                            .map(|t| self.annotation_text(t)),
                        optional: param.kind() == "optional_parameter" || default_value.is_some(),
                        default_value,
                    });
                }
                // JavaScript grammar exposes bare patterns
                "identifier" => parameters.push(Parameter {
                    name: self.text(param).to_string(),
                    param_type: None,
                    optional: false,
                    default_value: None,
                }),
                "assignment_pattern" => {
                    let name = param
                        .child_by_field_name("left")
                        .map(|l| self.text(l).to_string())
                        .unwrap_or_default();
                    let default_value = param
                        .child_by_field_name("right")
                        .map(|r| self.text(r).to_string());
                    parameters.push(Parameter {
                        name,
                        param_type: None,
                        optional: true,
                        default_value,
                    });
                }
                "rest_pattern" | "rest_parameter" => parameters.push(Parameter {
                    name: self.text(param).to_string(),
                    param_type: None,
                    optional: true,
                    default_value: None,
                }),
                "object_pattern" | "array_pattern" => parameters.push(Parameter {
                    name: self.text(param).to_string(),
                    param_type: None,
                    optional: false,
                    default_value: None,
                }),
                _ => {}
            }
        }

        parameters
    }

    fn return_type_of(&self, func: Node) -> Option<String> {
        func.child_by_field_name("return_type")
            .map(|t| self.annotation_text(t))
    }

    /// Annotation text as written in source, minus the `:` separator.
    fn annotation_text(&self, annotation: Node) -> String {
        self.text(annotation)
            .trim_start_matches(':')
            .trim_start()
            .to_string()
    }

    /// Leading `/** ... */` comment attached to a statement.
    fn doc_comment_before(&self, node: Node) -> Option<String> {
        // Export wrappers put the doc before the export statement.
        let anchor = match node.parent() {
            Some(parent) if parent.kind() == "export_statement" => parent,
            _ => node,
        };

        let mut prev = anchor.prev_sibling()?;
        while prev.kind() == "comment" {
            let text = self.text(prev);
            if text.starts_with("/**") {
                return Some(text.to_string());
            }
            prev = prev.prev_sibling()?;
        }
        None
    }

    /// Collect call expressions inside a body, not descending into nested
    /// function literals (those report their own calls).
    fn collect_calls(&self, node: Node, calls: &mut Vec<CallSite>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if is_function_node(child) || child.kind() == "method_definition" {
                continue;
            }
            match child.kind() {
                "call_expression" => {
                    if let Some(callee) = child.child_by_field_name("function") {
                        calls.push(CallSite {
                            callee: self.text(callee).to_string(),
                            line: child.start_position().row + 1,
                        });
                    }
                    self.collect_calls(child, calls);
                }
                "new_expression" => {
                    if let Some(constructor) = child.child_by_field_name("constructor") {
                        calls.push(CallSite {
                            callee: format!("new {}", self.text(constructor)),
                            line: child.start_position().row + 1,
                        });
                    }
                    self.collect_calls(child, calls);
                }
                _ => self.collect_calls(child, calls),
            }
        }
    }
}

/// Whether a node is a function literal of any form.
fn is_function_node(node: Node) -> bool {
    matches!(
        node.kind(),
        "arrow_function" | "function_expression" | "function" | "generator_function"
    )
}

/// Whether a node has an anonymous keyword child of the given kind.
fn has_keyword_child(node: Node, keyword: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == keyword);
    found
}
