//! TypeScript language adapter with tree-sitter integration.

use tree_sitter::{Language, Parser};

use crate::core::errors::{Result, TestMindError};
use crate::lang::common::{LanguageAdapter, ParsedFile};
use crate::lang::extract::Extractor;
use crate::lang::registry::create_parser;

/// TypeScript-specific parsing. Handles both the plain and JSX dialects.
pub struct TypeScriptAdapter {
    parser: Parser,
}

impl TypeScriptAdapter {
    /// Create an adapter for plain TypeScript sources.
    pub fn new() -> Result<Self> {
        Self::with_dialect(false)
    }

    /// Create an adapter, selecting the TSX grammar when `tsx` is set.
    pub fn with_dialect(tsx: bool) -> Result<Self> {
        let language: Language = if tsx {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        } else {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        };
        Ok(Self {
            parser: create_parser(&language)?,
        })
    }
}

impl LanguageAdapter for TypeScriptAdapter {
    fn language_key(&self) -> &'static str {
        "ts"
    }

    fn parse_source(&mut self, source: &str, file_path: &str) -> Result<ParsedFile> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| TestMindError::parse("typescript", "parser produced no tree"))?;

        Ok(Extractor::new(source, file_path, "ts").extract(&tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParsedFile {
        let mut adapter = TypeScriptAdapter::new().unwrap();
        adapter.parse_source(source, "test.ts").unwrap()
    }

    #[test]
    fn test_parse_simple_function() {
        let file = parse("function add(a: number, b: number): number {\n    return a + b;\n}\n");

        assert_eq!(file.functions.len(), 1);
        let add = &file.functions[0];
        assert_eq!(add.signature.name, "add");
        assert_eq!(add.start_line, 1);
        assert_eq!(add.end_line, 3);
        assert_eq!(add.signature.parameters.len(), 2);
        assert_eq!(add.signature.parameters[0].param_type.as_deref(), Some("number"));
        assert_eq!(add.signature.return_type.as_deref(), Some("number"));
        assert!(!add.signature.is_async);
    }

    #[test]
    fn test_arrow_function_indexed_under_assignment_name() {
        let file = parse("export const greet = (name: string): string => `Hi ${name}`;\n");

        assert_eq!(file.functions.len(), 1);
        let greet = &file.functions[0];
        assert_eq!(greet.signature.name, "greet");
        assert!(greet.is_exported);
        assert!(greet.body.starts_with("const greet"));
    }

    #[test]
    fn test_nested_functions_reported_at_every_depth() {
        let source = r#"
function outer() {
    function middle() {
        const inner = () => 1;
        return inner();
    }
    return middle();
}
"#;
        let file = parse(source);

        let names: Vec<&str> = file
            .functions
            .iter()
            .map(|f| f.signature.name.as_str())
            .collect();
        assert_eq!(names, vec!["outer", "middle", "inner"]);
        assert_eq!(
            file.find_function("middle").unwrap().parent.as_deref(),
            Some("outer")
        );
        assert_eq!(
            file.find_function("inner").unwrap().parent.as_deref(),
            Some("middle")
        );
    }

    #[test]
    fn test_async_and_optional_parameters() {
        let source = r#"
async function fetchUser(id: string, options?: RequestOptions): Promise<User> {
    return axios.get(`/users/${id}`, options);
}
"#;
        let file = parse(source);

        let func = file.find_function("fetchUser").unwrap();
        assert!(func.signature.is_async);
        assert!(func.signature.parameters[1].optional);
        assert_eq!(
            func.signature.parameters[1].param_type.as_deref(),
            Some("RequestOptions")
        );
        assert_eq!(func.signature.return_type.as_deref(), Some("Promise<User>"));
        assert!(func.calls.iter().any(|c| c.callee == "axios.get"));
    }

    #[test]
    fn test_default_values_mark_optional() {
        let file = parse("function page(limit: number = 20) { return limit; }\n");
        let param = &file.functions[0].signature.parameters[0];
        assert!(param.optional);
        assert_eq!(param.default_value.as_deref(), Some("20"));
    }

    #[test]
    fn test_class_methods_qualified() {
        let source = r#"
export class UserService {
    private users: User[] = [];

    addUser(user: User): void {
        this.users.push(user);
    }

    findUser = (name: string) => this.users.find(u => u.name === name);
}
"#;
        let file = parse(source);

        assert_eq!(file.classes.len(), 1);
        let class = &file.classes[0];
        assert_eq!(class.name, "UserService");
        assert!(class.is_exported);
        assert_eq!(class.methods, vec!["addUser", "findUser"]);

        let add_user = file.find_function("UserService.addUser").unwrap();
        assert!(add_user.is_method);
        assert_eq!(add_user.signature.return_type.as_deref(), Some("void"));
    }

    #[test]
    fn test_imports_and_exports() {
        let source = r#"
import axios from 'axios';
import { readFile, writeFile as write } from 'fs/promises';
import * as path from 'path';

export function run() {}
export { helper };

function helper() {}
"#;
        let file = parse(source);

        assert_eq!(file.imports.len(), 3);
        assert_eq!(file.imports[0].names, vec!["axios"]);
        assert_eq!(file.imports[1].names, vec!["readFile", "write"]);
        assert_eq!(file.imports[2].names, vec!["path"]);
        assert!(!file.imports[0].is_relative());

        assert!(file.is_exported("run"));
        assert!(file.is_exported("helper"));
        assert!(file.find_function("helper").unwrap().is_exported);
    }

    #[test]
    fn test_doc_comment_attached() {
        let source = r#"
/** Adds two numbers. */
export function add(a: number, b: number) { return a + b; }
"#;
        let file = parse(source);
        let add = file.find_function("add").unwrap();
        assert_eq!(
            add.signature.documentation.as_deref(),
            Some("/** Adds two numbers. */")
        );
    }

    #[test]
    fn test_malformed_source_yields_partial_results() {
        let source = "function ok() { return 1; }\nfunction broken(  {\n";
        let mut adapter = TypeScriptAdapter::new().unwrap();
        let file = adapter.parse_source(source, "broken.ts").unwrap();

        assert!(file.had_errors);
        assert!(file.find_function("ok").is_some());
    }

    #[test]
    fn test_tsx_dialect() {
        let source = "export const Button = (props: Props) => <button>{props.label}</button>;\n";
        let mut adapter = TypeScriptAdapter::with_dialect(true).unwrap();
        let file = adapter.parse_source(source, "button.tsx").unwrap();

        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].signature.name, "Button");
    }
}
