//! AST-based complexity analysis.
//!
//! Computes McCabe cyclomatic complexity (decision points + 1), cognitive
//! complexity (nesting-weighted), non-blank LOC, and a derived
//! maintainability index per function. Metrics are computed from a real
//! parse of the function source rather than keyword counting, so strings
//! and comments never inflate the counts.

use tree_sitter::{Language, Node, Parser};

use crate::core::chunks::ComplexityMetrics;
use crate::core::errors::{Result, TestMindError};
use crate::lang::registry::create_parser;

/// Complexity analyzer for one language.
pub struct ComplexityAnalyzer {
    parser: Parser,
    language_key: &'static str,
}

impl ComplexityAnalyzer {
    /// Create an analyzer for a canonical language key.
    pub fn new(language: &str) -> Result<Self> {
        let (grammar, language_key): (Language, &'static str) = match language {
            "js" | "javascript" => (tree_sitter_javascript::LANGUAGE.into(), "js"),
            "ts" | "typescript" => {
                (tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(), "ts")
            }
            other => {
                return Err(TestMindError::analysis(format!(
                    "no complexity support for language '{other}'"
                )))
            }
        };

        Ok(Self {
            parser: create_parser(&grammar)?,
            language_key,
        })
    }

    /// Compute metrics for a single function body.
    ///
    /// The body is parsed standalone; tree-sitter tolerates fragments, so a
    /// method body without its class still yields a usable tree.
    pub fn analyze_function(&mut self, body: &str) -> Result<ComplexityMetrics> {
        let tree = self
            .parser
            .parse(body, None)
            .ok_or_else(|| TestMindError::parse(self.language_key, "parser produced no tree"))?;

        let mut counter = Counter::new(body);
        counter.visit(tree.root_node(), 0);

        let loc = body.lines().filter(|l| !l.trim().is_empty()).count();
        let cyclomatic = 1 + counter.decision_points;
        let maintainability_index =
            maintainability_index(counter.halstead_volume(), cyclomatic, loc);

        Ok(ComplexityMetrics {
            cyclomatic,
            cognitive: counter.cognitive,
            loc,
            maintainability_index,
        })
    }
}

/// Tree walker counting decision points, cognitive weight, and Halstead
/// token classes.
struct Counter<'a> {
    source: &'a str,
    decision_points: u32,
    cognitive: u32,
    operators: Vec<String>,
    operands: Vec<String>,
}

impl<'a> Counter<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            decision_points: 0,
            cognitive: 0,
            operators: Vec::new(),
            operands: Vec::new(),
        }
    }

    fn visit(&mut self, node: Node, depth: u32) {
        let mut child_depth = depth;

        match node.kind() {
            "if_statement"
            | "for_statement"
            | "for_in_statement"
            | "while_statement"
            | "do_statement"
            | "catch_clause"
            | "conditional_expression" => {
                self.decision_points += 1;
                self.cognitive += 1 + depth;
                child_depth = depth + 1;
            }
            "switch_case" => {
                // `default:` arms parse as switch_default, not switch_case
                self.decision_points += 1;
                self.cognitive += 1;
            }
            "binary_expression" => {
                if let Some(op) = node.child_by_field_name("operator") {
                    let op_text = &self.source[op.byte_range()];
                    if op_text == "&&" || op_text == "||" || op_text == "??" {
                        self.decision_points += 1;
                        self.cognitive += 1;
                    }
                }
            }
            _ => {}
        }

        if node.child_count() == 0 {
            self.record_leaf(node);
            return;
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, child_depth);
        }
    }

    fn record_leaf(&mut self, node: Node) {
        let text = self.source[node.byte_range()].to_string();
        if text.is_empty() || node.kind() == "comment" {
            return;
        }
        if node.is_named() {
            self.operands.push(text);
        } else {
            self.operators.push(text);
        }
    }

    /// Halstead volume `N · log2(n)` over operator/operand token classes.
    fn halstead_volume(&self) -> f64 {
        let total = (self.operators.len() + self.operands.len()) as f64;
        let unique_operators: ahash::AHashSet<&String> = self.operators.iter().collect();
        let unique_operands: ahash::AHashSet<&String> = self.operands.iter().collect();
        let vocabulary = (unique_operators.len() + unique_operands.len()) as f64;

        if vocabulary <= 1.0 || total == 0.0 {
            return 1.0;
        }
        (total * vocabulary.log2()).max(1.0)
    }
}

/// Classic maintainability index, rescaled to [0, 100].
fn maintainability_index(volume: f64, cyclomatic: u32, loc: usize) -> f64 {
    let volume = volume.max(1.0);
    let loc = loc.max(1) as f64;

    let raw = 171.0 - 5.2 * volume.ln() - 0.23 * f64::from(cyclomatic) - 16.2 * loc.ln();
    (raw * 100.0 / 171.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(body: &str) -> ComplexityMetrics {
        ComplexityAnalyzer::new("ts")
            .unwrap()
            .analyze_function(body)
            .unwrap()
    }

    #[test]
    fn test_straight_line_code_is_cyclomatic_one() {
        let m = metrics("function add(a: number, b: number) {\n    return a + b;\n}");
        assert_eq!(m.cyclomatic, 1);
        assert_eq!(m.cognitive, 0);
        assert_eq!(m.loc, 3);
    }

    #[test]
    fn test_branches_and_boolean_operators_count() {
        let body = r#"
function classify(x: number) {
    if (x > 0 && x < 10) {
        return "small";
    } else if (x >= 10 || x === -1) {
        return "other";
    }
    return "rest";
}
"#;
        let m = metrics(body);
        // if, else-if, &&, || -> 4 decision points + 1
        assert_eq!(m.cyclomatic, 5);
        assert!(m.cognitive >= 4);
    }

    #[test]
    fn test_nesting_raises_cognitive_faster_than_cyclomatic() {
        let flat = metrics("function f(a) { if (a) {} if (a) {} if (a) {} }");
        let nested = metrics("function f(a) { if (a) { if (a) { if (a) {} } } }");

        assert_eq!(flat.cyclomatic, nested.cyclomatic);
        assert!(nested.cognitive > flat.cognitive);
    }

    #[test]
    fn test_switch_cases_count_without_default() {
        let body = r#"
function pick(tag: string) {
    switch (tag) {
        case "a": return 1;
        case "b": return 2;
        default: return 0;
    }
}
"#;
        let m = metrics(body);
        assert_eq!(m.cyclomatic, 3);
    }

    #[test]
    fn test_maintainability_decreases_with_size() {
        let small = metrics("function f() { return 1; }");
        let large_body = format!(
            "function f(x) {{\n{}\nreturn x;\n}}",
            (0..40)
                .map(|i| format!("    if (x > {i}) {{ x += {i}; }}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let large = metrics(&large_body);

        assert!(small.maintainability_index > large.maintainability_index);
        assert!(large.maintainability_index >= 0.0);
    }
}
