//! Test strategy planning from function context.
//!
//! The planner turns a [`FunctionContext`] into a concrete plan: the test
//! shape (AAA or table-driven), canonical boundary values per typed
//! parameter, edge-case scenarios implied by asyncness and side effects,
//! and a mock strategy. A pure function never gets mocks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::chunks::{FunctionContext, Parameter, SideEffectKind};

/// Overall shape of the generated test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStrategyType {
    /// Arrange-act-assert
    Aaa,
    /// Table-driven cases over an input matrix
    TableDriven,
    /// Property-based (opt-in; never auto-selected)
    PropertyBased,
}

/// Canonical boundary values for one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryCondition {
    /// Parameter name
    pub parameter: String,
    /// Values to exercise, rendered as source literals
    pub values: Vec<String>,
    /// Why these values were chosen
    pub reasoning: String,
}

/// One edge-case scenario the test should cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeCase {
    /// Scenario label
    pub scenario: String,
    /// Input sketch
    pub input: String,
    /// Expected behavior description
    pub expected_behavior: String,
}

/// How dependencies are mocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockType {
    /// Replace the module entirely
    Full,
    /// Mock selected members only
    Partial,
    /// Observe calls without replacing behavior
    Spy,
    /// No mocks at all
    None,
}

/// Mock plan for one generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockStrategy {
    /// Dependency names to mock
    pub dependencies: Vec<String>,
    /// Mock flavor
    pub mock_type: MockType,
    /// Suggested canned data per dependency
    pub mock_data: HashMap<String, String>,
}

/// Complete test strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStrategy {
    /// Test shape
    pub strategy_type: TestStrategyType,
    /// Boundary values per typed parameter
    pub boundary_conditions: Vec<BoundaryCondition>,
    /// Edge cases implied by the context
    pub edge_cases: Vec<EdgeCase>,
    /// Mock plan
    pub mock_strategy: MockStrategy,
}

/// Parameter count at which table-driven tests win over AAA.
const TABLE_DRIVEN_PARAM_THRESHOLD: usize = 3;

/// Strategy planner.
#[derive(Debug, Default, Clone)]
pub struct StrategyPlanner;

impl StrategyPlanner {
    /// Create a planner.
    pub fn new() -> Self {
        Self
    }

    /// Produce a strategy for a function context.
    pub fn plan(&self, context: &FunctionContext) -> TestStrategy {
        let strategy_type = if context.signature.parameters.len() >= TABLE_DRIVEN_PARAM_THRESHOLD
        {
            TestStrategyType::TableDriven
        } else {
            TestStrategyType::Aaa
        };

        TestStrategy {
            strategy_type,
            boundary_conditions: self.boundary_conditions(&context.signature.parameters),
            edge_cases: self.edge_cases(context),
            mock_strategy: self.mock_strategy(context),
        }
    }

    fn boundary_conditions(&self, parameters: &[Parameter]) -> Vec<BoundaryCondition> {
        let mut conditions = Vec::new();

        for param in parameters {
            let declared = param.param_type.as_deref().unwrap_or("");
            let lowered = declared.to_ascii_lowercase();

            if let Some(values) = canonical_values(&lowered) {
                conditions.push(BoundaryCondition {
                    parameter: param.name.clone(),
                    values: values.iter().map(|v| (*v).to_string()).collect(),
                    reasoning: format!("boundary values for `{declared}`"),
                });
            }

            if param.optional {
                conditions.push(BoundaryCondition {
                    parameter: param.name.clone(),
                    values: vec!["null".to_string(), "undefined".to_string()],
                    reasoning: "parameter is optional".to_string(),
                });
            }
        }

        conditions
    }

    fn edge_cases(&self, context: &FunctionContext) -> Vec<EdgeCase> {
        let mut cases = Vec::new();
        let name = &context.signature.name;

        if context.signature.is_async {
            cases.push(EdgeCase {
                scenario: "promise rejection".to_string(),
                input: "a failing dependency".to_string(),
                expected_behavior: format!(
                    "{name} rejects (or surfaces the error) instead of hanging"
                ),
            });
        }

        for kind in context.side_effect_kinds() {
            cases.push(EdgeCase {
                scenario: format!("{} failure", kind.as_str()),
                input: failure_input(kind).to_string(),
                expected_behavior: format!("{name} propagates or handles the {} error", kind.as_str()),
            });
        }

        if context.signature.parameters.iter().any(|p| p.optional) {
            cases.push(EdgeCase {
                scenario: "missing optional arguments".to_string(),
                input: "null / undefined for optional parameters".to_string(),
                expected_behavior: format!("{name} falls back to defaults without throwing"),
            });
        }

        cases
    }

    fn mock_strategy(&self, context: &FunctionContext) -> MockStrategy {
        if context.is_pure() {
            return MockStrategy {
                dependencies: Vec::new(),
                mock_type: MockType::None,
                mock_data: HashMap::new(),
            };
        }

        let mut dependencies: Vec<String> = context
            .external_dependencies()
            .map(|d| d.name.clone())
            .collect();
        for kind in context.side_effect_kinds() {
            let tag = kind.as_str().to_string();
            if !dependencies.contains(&tag) {
                dependencies.push(tag);
            }
        }

        let mock_type = if context.side_effects.is_empty() {
            MockType::Partial
        } else {
            MockType::Full
        };

        let mock_data = dependencies
            .iter()
            .map(|dep| (dep.clone(), suggested_mock_data(dep)))
            .collect();

        MockStrategy {
            dependencies,
            mock_type,
            mock_data,
        }
    }
}

/// Canonical boundary value sets per declared type.
fn canonical_values(lowered_type: &str) -> Option<&'static [&'static str]> {
    if lowered_type.contains("[]") || lowered_type.starts_with("array") {
        Some(&["[]", "[x]", "[x, y, z]"])
    } else if lowered_type.contains("string") {
        Some(&["\"\"", "\"a\"", "\"a\".repeat(10_000)"])
    } else if lowered_type.contains("number") || lowered_type.contains("bigint") {
        Some(&[
            "0",
            "-1",
            "1",
            "Number.MAX_SAFE_INTEGER",
            "Number.MIN_SAFE_INTEGER",
        ])
    } else if lowered_type.contains("boolean") {
        Some(&["true", "false"])
    } else {
        None
    }
}

fn failure_input(kind: SideEffectKind) -> &'static str {
    match kind {
        SideEffectKind::Network => "the HTTP call fails or times out",
        SideEffectKind::Filesystem => "the file is missing or unreadable",
        SideEffectKind::Database => "the query errors or the pool is closed",
        SideEffectKind::State => "shared state holds an unexpected value",
        SideEffectKind::Io => "the stream is closed",
    }
}

fn suggested_mock_data(dependency: &str) -> String {
    match dependency {
        "axios" | "network" => "{ data: {}, status: 200 }".to_string(),
        "filesystem" => "\"file contents\"".to_string(),
        "database" => "{ rows: [] }".to_string(),
        _ => "{}".to_string(),
    }
}
