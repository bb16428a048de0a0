//! Tiered prompt assembly with framework rules.
//!
//! Prompts come in three tiers picked from `(cyclomatic, side effects,
//! dependency count)`: simple functions get a minimal prompt, complex ones
//! get a detailed prompt with a reasoning hint, error-avoidance section,
//! and worked examples. Framework specifics (mock/spy/fn token names,
//! best practices) are table-driven per test framework.

use serde::{Deserialize, Serialize};

use crate::core::chunks::{CodeChunk, FunctionContext};
use crate::generation::strategy::{MockType, TestStrategy, TestStrategyType};

/// Prompt tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptTier {
    Simple,
    Moderate,
    Complex,
}

/// Per-framework token names and guidance.
#[derive(Debug, Clone, Copy)]
pub struct FrameworkRules {
    /// Framework key as configured
    pub name: &'static str,
    /// Module-mock token (`jest.mock`)
    pub mock_token: &'static str,
    /// Spy token (`jest.spyOn`)
    pub spy_token: &'static str,
    /// Function-stub token (`jest.fn`)
    pub fn_token: &'static str,
    /// Import line for the test file, empty when globals are ambient
    pub import_line: &'static str,
    /// Short best-practices block
    pub best_practices: &'static str,
}

const FRAMEWORK_RULES: &[FrameworkRules] = &[
    FrameworkRules {
        name: "jest",
        mock_token: "jest.mock",
        spy_token: "jest.spyOn",
        fn_token: "jest.fn",
        import_line: "",
        best_practices: "Use describe/it blocks. Reset mocks in beforeEach with jest.clearAllMocks(). Prefer toStrictEqual for objects.",
    },
    FrameworkRules {
        name: "vitest",
        mock_token: "vi.mock",
        spy_token: "vi.spyOn",
        fn_token: "vi.fn",
        import_line: "import { describe, it, expect, vi, beforeEach } from 'vitest';",
        best_practices: "Use describe/it blocks. Reset mocks in beforeEach with vi.clearAllMocks(). Prefer toStrictEqual for objects.",
    },
    FrameworkRules {
        name: "mocha",
        mock_token: "sinon.stub",
        spy_token: "sinon.spy",
        fn_token: "sinon.fake",
        import_line: "import { expect } from 'chai';\nimport sinon from 'sinon';",
        best_practices: "Use describe/it blocks with chai expect. Restore stubs in afterEach with sinon.restore().",
    },
    FrameworkRules {
        name: "playwright",
        mock_token: "page.route",
        spy_token: "page.on",
        fn_token: "async ({ page })",
        import_line: "import { test, expect } from '@playwright/test';",
        best_practices: "Prefer getByTestId and getByRole locators. Await expect(...) assertions; never sleep.",
    },
];

/// Resolve the rules for a framework, defaulting to jest.
pub fn framework_rules(framework: &str) -> &'static FrameworkRules {
    FRAMEWORK_RULES
        .iter()
        .find(|r| r.name.eq_ignore_ascii_case(framework))
        .unwrap_or(&FRAMEWORK_RULES[0])
}

/// Maximum learned errors carried into a prompt.
const MAX_LEARNED_ERRORS: usize = 10;

/// Assembled prompt pair.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    /// System prompt
    pub system: String,
    /// User prompt
    pub user: String,
    /// Tier the builder chose
    pub tier: PromptTier,
}

/// Prompt builder.
#[derive(Debug, Default, Clone)]
pub struct PromptBuilder;

impl PromptBuilder {
    /// Create a builder.
    pub fn new() -> Self {
        Self
    }

    /// Pick the tier for a context: simple when `cyclo ≤ 3`, pure, and at
    /// most two dependencies; complex when `cyclo > 10` or side effects
    /// combine with more than two dependencies; moderate otherwise.
    pub fn tier_for(&self, context: &FunctionContext) -> PromptTier {
        let cyclo = context.complexity.cyclomatic;
        let deps = context.dependencies.len();

        if cyclo <= 3 && context.is_pure() && deps <= 2 {
            PromptTier::Simple
        } else if cyclo > 10 || (!context.side_effects.is_empty() && deps > 2) {
            PromptTier::Complex
        } else {
            PromptTier::Moderate
        }
    }

    /// Assemble the prompt.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        context: &FunctionContext,
        strategy: &TestStrategy,
        framework: &str,
        test_file_path: &str,
        fused_chunks: &[CodeChunk],
        learned_errors: &[String],
    ) -> BuiltPrompt {
        let tier = self.tier_for(context);
        let rules = framework_rules(framework);
        let import_path = relative_import_path(test_file_path, &context.signature.file_path);

        let system = format!(
            "You are an expert {framework} test engineer. Generate a complete, runnable test \
             file. Output exactly one fenced code block and nothing else.\n{}",
            rules.best_practices
        );

        let mut user = String::new();

        user.push_str(&format!(
            "Write {framework} tests for `{}` from `{}`.\n\n",
            context.signature.name, context.signature.file_path
        ));

        user.push_str("## Function under test\n");
        user.push_str(&format!("Name: {}\n", context.signature.name));
        user.push_str(&format!(
            "Async: {}\n",
            if context.signature.is_async { "Yes" } else { "No" }
        ));
        user.push_str(&format!("Signature: {}\n", render_signature(context)));
        if let Some(doc) = &context.signature.documentation {
            user.push_str(&format!("Documentation: {doc}\n"));
        }
        user.push_str(&format!("\n```\n{}\n```\n", context.source));

        self.push_signature_constraints(&mut user, context);

        user.push_str("\n## Test file\n");
        user.push_str(&format!("Path: {test_file_path}\n"));
        if !rules.import_line.is_empty() {
            user.push_str(&format!("Framework imports: {}\n", rules.import_line));
        }
        user.push_str(&format!(
            "Import the subject as: import {{ {} }} from '{import_path}';\n",
            context.signature.name
        ));

        self.push_strategy(&mut user, context, strategy, rules);

        if !fused_chunks.is_empty() {
            user.push_str("\n## Related project context\n");
            for chunk in fused_chunks {
                user.push_str(&format!(
                    "File: {}\nLines: {}-{}\n```\n{}\n```\n",
                    chunk.file_path, chunk.start_line, chunk.end_line, chunk.content
                ));
            }
        }

        if tier != PromptTier::Simple {
            self.push_error_avoidance(&mut user, learned_errors);
        }

        if tier == PromptTier::Complex {
            user.push_str(
                "\n## Approach\nThink through the branches and failure modes step by step \
                 before writing the final tests.\n",
            );
            self.push_worked_example(&mut user, rules);
        }

        BuiltPrompt { system, user, tier }
    }

    fn push_signature_constraints(&self, user: &mut String, context: &FunctionContext) {
        user.push_str("\n## Constraints\n");
        if context.signature.parameters.is_empty() {
            user.push_str(
                "- The function takes NO parameters. Do not invent arguments for it.\n",
            );
        } else {
            user.push_str(&format!(
                "- Call the function with exactly {} argument(s) matching the declared types.\n",
                context.signature.parameters.len()
            ));
        }
        if context.is_pure() {
            user.push_str(
                "- PURE FUNCTION: no side effects and no external dependencies. Do NOT mock \
                 anything; call it with real arguments and assert on real return values.\n",
            );
        }
    }

    fn push_strategy(
        &self,
        user: &mut String,
        context: &FunctionContext,
        strategy: &TestStrategy,
        rules: &FrameworkRules,
    ) {
        user.push_str("\n## Test plan\n");
        user.push_str(&format!(
            "Style: {}\n",
            match strategy.strategy_type {
                TestStrategyType::Aaa => "arrange-act-assert",
                TestStrategyType::TableDriven => "table-driven over an input matrix",
                TestStrategyType::PropertyBased => "property-based",
            }
        ));

        if !strategy.boundary_conditions.is_empty() {
            user.push_str("Boundary values:\n");
            for boundary in &strategy.boundary_conditions {
                user.push_str(&format!(
                    "- {}: {} ({})\n",
                    boundary.parameter,
                    boundary.values.join(", "),
                    boundary.reasoning
                ));
            }
        }

        if !strategy.edge_cases.is_empty() {
            user.push_str("Edge cases:\n");
            for edge in &strategy.edge_cases {
                user.push_str(&format!(
                    "- {}: given {}, expect {}\n",
                    edge.scenario, edge.input, edge.expected_behavior
                ));
            }
        }

        match strategy.mock_strategy.mock_type {
            MockType::None => {}
            mock_type => {
                user.push_str(&format!(
                    "Mocks ({:?} via {} / {} / {}):\n",
                    mock_type, rules.mock_token, rules.spy_token, rules.fn_token
                ));
                for dep in &strategy.mock_strategy.dependencies {
                    let data = strategy
                        .mock_strategy
                        .mock_data
                        .get(dep)
                        .map(String::as_str)
                        .unwrap_or("{}");
                    user.push_str(&format!("- mock `{dep}`, e.g. resolving {data}\n"));
                }
                let effect_kinds: Vec<&str> = context
                    .side_effect_kinds()
                    .iter()
                    .map(|k| k.as_str())
                    .collect();
                if !effect_kinds.is_empty() {
                    user.push_str(&format!(
                        "Side effects to isolate: {}.\n",
                        effect_kinds.join(", ")
                    ));
                }
            }
        }
    }

    fn push_error_avoidance(&self, user: &mut String, learned_errors: &[String]) {
        user.push_str("\n## Avoid these mistakes\n");
        user.push_str("- Do not assert on implementation details such as private state.\n");
        user.push_str("- Do not leave unawaited promises in async tests.\n");
        for error in learned_errors.iter().take(MAX_LEARNED_ERRORS) {
            user.push_str(&format!("- {error}\n"));
        }
    }

    fn push_worked_example(&self, user: &mut String, rules: &FrameworkRules) {
        user.push_str(&format!(
            "\n## Example shape\n```\n{}\n\ndescribe('subject', () => {{\n    beforeEach(() => {{ /* reset mocks */ }});\n\n    it('handles the happy path', () => {{\n        const stub = {}();\n        // arrange, act\n        expect(stub).toHaveBeenCalled();\n    }});\n}});\n```\n",
            rules.import_line, rules.fn_token
        ));
    }
}

/// Minimal relative import path from a test file to its subject, with
/// forward slashes and no extension.
pub fn relative_import_path(test_file: &str, source_file: &str) -> String {
    let test_file = test_file.replace('\\', "/");
    let source_file = source_file.replace('\\', "/");

    let test_dirs: Vec<&str> = match test_file.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    let (source_dirs, source_name) = match source_file.rsplit_once('/') {
        Some((dir, name)) => (dir.split('/').collect::<Vec<_>>(), name),
        None => (Vec::new(), source_file.as_str()),
    };

    let common = test_dirs
        .iter()
        .zip(source_dirs.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let ups = test_dirs.len() - common;
    let mut segments: Vec<String> = if ups == 0 {
        vec![".".to_string()]
    } else {
        std::iter::repeat_n("..".to_string(), ups).collect()
    };
    segments.extend(source_dirs[common..].iter().map(|s| (*s).to_string()));

    let stem = source_name.rsplit_once('.').map_or(source_name, |(s, _)| s);
    segments.push(stem.to_string());
    segments.join("/")
}

fn render_signature(context: &FunctionContext) -> String {
    let params: Vec<String> = context
        .signature
        .parameters
        .iter()
        .map(|p| {
            let mut rendered = p.name.clone();
            if p.optional && p.default_value.is_none() {
                rendered.push('?');
            }
            if let Some(ty) = &p.param_type {
                rendered.push_str(&format!(": {ty}"));
            }
            if let Some(default) = &p.default_value {
                rendered.push_str(&format!(" = {default}"));
            }
            rendered
        })
        .collect();

    let ret = context
        .signature
        .return_type
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default();

    format!(
        "{}{}({}){}",
        if context.signature.is_async { "async " } else { "" },
        context.signature.name,
        params.join(", "),
        ret
    )
}
