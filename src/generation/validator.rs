//! Expected-value verification via sandboxed execution.
//!
//! Extracts `expect(fn(args)).toBe(expected)` triples from generated test
//! code, synthesizes a standalone Node script that imports the real
//! function and evaluates each triple, runs it inside the target project
//! directory, and reports which expectations diverge. The auto-correction
//! pass rewrites `.toBe(expected)` to the observed value, iterating
//! back-to-front so line offsets stay valid. The temporary script is
//! removed on every exit path.

use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{Result, TestMindError};

/// Marker prefixing the JSON block in script output.
const OUTPUT_MARKER: &str = "__TESTMIND_VALIDATION__";

/// Subprocess timeout.
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// One extracted expectation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expectation {
    /// Argument list text inside the call, verbatim
    pub input: String,
    /// Expected value text, verbatim
    pub expected: String,
    /// 1-based line number in the test code
    pub line_number: usize,
}

/// One diverging expectation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectationMismatch {
    /// Argument list text
    pub input: String,
    /// Expected value text from the test
    pub expected: String,
    /// Actual value observed (JSON-rendered)
    pub actual: String,
    /// 1-based line number in the test code
    pub line_number: usize,
}

/// Verification outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Expectations extracted and executed
    pub total_expectations: usize,
    /// Expectations whose observed value matched
    pub matched_expectations: usize,
    /// Diverging expectations
    pub mismatches: Vec<ExpectationMismatch>,
    /// `matched / total`, 1.0 when nothing was extractable
    pub accuracy_rate: f64,
}

#[derive(Deserialize)]
struct ScriptReport {
    mismatches: Vec<ScriptMismatch>,
    evaluated: usize,
}

#[derive(Deserialize)]
struct ScriptMismatch {
    input: String,
    expected: String,
    actual: String,
    line: usize,
}

/// Test validator.
#[derive(Debug, Default, Clone)]
pub struct TestValidator;

impl TestValidator {
    /// Create a validator.
    pub fn new() -> Self {
        Self
    }

    /// Extract `expect(fn(...)).toBe(...)` triples for a target function.
    pub fn extract_expectations(&self, test_code: &str, function_name: &str) -> Vec<Expectation> {
        static PATTERN: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"expect\(\s*(?:await\s+)?__FN__\(([^()]*)\)\s*\)\s*\.toBe\(([^;]+?)\)\s*;?")
                .expect("expectation pattern is valid")
        });

        // The pattern is per-function; build it on the fly from the shared
        // skeleton to keep the escaping in one place.
        let pattern = PATTERN
            .as_str()
            .replace("__FN__", &regex::escape(function_name));
        let regex = match Regex::new(&pattern) {
            Ok(regex) => regex,
            Err(_) => return Vec::new(),
        };

        let mut expectations = Vec::new();
        for (index, line) in test_code.lines().enumerate() {
            for capture in regex.captures_iter(line) {
                expectations.push(Expectation {
                    input: capture[1].trim().to_string(),
                    expected: capture[2].trim().to_string(),
                    line_number: index + 1,
                });
            }
        }
        expectations
    }

    /// Run the verification script for a set of expectations.
    ///
    /// `source_path` is the subject module relative to `project_dir`.
    pub async fn verify(
        &self,
        project_dir: &Path,
        source_path: &str,
        function_name: &str,
        expectations: &[Expectation],
    ) -> Result<ValidationResult> {
        if expectations.is_empty() {
            return Ok(ValidationResult {
                total_expectations: 0,
                matched_expectations: 0,
                mismatches: Vec::new(),
                accuracy_rate: 1.0,
            });
        }

        let script = synthesize_script(source_path, function_name, expectations);

        // NamedTempFile removes the script on drop, covering every exit
        // path out of this function.
        let script_file = tempfile::Builder::new()
            .prefix("testmind-verify-")
            .suffix(".cjs")
            .tempfile_in(project_dir)
            .map_err(|e| TestMindError::io("failed to create verification script", e))?;
        std::fs::write(script_file.path(), &script)
            .map_err(|e| TestMindError::io("failed to write verification script", e))?;

        debug!(script = %script_file.path().display(), "running verification script");
        let output = tokio::time::timeout(
            SCRIPT_TIMEOUT,
            tokio::process::Command::new("node")
                .arg(script_file.path())
                .current_dir(project_dir)
                .output(),
        )
        .await
        .map_err(|_| TestMindError::evaluation("verification script timed out"))?
        .map_err(|e| {
            TestMindError::evaluation(format!("failed to launch node: {e}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TestMindError::evaluation(format!(
                "verification script exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = parse_report(&stdout)?;

        let total = report.evaluated;
        let mismatches: Vec<ExpectationMismatch> = report
            .mismatches
            .into_iter()
            .map(|m| ExpectationMismatch {
                input: m.input,
                expected: m.expected,
                actual: m.actual,
                line_number: m.line,
            })
            .collect();
        let matched = total.saturating_sub(mismatches.len());

        Ok(ValidationResult {
            total_expectations: total,
            matched_expectations: matched,
            mismatches,
            accuracy_rate: if total == 0 {
                1.0
            } else {
                matched as f64 / total as f64
            },
        })
    }

    /// Rewrite diverging `.toBe(expected)` calls to the observed values.
    ///
    /// Applies corrections back-to-front so earlier replacements cannot
    /// shift the line numbers of later ones.
    pub fn auto_correct(&self, test_code: &str, mismatches: &[ExpectationMismatch]) -> String {
        let mut lines: Vec<String> = test_code.lines().map(str::to_string).collect();

        let mut ordered: Vec<&ExpectationMismatch> = mismatches.iter().collect();
        ordered.sort_by(|a, b| b.line_number.cmp(&a.line_number));

        for mismatch in ordered {
            let Some(line) = lines.get_mut(mismatch.line_number - 1) else {
                continue;
            };
            let needle = format!(".toBe({})", mismatch.expected);
            let replacement = format!(".toBe({})", mismatch.actual);
            if line.contains(&needle) {
                *line = line.replacen(&needle, &replacement, 1);
            }
        }

        lines.join("\n")
    }
}

/// Build the standalone verification script.
fn synthesize_script(source_path: &str, function_name: &str, expectations: &[Expectation]) -> String {
    let module_path = format!("./{}", source_path.trim_start_matches("./"));
    let module_stem = module_path
        .rsplit_once('.')
        .map_or(module_path.as_str(), |(stem, _)| stem);

    let mut cases = String::new();
    for expectation in expectations {
        cases.push_str(&format!(
            "    {{ line: {line}, input: {input_json}, run: () => subject({input}), expected: () => ({expected}) }},\n",
            line = expectation.line_number,
            input_json = serde_json::to_string(&expectation.input).unwrap_or_default(),
            input = expectation.input,
            expected = expectation.expected,
        ));
    }

    format!(
        r#"'use strict';
let mod;
try {{
    mod = require('{module_stem}');
}} catch (err) {{
    try {{ require('ts-node/register'); mod = require('{module_stem}'); }}
    catch (inner) {{ console.error('cannot load module:', inner.message); process.exit(2); }}
}}
const subject = mod['{function_name}'] || mod.default;
if (typeof subject !== 'function') {{
    console.error('function {function_name} not exported');
    process.exit(2);
}}
const cases = [
{cases}];
const mismatches = [];
let evaluated = 0;
(async () => {{
    for (const c of cases) {{
        evaluated += 1;
        try {{
            const actual = await c.run();
            const expected = c.expected();
            const same = JSON.stringify(actual) === JSON.stringify(expected);
            if (!same) {{
                mismatches.push({{ line: c.line, input: c.input, expected: JSON.stringify(expected), actual: JSON.stringify(actual) }});
            }}
        }} catch (err) {{
            mismatches.push({{ line: c.line, input: c.input, expected: 'value', actual: 'threw: ' + err.message }});
        }}
    }}
    console.log('{OUTPUT_MARKER}' + JSON.stringify({{ mismatches, evaluated }}));
}})();
"#
    )
}

fn parse_report(stdout: &str) -> Result<ScriptReport> {
    let line = stdout
        .lines()
        .find_map(|line| line.strip_prefix(OUTPUT_MARKER))
        .ok_or_else(|| {
            TestMindError::evaluation("verification script produced no report block")
        })?;
    serde_json::from_str(line)
        .map_err(|e| TestMindError::evaluation(format!("malformed verification report: {e}")))
}
