//! Prompt and code-chunk compression.
//!
//! A pipeline of token-saving passes gated by an aggressiveness knob in
//! [0, 1]: blank-line collapsing, comment stripping, and import
//! deduplication always run; identifier shortening kicks in at 0.7 and
//! signature-only reduction at 0.8 (and only when the total still exceeds
//! the hard cap). Savings are reported in tokens and percent.

use serde::{Deserialize, Serialize};

use crate::core::chunks::{estimate_tokens, CodeChunk};

/// Aggressiveness at which identifier shortening engages.
const SHORTEN_THRESHOLD: f64 = 0.7;

/// Aggressiveness at which signature-only reduction engages.
const SIGNATURE_ONLY_THRESHOLD: f64 = 0.8;

/// Verbose identifiers worth shortening, with their replacements.
const VERBOSE_IDENTIFIERS: &[(&str, &str)] = &[
    ("implementation", "impl"),
    ("configuration", "config"),
    ("initialization", "init"),
    ("parameters", "params"),
    ("arguments", "args"),
    ("temporary", "tmp"),
    ("response", "res"),
    ("request", "req"),
];

/// Savings summary for one optimization run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Tokens before optimization
    pub before_tokens: usize,
    /// Tokens after optimization
    pub after_tokens: usize,
    /// Tokens saved
    pub saved_tokens: usize,
    /// Percent saved, [0, 100]
    pub saved_percent: f64,
}

impl OptimizationReport {
    fn from_counts(before: usize, after: usize) -> Self {
        let saved = before.saturating_sub(after);
        Self {
            before_tokens: before,
            after_tokens: after,
            saved_tokens: saved,
            saved_percent: if before == 0 {
                0.0
            } else {
                saved as f64 * 100.0 / before as f64
            },
        }
    }
}

/// Prompt optimizer.
#[derive(Debug, Clone)]
pub struct PromptOptimizer {
    aggressiveness: f64,
}

impl PromptOptimizer {
    /// Create an optimizer with the given aggressiveness in [0, 1].
    pub fn new(aggressiveness: f64) -> Self {
        Self {
            aggressiveness: aggressiveness.clamp(0.0, 1.0),
        }
    }

    /// Compress free prompt text (blank-line collapsing only; prose keeps
    /// its comments).
    pub fn optimize_text(&self, text: &str) -> (String, OptimizationReport) {
        let before = estimate_tokens(text);
        let collapsed = collapse_blank_lines(text);
        let report = OptimizationReport::from_counts(before, estimate_tokens(&collapsed));
        (collapsed, report)
    }

    /// Compress code chunks in place.
    ///
    /// `hard_cap` bounds the total token count; signature-only reduction
    /// only engages when the optimized total still exceeds it.
    pub fn optimize_chunks(
        &self,
        chunks: &mut [CodeChunk],
        hard_cap: usize,
    ) -> OptimizationReport {
        let before: usize = chunks.iter().map(|c| estimate_tokens(&c.content)).sum();

        let mut seen_imports: ahash::AHashSet<String> = ahash::AHashSet::new();
        for chunk in chunks.iter_mut() {
            let mut content = collapse_blank_lines(&chunk.content);
            content = strip_comments(&content);
            content = dedupe_imports(&content, &mut seen_imports);
            if self.aggressiveness >= SHORTEN_THRESHOLD {
                content = shorten_identifiers(&content);
            }
            chunk.content = content;
        }

        let mid_total: usize = chunks.iter().map(|c| estimate_tokens(&c.content)).sum();
        if self.aggressiveness >= SIGNATURE_ONLY_THRESHOLD && mid_total > hard_cap {
            for chunk in chunks.iter_mut() {
                chunk.content = signature_lines(&chunk.content);
            }
        }

        let after: usize = chunks.iter().map(|c| estimate_tokens(&c.content)).sum();
        OptimizationReport::from_counts(before, after)
    }
}

/// Collapse runs of three or more blank lines down to two.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut blanks = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blanks += 1;
            if blanks > 2 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push(line);
    }
    out.join("\n")
}

/// Strip full-line `//` comments and non-doc `/* */` blocks. Doc blocks
/// (`/**`) survive because they feed the prompt's documentation section.
fn strip_comments(code: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_block = false;
    let mut block_is_doc = false;

    for line in code.lines() {
        let trimmed = line.trim_start();

        if in_block {
            if trimmed.contains("*/") {
                in_block = false;
                if block_is_doc {
                    out.push(line.to_string());
                }
            } else if block_is_doc {
                out.push(line.to_string());
            }
            continue;
        }

        if trimmed.starts_with("/*") {
            block_is_doc = trimmed.starts_with("/**");
            if !trimmed.contains("*/") {
                in_block = true;
            }
            if block_is_doc {
                out.push(line.to_string());
            }
            continue;
        }

        if trimmed.starts_with("//") {
            continue;
        }

        out.push(line.to_string());
    }

    out.join("\n")
}

/// Drop import lines already emitted by an earlier chunk.
fn dedupe_imports(code: &str, seen: &mut ahash::AHashSet<String>) -> String {
    code.lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.starts_with("import ") || trimmed.starts_with("const ") && trimmed.contains("require(") {
                seen.insert(trimmed.to_string())
            } else {
                true
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn shorten_identifiers(code: &str) -> String {
    let mut out = code.to_string();
    for (verbose, short) in VERBOSE_IDENTIFIERS {
        out = out.replace(verbose, short);
    }
    out
}

/// Keep only declaration/signature lines of a chunk.
fn signature_lines(code: &str) -> String {
    code.lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed.starts_with("function ")
                || trimmed.starts_with("async function ")
                || trimmed.starts_with("export ")
                || trimmed.starts_with("class ")
                || trimmed.starts_with("interface ")
                || trimmed.starts_with("type ")
                || trimmed.starts_with("import ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunks::ChunkKind;

    fn chunk(content: &str) -> CodeChunk {
        CodeChunk::new("src/a.ts", content, 1, 20, ChunkKind::Function)
    }

    #[test]
    fn test_blank_line_collapse() {
        let text = "a\n\n\n\n\nb";
        assert_eq!(collapse_blank_lines(text), "a\n\n\nb");

        // exactly two blanks survive
        assert_eq!(collapse_blank_lines("a\n\n\nb"), "a\n\n\nb");
    }

    #[test]
    fn test_comment_stripping_keeps_doc_blocks() {
        let code = "/** Adds numbers. */\n// helper\nfunction add(a, b) {\n    /* scratch */\n    return a + b;\n}";
        let stripped = strip_comments(code);

        assert!(stripped.contains("/** Adds numbers. */"));
        assert!(!stripped.contains("// helper"));
        assert!(!stripped.contains("scratch"));
        assert!(stripped.contains("return a + b;"));
    }

    #[test]
    fn test_import_dedupe_across_chunks() {
        let optimizer = PromptOptimizer::new(0.5);
        let mut chunks = vec![
            chunk("import axios from 'axios';\nexport function a() {}"),
            chunk("import axios from 'axios';\nexport function b() {}"),
        ];

        optimizer.optimize_chunks(&mut chunks, usize::MAX);
        assert!(chunks[0].content.contains("import axios"));
        assert!(!chunks[1].content.contains("import axios"));
    }

    #[test]
    fn test_identifier_shortening_gated() {
        let mild = PromptOptimizer::new(0.5);
        let mut chunks = vec![chunk("const configuration = 1;")];
        mild.optimize_chunks(&mut chunks, usize::MAX);
        assert!(chunks[0].content.contains("configuration"));

        let aggressive = PromptOptimizer::new(0.7);
        let mut chunks = vec![chunk("const configuration = 1;")];
        aggressive.optimize_chunks(&mut chunks, usize::MAX);
        assert!(chunks[0].content.contains("const config = 1;"));
    }

    #[test]
    fn test_signature_reduction_only_over_cap() {
        let optimizer = PromptOptimizer::new(0.9);
        let body = format!(
            "export function big(x: number) {{\n{}\n}}",
            "    x += 1;\n".repeat(200)
        );

        // Under the cap: bodies survive.
        let mut chunks = vec![chunk(&body)];
        optimizer.optimize_chunks(&mut chunks, usize::MAX);
        assert!(chunks[0].content.contains("x += 1;"));

        // Over the cap: signatures only.
        let mut chunks = vec![chunk(&body)];
        let report = optimizer.optimize_chunks(&mut chunks, 10);
        assert!(!chunks[0].content.contains("x += 1;"));
        assert!(chunks[0].content.contains("export function big"));
        assert!(report.saved_tokens > 0);
        assert!(report.saved_percent > 50.0);
    }

    #[test]
    fn test_report_percentages() {
        let report = OptimizationReport::from_counts(200, 150);
        assert_eq!(report.saved_tokens, 50);
        assert!((report.saved_percent - 25.0).abs() < 1e-9);

        let empty = OptimizationReport::from_counts(0, 0);
        assert_eq!(empty.saved_percent, 0.0);
    }
}
