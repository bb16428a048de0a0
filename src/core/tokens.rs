//! Token budget accounting for model context windows.
//!
//! Provides the per-model window catalog, the `⌈chars/4⌉` estimator seam,
//! usage breakdowns, prefix truncation, and cost estimation. The catalog is
//! static; unknown models fall back to a conservative default with a
//! warning so generation never fails on an unrecognized model id.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::chunks::{estimate_tokens, CodeChunk};

/// Token estimation seam.
///
/// The default implementation is `⌈chars/4⌉`; a precise tokenizer can be
/// substituted without changing any budget invariant.
pub trait TokenEstimator: Send + Sync {
    /// Estimate the token count of a text.
    fn estimate(&self, text: &str) -> usize;
}

/// Character-quarter estimator used by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Static description of a model known to the catalog.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    /// Model identifier as sent to the provider
    pub name: &'static str,

    /// Provider key this model belongs to
    pub provider: &'static str,

    /// Maximum context window in tokens
    pub max_context_tokens: usize,

    /// Maximum completion tokens
    pub max_completion_tokens: usize,

    /// Relative capability score in [1, 10]
    pub capability: u8,

    /// USD per million input tokens
    pub input_rate: f64,

    /// USD per million output tokens
    pub output_rate: f64,
}

/// Conservative fallback window applied to unknown models.
pub const FALLBACK_MODEL: ModelSpec = ModelSpec {
    name: "unknown",
    provider: "openai-compatible",
    max_context_tokens: 8_192,
    max_completion_tokens: 2_048,
    capability: 6,
    input_rate: 1.0,
    output_rate: 3.0,
};

/// Models known to the budget manager and model selector.
pub const MODEL_CATALOG: &[ModelSpec] = &[
    ModelSpec {
        name: "gpt-4o",
        provider: "openai-compatible",
        max_context_tokens: 128_000,
        max_completion_tokens: 16_384,
        capability: 9,
        input_rate: 2.5,
        output_rate: 10.0,
    },
    ModelSpec {
        name: "gpt-4o-mini",
        provider: "openai-compatible",
        max_context_tokens: 128_000,
        max_completion_tokens: 16_384,
        capability: 7,
        input_rate: 0.15,
        output_rate: 0.6,
    },
    ModelSpec {
        name: "gpt-4-turbo",
        provider: "openai-compatible",
        max_context_tokens: 128_000,
        max_completion_tokens: 4_096,
        capability: 8,
        input_rate: 10.0,
        output_rate: 30.0,
    },
    ModelSpec {
        name: "claude-sonnet-4-20250514",
        provider: "anthropic",
        max_context_tokens: 200_000,
        max_completion_tokens: 64_000,
        capability: 9,
        input_rate: 3.0,
        output_rate: 15.0,
    },
    ModelSpec {
        name: "claude-3-5-haiku-20241022",
        provider: "anthropic",
        max_context_tokens: 200_000,
        max_completion_tokens: 8_192,
        capability: 7,
        input_rate: 0.8,
        output_rate: 4.0,
    },
    ModelSpec {
        name: "claude-opus-4-20250514",
        provider: "anthropic",
        max_context_tokens: 200_000,
        max_completion_tokens: 32_000,
        capability: 10,
        input_rate: 15.0,
        output_rate: 75.0,
    },
    ModelSpec {
        name: "qwen2.5-coder-32b",
        provider: "local-http",
        max_context_tokens: 32_768,
        max_completion_tokens: 8_192,
        capability: 7,
        input_rate: 0.0,
        output_rate: 0.0,
    },
    ModelSpec {
        name: "llama-3.3-70b",
        provider: "local-http",
        max_context_tokens: 128_000,
        max_completion_tokens: 8_192,
        capability: 8,
        input_rate: 0.0,
        output_rate: 0.0,
    },
];

/// Look up a model in the catalog.
pub fn model_spec(model: &str) -> Option<&'static ModelSpec> {
    MODEL_CATALOG.iter().find(|spec| spec.name == model)
}

/// Budget derived for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Model the budget applies to
    pub model: String,

    /// Full context window
    pub max_context_tokens: usize,

    /// Tokens reserved for the completion
    pub max_completion_tokens: usize,

    /// Tokens available for prompt input after reserves
    pub available_input_tokens: usize,
}

/// Breakdown of estimated prompt usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageBreakdown {
    /// Tokens attributed to the system prompt
    pub system_prompt: usize,

    /// Tokens attributed to the user instruction
    pub user_instruction: usize,

    /// Tokens attributed to chunk content
    pub code_context: usize,

    /// Tokens attributed to per-chunk header lines
    pub metadata: usize,

    /// Sum of all parts
    pub total: usize,
}

/// Result of prefix truncation.
#[derive(Debug, Clone)]
pub struct TruncationResult {
    /// Selected prefix of the input chunks, order preserved
    pub chunks: Vec<CodeChunk>,

    /// Tokens consumed by the selected chunks
    pub final_tokens: usize,

    /// Number of chunks dropped from the tail
    pub removed_count: usize,
}

/// Per-model window accounting and truncation.
pub struct TokenBudgetManager {
    estimator: Box<dyn TokenEstimator>,

    /// Overhead reserved for formatting and message framing
    reserved_overhead: usize,
}

impl Default for TokenBudgetManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBudgetManager {
    /// Default framing overhead reserved out of every window.
    pub const DEFAULT_RESERVED_OVERHEAD: usize = 256;

    /// Create a manager with the default estimator.
    pub fn new() -> Self {
        Self {
            estimator: Box::new(CharEstimator),
            reserved_overhead: Self::DEFAULT_RESERVED_OVERHEAD,
        }
    }

    /// Create a manager with a custom estimator.
    pub fn with_estimator(estimator: Box<dyn TokenEstimator>) -> Self {
        Self {
            estimator,
            reserved_overhead: Self::DEFAULT_RESERVED_OVERHEAD,
        }
    }

    /// Estimate tokens for a text with the configured estimator.
    pub fn estimate(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    /// Derive the budget for a model.
    ///
    /// Unknown models fall back to a conservative default window.
    pub fn budget_for(&self, model: &str) -> TokenBudget {
        let spec = match model_spec(model) {
            Some(spec) => spec,
            None => {
                warn!(model, "unknown model, using conservative fallback window");
                &FALLBACK_MODEL
            }
        };

        let reserved = spec.max_completion_tokens + self.reserved_overhead;
        TokenBudget {
            model: model.to_string(),
            max_context_tokens: spec.max_context_tokens,
            max_completion_tokens: spec.max_completion_tokens,
            available_input_tokens: spec.max_context_tokens.saturating_sub(reserved),
        }
    }

    /// Per-chunk header emitted ahead of each chunk in prompts.
    fn chunk_header(chunk: &CodeChunk) -> String {
        format!(
            "File: {}\nLines: {}-{}\n",
            chunk.file_path, chunk.start_line, chunk.end_line
        )
    }

    /// Produce a usage breakdown for a prompt assembly.
    pub fn calculate_usage(
        &self,
        system_prompt: &str,
        user_instruction: &str,
        chunks: &[CodeChunk],
    ) -> UsageBreakdown {
        let system = self.estimate(system_prompt);
        let instruction = self.estimate(user_instruction);

        let mut code_context = 0;
        let mut metadata = 0;
        for chunk in chunks {
            code_context += self.estimate(&chunk.content);
            metadata += self.estimate(&Self::chunk_header(chunk));
        }

        UsageBreakdown {
            system_prompt: system,
            user_instruction: instruction,
            code_context,
            metadata,
            total: system + instruction + code_context + metadata,
        }
    }

    /// Select the longest prefix of `chunks` whose cumulative tokens plus
    /// the fixed system/instruction overhead fit within `max_tokens`.
    ///
    /// Never re-orders: the result is always a prefix of the input.
    pub fn truncate_to_fit(
        &self,
        chunks: Vec<CodeChunk>,
        max_tokens: usize,
        system_prompt: &str,
        user_instruction: &str,
    ) -> TruncationResult {
        let overhead = self.estimate(system_prompt) + self.estimate(user_instruction);
        let budget = max_tokens.saturating_sub(overhead);

        let total = chunks.len();
        let mut selected = Vec::new();
        let mut used = 0;

        for chunk in chunks {
            let cost = self.estimate(&chunk.content);
            if used + cost > budget {
                break;
            }
            used += cost;
            selected.push(chunk);
        }

        TruncationResult {
            removed_count: total - selected.len(),
            final_tokens: used,
            chunks: selected,
        }
    }

    /// Estimated USD cost of a call at catalog rates.
    pub fn estimate_cost(&self, model: &str, input_tokens: usize, output_tokens: usize) -> f64 {
        let spec = model_spec(model).unwrap_or(&FALLBACK_MODEL);
        (input_tokens as f64 / 1e6) * spec.input_rate
            + (output_tokens as f64 / 1e6) * spec.output_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunks::ChunkKind;

    fn chunk_of_tokens(path: &str, tokens: usize) -> CodeChunk {
        // 4 chars per token under the default estimator
        CodeChunk::new(path, "x".repeat(tokens * 4), 1, 1, ChunkKind::Function)
    }

    #[test]
    fn test_budget_for_known_model() {
        let manager = TokenBudgetManager::new();
        let budget = manager.budget_for("gpt-4o");

        assert_eq!(budget.max_context_tokens, 128_000);
        assert_eq!(
            budget.available_input_tokens,
            128_000 - 16_384 - TokenBudgetManager::DEFAULT_RESERVED_OVERHEAD
        );
    }

    #[test]
    fn test_budget_for_unknown_model_falls_back() {
        let manager = TokenBudgetManager::new();
        let budget = manager.budget_for("mystery-model-v9");

        assert_eq!(budget.max_context_tokens, FALLBACK_MODEL.max_context_tokens);
    }

    #[test]
    fn test_usage_breakdown_counts_headers() {
        let manager = TokenBudgetManager::new();
        let chunk = CodeChunk::new("src/a.ts", "const x = 1;", 3, 3, ChunkKind::Module);
        let usage = manager.calculate_usage("system", "instruction", &[chunk.clone()]);

        let header = format!("File: {}\nLines: 3-3\n", chunk.file_path);
        assert_eq!(usage.metadata, estimate_tokens(&header));
        assert_eq!(
            usage.total,
            usage.system_prompt + usage.user_instruction + usage.code_context + usage.metadata
        );
    }

    #[test]
    fn test_truncation_keeps_prefix_under_budget() {
        let manager = TokenBudgetManager::new();
        let chunks: Vec<CodeChunk> = (0..100)
            .map(|i| chunk_of_tokens(&format!("src/f{i}.ts"), 100))
            .collect();

        // 100 tokens of fixed overhead split between system and instruction
        let system = "s".repeat(200);
        let instruction = "i".repeat(200);
        let result = manager.truncate_to_fit(chunks.clone(), 1_000, &system, &instruction);

        assert_eq!(result.chunks.len(), 9);
        assert_eq!(result.final_tokens, 900);
        assert_eq!(result.removed_count, 91);
        for (kept, original) in result.chunks.iter().zip(chunks.iter()) {
            assert_eq!(kept.id, original.id);
        }
    }

    #[test]
    fn test_truncation_with_no_room_keeps_nothing() {
        let manager = TokenBudgetManager::new();
        let chunks = vec![chunk_of_tokens("src/a.ts", 50)];
        let result = manager.truncate_to_fit(chunks, 10, "", "");

        assert!(result.chunks.is_empty());
        assert_eq!(result.removed_count, 1);
    }

    #[test]
    fn test_cost_estimation_uses_catalog_rates() {
        let manager = TokenBudgetManager::new();
        let cost = manager.estimate_cost("gpt-4o", 1_000_000, 0);
        assert!((cost - 2.5).abs() < 1e-9);

        let cost = manager.estimate_cost("gpt-4o", 500_000, 100_000);
        assert!((cost - (1.25 + 1.0)).abs() < 1e-9);
    }
}
