//! Complexity-driven model selection under cost and quality constraints.
//!
//! A task complexity score in [0, 100] is derived from code length,
//! cyclomatic and cognitive complexity, and the maintainability index.
//! Thresholds at 40/60/80 split tasks into Simple/Moderate/Complex/Expert,
//! each demanding a minimum model capability; candidates are then filtered
//! by capability, context window, and optional budget, and ranked by a
//! weighted score.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::chunks::FunctionContext;
use crate::core::errors::{Result, TestMindError};
use crate::core::tokens::{ModelSpec, MODEL_CATALOG};

/// Task complexity tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskComplexity {
    Simple,
    Moderate,
    Complex,
    Expert,
}

impl TaskComplexity {
    /// Minimum model capability this tier demands.
    pub fn required_capability(self) -> u8 {
        match self {
            TaskComplexity::Simple => 6,
            TaskComplexity::Moderate => 7,
            TaskComplexity::Complex => 8,
            TaskComplexity::Expert => 9,
        }
    }

    /// Tier for a 0–100 complexity score (thresholds 40/60/80).
    pub fn from_score(score: f64) -> Self {
        if score < 40.0 {
            TaskComplexity::Simple
        } else if score < 60.0 {
            TaskComplexity::Moderate
        } else if score < 80.0 {
            TaskComplexity::Complex
        } else {
            TaskComplexity::Expert
        }
    }
}

/// Constraints for one selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionConstraints {
    /// Tokens the prompt will occupy
    pub context_tokens: usize,
    /// Estimated completion tokens
    pub completion_tokens: usize,
    /// Hard budget in USD for the call, when set
    pub max_cost: Option<f64>,
    /// Weigh cost into the ranking
    pub prioritize_cost: bool,
}

/// Outcome of model selection.
#[derive(Debug, Clone)]
pub struct ModelSelection {
    /// Chosen model id
    pub model: String,
    /// Confidence in the choice, [0, 1]
    pub confidence: f64,
    /// Human-readable reasons for the choice
    pub reasons: Vec<String>,
    /// Estimated cost of the call in USD
    pub estimated_cost: f64,
    /// Runner-up model ids, best first
    pub alternatives: Vec<String>,
}

/// Model selector over the static catalog.
#[derive(Debug, Default, Clone)]
pub struct ModelSelector;

impl ModelSelector {
    /// Create a selector.
    pub fn new() -> Self {
        Self
    }

    /// Task complexity score in [0, 100] for a function context.
    ///
    /// Combines code length, cyclomatic, cognitive, and (inverted)
    /// maintainability, each normalized and weighted.
    pub fn complexity_score(&self, context: &FunctionContext) -> f64 {
        let metrics = &context.complexity;

        let length = (metrics.loc as f64 / 200.0).min(1.0);
        let cyclomatic = (f64::from(metrics.cyclomatic) / 20.0).min(1.0);
        let cognitive = (f64::from(metrics.cognitive) / 40.0).min(1.0);
        let maintainability = 1.0 - (metrics.maintainability_index / 100.0).clamp(0.0, 1.0);

        (length * 25.0 + cyclomatic * 30.0 + cognitive * 25.0 + maintainability * 20.0)
            .clamp(0.0, 100.0)
    }

    /// Classify a context into a task complexity tier.
    pub fn classify(&self, context: &FunctionContext) -> TaskComplexity {
        TaskComplexity::from_score(self.complexity_score(context))
    }

    /// Select the best model for a task.
    pub fn select(
        &self,
        complexity: TaskComplexity,
        constraints: &SelectionConstraints,
    ) -> Result<ModelSelection> {
        let required = complexity.required_capability();
        let needed_window = constraints.context_tokens + constraints.completion_tokens;

        let mut candidates: Vec<(&ModelSpec, f64, f64)> = MODEL_CATALOG
            .iter()
            .filter(|spec| spec.capability >= required)
            .filter(|spec| spec.max_context_tokens >= needed_window)
            .filter_map(|spec| {
                let cost = estimate_call_cost(spec, constraints);
                match constraints.max_cost {
                    Some(budget) if cost > budget => None,
                    _ => Some((spec, self.rank(spec, constraints, complexity), cost)),
                }
            })
            .collect();

        if candidates.is_empty() {
            return Err(TestMindError::config(format!(
                "no model satisfies capability >= {required} with a {needed_window}-token window{}",
                constraints
                    .max_cost
                    .map(|b| format!(" under ${b:.4}"))
                    .unwrap_or_default()
            )));
        }

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.name.cmp(b.0.name))
        });

        let (best, best_score, estimated_cost) = candidates[0];
        let runner_up_score = candidates.get(1).map_or(0.0, |(_, s, _)| *s);
        let confidence = (0.5 + (best_score - runner_up_score)).clamp(0.5, 1.0);

        let mut reasons = vec![
            format!(
                "capability {} meets the {:?} requirement of {}",
                best.capability, complexity, required
            ),
            format!(
                "context window {} covers {} needed tokens",
                best.max_context_tokens, needed_window
            ),
        ];
        if constraints.prioritize_cost {
            reasons.push(format!("estimated cost ${estimated_cost:.4} ranked in"));
        }

        debug!(model = best.name, score = best_score, "model selected");

        Ok(ModelSelection {
            model: best.name.to_string(),
            confidence,
            reasons,
            estimated_cost,
            alternatives: candidates
                .iter()
                .skip(1)
                .take(3)
                .map(|(spec, _, _)| spec.name.to_string())
                .collect(),
        })
    }

    /// Weighted ranking score: capability 0.4, cost 0.3 (iff cost is
    /// prioritized), context fit 0.2, task match 0.1.
    fn rank(
        &self,
        spec: &ModelSpec,
        constraints: &SelectionConstraints,
        complexity: TaskComplexity,
    ) -> f64 {
        let capability = f64::from(spec.capability) / 10.0;

        let cost_score = if constraints.prioritize_cost {
            // Cheap models approach 1.0; expensive ones approach 0.
            1.0 / (1.0 + spec.input_rate + spec.output_rate)
        } else {
            0.0
        };

        let needed = (constraints.context_tokens + constraints.completion_tokens).max(1);
        let fit = (needed as f64 / spec.max_context_tokens as f64).min(1.0);
        // A window roughly 4x the need is the sweet spot; vastly larger
        // windows stop adding value.
        let context_fit = (fit * 4.0).min(1.0);

        let task_match = if spec.capability == complexity.required_capability() {
            1.0
        } else {
            1.0 - (f64::from(spec.capability.abs_diff(complexity.required_capability())) / 10.0)
        };

        let cost_weight = if constraints.prioritize_cost { 0.3 } else { 0.0 };
        capability * 0.4 + cost_score * cost_weight + context_fit * 0.2 + task_match * 0.1
    }
}

fn estimate_call_cost(spec: &ModelSpec, constraints: &SelectionConstraints) -> f64 {
    (constraints.context_tokens as f64 / 1e6) * spec.input_rate
        + (constraints.completion_tokens as f64 / 1e6) * spec.output_rate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunks::{ComplexityMetrics, FunctionSignature};

    fn context_with(metrics: ComplexityMetrics) -> FunctionContext {
        FunctionContext {
            signature: FunctionSignature {
                name: "f".to_string(),
                file_path: "src/f.ts".to_string(),
                parameters: vec![],
                return_type: None,
                is_async: false,
                documentation: None,
            },
            dependencies: vec![],
            callers: vec![],
            side_effects: vec![],
            existing_tests: vec![],
            coverage: None,
            complexity: metrics,
            source: String::new(),
        }
    }

    #[test]
    fn test_score_tiers() {
        assert_eq!(TaskComplexity::from_score(10.0), TaskComplexity::Simple);
        assert_eq!(TaskComplexity::from_score(45.0), TaskComplexity::Moderate);
        assert_eq!(TaskComplexity::from_score(70.0), TaskComplexity::Complex);
        assert_eq!(TaskComplexity::from_score(90.0), TaskComplexity::Expert);
    }

    #[test]
    fn test_trivial_function_scores_simple() {
        let selector = ModelSelector::new();
        let context = context_with(ComplexityMetrics {
            cyclomatic: 1,
            cognitive: 0,
            loc: 3,
            maintainability_index: 95.0,
        });
        assert_eq!(selector.classify(&context), TaskComplexity::Simple);
    }

    #[test]
    fn test_gnarly_function_scores_high() {
        let selector = ModelSelector::new();
        let context = context_with(ComplexityMetrics {
            cyclomatic: 25,
            cognitive: 60,
            loc: 400,
            maintainability_index: 10.0,
        });
        let score = selector.complexity_score(&context);
        assert!(score >= 80.0);
        assert_eq!(selector.classify(&context), TaskComplexity::Expert);
    }

    #[test]
    fn test_selection_respects_capability_floor() {
        let selector = ModelSelector::new();
        let constraints = SelectionConstraints {
            context_tokens: 4_000,
            completion_tokens: 1_000,
            ..Default::default()
        };

        let selection = selector.select(TaskComplexity::Expert, &constraints).unwrap();
        let spec = crate::core::tokens::model_spec(&selection.model).unwrap();
        assert!(spec.capability >= 9);
        assert!(!selection.reasons.is_empty());
    }

    #[test]
    fn test_cost_priority_prefers_cheaper_models() {
        let selector = ModelSelector::new();
        let expensive_ok = SelectionConstraints {
            context_tokens: 4_000,
            completion_tokens: 1_000,
            prioritize_cost: true,
            ..Default::default()
        };

        let selection = selector
            .select(TaskComplexity::Moderate, &expensive_ok)
            .unwrap();
        let spec = crate::core::tokens::model_spec(&selection.model).unwrap();
        // Local models are free; cost priority should never pick the
        // priciest capable model.
        assert!(spec.input_rate < 10.0);
    }

    #[test]
    fn test_budget_filter_can_exclude_everything() {
        let selector = ModelSelector::new();
        let constraints = SelectionConstraints {
            context_tokens: 50_000,
            completion_tokens: 8_000,
            max_cost: Some(0.000_000_1),
            ..Default::default()
        };

        // Expert demands capability 9+, all of which cost real money at
        // this size except none under the micro-budget.
        let result = selector.select(TaskComplexity::Expert, &constraints);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), "configuration");
    }

    #[test]
    fn test_alternatives_listed() {
        let selector = ModelSelector::new();
        let constraints = SelectionConstraints {
            context_tokens: 2_000,
            completion_tokens: 500,
            ..Default::default()
        };
        let selection = selector.select(TaskComplexity::Simple, &constraints).unwrap();
        assert!(!selection.alternatives.is_empty());
        assert!(!selection.alternatives.contains(&selection.model));
    }
}
