//! Healing report rendering.
//!
//! Renders a [`HealingReport`] into markdown through a handlebars
//! template, for CI artifacts and PR comments.

use handlebars::Handlebars;
use serde_json::json;

use crate::core::errors::{Result, TestMindError};
use crate::healing::engine::HealingReport;

const HEALING_TEMPLATE: &str = r#"# Self-Healing Report

**{{healed_count}}/{{total}}** tests healed in {{duration_ms}} ms.

| Test | Classification | Confidence | Healed | Repair |
|---|---|---|---|---|
{{#each outcomes}}| {{test_name}} | {{failure_type}} | {{confidence}} | {{#if healed}}yes{{else}}no{{/if}} | {{{repair}}} |
{{/each}}
{{#if advisories}}
## Advisory suggestions

{{#each advisories}}- **{{test_name}}**: {{{suggestion}}}
{{/each}}{{/if}}"#;

/// Render a healing report to markdown.
pub fn render_healing_report(report: &HealingReport) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars
        .register_template_string("healing", HEALING_TEMPLATE)
        .map_err(|e| TestMindError::internal(format!("bad healing template: {e}")))?;

    let outcomes: Vec<serde_json::Value> = report
        .outcomes
        .iter()
        .map(|outcome| {
            json!({
                "test_name": outcome.test_name,
                "failure_type": outcome.classification.failure_type.as_str(),
                "confidence": format!("{:.2}", outcome.classification.confidence),
                "healed": outcome.healed,
                "repair": outcome
                    .repair
                    .as_ref()
                    .map(|r| format!("`{}` → `{}`", r.original_selector, r.suggested_selector))
                    .unwrap_or_else(|| "—".to_string()),
            })
        })
        .collect();

    let advisories: Vec<serde_json::Value> = report
        .outcomes
        .iter()
        .filter(|outcome| !outcome.healed)
        .flat_map(|outcome| {
            outcome
                .classification
                .suggested_actions
                .iter()
                .take(1)
                .map(|suggestion| {
                    json!({
                        "test_name": outcome.test_name,
                        "suggestion": suggestion,
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect();

    handlebars
        .render(
            "healing",
            &json!({
                "healed_count": report.healed_count,
                "total": report.outcomes.len(),
                "duration_ms": report.total_duration_ms,
                "outcomes": outcomes,
                "advisories": advisories,
            }),
        )
        .map_err(|e| TestMindError::internal(format!("healing report render failed: {e}")))
}
