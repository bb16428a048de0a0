//! Ordered locator strategies for re-locating drifted elements.
//!
//! Strategies run as a waterfall: id → testid/role/aria → CSS → XPath →
//! visual → semantic (LLM-assisted). Each strategy yields candidates with
//! a confidence score; the waterfall returns the highest-confidence
//! candidate at or above the threshold (default 0.85) together with a
//! repair suggestion that rewrites the locator to a more stable form,
//! preferring `data-testid` and role selectors when the page exposes them.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::ProviderKind;
use crate::core::errors::Result;
use crate::generation::llm::{LlmRequest, LlmService};
use crate::healing::page::{ElementHandle, PageSnapshot};

/// One relocated candidate.
#[derive(Debug, Clone)]
pub struct LocatedElement {
    /// The element the strategy found
    pub handle: ElementHandle,
    /// Strategy confidence in [0, 1]
    pub confidence: f64,
    /// Strategy that produced the candidate
    pub strategy: &'static str,
}

/// A proposed locator repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairSuggestion {
    /// The selector the test was using
    pub original_selector: String,
    /// The selector to use instead
    pub suggested_selector: String,
    /// Strategy that located the element
    pub strategy: String,
    /// Confidence of the winning candidate
    pub confidence: f64,
}

/// Locator strategy contract.
#[async_trait]
pub trait LocatorStrategy: Send + Sync {
    /// Strategy name for reporting.
    fn name(&self) -> &'static str;

    /// Attempt to locate the element the selector used to resolve.
    async fn locate(
        &self,
        original_selector: &str,
        page: &PageSnapshot,
    ) -> Result<Vec<LocatedElement>>;
}

/// Exact-id relocation: `#foo` still present means the drift was
/// elsewhere.
pub struct IdStrategy;

#[async_trait]
impl LocatorStrategy for IdStrategy {
    fn name(&self) -> &'static str {
        "id"
    }

    async fn locate(
        &self,
        original_selector: &str,
        page: &PageSnapshot,
    ) -> Result<Vec<LocatedElement>> {
        let Some(id) = original_selector.trim().strip_prefix('#') else {
            return Ok(Vec::new());
        };
        Ok(page
            .by_id(id)
            .into_iter()
            .map(|handle| LocatedElement {
                handle,
                confidence: 0.98,
                strategy: self.name(),
            })
            .collect())
    }
}

/// Relocation via `data-testid`, role, and aria-label, keyed off tokens in
/// the failed selector.
pub struct TestIdRoleStrategy;

#[async_trait]
impl LocatorStrategy for TestIdRoleStrategy {
    fn name(&self) -> &'static str {
        "testid-role-aria"
    }

    async fn locate(
        &self,
        original_selector: &str,
        page: &PageSnapshot,
    ) -> Result<Vec<LocatedElement>> {
        let needle = selector_token(original_selector);
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for (index, element) in page.elements.iter().enumerate() {
            let mut confidence: f64 = 0.0;
            if let Some(test_id) = &element.test_id {
                if test_id.contains(&needle) {
                    confidence = confidence.max(0.95);
                }
            }
            if let Some(label) = &element.aria_label {
                if label.to_lowercase().contains(&needle) {
                    confidence = confidence.max(0.9);
                }
            }
            if let Some(role) = &element.role {
                if role == &needle {
                    confidence = confidence.max(0.6);
                }
            }

            if confidence > 0.0 {
                candidates.push(LocatedElement {
                    handle: ElementHandle {
                        index,
                        element: element.clone(),
                    },
                    confidence,
                    strategy: self.name(),
                });
            }
        }
        Ok(candidates)
    }
}

/// Straight CSS re-query of the original selector.
pub struct CssStrategy;

#[async_trait]
impl LocatorStrategy for CssStrategy {
    fn name(&self) -> &'static str {
        "css"
    }

    async fn locate(
        &self,
        original_selector: &str,
        page: &PageSnapshot,
    ) -> Result<Vec<LocatedElement>> {
        Ok(page
            .by_css(original_selector)
            .into_iter()
            .map(|handle| LocatedElement {
                handle,
                confidence: 0.88,
                strategy: self.name(),
            })
            .collect())
    }
}

/// XPath re-query of the original selector.
pub struct XPathStrategy;

#[async_trait]
impl LocatorStrategy for XPathStrategy {
    fn name(&self) -> &'static str {
        "xpath"
    }

    async fn locate(
        &self,
        original_selector: &str,
        page: &PageSnapshot,
    ) -> Result<Vec<LocatedElement>> {
        Ok(page
            .by_xpath(original_selector)
            .into_iter()
            .map(|handle| LocatedElement {
                handle,
                confidence: 0.8,
                strategy: self.name(),
            })
            .collect())
    }
}

/// Visual relocation: match by visible text derived from the selector
/// token.
pub struct VisualStrategy;

#[async_trait]
impl LocatorStrategy for VisualStrategy {
    fn name(&self) -> &'static str {
        "visual"
    }

    async fn locate(
        &self,
        original_selector: &str,
        page: &PageSnapshot,
    ) -> Result<Vec<LocatedElement>> {
        let needle = selector_token(original_selector);
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(page
            .by_text(&needle)
            .into_iter()
            .map(|handle| LocatedElement {
                handle,
                confidence: 0.7,
                strategy: self.name(),
            })
            .collect())
    }
}

/// LLM-assisted relocation: describe the page and ask which element the
/// selector most plausibly meant. Inactive without a service.
pub struct SemanticStrategy {
    llm: Option<Arc<LlmService>>,
    provider: ProviderKind,
    model: String,
}

impl SemanticStrategy {
    /// Create a semantic strategy; `llm = None` disables it.
    pub fn new(llm: Option<Arc<LlmService>>, provider: ProviderKind, model: String) -> Self {
        Self {
            llm,
            provider,
            model,
        }
    }
}

#[async_trait]
impl LocatorStrategy for SemanticStrategy {
    fn name(&self) -> &'static str {
        "semantic"
    }

    async fn locate(
        &self,
        original_selector: &str,
        page: &PageSnapshot,
    ) -> Result<Vec<LocatedElement>> {
        let Some(llm) = &self.llm else {
            return Ok(Vec::new());
        };
        if page.elements.is_empty() {
            return Ok(Vec::new());
        }

        let mut listing = String::new();
        for (index, element) in page.elements.iter().enumerate().take(50) {
            listing.push_str(&format!(
                "{index}: <{tag}> id={id:?} testid={testid:?} role={role:?} text={text:?}\n",
                tag = element.tag,
                id = element.id,
                testid = element.test_id,
                role = element.role,
                text = element.text,
            ));
        }

        let prompt = format!(
            "A UI test failed because the selector `{original_selector}` no longer resolves.\n\
             Page elements:\n{listing}\n\
             Reply with ONLY the number of the element the selector most likely targeted, \
             or -1 if none fits."
        );

        let response = llm
            .generate(&LlmRequest {
                provider: self.provider,
                model: self.model.clone(),
                system: None,
                prompt,
                temperature: 0.0,
                max_tokens: 8,
            })
            .await?;

        let Some(index) = response
            .content
            .trim()
            .split_whitespace()
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .filter(|i| *i >= 0)
            .map(|i| i as usize)
        else {
            return Ok(Vec::new());
        };

        Ok(page
            .elements
            .get(index)
            .map(|element| LocatedElement {
                handle: ElementHandle {
                    index,
                    element: element.clone(),
                },
                confidence: 0.86,
                strategy: self.name(),
            })
            .into_iter()
            .collect())
    }
}

/// Meaningful token inside a selector (`.submit-btn` → `submit-btn`,
/// `//button[@id='save']` → `save`).
fn selector_token(selector: &str) -> String {
    let stripped = selector
        .trim()
        .trim_start_matches("//")
        .trim_start_matches(['#', '.', '[']);
    stripped
        .split(['=', '\'', '"', ']', '[', '@', '(', ')'])
        .filter(|part| !part.is_empty())
        .last()
        .unwrap_or("")
        .trim_matches(['-', '_'])
        .to_lowercase()
}

/// The locator waterfall.
pub struct LocatorWaterfall {
    strategies: Vec<Box<dyn LocatorStrategy>>,
    confidence_threshold: f64,
}

impl LocatorWaterfall {
    /// Build the standard waterfall. The semantic tail stage activates
    /// only when an LLM service is supplied.
    pub fn standard(
        llm: Option<Arc<LlmService>>,
        provider: ProviderKind,
        model: String,
        confidence_threshold: f64,
    ) -> Self {
        Self {
            strategies: vec![
                Box::new(IdStrategy),
                Box::new(TestIdRoleStrategy),
                Box::new(CssStrategy),
                Box::new(XPathStrategy),
                Box::new(VisualStrategy),
                Box::new(SemanticStrategy::new(llm, provider, model)),
            ],
            confidence_threshold,
        }
    }

    /// Build a waterfall from explicit strategies (tests, custom setups).
    pub fn new(strategies: Vec<Box<dyn LocatorStrategy>>, confidence_threshold: f64) -> Self {
        Self {
            strategies,
            confidence_threshold,
        }
    }

    /// Run the waterfall and propose a repair.
    ///
    /// Strategies run in order; the first candidate at or above the
    /// threshold wins. Candidates below the threshold are remembered so a
    /// later, weaker strategy cannot shadow an earlier, stronger one.
    pub async fn relocate(
        &self,
        original_selector: &str,
        page: &PageSnapshot,
    ) -> Result<Option<RepairSuggestion>> {
        let mut best: Option<LocatedElement> = None;

        for strategy in &self.strategies {
            let candidates = strategy.locate(original_selector, page).await?;
            for candidate in candidates {
                debug!(
                    strategy = candidate.strategy,
                    confidence = candidate.confidence,
                    "relocation candidate"
                );
                let better = best
                    .as_ref()
                    .is_none_or(|current| candidate.confidence > current.confidence);
                if better {
                    best = Some(candidate);
                }
            }

            // The waterfall stops at the first strategy that produced a
            // confident answer.
            if best
                .as_ref()
                .is_some_and(|b| b.confidence >= self.confidence_threshold)
            {
                break;
            }
        }

        let Some(winner) = best else {
            return Ok(None);
        };
        if winner.confidence < self.confidence_threshold {
            return Ok(None);
        }

        let suggested_selector = winner
            .handle
            .element
            .stable_selector()
            .unwrap_or_else(|| original_selector.to_string());

        Ok(Some(RepairSuggestion {
            original_selector: original_selector.to_string(),
            suggested_selector,
            strategy: winner.strategy.to_string(),
            confidence: winner.confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::page::PageElement;

    fn page_with_button() -> PageSnapshot {
        PageSnapshot::new(
            "https://app.example/",
            vec![
                PageElement {
                    tag: "button".to_string(),
                    id: Some("save".to_string()),
                    test_id: Some("save-button".to_string()),
                    role: Some("button".to_string()),
                    text: "Save".to_string(),
                    ..Default::default()
                },
                PageElement {
                    tag: "button".to_string(),
                    test_id: Some("submit-order".to_string()),
                    role: Some("button".to_string()),
                    aria_label: Some("Submit order".to_string()),
                    text: "Submit".to_string(),
                    classes: vec!["primary".to_string()],
                    ..Default::default()
                },
            ],
        )
    }

    fn waterfall() -> LocatorWaterfall {
        LocatorWaterfall::standard(
            None,
            ProviderKind::OpenaiCompatible,
            "gpt-4o-mini".to_string(),
            0.85,
        )
    }

    #[tokio::test]
    async fn test_id_still_present_wins_immediately() {
        let suggestion = waterfall()
            .relocate("#save", &page_with_button())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(suggestion.strategy, "id");
        // The repair still prefers the stable data-testid form.
        assert_eq!(suggestion.suggested_selector, "[data-testid=\"save-button\"]");
        assert!(suggestion.confidence >= 0.95);
    }

    #[tokio::test]
    async fn test_drifted_class_selector_relocates_by_testid() {
        // `.submit` no longer exists; the testid strategy finds the
        // renamed button.
        let suggestion = waterfall()
            .relocate(".submit", &page_with_button())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(suggestion.strategy, "testid-role-aria");
        assert_eq!(
            suggestion.suggested_selector,
            "[data-testid=\"submit-order\"]"
        );
    }

    #[tokio::test]
    async fn test_xpath_locator_relocates() {
        let suggestion = waterfall()
            .relocate("//button[@id='save']", &page_with_button())
            .await
            .unwrap()
            .unwrap();

        assert!(suggestion.confidence >= 0.85);
        assert!(suggestion.suggested_selector.contains("save-button"));
    }

    #[tokio::test]
    async fn test_no_candidate_above_threshold_returns_none() {
        let suggestion = waterfall()
            .relocate(".completely-unrelated-widget", &PageSnapshot::default())
            .await
            .unwrap();
        assert!(suggestion.is_none());
    }

    #[test]
    fn test_selector_tokens() {
        assert_eq!(selector_token(".submit-btn"), "submit-btn");
        assert_eq!(selector_token("#save"), "save");
        assert_eq!(selector_token("//button[@id='save']"), "save");
        assert_eq!(selector_token("[data-testid=\"checkout\"]"), "checkout");
    }

    #[tokio::test]
    async fn test_semantic_strategy_inactive_without_llm() {
        let strategy = SemanticStrategy::new(
            None,
            ProviderKind::OpenaiCompatible,
            "gpt-4o-mini".to_string(),
        );
        let found = strategy
            .locate(".x", &page_with_button())
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
