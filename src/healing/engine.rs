//! Self-healing engine: classification wired to relocation.
//!
//! Pipeline per failing test: classify → if the failure is test fragility
//! and auto-fix is enabled, run the locator waterfall against the page
//! snapshot; otherwise emit advisory suggestions with `healed = false`.
//! A real bug is never healed. Batch mode reports per-test outcomes and
//! the run duration.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::config::HealingConfig;
use crate::core::errors::Result;
use crate::healing::classifier::{
    FailureClassification, FailureClassifier, FailureType, TestFailure,
};
use crate::healing::locators::{LocatorWaterfall, RepairSuggestion};
use crate::healing::page::PageSnapshot;

/// Healing strategy recorded on each outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingStrategy {
    /// A relocated selector was produced
    RelocatedSelector,
    /// Only advisory suggestions apply
    AdvisoryOnly,
    /// Real bugs are not healable by definition
    CannotFix,
}

/// Outcome of healing one failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealOutcome {
    /// Test that failed
    pub test_name: String,
    /// Classification that drove the decision
    pub classification: FailureClassification,
    /// Whether a repair was produced
    pub healed: bool,
    /// Strategy applied
    pub strategy: HealingStrategy,
    /// The repair, when one was produced
    pub repair: Option<RepairSuggestion>,
    /// Wall-clock duration of this heal in milliseconds
    pub duration_ms: u64,
}

/// Batch report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingReport {
    /// Per-test outcomes, in input order
    pub outcomes: Vec<HealOutcome>,
    /// Count of healed tests
    pub healed_count: usize,
    /// Total run duration in milliseconds
    pub total_duration_ms: u64,
}

/// Self-healing engine.
pub struct SelfHealingEngine {
    classifier: FailureClassifier,
    waterfall: LocatorWaterfall,
    config: HealingConfig,
}

impl SelfHealingEngine {
    /// Create an engine.
    pub fn new(waterfall: LocatorWaterfall, config: HealingConfig) -> Self {
        Self {
            classifier: FailureClassifier::new(),
            waterfall,
            config,
        }
    }

    /// Heal one failure against an optional page snapshot.
    pub async fn heal(
        &self,
        failure: &TestFailure,
        page: Option<&PageSnapshot>,
    ) -> Result<HealOutcome> {
        let started = Instant::now();
        let classification = self.classifier.classify(failure);
        debug!(
            test = %failure.test_name,
            failure_type = classification.failure_type.as_str(),
            confidence = classification.confidence,
            "failure classified"
        );

        let (healed, strategy, repair) = match classification.failure_type {
            FailureType::RealBug => (false, HealingStrategy::CannotFix, None),
            FailureType::TestFragility if self.config.auto_fix => {
                match (page, &failure.selector) {
                    (Some(page), Some(selector)) => {
                        let repair = self.waterfall.relocate(selector, page).await?;
                        match repair {
                            Some(repair) if repair.confidence >= self.config.confidence_threshold => {
                                (true, HealingStrategy::RelocatedSelector, Some(repair))
                            }
                            _ => (false, HealingStrategy::AdvisoryOnly, None),
                        }
                    }
                    _ => (false, HealingStrategy::AdvisoryOnly, None),
                }
            }
            _ => (false, HealingStrategy::AdvisoryOnly, None),
        };

        let outcome = HealOutcome {
            test_name: failure.test_name.clone(),
            classification,
            healed,
            strategy,
            repair,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            test = %outcome.test_name,
            healed = outcome.healed,
            strategy = ?outcome.strategy,
            "heal finished"
        );
        Ok(outcome)
    }

    /// Heal a batch of failures. Outcomes mirror input order.
    pub async fn heal_batch(
        &self,
        failures: &[(TestFailure, Option<PageSnapshot>)],
    ) -> Result<HealingReport> {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(failures.len());

        for (failure, page) in failures {
            outcomes.push(self.heal(failure, page.as_ref()).await?);
        }

        Ok(HealingReport {
            healed_count: outcomes.iter().filter(|o| o.healed).count(),
            total_duration_ms: started.elapsed().as_millis() as u64,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ProviderKind;
    use crate::healing::page::PageElement;
    use serde_json::json;

    fn engine() -> SelfHealingEngine {
        SelfHealingEngine::new(
            LocatorWaterfall::standard(
                None,
                ProviderKind::OpenaiCompatible,
                "gpt-4o-mini".to_string(),
                0.85,
            ),
            HealingConfig::default(),
        )
    }

    fn fragile_failure() -> TestFailure {
        TestFailure {
            test_name: "submits the order".to_string(),
            test_file: "e2e/checkout.test.ts".to_string(),
            error_message: "Element not found: .submit".to_string(),
            selector: Some(".submit".to_string()),
            ..Default::default()
        }
    }

    fn page() -> PageSnapshot {
        PageSnapshot::new(
            "https://app.example/",
            vec![PageElement {
                tag: "button".to_string(),
                test_id: Some("submit-order".to_string()),
                role: Some("button".to_string()),
                text: "Submit".to_string(),
                ..Default::default()
            }],
        )
    }

    #[tokio::test]
    async fn test_fragility_with_page_heals() {
        let outcome = engine()
            .heal(&fragile_failure(), Some(&page()))
            .await
            .unwrap();

        assert!(outcome.healed);
        assert_eq!(outcome.strategy, HealingStrategy::RelocatedSelector);
        let repair = outcome.repair.unwrap();
        assert_eq!(repair.suggested_selector, "[data-testid=\"submit-order\"]");
    }

    #[tokio::test]
    async fn test_fragility_without_page_is_advisory() {
        let outcome = engine().heal(&fragile_failure(), None).await.unwrap();

        assert!(!outcome.healed);
        assert_eq!(outcome.strategy, HealingStrategy::AdvisoryOnly);
        assert!(!outcome.classification.suggested_actions.is_empty());
    }

    #[tokio::test]
    async fn test_real_bug_cannot_fix() {
        let failure = TestFailure {
            test_name: "totals the cart".to_string(),
            test_file: "cart.test.ts".to_string(),
            error_message: "AssertionError: expected 150 to equal 145".to_string(),
            expected_value: Some(json!(150)),
            actual_value: Some(json!(145)),
            ..Default::default()
        };

        let outcome = engine().heal(&failure, Some(&page())).await.unwrap();
        assert!(!outcome.healed);
        assert_eq!(outcome.strategy, HealingStrategy::CannotFix);
        assert_eq!(
            outcome.classification.failure_type,
            FailureType::RealBug
        );
    }

    #[tokio::test]
    async fn test_auto_fix_disabled_goes_advisory() {
        let engine = SelfHealingEngine::new(
            LocatorWaterfall::standard(
                None,
                ProviderKind::OpenaiCompatible,
                "gpt-4o-mini".to_string(),
                0.85,
            ),
            HealingConfig {
                auto_fix: false,
                ..Default::default()
            },
        );

        let outcome = engine.heal(&fragile_failure(), Some(&page())).await.unwrap();
        assert!(!outcome.healed);
        assert_eq!(outcome.strategy, HealingStrategy::AdvisoryOnly);
    }

    #[tokio::test]
    async fn test_batch_reports_counts_and_order() {
        let failures = vec![
            (fragile_failure(), Some(page())),
            (
                TestFailure {
                    test_name: "env trouble".to_string(),
                    test_file: "x.test.ts".to_string(),
                    error_message: "connect ECONNREFUSED 127.0.0.1:5432".to_string(),
                    ..Default::default()
                },
                None,
            ),
        ];

        let report = engine().heal_batch(&failures).await.unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.healed_count, 1);
        assert_eq!(report.outcomes[0].test_name, "submits the order");
        assert_eq!(report.outcomes[1].test_name, "env trouble");
    }
}
