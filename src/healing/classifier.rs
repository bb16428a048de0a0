//! Failure classification into the healing taxonomy.
//!
//! Keyword rule sets (scanned with Aho-Corasick) score each failure
//! against the taxonomy: environment, test fragility, real bug, flaky,
//! unknown. The highest-confidence rule wins; keyword counts scale
//! confidence; a classification below the 0.5 threshold lands in Unknown.
//! Flakiness additionally requires at least three recorded prior runs
//! with mixed outcomes.

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Infrastructure or environment trouble (network, services, timeouts)
    Environment,
    /// The test targets the wrong locator, not a product defect
    TestFragility,
    /// The product under test really misbehaves
    RealBug,
    /// Mixed pass/fail history with no code change
    Flaky,
    /// Nothing reached the confidence threshold
    Unknown,
}

impl FailureType {
    /// Canonical snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureType::Environment => "environment",
            FailureType::TestFragility => "test_fragility",
            FailureType::RealBug => "real_bug",
            FailureType::Flaky => "flaky",
            FailureType::Unknown => "unknown",
        }
    }
}

/// A failing test handed to the healer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestFailure {
    /// Test name
    pub test_name: String,
    /// Test file path
    pub test_file: String,
    /// Error message from the runner
    pub error_message: String,
    /// Stack trace, when available
    #[serde(default)]
    pub stack_trace: String,
    /// Selector the test was using, when the failure involves one
    #[serde(default)]
    pub selector: Option<String>,
    /// Expected value from the assertion, when present
    #[serde(default)]
    pub expected_value: Option<serde_json::Value>,
    /// Actual value from the assertion, when present
    #[serde(default)]
    pub actual_value: Option<serde_json::Value>,
    /// Outcomes of previous runs (true = pass), newest last
    #[serde(default)]
    pub previous_runs: Option<Vec<bool>>,
}

/// Classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureClassification {
    /// Winning taxonomy type
    pub failure_type: FailureType,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Whether run history marks the test flaky
    pub is_flaky: bool,
    /// Bounded list of suggested next actions
    pub suggested_actions: Vec<String>,
    /// Keywords that matched during classification
    pub matched_keywords: Vec<String>,
}

/// Confidence below which a failure is Unknown.
const CLASSIFICATION_THRESHOLD: f64 = 0.5;

/// Minimum recorded runs before flakiness is considered.
const MIN_RUNS_FOR_FLAKY: usize = 3;

/// Suggested actions are capped at this many entries.
const MAX_SUGGESTIONS: usize = 4;

const ENVIRONMENT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "econnrefused",
    "enotfound",
    "etimedout",
    "econnreset",
    "socket hang up",
    "network error",
    "service unavailable",
    "connection refused",
    "getaddrinfo",
    "dns",
    "502 bad gateway",
    "503",
];

const FRAGILITY_KEYWORDS: &[&str] = &[
    "element not found",
    "no such element",
    "unable to locate element",
    "stale element",
    "element is not attached",
    "could not find element",
    "selector resolved to hidden",
    "waiting for selector",
];

const REAL_BUG_KEYWORDS: &[&str] = &[
    "assertionerror",
    "expected",
    "to equal",
    "to be",
    "tostrictequal",
    "received",
    "deep equality",
];

static ENVIRONMENT_MATCHER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(ENVIRONMENT_KEYWORDS)
        .expect("environment keyword set is valid")
});

static FRAGILITY_MATCHER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(FRAGILITY_KEYWORDS)
        .expect("fragility keyword set is valid")
});

static REAL_BUG_MATCHER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(REAL_BUG_KEYWORDS)
        .expect("real-bug keyword set is valid")
});

/// Failure classifier.
#[derive(Debug, Default, Clone)]
pub struct FailureClassifier;

impl FailureClassifier {
    /// Create a classifier.
    pub fn new() -> Self {
        Self
    }

    /// Classify one failure.
    pub fn classify(&self, failure: &TestFailure) -> FailureClassification {
        let haystack = format!("{}\n{}", failure.error_message, failure.stack_trace);

        let mut candidates: Vec<(FailureType, f64, Vec<String>)> = Vec::new();

        // Flaky: requires history, and mixed outcomes within it.
        let is_flaky = failure.previous_runs.as_ref().is_some_and(|runs| {
            runs.len() >= MIN_RUNS_FOR_FLAKY
                && runs.iter().any(|r| *r)
                && runs.iter().any(|r| !*r)
        });
        if is_flaky {
            candidates.push((FailureType::Flaky, 0.75, vec!["mixed run history".to_string()]));
        }

        let environment = matched(&ENVIRONMENT_MATCHER, ENVIRONMENT_KEYWORDS, &haystack);
        if !environment.is_empty() {
            candidates.push((
                FailureType::Environment,
                scaled_confidence(0.6, environment.len()),
                environment,
            ));
        }

        let mut fragility = matched(&FRAGILITY_MATCHER, FRAGILITY_KEYWORDS, &haystack);
        if let Some(selector) = &failure.selector {
            if looks_like_dom_locator(selector) {
                fragility.push(format!("selector `{selector}`"));
            }
            if selector.trim_start().starts_with("//") {
                fragility.push("xpath-only locator".to_string());
            }
        }
        if !fragility.is_empty() {
            // A matching selector plus a not-found message is the
            // strongest fragility signal.
            let base = if fragility.len() > 1 { 0.7 } else { 0.6 };
            candidates.push((
                FailureType::TestFragility,
                scaled_confidence(base, fragility.len()),
                fragility,
            ));
        }

        let assertion_values_present =
            failure.expected_value.is_some() && failure.actual_value.is_some();
        let real_bug = matched(&REAL_BUG_MATCHER, REAL_BUG_KEYWORDS, &haystack);
        if assertion_values_present || real_bug.len() >= 2 {
            let mut keywords = real_bug;
            let base = if assertion_values_present {
                keywords.push("expected/actual values present".to_string());
                0.75
            } else {
                0.55
            };
            candidates.push((
                FailureType::RealBug,
                scaled_confidence(base, keywords.len()),
                keywords,
            ));
        }

        let winner = candidates
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match winner {
            Some((failure_type, confidence, matched_keywords))
                if confidence >= CLASSIFICATION_THRESHOLD =>
            {
                FailureClassification {
                    failure_type,
                    confidence,
                    is_flaky,
                    suggested_actions: suggestions_for(failure_type),
                    matched_keywords,
                }
            }
            _ => FailureClassification {
                failure_type: FailureType::Unknown,
                confidence: 0.0,
                is_flaky,
                suggested_actions: suggestions_for(FailureType::Unknown),
                matched_keywords: Vec::new(),
            },
        }
    }
}

fn matched(matcher: &AhoCorasick, keywords: &[&str], haystack: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for hit in matcher.find_iter(haystack) {
        let keyword = keywords[hit.pattern().as_usize()].to_string();
        if !seen.contains(&keyword) {
            seen.push(keyword);
        }
    }
    seen
}

/// Base confidence scaled up by extra keyword matches, capped at 0.95.
fn scaled_confidence(base: f64, matches: usize) -> f64 {
    (base + 0.1 * (matches.saturating_sub(1)) as f64).min(0.95)
}

/// Whether a string looks like a DOM locator rather than prose.
fn looks_like_dom_locator(selector: &str) -> bool {
    let s = selector.trim();
    s.starts_with('#')
        || s.starts_with('.')
        || s.starts_with('[')
        || s.starts_with("//")
        || s.contains('>')
        || s.contains(":nth-")
}

/// Static action catalog keyed by failure type.
fn suggestions_for(failure_type: FailureType) -> Vec<String> {
    let actions: &[&str] = match failure_type {
        FailureType::Environment => &[
            "Check that dependent services and networks are reachable from CI",
            "Raise the navigation/request timeout for slow environments",
            "Retry the run; environment failures are usually transient",
        ],
        FailureType::TestFragility => &[
            "Prefer a stable locator: data-testid or an ARIA role with a name",
            "Avoid positional and class-based CSS selectors that change with styling",
            "Let the self-healer propose a relocated selector",
        ],
        FailureType::RealBug => &[
            "Inspect the assertion diff; the product output changed",
            "Bisect recent commits touching the code under test",
            "Do not auto-heal: a failing assertion with real values is signal",
        ],
        FailureType::Flaky => &[
            "Quarantine the test and track its pass rate",
            "Replace sleeps with condition-based waits",
            "Look for shared state between tests",
        ],
        FailureType::Unknown => &[
            "Re-run with verbose logging to capture a clearer error",
            "Attach the full stack trace to the failure record",
        ],
    };
    actions
        .iter()
        .take(MAX_SUGGESTIONS)
        .map(|s| (*s).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failure(message: &str) -> TestFailure {
        TestFailure {
            test_name: "checkout submits".to_string(),
            test_file: "e2e/checkout.test.ts".to_string(),
            error_message: message.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_environment_classification() {
        let classifier = FailureClassifier::new();
        let classification = classifier.classify(&failure(
            "Error: connect ECONNREFUSED 127.0.0.1:5432 after timeout",
        ));

        assert_eq!(classification.failure_type, FailureType::Environment);
        assert!(classification.confidence >= 0.6);
        assert!(!classification.matched_keywords.is_empty());
    }

    #[test]
    fn test_fragility_with_selector() {
        let classifier = FailureClassifier::new();
        let mut f = failure("Element not found: .submit");
        f.selector = Some(".submit".to_string());

        let classification = classifier.classify(&f);
        assert_eq!(classification.failure_type, FailureType::TestFragility);
        assert!(classification.confidence >= 0.7);
        let suggestions = classification.suggested_actions.join(" ");
        assert!(suggestions.contains("data-testid"));
        assert!(suggestions.contains("role"));
    }

    #[test]
    fn test_real_bug_with_values() {
        let classifier = FailureClassifier::new();
        let mut f = failure("AssertionError: expected 150 to equal 145");
        f.expected_value = Some(json!(150));
        f.actual_value = Some(json!(145));

        let classification = classifier.classify(&f);
        assert_eq!(classification.failure_type, FailureType::RealBug);
        assert!(classification.confidence >= 0.75);
        assert!(!classification.is_flaky);
    }

    #[test]
    fn test_flaky_requires_mixed_history() {
        let classifier = FailureClassifier::new();

        let mut f = failure("intermittent failure");
        f.previous_runs = Some(vec![true, false, true, false]);
        let classification = classifier.classify(&f);
        assert_eq!(classification.failure_type, FailureType::Flaky);
        assert!(classification.is_flaky);

        // Two runs are not enough.
        f.previous_runs = Some(vec![true, false]);
        let classification = classifier.classify(&f);
        assert!(!classification.is_flaky);

        // Consistent failures are not flaky.
        f.previous_runs = Some(vec![false, false, false, false]);
        let classification = classifier.classify(&f);
        assert!(!classification.is_flaky);
    }

    #[test]
    fn test_unknown_below_threshold() {
        let classifier = FailureClassifier::new();
        let classification = classifier.classify(&failure("something odd happened"));

        assert_eq!(classification.failure_type, FailureType::Unknown);
        assert_eq!(classification.confidence, 0.0);
        assert!(!classification.suggested_actions.is_empty());
    }

    #[test]
    fn test_keyword_count_scales_confidence() {
        let classifier = FailureClassifier::new();
        let single = classifier.classify(&failure("request timeout"));
        let several = classifier.classify(&failure(
            "request timeout: connection refused, service unavailable (503)",
        ));
        assert!(several.confidence > single.confidence);
    }

    #[test]
    fn test_suggestions_bounded() {
        let classifier = FailureClassifier::new();
        let classification = classifier.classify(&failure("stale element reference"));
        assert!(classification.suggested_actions.len() <= MAX_SUGGESTIONS);
    }
}
