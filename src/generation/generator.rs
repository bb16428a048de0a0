//! Test generation orchestration.
//!
//! A single generation runs plan → prompt → cache → LLM → extract →
//! quality gate → emit, in that order. Batch mode schedules requests
//! through a counting semaphore, preserves input order in the result
//! vector, and collects per-item failures without aborting the batch.
//! Quality-gate rejections feed the rolling learned-error list consumed by
//! the prompt builder on later requests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::chunks::{CodeChunk, FunctionContext};
use crate::core::config::{ProviderKind, TestLocationStrategy};
use crate::core::errors::{Result, TestMindError};
use crate::generation::cache::{CacheRequest, SemanticCache};
use crate::generation::llm::{LlmRequest, LlmService};
use crate::generation::prompt::PromptBuilder;
use crate::generation::strategy::StrategyPlanner;

/// Quality gate: minimum non-empty lines in generated code.
const MIN_TEST_LINES: usize = 10;

/// Rolling learned-error capacity.
const MAX_LEARNED_ERRORS: usize = 10;

/// A generated test artifact. Immutable; regeneration creates a new record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    /// Unique id of this artifact
    pub id: String,
    /// Project the suite belongs to
    pub project_id: String,
    /// Target entity (`path::function`)
    pub target_entity_id: String,
    /// Test type (`unit`)
    pub test_type: String,
    /// Framework the code targets
    pub framework: String,
    /// Generated test code
    pub code: String,
    /// Where the test file goes, relative to the project root
    pub file_path: String,
    /// Generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Model that produced the code
    pub generated_by: String,
    /// Extra attributes (tier, cache-hit flag, ...)
    pub metadata: HashMap<String, String>,
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Analyzed context of the function under test
    pub context: FunctionContext,
    /// Target framework (`jest`, `vitest`, ...)
    pub framework: String,
    /// Retrieved + pinned context chunks, already fused
    pub chunks: Vec<CodeChunk>,
}

/// Batch options.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Semaphore width
    pub concurrency: usize,
    /// Share fused context across requests targeting the same file
    pub group_similar: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            group_similar: true,
        }
    }
}

/// Generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// Project identifier recorded on emitted suites
    pub project_id: String,
    /// Provider to call
    pub provider: ProviderKind,
    /// Model id
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion cap
    pub max_tokens: usize,
    /// Test file placement
    pub location_strategy: TestLocationStrategy,
}

/// Test generation orchestrator.
pub struct TestGenerator {
    planner: StrategyPlanner,
    prompt_builder: PromptBuilder,
    cache: Arc<SemanticCache>,
    llm: Arc<LlmService>,
    settings: GeneratorSettings,
    learned_errors: Mutex<VecDeque<String>>,
}

impl TestGenerator {
    /// Create a generator.
    pub fn new(
        cache: Arc<SemanticCache>,
        llm: Arc<LlmService>,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            planner: StrategyPlanner::new(),
            prompt_builder: PromptBuilder::new(),
            cache,
            llm,
            settings,
            learned_errors: Mutex::new(VecDeque::new()),
        }
    }

    /// Current learned-error list, newest last.
    pub fn learned_errors(&self) -> Vec<String> {
        self.learned_errors.lock().iter().cloned().collect()
    }

    fn record_learned_error(&self, description: String) {
        let mut errors = self.learned_errors.lock();
        if errors.iter().any(|e| e == &description) {
            return;
        }
        if errors.len() == MAX_LEARNED_ERRORS {
            errors.pop_front();
        }
        errors.push_back(description);
    }

    /// Generate one test suite.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<TestSuite> {
        let context = &request.context;
        let test_file_path = self
            .settings
            .location_strategy
            .test_file_path(&context.signature.file_path);

        // 1. Plan.
        let strategy = self.planner.plan(context);

        // 2. Prompt.
        let learned = self.learned_errors();
        let prompt = self.prompt_builder.build(
            context,
            &strategy,
            &request.framework,
            &test_file_path,
            &request.chunks,
            &learned,
        );

        // 3. Cache, then LLM.
        let cache_request = CacheRequest {
            provider: self.settings.provider,
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            prompt: format!("{}\n{}", prompt.system, prompt.user),
        };

        let mut cache_hit = true;
        let raw = match self.cache.get(&cache_request).await? {
            Some(cached) => cached,
            None => {
                cache_hit = false;
                let response = self
                    .llm
                    .generate(&LlmRequest {
                        provider: self.settings.provider,
                        model: self.settings.model.clone(),
                        system: Some(prompt.system.clone()),
                        prompt: prompt.user.clone(),
                        temperature: self.settings.temperature,
                        max_tokens: self.settings.max_tokens,
                    })
                    .await?;
                self.cache
                    .set(&cache_request, &response.content, None)
                    .await?;
                response.content
            }
        };

        // 4. Extract the code block.
        let code = extract_code_block(&raw).ok_or_else(|| {
            TestMindError::generation_stage("response contained no test code block", "extract")
        })?;

        // 5. Quality gate.
        if let Err(rejection) = check_quality(&code) {
            self.record_learned_error(rejection.clone());
            return Err(TestMindError::generation_stage(rejection, "quality-gate"));
        }

        // 6. Emit.
        let mut metadata = HashMap::new();
        metadata.insert("tier".to_string(), format!("{:?}", prompt.tier));
        metadata.insert("cache_hit".to_string(), cache_hit.to_string());

        let suite = TestSuite {
            id: Uuid::new_v4().to_string(),
            project_id: self.settings.project_id.clone(),
            target_entity_id: format!(
                "{}::{}",
                context.signature.file_path, context.signature.name
            ),
            test_type: "unit".to_string(),
            framework: request.framework.clone(),
            code,
            file_path: test_file_path,
            generated_at: Utc::now(),
            generated_by: self.settings.model.clone(),
            metadata,
        };

        info!(
            target = %suite.target_entity_id,
            file = %suite.file_path,
            cache_hit,
            "test suite generated"
        );
        Ok(suite)
    }

    /// Generate a batch. Results mirror input order; failures are
    /// collected per item and never abort the batch.
    pub async fn generate_batch(
        self: &Arc<Self>,
        mut requests: Vec<GenerationRequest>,
        options: &BatchOptions,
    ) -> Vec<Result<TestSuite>> {
        if options.group_similar {
            share_group_context(&mut requests);
        }

        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut handles = Vec::with_capacity(requests.len());

        for (index, request) in requests.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let generator = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                // Permit release on drop also covers panics and timeouts.
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("generation semaphore closed");
                debug!(index, "batch slot acquired");
                generator.generate(&request).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    warn!(index, error = %join_error, "batch item panicked");
                    Err(TestMindError::internal(format!(
                        "batch item {index} aborted: {join_error}"
                    )))
                }
            };
            results.push(outcome);
        }
        results
    }
}

/// Share the fused context inside groups of requests that target the same
/// `(file, framework)`: the union of the group's chunks is computed once
/// and each member references that shared, deduplicated list instead of
/// its own overlapping copy.
fn share_group_context(requests: &mut [GenerationRequest]) {
    let mut groups: HashMap<(String, String), Vec<usize>> = HashMap::new();
    for (index, request) in requests.iter().enumerate() {
        groups
            .entry((
                request.context.signature.file_path.clone(),
                request.framework.clone(),
            ))
            .or_default()
            .push(index);
    }

    for indices in groups.values() {
        if indices.len() < 2 {
            continue;
        }

        let mut shared: Vec<CodeChunk> = Vec::new();
        let mut seen: ahash::AHashSet<String> = ahash::AHashSet::new();
        for &index in indices {
            for chunk in &requests[index].chunks {
                if seen.insert(chunk.id.clone()) {
                    shared.push(chunk.clone());
                }
            }
        }

        debug!(
            group_size = indices.len(),
            shared_chunks = shared.len(),
            "sharing fused context across similar requests"
        );
        for &index in indices {
            requests[index].chunks = shared.clone();
        }
    }
}

/// Extract test code from a model response.
///
/// Tries, in order: a language-tagged triple-backtick block, a bare
/// triple-backtick block, and finally the raw content when it already
/// contains test-framework keywords.
pub fn extract_code_block(response: &str) -> Option<String> {
    if let Some(block) = fenced_block(response, true) {
        return Some(block);
    }
    if let Some(block) = fenced_block(response, false) {
        return Some(block);
    }

    let trimmed = response.trim();
    let has_keywords = ["it(", "test(", "describe("]
        .iter()
        .any(|kw| trimmed.contains(kw));
    has_keywords.then(|| trimmed.to_string())
}

fn fenced_block(response: &str, require_language_tag: bool) -> Option<String> {
    let mut rest = response;
    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        let newline = after_fence.find('\n')?;
        let tag = after_fence[..newline].trim();

        let tagged = !tag.is_empty();
        if tagged == require_language_tag || !require_language_tag {
            let body = &after_fence[newline + 1..];
            if let Some(end) = body.find("```") {
                let block = body[..end].trim_end().to_string();
                if !block.is_empty() && (!require_language_tag || tagged) {
                    return Some(block);
                }
                rest = &body[end + 3..];
                continue;
            }
            return None;
        }

        let body = after_fence.get(newline + 1..)?;
        let end = body.find("```")?;
        rest = &body[end + 3..];
    }
    None
}

/// Quality gate over extracted code: at least one test case, at least one
/// assertion, at least ten non-empty lines.
pub fn check_quality(code: &str) -> std::result::Result<(), String> {
    let has_test_case = code.contains("it(") || code.contains("test(");
    if !has_test_case {
        return Err("generated code has no test cases (`it(` / `test(`)".to_string());
    }
    if !code.contains("expect(") {
        return Err("generated code has no assertions (`expect(`)".to_string());
    }
    let non_empty = code.lines().filter(|l| !l.trim().is_empty()).count();
    if non_empty < MIN_TEST_LINES {
        return Err(format!(
            "generated code too short: {non_empty} non-empty lines (minimum {MIN_TEST_LINES})"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunks::{ChunkKind, ComplexityMetrics, FunctionSignature, Parameter};
    use crate::generation::llm::testing::ScriptedTransport;
    use crate::generation::llm::{LlmRetryPolicy, UsageTracker};
    use std::time::Duration;

    const VALID_TEST: &str = r#"```typescript
import { add } from './math';

describe('add', () => {
    it('adds positives', () => {
        expect(add(1, 2)).toBe(3);
    });

    it('adds negatives', () => {
        expect(add(-1, -2)).toBe(-3);
    });

    it('handles zero', () => {
        expect(add(0, 0)).toBe(0);
    });
});
```"#;

    fn context_for(name: &str) -> FunctionContext {
        FunctionContext {
            signature: FunctionSignature {
                name: name.to_string(),
                file_path: "src/math.ts".to_string(),
                parameters: vec![
                    Parameter {
                        name: "a".to_string(),
                        param_type: Some("number".to_string()),
                        optional: false,
                        default_value: None,
                    },
                    Parameter {
                        name: "b".to_string(),
                        param_type: Some("number".to_string()),
                        optional: false,
                        default_value: None,
                    },
                ],
                return_type: Some("number".to_string()),
                is_async: false,
                documentation: None,
            },
            dependencies: vec![],
            callers: vec![],
            side_effects: vec![],
            existing_tests: vec![],
            coverage: None,
            complexity: ComplexityMetrics::default(),
            source: format!("function {name}(a, b) {{ return a + b; }}"),
        }
    }

    fn generator_with(transport: ScriptedTransport) -> Arc<TestGenerator> {
        let mut service = LlmService::new(
            LlmRetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                request_timeout: Duration::from_secs(5),
            },
            Arc::new(UsageTracker::new()),
        );
        service.register(ProviderKind::OpenaiCompatible, Box::new(transport));

        Arc::new(TestGenerator::new(
            Arc::new(SemanticCache::new(None, 0.85)),
            Arc::new(service),
            GeneratorSettings {
                project_id: "proj-1".to_string(),
                provider: ProviderKind::OpenaiCompatible,
                model: "gpt-4o-mini".to_string(),
                temperature: 0.2,
                max_tokens: 1024,
                location_strategy: TestLocationStrategy::Colocated,
            },
        ))
    }

    fn request_for(name: &str) -> GenerationRequest {
        GenerationRequest {
            context: context_for(name),
            framework: "jest".to_string(),
            chunks: vec![],
        }
    }

    #[tokio::test]
    async fn test_single_generation_happy_path() {
        let generator = generator_with(ScriptedTransport::always(VALID_TEST));
        let suite = generator.generate(&request_for("add")).await.unwrap();

        assert_eq!(suite.file_path, "src/math.test.ts");
        assert_eq!(suite.target_entity_id, "src/math.ts::add");
        assert!(suite.code.contains("expect(add(1, 2)).toBe(3)"));
        assert!(!suite.code.contains("```"));
        assert_eq!(suite.metadata.get("cache_hit").unwrap(), "false");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_transport() {
        let transport = ScriptedTransport::always(VALID_TEST);
        let generator = generator_with(transport);

        generator.generate(&request_for("add")).await.unwrap();
        let second = generator.generate(&request_for("add")).await.unwrap();
        assert_eq!(second.metadata.get("cache_hit").unwrap(), "true");
    }

    #[tokio::test]
    async fn test_quality_gate_rejects_and_learns() {
        let generator = generator_with(ScriptedTransport::always(
            "```\nconsole.log('no tests here');\n```",
        ));
        let err = generator.generate(&request_for("add")).await.unwrap_err();

        assert_eq!(err.kind(), "generation");
        let learned = generator.learned_errors();
        assert_eq!(learned.len(), 1);
        assert!(learned[0].contains("no test cases"));
    }

    #[tokio::test]
    async fn test_empty_response_is_extraction_error() {
        let generator = generator_with(ScriptedTransport::always("I cannot help with that."));
        let err = generator.generate(&request_for("add")).await.unwrap_err();
        assert_eq!(err.kind(), "generation");
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_collects_failures() {
        let generator = generator_with(ScriptedTransport::new(vec![
            Ok(VALID_TEST.to_string()),
            Ok("nothing useful".to_string()),
            Ok(VALID_TEST.to_string()),
        ]));

        let requests = vec![
            request_for("alpha"),
            request_for("beta"),
            request_for("gamma"),
        ];
        let results = generator
            .generate_batch(requests, &BatchOptions {
                concurrency: 1,
                group_similar: false,
            })
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_eq!(
            results[0].as_ref().unwrap().target_entity_id,
            "src/math.ts::alpha"
        );
        assert_eq!(
            results[2].as_ref().unwrap().target_entity_id,
            "src/math.ts::gamma"
        );
    }

    #[tokio::test]
    async fn test_batch_concurrency_bounded() {
        let generator = generator_with(ScriptedTransport::always(VALID_TEST));
        let requests: Vec<GenerationRequest> =
            (0..8).map(|i| request_for(&format!("fn{i}"))).collect();

        let results = generator
            .generate_batch(requests, &BatchOptions {
                concurrency: 3,
                group_similar: false,
            })
            .await;
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(Result::is_ok));
    }

    #[test]
    fn test_group_sharing_unions_chunks() {
        let chunk_a = CodeChunk::new("src/math.ts", "const A = 1;", 1, 1, ChunkKind::Module);
        let chunk_b = CodeChunk::new("src/math.ts", "const B = 2;", 2, 2, ChunkKind::Module);

        let mut requests = vec![request_for("one"), request_for("two")];
        requests[0].chunks = vec![chunk_a.clone()];
        requests[1].chunks = vec![chunk_a.clone(), chunk_b.clone()];

        share_group_context(&mut requests);
        assert_eq!(requests[0].chunks.len(), 2);
        assert_eq!(requests[0].chunks.len(), requests[1].chunks.len());
    }

    #[test]
    fn test_extract_code_block_fallbacks() {
        let tagged = "prose\n```ts\nit('x', () => expect(1).toBe(1));\n```\nmore";
        assert!(extract_code_block(tagged).unwrap().starts_with("it("));

        let bare = "```\ntest('y', () => {});\n```";
        assert_eq!(extract_code_block(bare).unwrap(), "test('y', () => {});");

        let raw = "describe('z', () => { it('w', () => expect(2).toBe(2)); });";
        assert_eq!(extract_code_block(raw).unwrap(), raw);

        assert!(extract_code_block("no code here at all").is_none());
    }

    #[test]
    fn test_quality_gate_rules() {
        assert!(check_quality("x").is_err());

        let no_assert = "it('a', () => {});\n".repeat(12);
        assert!(check_quality(&no_assert).unwrap_err().contains("assertions"));

        let short = "it('a', () => { expect(1).toBe(1); });";
        assert!(check_quality(short).unwrap_err().contains("too short"));

        let good = format!(
            "describe('s', () => {{\n{}}});",
            "    it('a', () => { expect(1).toBe(1); });\n".repeat(10)
        );
        assert!(check_quality(&good).is_ok());
    }

    #[test]
    fn test_learned_errors_capped() {
        let generator = generator_with(ScriptedTransport::always(VALID_TEST));
        for i in 0..15 {
            generator.record_learned_error(format!("mistake {i}"));
        }
        let learned = generator.learned_errors();
        assert_eq!(learned.len(), 10);
        assert_eq!(learned[0], "mistake 5");
        assert_eq!(learned[9], "mistake 14");
    }
}
