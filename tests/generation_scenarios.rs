//! End-to-end generation scenarios against a scripted LLM transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use testmind::core::config::ProviderKind;
use testmind::core::errors::TestMindError;
use testmind::generation::llm::{
    LlmRequest, LlmResponse, LlmRetryPolicy, LlmService, ProviderTransport, TokenUsage,
    UsageTracker,
};
use testmind::retrieval::embedding::HashEmbeddingProvider;
use testmind::{TestMindConfig, TestMindEngine};

/// Transport that returns a fixed response and records every prompt.
struct RecordingTransport {
    response: String,
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ProviderTransport for RecordingTransport {
    async fn generate_once(
        &self,
        request: &LlmRequest,
    ) -> std::result::Result<LlmResponse, TestMindError> {
        self.prompts.lock().push(request.prompt.clone());
        Ok(LlmResponse {
            content: self.response.clone(),
            usage: TokenUsage {
                prompt: request.prompt.len() / 4,
                completion: 120,
                total: request.prompt.len() / 4 + 120,
            },
            finish_reason: "stop".to_string(),
        })
    }
}

const ADD_TESTS: &str = r#"```typescript
import { add } from './math';

describe('add', () => {
    it('adds two positives', () => {
        expect(add(1, 2)).toBe(3);
    });

    it('handles zero', () => {
        expect(add(0, 0)).toBe(0);
    });

    it('handles negatives', () => {
        expect(add(-1, 1)).toBe(0);
    });
});
```"#;

const FETCH_TESTS: &str = r#"```typescript
import axios from 'axios';
import { fetchUserData } from './user';

jest.mock('axios');

describe('fetchUserData', () => {
    it('returns user data', async () => {
        (axios.get as jest.Mock).mockResolvedValue({ data: { id: 'u1' } });
        await expect(fetchUserData('u1')).resolves.toEqual({ id: 'u1' });
    });

    it('propagates rejection', async () => {
        (axios.get as jest.Mock).mockRejectedValue(new Error('down'));
        await expect(fetchUserData('u1')).rejects.toThrow('down');
    });

    it('calls the right endpoint', async () => {
        (axios.get as jest.Mock).mockResolvedValue({ data: {} });
        await fetchUserData('u2');
        expect(axios.get).toHaveBeenCalledWith('/users/u2');
    });
});
```"#;

async fn engine_with(
    project: &std::path::Path,
    response: &str,
) -> (TestMindEngine, Arc<Mutex<Vec<String>>>) {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let mut service = LlmService::new(
        LlmRetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
        },
        Arc::new(UsageTracker::new()),
    );
    service.register(
        ProviderKind::OpenaiCompatible,
        Box::new(RecordingTransport {
            response: response.to_string(),
            prompts: prompts.clone(),
        }),
    );

    let engine = TestMindEngine::with_components(
        project,
        TestMindConfig::default(),
        Box::new(HashEmbeddingProvider::new(64)),
        Arc::new(service),
    )
    .await
    .unwrap();
    (engine, prompts)
}

#[tokio::test(flavor = "multi_thread")]
async fn pure_function_generation_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/math.ts"),
        "export function add(a: number, b: number): number {\n    return a + b;\n}\n",
    )
    .unwrap();

    let (engine, prompts) = engine_with(dir.path(), ADD_TESTS).await;
    engine.index().await.unwrap();

    let outcome = engine
        .generate("src/math.ts", Some("add"), None)
        .await
        .unwrap();

    // The prompt declared purity and forbade mocks.
    let prompt = prompts.lock().last().unwrap().clone();
    assert!(prompt.contains("PURE FUNCTION"));
    assert!(prompt.contains("Do NOT mock"));
    assert!(prompt.contains("- a: 0, -1, 1"));

    // The suite calls the real function with real arguments.
    assert!(outcome.suite.code.contains("expect(add(1, 2)).toBe(3)"));
    assert_eq!(outcome.suite.file_path, "src/math.test.ts");
    assert_eq!(outcome.suite.framework, "jest");

    // New-file diff: every content line appears as an addition in order.
    assert!(!outcome.diff.exists);
    let additions: Vec<&str> = outcome
        .diff
        .diff
        .lines()
        .filter(|l| l.starts_with('+'))
        .collect();
    let content_lines: Vec<&str> = outcome.suite.code.lines().collect();
    assert_eq!(additions.len(), content_lines.len());
    for (addition, line) in additions.iter().zip(content_lines.iter()) {
        assert!(addition.ends_with(&format!("| {line}")));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn effectful_async_function_generation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/user.ts"),
        "import axios from 'axios';\n\
         export async function fetchUserData(userId: string): Promise<User> {\n\
             const res = await axios.get(`/users/${userId}`);\n\
             return res.data;\n\
         }\n",
    )
    .unwrap();

    let (engine, prompts) = engine_with(dir.path(), FETCH_TESTS).await;
    engine.index().await.unwrap();

    let outcome = engine
        .generate("src/user.ts", Some("fetchUserData"), None)
        .await
        .unwrap();

    let prompt = prompts.lock().last().unwrap().clone();
    assert!(prompt.contains("Async: Yes"));
    assert!(prompt.contains("mock `axios`"));
    assert!(prompt.contains("network"));
    assert!(prompt.contains("promise rejection"));

    assert!(outcome.suite.code.contains("jest.mock('axios')"));
    assert!(outcome.suite.code.contains("rejects.toThrow"));
}

#[tokio::test(flavor = "multi_thread")]
async fn quality_gate_never_emits_empty_suites() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/math.ts"),
        "export function add(a: number, b: number) { return a + b; }\n",
    )
    .unwrap();

    let (engine, _prompts) = engine_with(dir.path(), "```\n// nothing useful\n```").await;
    engine.index().await.unwrap();

    let err = engine
        .generate("src/math.ts", Some("add"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "generation");

    // No partial artifact was written.
    assert!(!dir.path().join("src/math.test.ts").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_function_is_analysis_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/math.ts"),
        "export function add(a: number, b: number) { return a + b; }\n",
    )
    .unwrap();

    let (engine, _prompts) = engine_with(dir.path(), ADD_TESTS).await;
    let err = engine
        .generate("src/math.ts", Some("nonexistent"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "analysis");
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_generation_mirrors_input_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/math.ts"),
        "export function add(a: number, b: number) { return a + b; }\n\
         export function sub(a: number, b: number) { return a - b; }\n",
    )
    .unwrap();

    let (engine, _prompts) = engine_with(dir.path(), ADD_TESTS).await;
    engine.index().await.unwrap();

    let results = engine
        .generate_batch(
            "src/math.ts",
            &["add".to_string(), "sub".to_string()],
            None,
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(
        results[0].as_ref().unwrap().target_entity_id,
        "src/math.ts::add"
    );
    assert_eq!(
        results[1].as_ref().unwrap().target_entity_id,
        "src/math.ts::sub"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reindex_skips_unchanged_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/math.ts"),
        "export function add(a: number, b: number) { return a + b; }\n",
    )
    .unwrap();

    let (engine, _prompts) = engine_with(dir.path(), ADD_TESTS).await;
    let first = engine.index().await.unwrap();
    assert_eq!(first.files_indexed, 1);

    let second = engine.index().await.unwrap();
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_unchanged, 1);
}
