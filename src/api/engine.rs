//! High-level engine tying the subsystems together.
//!
//! One [`TestMindEngine`] instance serves one target project for one
//! session. It owns the session-scoped state (explicit context, semantic
//! cache, learned errors, usage accounting) and wires the indexing,
//! retrieval, generation, review, and healing pipelines described by the
//! component modules.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::analysis::ast::AstAnalyzer;
use crate::analysis::complexity::ComplexityAnalyzer;
use crate::analysis::context::ContextBuilder;
use crate::analysis::dependency::DependencyGraph;
use crate::api::results::{EngineStats, GenerateOutcome, IndexSummary};
use crate::context::explicit::{ExplicitContextManager, PinOptions};
use crate::context::fusion::{fuse, FusionOptions, ScoredChunk};
use crate::core::chunks::ChunkKind;
use crate::core::config::{Credentials, TestMindConfig};
use crate::core::errors::{Result, TestMindError};
use crate::core::tokens::TokenBudgetManager;
use crate::generation::cache::SemanticCache;
use crate::generation::generator::{
    BatchOptions, GenerationRequest, GeneratorSettings, TestGenerator, TestSuite,
};
use crate::generation::llm::{LlmRetryPolicy, LlmService, UsageTracker};
use crate::generation::optimizer::PromptOptimizer;
use crate::healing::classifier::TestFailure;
use crate::healing::engine::{HealingReport, SelfHealingEngine};
use crate::healing::locators::LocatorWaterfall;
use crate::healing::page::PageSnapshot;
use crate::io::metadata::MetadataStore;
use crate::lang::common::ParsedFile;
use crate::lang::registry::is_supported_path;
use crate::retrieval::embedding::{
    EmbeddingGenerator, EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingProvider,
    LocalEmbeddingProvider,
};
use crate::retrieval::hybrid::{HybridSearch, HybridSearchOptions, LexicalIndex};
use crate::retrieval::vector_store::{SearchFilter, VectorStore};
use crate::review::diff::{DiffReviewer, DiffResult};

/// The main testmind engine.
pub struct TestMindEngine {
    project_root: PathBuf,
    config: TestMindConfig,
    analyzer: AstAnalyzer,
    store: VectorStore,
    embeddings: Arc<EmbeddingGenerator>,
    explicit: ExplicitContextManager,
    cache: Arc<SemanticCache>,
    llm: Arc<LlmService>,
    generator: Arc<TestGenerator>,
    reviewer: DiffReviewer,
    healer: SelfHealingEngine,
    metadata: Mutex<MetadataStore>,
    budget: TokenBudgetManager,
}

impl TestMindEngine {
    /// Create an engine for a project, resolving providers from the
    /// environment.
    pub async fn new(project_root: impl Into<PathBuf>, config: TestMindConfig) -> Result<Self> {
        let credentials = Credentials::from_env();
        let provider = resolve_embedding_provider(&credentials, &config);
        let usage = Arc::new(UsageTracker::new());
        let llm = Arc::new(LlmService::from_credentials(
            &credentials,
            config.generation.api_base.as_deref(),
            LlmRetryPolicy {
                request_timeout: std::time::Duration::from_secs(
                    config.generation.request_timeout_secs,
                ),
                ..LlmRetryPolicy::default()
            },
            usage,
        ));

        Self::with_components(project_root, config, provider, llm).await
    }

    /// Create an engine with explicit embedding and LLM components
    /// (dependency injection seam used by tests and embedders).
    pub async fn with_components(
        project_root: impl Into<PathBuf>,
        config: TestMindConfig,
        embedding_provider: Box<dyn EmbeddingProvider>,
        llm: Arc<LlmService>,
    ) -> Result<Self> {
        config.validate()?;
        let project_root = project_root.into();

        let dimension = embedding_provider.dimension();
        let embeddings = Arc::new(
            EmbeddingGenerator::new(embedding_provider)
                .with_batch_size(config.retrieval.batch_size),
        );

        let store =
            VectorStore::open(TestMindConfig::vector_dir(&project_root), dimension).await?;
        let metadata = MetadataStore::open(TestMindConfig::metadata_path(&project_root))?;

        let cache = Arc::new(SemanticCache::new(
            Some(embeddings.clone()),
            config.generation.cache_similarity_threshold,
        ));

        let generator = Arc::new(TestGenerator::new(
            cache.clone(),
            llm.clone(),
            GeneratorSettings {
                project_id: metadata.project_id().to_string(),
                provider: config.llm_provider,
                model: config.llm_model.clone(),
                temperature: config.generation.temperature,
                max_tokens: config.generation.max_completion_tokens,
                location_strategy: config.test_location_strategy,
            },
        ));

        let healer = SelfHealingEngine::new(
            LocatorWaterfall::standard(
                Some(llm.clone()),
                config.llm_provider,
                config.llm_model.clone(),
                config.healing.confidence_threshold,
            ),
            config.healing.clone(),
        );

        info!(root = %project_root.display(), "engine initialized");
        Ok(Self {
            reviewer: DiffReviewer::new(project_root.clone()),
            project_root,
            analyzer: AstAnalyzer::new(),
            store,
            embeddings,
            explicit: ExplicitContextManager::new(),
            cache,
            llm,
            generator,
            healer,
            metadata: Mutex::new(metadata),
            budget: TokenBudgetManager::new(),
            config,
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &TestMindConfig {
        &self.config
    }

    /// The session's explicit context manager.
    pub fn explicit_context(&self) -> &ExplicitContextManager {
        &self.explicit
    }

    /// Discover source files under the configured patterns.
    pub fn discover_files(&self) -> Result<Vec<PathBuf>> {
        let include = build_globset(&self.config.include_patterns)?;
        let exclude = build_globset(&self.config.exclude_patterns)?;

        let mut files = Vec::new();
        for entry in ignore::WalkBuilder::new(&self.project_root)
            .hidden(true)
            .git_ignore(true)
            .build()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "walk error, skipping entry");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || !is_supported_path(path) {
                continue;
            }

            let relative = match path.strip_prefix(&self.project_root) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            if !include.is_match(relative) || exclude.is_match(relative) {
                continue;
            }
            if let Ok(meta) = path.metadata() {
                if meta.len() > self.config.max_file_size {
                    debug!(file = %relative.display(), "skipping oversized file");
                    continue;
                }
            }
            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }

    /// Index the project: chunk, embed, and store every supported file
    /// whose content changed since the last run.
    pub async fn index(&self) -> Result<IndexSummary> {
        let files = self.discover_files()?;
        let mut summary = IndexSummary {
            files_discovered: files.len(),
            ..IndexSummary::default()
        };

        let mut complexity = ComplexityAnalyzer::new(&self.config.language)?;

        for path in &files {
            let relative = self.relative_path(path);
            let source = match std::fs::read_to_string(path) {
                Ok(source) => source,
                Err(err) => {
                    warn!(file = %relative, error = %err, "unreadable file skipped");
                    summary.files_skipped += 1;
                    continue;
                }
            };

            if !self.metadata.lock().needs_reindex(&relative, &source) {
                summary.files_unchanged += 1;
                continue;
            }

            let parsed = self.analyzer.analyze_source(Path::new(&relative), &source)?;
            let mut chunks = parsed.to_chunks(&source);
            for chunk in &mut chunks {
                if matches!(chunk.kind, ChunkKind::Function | ChunkKind::Method) {
                    if let Ok(metrics) = complexity.analyze_function(&chunk.content) {
                        chunk.complexity = Some(f64::from(metrics.cyclomatic));
                    }
                }
            }

            self.embeddings.embed_chunks(&mut chunks).await?;
            self.store.update_file(&relative, &chunks).await?;

            self.metadata
                .lock()
                .record_indexed(&relative, &source, chunks.len());
            summary.files_indexed += 1;
            summary.chunks_indexed += chunks.len();
        }

        self.metadata.lock().save()?;
        info!(
            indexed = summary.files_indexed,
            unchanged = summary.files_unchanged,
            chunks = summary.chunks_indexed,
            "indexing finished"
        );
        Ok(summary)
    }

    /// Pin a file into the explicit context.
    pub async fn pin_file(&self, file_path: &str) -> Result<usize> {
        let absolute = self.project_root.join(file_path);
        let source = std::fs::read_to_string(&absolute)
            .map_err(|e| TestMindError::io(format!("failed to read {file_path}"), e))?;
        let parsed = self.analyzer.analyze_source(Path::new(file_path), &source)?;
        let chunks = parsed.to_chunks(&source);
        let count = chunks.len();
        self.explicit
            .add_file(file_path, chunks, PinOptions::default());
        Ok(count)
    }

    /// Generate a test suite for one function.
    pub async fn generate(
        &self,
        file_path: &str,
        function: Option<&str>,
        framework: Option<&str>,
    ) -> Result<GenerateOutcome> {
        let relative = file_path.replace('\\', "/");
        let absolute = self.project_root.join(&relative);
        let source = std::fs::read_to_string(&absolute)
            .map_err(|e| TestMindError::io(format!("failed to read {relative}"), e))?;
        let parsed = self.analyzer.analyze_source(Path::new(&relative), &source)?;

        let function_name = match function {
            Some(name) => name.to_string(),
            None => default_target(&parsed).ok_or_else(|| {
                TestMindError::analysis_at("file declares no exported functions", &relative)
            })?,
        };

        // Project-wide parses feed the dependency graph.
        let project_parses = self.parse_project().await?;
        let graph = DependencyGraph::build(&project_parses);

        let existing_tests = self.existing_tests_for(&relative);
        let mut builder = ContextBuilder::new(&self.config.language)?;
        let context = builder.build(&parsed, &function_name, &graph, existing_tests, None)?;

        // Retrieval: hybrid search seeded from the signature.
        let auto = self.retrieve_for(&context.signature.name, &relative).await?;

        // Fusion under the context budget, bounded by the model window.
        let budget = self.budget.budget_for(&self.config.llm_model);
        let max_tokens = self
            .config
            .context
            .max_tokens
            .min(budget.available_input_tokens);
        let pinned = self
            .explicit
            .get_pinned_chunks()
            .into_iter()
            .filter(|pin| self.explicit.is_in_focus(&pin.chunk.file_path))
            .collect();
        let fusion = fuse(
            pinned,
            auto,
            &FusionOptions {
                max_tokens,
                explicit_context_reserve: self.config.context.explicit_context_reserve,
                allow_partial_auto: self.config.context.allow_partial_auto,
            },
        );
        debug!(
            chunks = fusion.chunks.len(),
            total_tokens = fusion.total_tokens,
            truncated = fusion.truncated,
            "context fused"
        );

        let mut chunks = fusion.chunks;
        let optimizer = PromptOptimizer::new(self.config.generation.optimizer_aggressiveness);
        let report = optimizer.optimize_chunks(&mut chunks, max_tokens);
        if report.saved_tokens > 0 {
            debug!(
                saved = report.saved_tokens,
                percent = format!("{:.1}", report.saved_percent),
                "context optimized"
            );
        }

        let request = GenerationRequest {
            context,
            framework: framework
                .map(str::to_string)
                .unwrap_or_else(|| self.config.test_framework.clone()),
            chunks,
        };
        let suite = self.generator.generate(&request).await?;

        {
            let mut metadata = self.metadata.lock();
            metadata.record_suite(suite.clone());
            metadata.save()?;
        }

        let diff = self.reviewer.generate_diff(&suite)?;
        Ok(GenerateOutcome { suite, diff })
    }

    /// Generate suites for several functions of one file in a batch.
    pub async fn generate_batch(
        &self,
        file_path: &str,
        functions: &[String],
        framework: Option<&str>,
    ) -> Result<Vec<Result<TestSuite>>> {
        let relative = file_path.replace('\\', "/");
        let absolute = self.project_root.join(&relative);
        let source = std::fs::read_to_string(&absolute)
            .map_err(|e| TestMindError::io(format!("failed to read {relative}"), e))?;
        let parsed = self.analyzer.analyze_source(Path::new(&relative), &source)?;

        let project_parses = self.parse_project().await?;
        let graph = DependencyGraph::build(&project_parses);
        let existing_tests = self.existing_tests_for(&relative);
        let mut builder = ContextBuilder::new(&self.config.language)?;

        let framework = framework
            .map(str::to_string)
            .unwrap_or_else(|| self.config.test_framework.clone());
        let mut requests = Vec::with_capacity(functions.len());
        for name in functions {
            let context =
                builder.build(&parsed, name, &graph, existing_tests.clone(), None)?;
            let chunks = self
                .retrieve_for(&context.signature.name, &relative)
                .await?
                .into_iter()
                .map(|scored| scored.chunk)
                .collect();
            requests.push(GenerationRequest {
                context,
                framework: framework.clone(),
                chunks,
            });
        }

        let results = self
            .generator
            .generate_batch(
                requests,
                &BatchOptions {
                    concurrency: self.config.generation.concurrency,
                    group_similar: true,
                },
            )
            .await;

        {
            let mut metadata = self.metadata.lock();
            for suite in results.iter().flatten() {
                metadata.record_suite(suite.clone());
            }
            metadata.save()?;
        }
        Ok(results)
    }

    /// Render the diff a suite would apply.
    pub fn diff_for(&self, suite: &TestSuite) -> Result<DiffResult> {
        self.reviewer.generate_diff(suite)
    }

    /// Colorize a diff for terminal display.
    pub fn format_diff(&self, diff: &DiffResult) -> String {
        self.reviewer.format_for_cli(&diff.diff)
    }

    /// Apply a suite to the target filesystem.
    pub fn apply(&self, suite: &TestSuite) -> Result<PathBuf> {
        self.reviewer.apply_test(suite)
    }

    /// Heal a batch of failures and render the markdown report.
    pub async fn heal(
        &self,
        failures: &[(TestFailure, Option<PageSnapshot>)],
    ) -> Result<(HealingReport, String)> {
        let report = self.healer.heal_batch(failures).await?;
        let markdown = crate::io::reports::render_healing_report(&report)?;
        Ok((report, markdown))
    }

    /// Compact the vector store. Idempotent.
    pub async fn optimize(&self) -> Result<()> {
        self.store.optimize().await
    }

    /// Aggregated statistics.
    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            vectors: self.store.get_stats().await,
            usage: self.llm.usage(),
            cache: self.cache.stats(),
            indexed_files: self.metadata.lock().indexed_count(),
        }
    }

    async fn retrieve_for(
        &self,
        function_name: &str,
        source_file: &str,
    ) -> Result<Vec<ScoredChunk>> {
        let all_chunks = self.store.all_chunks().await;
        if all_chunks.is_empty() {
            return Ok(Vec::new());
        }

        let lexical = LexicalIndex::build(all_chunks);
        let search = HybridSearch::new(&self.store, &lexical, &self.embeddings);
        let hits = search
            .search(
                function_name,
                &HybridSearchOptions {
                    alpha: self.config.retrieval.vector_weight,
                    limit: self.config.retrieval.top_k,
                    filter: Some(SearchFilter::default()),
                    ..Default::default()
                },
            )
            .await?;

        Ok(hits
            .into_iter()
            // The subject file itself is already in the prompt.
            .filter(|hit| hit.chunk.file_path != source_file)
            .map(|hit| ScoredChunk {
                score: hit.score,
                chunk: hit.chunk,
            })
            .collect())
    }

    async fn parse_project(&self) -> Result<Vec<Arc<ParsedFile>>> {
        let mut parses = Vec::new();
        for path in self.discover_files()? {
            let relative = self.relative_path(&path);
            let source = match std::fs::read_to_string(&path) {
                Ok(source) => source,
                Err(_) => continue,
            };
            match self.analyzer.analyze_source(Path::new(&relative), &source) {
                Ok(parsed) => parses.push(parsed),
                Err(err) => warn!(file = %relative, error = %err, "parse skipped"),
            }
        }
        Ok(parses)
    }

    fn existing_tests_for(&self, relative: &str) -> Vec<String> {
        let candidates = [
            crate::core::config::TestLocationStrategy::Colocated.test_file_path(relative),
            crate::core::config::TestLocationStrategy::Separate.test_file_path(relative),
            crate::core::config::TestLocationStrategy::Nested.test_file_path(relative),
        ];
        candidates
            .into_iter()
            .filter(|candidate| self.project_root.join(candidate).exists())
            .collect()
    }

    fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.project_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// First exported top-level function in a file.
fn default_target(parsed: &ParsedFile) -> Option<String> {
    parsed
        .functions
        .iter()
        .find(|f| f.is_exported && f.parent.is_none())
        .or_else(|| parsed.functions.iter().find(|f| f.parent.is_none()))
        .map(|f| f.signature.name.clone())
}

/// Pick the embedding backend: HTTP with credentials, the local model
/// otherwise, and the deterministic hash embedder as the offline fallback.
fn resolve_embedding_provider(
    credentials: &Credentials,
    config: &TestMindConfig,
) -> Box<dyn EmbeddingProvider> {
    if let Some(key) = credentials.for_provider(crate::core::config::ProviderKind::OpenaiCompatible)
    {
        let base = config
            .generation
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        return Box::new(HttpEmbeddingProvider::new(
            base,
            Some(key.to_string()),
            "text-embedding-3-small",
            config.retrieval.dimension,
        ));
    }

    match LocalEmbeddingProvider::new() {
        Ok(provider) => Box::new(provider),
        Err(err) => {
            warn!(error = %err, "local embedding model unavailable, using hash embedder");
            Box::new(HashEmbeddingProvider::new(config.retrieval.dimension))
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<globset::GlobSet> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern).map_err(|e| {
            TestMindError::config_field(format!("invalid glob '{pattern}': {e}"), "patterns")
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| TestMindError::config(format!("glob set failed to build: {e}")))
}
