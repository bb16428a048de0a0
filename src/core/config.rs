//! Configuration types and management for testmind.
//!
//! Per-project configuration is loaded from `.testmind.yml` at the target
//! repository root, with environment variables carrying provider
//! credentials and optional overrides. Every section has serde defaults so
//! a partial file is valid, and `validate()` reports field-level errors
//! before any pipeline work starts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TestMindError};

/// Where generated test files are placed relative to their source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestLocationStrategy {
    /// `lib/x.ts -> lib/x.test.ts`
    Colocated,
    /// `lib/x.ts -> __tests__/lib/x.test.ts`
    Separate,
    /// `lib/x.ts -> lib/__tests__/x.test.ts`
    Nested,
}

impl TestLocationStrategy {
    /// Derive the test file path for a source file.
    ///
    /// Paths are forward-slash normalized; the extension is preserved so a
    /// `.tsx` source yields a `.test.tsx` file.
    pub fn test_file_path(self, source_path: &str) -> String {
        let source_path = source_path.replace('\\', "/");
        let (dir, file) = match source_path.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => ("", source_path.as_str()),
        };
        let (stem, ext) = match file.rsplit_once('.') {
            Some((stem, ext)) => (stem, ext),
            None => (file, "ts"),
        };
        let test_file = format!("{stem}.test.{ext}");

        match self {
            TestLocationStrategy::Colocated if dir.is_empty() => test_file,
            TestLocationStrategy::Colocated => format!("{dir}/{test_file}"),
            TestLocationStrategy::Separate if dir.is_empty() => {
                format!("__tests__/{test_file}")
            }
            TestLocationStrategy::Separate => format!("__tests__/{dir}/{test_file}"),
            TestLocationStrategy::Nested if dir.is_empty() => {
                format!("__tests__/{test_file}")
            }
            TestLocationStrategy::Nested => format!("{dir}/__tests__/{test_file}"),
        }
    }
}

/// LLM provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Any endpoint speaking the OpenAI chat-completions protocol
    OpenaiCompatible,
    /// The Anthropic messages endpoint
    Anthropic,
    /// A local inference server with an OpenAI-compatible surface
    LocalHttp,
}

impl ProviderKind {
    /// Canonical kebab-case key.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenaiCompatible => "openai-compatible",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::LocalHttp => "local-http",
        }
    }

    /// Environment variable carrying this provider's credential.
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenaiCompatible => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::LocalHttp => None,
        }
    }
}

/// Main per-project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestMindConfig {
    /// Source language of the target project
    #[serde(default = "TestMindConfig::default_language")]
    pub language: String,

    /// Test framework generated tests target
    #[serde(default = "TestMindConfig::default_test_framework")]
    pub test_framework: String,

    /// Glob patterns for files to index
    #[serde(default = "TestMindConfig::default_include_patterns")]
    pub include_patterns: Vec<String>,

    /// Glob patterns excluded from indexing
    #[serde(default = "TestMindConfig::default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Directory for generated tests under the Separate strategy
    #[serde(default = "TestMindConfig::default_test_directory")]
    pub test_directory: String,

    /// Coverage ratio below which a function is flagged for generation
    #[serde(default = "TestMindConfig::default_coverage_threshold")]
    pub coverage_threshold: f64,

    /// Maximum file size in bytes considered for indexing
    #[serde(default = "TestMindConfig::default_max_file_size")]
    pub max_file_size: u64,

    /// LLM provider
    #[serde(default = "TestMindConfig::default_llm_provider")]
    pub llm_provider: ProviderKind,

    /// LLM model identifier
    #[serde(default = "TestMindConfig::default_llm_model")]
    pub llm_model: String,

    /// Test file placement strategy
    #[serde(default = "TestMindConfig::default_test_location_strategy")]
    pub test_location_strategy: TestLocationStrategy,

    /// Context assembly settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Generation pipeline settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Embedding and retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Self-healing settings
    #[serde(default)]
    pub healing: HealingConfig,
}

impl Default for TestMindConfig {
    fn default() -> Self {
        Self {
            language: Self::default_language(),
            test_framework: Self::default_test_framework(),
            include_patterns: Self::default_include_patterns(),
            exclude_patterns: Self::default_exclude_patterns(),
            test_directory: Self::default_test_directory(),
            coverage_threshold: Self::default_coverage_threshold(),
            max_file_size: Self::default_max_file_size(),
            llm_provider: Self::default_llm_provider(),
            llm_model: Self::default_llm_model(),
            test_location_strategy: Self::default_test_location_strategy(),
            context: ContextConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            healing: HealingConfig::default(),
        }
    }
}

/// Default value providers for [`TestMindConfig`].
impl TestMindConfig {
    fn default_language() -> String {
        "typescript".to_string()
    }

    fn default_test_framework() -> String {
        "jest".to_string()
    }

    fn default_include_patterns() -> Vec<String> {
        vec!["**/*.ts".to_string(), "**/*.tsx".to_string()]
    }

    fn default_exclude_patterns() -> Vec<String> {
        vec![
            "**/node_modules/**".to_string(),
            "**/dist/**".to_string(),
            "**/*.test.*".to_string(),
            "**/*.spec.*".to_string(),
        ]
    }

    fn default_test_directory() -> String {
        "__tests__".to_string()
    }

    const fn default_coverage_threshold() -> f64 {
        0.8
    }

    const fn default_max_file_size() -> u64 {
        512 * 1024
    }

    const fn default_llm_provider() -> ProviderKind {
        ProviderKind::OpenaiCompatible
    }

    fn default_llm_model() -> String {
        "gpt-4o-mini".to_string()
    }

    const fn default_test_location_strategy() -> TestLocationStrategy {
        TestLocationStrategy::Colocated
    }
}

impl TestMindConfig {
    /// Config file name looked up at the target repository root.
    pub const FILE_NAME: &'static str = ".testmind.yml";

    /// Directory under the target root holding testmind state.
    pub const STATE_DIR: &'static str = ".testmind";

    /// Load configuration for a project root.
    ///
    /// A missing config file yields defaults; a malformed one is an error.
    /// Environment overrides are applied after the file is read.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(Self::FILE_NAME);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                TestMindError::io(format!("failed to read {}", path.display()), e)
            })?;
            serde_yaml::from_str(&raw)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `TESTMIND_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("TESTMIND_MODEL") {
            if !model.is_empty() {
                self.llm_model = model;
            }
        }
        if let Ok(max_tokens) = std::env::var("TESTMIND_MAX_TOKENS") {
            if let Ok(value) = max_tokens.parse::<usize>() {
                self.generation.max_completion_tokens = value;
            }
        }
        if let Ok(base) = std::env::var("TESTMIND_API_BASE") {
            if !base.is_empty() {
                self.generation.api_base = Some(base);
            }
        }
    }

    /// Validate field ranges and cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.language.as_str(), "typescript" | "javascript") {
            return Err(TestMindError::config_field(
                format!("unsupported language '{}'", self.language),
                "language",
            ));
        }
        if !(0.0..=1.0).contains(&self.coverage_threshold) {
            return Err(TestMindError::config_field(
                "coverage_threshold must be within [0, 1]",
                "coverage_threshold",
            ));
        }
        if self.max_file_size == 0 {
            return Err(TestMindError::config_field(
                "max_file_size must be positive",
                "max_file_size",
            ));
        }
        self.context.validate()?;
        self.generation.validate()?;
        self.retrieval.validate()?;
        self.healing.validate()?;
        Ok(())
    }

    /// Path to the state directory under a project root.
    pub fn state_dir(project_root: &Path) -> PathBuf {
        project_root.join(Self::STATE_DIR)
    }

    /// Path to the vector store directory under a project root.
    pub fn vector_dir(project_root: &Path) -> PathBuf {
        Self::state_dir(project_root).join("vectors")
    }

    /// Path to the metadata store under a project root.
    pub fn metadata_path(project_root: &Path) -> PathBuf {
        Self::state_dir(project_root).join("metadata.json")
    }

    /// Serialize the default configuration to YAML for `init`.
    pub fn default_yaml() -> String {
        serde_yaml::to_string(&Self::default()).unwrap_or_default()
    }
}

/// Context assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum tokens for the fused context window
    #[serde(default = "ContextConfig::default_max_tokens")]
    pub max_tokens: usize,

    /// Fraction of the budget reserved for pinned context
    #[serde(default = "ContextConfig::default_explicit_reserve")]
    pub explicit_context_reserve: f64,

    /// Whether auto chunks past the first overflow may still be admitted
    #[serde(default = "ContextConfig::default_allow_partial_auto")]
    pub allow_partial_auto: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: Self::default_max_tokens(),
            explicit_context_reserve: Self::default_explicit_reserve(),
            allow_partial_auto: Self::default_allow_partial_auto(),
        }
    }
}

impl ContextConfig {
    const fn default_max_tokens() -> usize {
        8_000
    }

    const fn default_explicit_reserve() -> f64 {
        0.4
    }

    const fn default_allow_partial_auto() -> bool {
        true
    }

    fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(TestMindError::config_field(
                "context.max_tokens must be positive",
                "context.max_tokens",
            ));
        }
        if !(0.0..=1.0).contains(&self.explicit_context_reserve) {
            return Err(TestMindError::config_field(
                "context.explicit_context_reserve must be within [0, 1]",
                "context.explicit_context_reserve",
            ));
        }
        Ok(())
    }
}

/// Generation pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature
    #[serde(default = "GenerationConfig::default_temperature")]
    pub temperature: f32,

    /// Completion token cap per request
    #[serde(default = "GenerationConfig::default_max_completion_tokens")]
    pub max_completion_tokens: usize,

    /// Per-request timeout in seconds
    #[serde(default = "GenerationConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Batch concurrency (semaphore width)
    #[serde(default = "GenerationConfig::default_concurrency")]
    pub concurrency: usize,

    /// Override for the provider base URL
    #[serde(default)]
    pub api_base: Option<String>,

    /// Prompt optimizer aggressiveness in [0, 1]
    #[serde(default = "GenerationConfig::default_optimizer_aggressiveness")]
    pub optimizer_aggressiveness: f64,

    /// Semantic cache similarity threshold
    #[serde(default = "GenerationConfig::default_cache_similarity_threshold")]
    pub cache_similarity_threshold: f64,

    /// Prefer cheaper models when several qualify
    #[serde(default)]
    pub prioritize_cost: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: Self::default_temperature(),
            max_completion_tokens: Self::default_max_completion_tokens(),
            request_timeout_secs: Self::default_request_timeout_secs(),
            concurrency: Self::default_concurrency(),
            api_base: None,
            optimizer_aggressiveness: Self::default_optimizer_aggressiveness(),
            cache_similarity_threshold: Self::default_cache_similarity_threshold(),
            prioritize_cost: false,
        }
    }
}

impl GenerationConfig {
    const fn default_temperature() -> f32 {
        0.2
    }

    const fn default_max_completion_tokens() -> usize {
        4_096
    }

    const fn default_request_timeout_secs() -> u64 {
        120
    }

    const fn default_concurrency() -> usize {
        4
    }

    const fn default_optimizer_aggressiveness() -> f64 {
        0.5
    }

    const fn default_cache_similarity_threshold() -> f64 {
        0.85
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(TestMindError::config_field(
                "generation.concurrency must be positive",
                "generation.concurrency",
            ));
        }
        if !(0.0..=1.0).contains(&self.optimizer_aggressiveness) {
            return Err(TestMindError::config_field(
                "generation.optimizer_aggressiveness must be within [0, 1]",
                "generation.optimizer_aggressiveness",
            ));
        }
        if !(0.0..=1.0).contains(&self.cache_similarity_threshold) {
            return Err(TestMindError::config_field(
                "generation.cache_similarity_threshold must be within [0, 1]",
                "generation.cache_similarity_threshold",
            ));
        }
        Ok(())
    }
}

/// Embedding and retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Embedding batch size
    #[serde(default = "RetrievalConfig::default_batch_size")]
    pub batch_size: usize,

    /// Embedding vector dimension
    #[serde(default = "RetrievalConfig::default_dimension")]
    pub dimension: usize,

    /// Weight of the vector score in hybrid search
    #[serde(default = "RetrievalConfig::default_vector_weight")]
    pub vector_weight: f64,

    /// Results requested from each arm of hybrid search
    #[serde(default = "RetrievalConfig::default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::default_batch_size(),
            dimension: Self::default_dimension(),
            vector_weight: Self::default_vector_weight(),
            top_k: Self::default_top_k(),
        }
    }
}

impl RetrievalConfig {
    const fn default_batch_size() -> usize {
        16
    }

    const fn default_dimension() -> usize {
        768
    }

    const fn default_vector_weight() -> f64 {
        0.7
    }

    const fn default_top_k() -> usize {
        10
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TestMindError::config_field(
                "retrieval.batch_size must be positive",
                "retrieval.batch_size",
            ));
        }
        if self.dimension == 0 {
            return Err(TestMindError::config_field(
                "retrieval.dimension must be positive",
                "retrieval.dimension",
            ));
        }
        if !(0.0..=1.0).contains(&self.vector_weight) {
            return Err(TestMindError::config_field(
                "retrieval.vector_weight must be within [0, 1]",
                "retrieval.vector_weight",
            ));
        }
        Ok(())
    }
}

/// Self-healing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Whether fragility failures may be auto-fixed
    #[serde(default = "HealingConfig::default_auto_fix")]
    pub auto_fix: bool,

    /// Minimum locator confidence accepted as a repair
    #[serde(default = "HealingConfig::default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            auto_fix: Self::default_auto_fix(),
            confidence_threshold: Self::default_confidence_threshold(),
        }
    }
}

impl HealingConfig {
    const fn default_auto_fix() -> bool {
        true
    }

    const fn default_confidence_threshold() -> f64 {
        0.85
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(TestMindError::config_field(
                "healing.confidence_threshold must be within [0, 1]",
                "healing.confidence_threshold",
            ));
        }
        Ok(())
    }
}

/// Provider credentials resolved from the environment.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    keys: HashMap<ProviderKind, String>,
}

impl Credentials {
    /// Read all known provider credentials from the environment.
    pub fn from_env() -> Self {
        let mut keys = HashMap::new();
        for provider in [ProviderKind::OpenaiCompatible, ProviderKind::Anthropic] {
            if let Some(var) = provider.api_key_var() {
                if let Ok(value) = std::env::var(var) {
                    if !value.is_empty() {
                        keys.insert(provider, value);
                    }
                }
            }
        }
        Self { keys }
    }

    /// Look up the credential for a provider.
    pub fn for_provider(&self, provider: ProviderKind) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }

    /// Insert a credential, for tests and programmatic setup.
    pub fn insert(&mut self, provider: ProviderKind, key: impl Into<String>) {
        self.keys.insert(provider, key.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        TestMindConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: TestMindConfig =
            serde_yaml::from_str("test_framework: vitest\nlanguage: javascript\n").unwrap();
        assert_eq!(config.test_framework, "vitest");
        assert_eq!(config.language, "javascript");
        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.context.max_tokens, 8_000);
    }

    #[test]
    fn test_invalid_reserve_rejected() {
        let mut config = TestMindConfig::default();
        config.context.explicit_context_reserve = 1.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_unknown_language_rejected() {
        let mut config = TestMindConfig::default();
        config.language = "cobol".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_location_strategies() {
        let colocated = TestLocationStrategy::Colocated;
        let separate = TestLocationStrategy::Separate;
        let nested = TestLocationStrategy::Nested;

        assert_eq!(colocated.test_file_path("lib/x.ts"), "lib/x.test.ts");
        assert_eq!(separate.test_file_path("lib/x.ts"), "__tests__/lib/x.test.ts");
        assert_eq!(nested.test_file_path("lib/x.ts"), "lib/__tests__/x.test.ts");
        assert_eq!(colocated.test_file_path("x.tsx"), "x.test.tsx");
        assert_eq!(colocated.test_file_path("src\\ui\\modal.tsx"), "src/ui/modal.test.tsx");
    }
}
