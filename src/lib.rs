//! # TestMind: AI-Assisted Test Generation & Self-Healing
//!
//! A Rust engine that generates, reviews, and repairs unit tests for
//! JavaScript/TypeScript projects. It provides:
//!
//! - **Context Engine**: tree-sitter AST extraction, dependency and
//!   side-effect inference, complexity scoring, and hybrid
//!   (lexical + vector) retrieval over code chunks
//! - **Context Assembly**: user-pinned context fused with retrieved
//!   context under a strict token budget
//! - **Generation Pipeline**: strategy planning, tiered prompts, model
//!   selection, semantic response cache, validation, Diff-First review
//! - **Self-Healing**: failure classification and multi-strategy element
//!   relocation for drifted test locators
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     API Layer / CLI                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Analysis   │  Retrieval  │  Context   │ Generation │ Heal  │
//! │             │             │            │            │       │
//! │ • AST       │ • Embedding │ • Pinned   │ • Strategy │ • Cls │
//! │ • Deps      │ • Vectors   │ • Fusion   │ • Prompt   │ • Loc │
//! │ • Effects   │ • Hybrid    │ • Budget   │ • LLM      │ • Fix │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use testmind::{TestMindConfig, TestMindEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TestMindConfig::default();
//!     let engine = TestMindEngine::new("./my-project", config).await?;
//!
//!     engine.index().await?;
//!     let outcome = engine.generate("src/math.ts", Some("add"), None).await?;
//!     println!("{}", outcome.diff.diff);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Additional allows for tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

// Memory allocator selection
#[cfg(feature = "mimalloc")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

// Core data model and shared services
pub mod core {
    //! Core data model, configuration, errors, and token accounting.

    pub mod chunks;
    pub mod config;
    pub mod errors;
    pub mod tokens;
}

// Language-specific AST adapters
pub mod lang {
    //! Language-specific parsing and AST processing.

    pub mod common;
    pub(crate) mod extract;
    pub mod javascript;
    pub mod registry;
    pub mod typescript;

    pub use common::{FunctionInfo, LanguageAdapter, ParsedFile};
    pub use registry::{adapter_for_file, adapter_for_language, language_key_for_path};
}

// Static analysis
pub mod analysis {
    //! AST analysis, complexity, side effects, and dependency graphs.

    pub mod ast;
    pub mod complexity;
    pub mod context;
    pub mod dependency;
    pub mod side_effects;
}

// Embeddings, vector store, and hybrid search
pub mod retrieval {
    //! Embedding generation and hybrid retrieval over code chunks.

    pub mod embedding;
    pub mod hybrid;
    pub mod vector_store;
}

// Context assembly
pub mod context {
    //! Explicit (pinned) context and budget-bounded fusion.

    pub mod explicit;
    pub mod fusion;
}

// Generation pipeline
pub mod generation {
    //! Strategy planning, prompts, model selection, caching, LLM access,
    //! generation orchestration, and validation.

    pub mod cache;
    pub mod generator;
    pub mod llm;
    pub mod model_selector;
    pub mod optimizer;
    pub mod prompt;
    pub mod strategy;
    pub mod validator;
}

// Diff-First review
pub mod review {
    //! Diff rendering and filesystem application.

    pub mod diff;
}

// Self-healing
pub mod healing {
    //! Failure classification, locator strategies, and healing.

    pub mod classifier;
    pub mod engine;
    pub mod locators;
    pub mod page;
}

// I/O and persistence
pub mod io {
    //! Metadata persistence and report rendering.

    pub mod metadata;
    pub mod reports;
}

// Public API and engine interface
pub mod api {
    //! High-level engine interface.

    pub mod engine;
    pub mod results;
}

// Re-export primary types for convenience
pub use api::engine::TestMindEngine;
pub use api::results::{EngineStats, GenerateOutcome, IndexSummary};
pub use crate::core::config::TestMindConfig;
pub use crate::core::errors::{Result, TestMindError};
