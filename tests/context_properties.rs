//! Property tests for the context-assembly invariants.

use proptest::prelude::*;

use testmind::context::explicit::{ExplicitContextManager, PinOptions, PinnedChunk};
use testmind::context::fusion::{fuse, FusionOptions, ScoredChunk};
use testmind::core::chunks::{ChunkKind, CodeChunk};
use testmind::core::tokens::TokenBudgetManager;

fn chunk_of_tokens(path: &str, line: usize, tokens: usize) -> CodeChunk {
    CodeChunk::new(path, "x".repeat(tokens * 4), line, line + 1, ChunkKind::Function)
}

fn pinned(path: &str, line: usize, tokens: usize, priority: u8, sequence: u64) -> PinnedChunk {
    PinnedChunk {
        chunk: chunk_of_tokens(path, line, tokens),
        added_at: chrono::Utc::now(),
        reason: "prop".to_string(),
        priority,
        sequence,
    }
}

proptest! {
    /// `truncate_to_fit` always returns an in-order prefix of its input
    /// within budget.
    #[test]
    fn truncation_returns_bounded_prefix(
        sizes in prop::collection::vec(1usize..60, 0..40),
        budget in 0usize..2_000,
    ) {
        let manager = TokenBudgetManager::new();
        let chunks: Vec<CodeChunk> = sizes
            .iter()
            .enumerate()
            .map(|(i, tokens)| chunk_of_tokens(&format!("src/f{i}.ts"), 1, *tokens))
            .collect();

        let result = manager.truncate_to_fit(chunks.clone(), budget, "", "");

        // prefix property: element k of the output is element k of the input
        for (kept, original) in result.chunks.iter().zip(chunks.iter()) {
            prop_assert_eq!(&kept.id, &original.id);
        }
        prop_assert_eq!(result.chunks.len() + result.removed_count, chunks.len());
        prop_assert!(result.final_tokens <= budget);
    }

    /// Fusion never exceeds its budget, and pinned chunks always precede
    /// auto chunks in the output.
    #[test]
    fn fusion_respects_budget_and_pinned_precedence(
        pinned_sizes in prop::collection::vec((1usize..40, 1u8..=10), 0..10),
        auto_sizes in prop::collection::vec((1usize..40, 0.0f64..1.0), 0..15),
        max_tokens in 50usize..1_500,
        reserve in 0.0f64..1.0,
        allow_partial in any::<bool>(),
    ) {
        let pins: Vec<PinnedChunk> = pinned_sizes
            .iter()
            .enumerate()
            .map(|(i, (tokens, priority))| {
                pinned(&format!("src/p{i}.ts"), 1, *tokens, *priority, i as u64)
            })
            .collect();
        let auto: Vec<ScoredChunk> = auto_sizes
            .iter()
            .enumerate()
            .map(|(i, (tokens, score))| ScoredChunk {
                chunk: chunk_of_tokens(&format!("src/a{i}.ts"), 1, *tokens),
                score: *score,
            })
            .collect();
        let pinned_paths: Vec<String> =
            pins.iter().map(|p| p.chunk.file_path.clone()).collect();

        let result = fuse(pins, auto, &FusionOptions {
            max_tokens,
            explicit_context_reserve: reserve,
            allow_partial_auto: allow_partial,
        });

        prop_assert!(result.total_tokens <= max_tokens);
        prop_assert_eq!(
            result.total_tokens,
            result.explicit_tokens + result.auto_tokens
        );

        // once an auto chunk appears, no pinned chunk may follow
        let mut seen_auto = false;
        for chunk in &result.chunks {
            let is_pinned = pinned_paths.contains(&chunk.file_path);
            if seen_auto {
                prop_assert!(!is_pinned);
            }
            if !is_pinned {
                seen_auto = true;
            }
        }
    }

    /// Fusion output order is a pure function of its inputs.
    #[test]
    fn fusion_is_deterministic(
        auto_sizes in prop::collection::vec((1usize..30, 0.0f64..1.0), 0..12),
        max_tokens in 50usize..800,
    ) {
        let make_auto = || -> Vec<ScoredChunk> {
            auto_sizes
                .iter()
                .enumerate()
                .map(|(i, (tokens, score))| ScoredChunk {
                    chunk: chunk_of_tokens(&format!("src/a{i}.ts"), 1, *tokens),
                    score: *score,
                })
                .collect()
        };
        let options = FusionOptions {
            max_tokens,
            explicit_context_reserve: 0.3,
            allow_partial_auto: true,
        };

        let first = fuse(vec![], make_auto(), &options);
        let second = fuse(vec![], make_auto(), &options);

        let order = |r: &testmind::context::fusion::FusionResult| -> Vec<String> {
            r.chunks.iter().map(|c| c.id.clone()).collect()
        };
        prop_assert_eq!(order(&first), order(&second));
    }

    /// Pinning a file and removing it restores the prior pin set.
    #[test]
    fn pin_roundtrip(chunk_count in 1usize..8, keep_count in 0usize..4) {
        let manager = ExplicitContextManager::new();
        for i in 0..keep_count {
            manager.add_file(
                &format!("src/keep{i}.ts"),
                vec![chunk_of_tokens(&format!("src/keep{i}.ts"), 1, 5)],
                PinOptions::default(),
            );
        }
        let before: Vec<String> = manager
            .get_pinned_chunks()
            .iter()
            .map(|p| p.chunk.id.clone())
            .collect();

        let chunks: Vec<CodeChunk> = (0..chunk_count)
            .map(|i| chunk_of_tokens("src/transient.ts", i * 10 + 1, 5))
            .collect();
        manager.add_file("src/transient.ts", chunks, PinOptions::default());
        manager.remove_file("src/transient.ts");

        let after: Vec<String> = manager
            .get_pinned_chunks()
            .iter()
            .map(|p| p.chunk.id.clone())
            .collect();
        prop_assert_eq!(before, after);
    }
}
