//! Context fusion: merge pinned and retrieved chunks under a token budget.
//!
//! The fusion algorithm:
//!
//! 1. dedupe by `(file_path, start_line, end_line)` — the pinned copy wins
//! 2. partition the budget: `explicit = ⌊max·reserve⌋`, `auto = max − explicit`
//! 3. admit pinned chunks in priority order up to the explicit budget;
//!    unused explicit budget spills to the auto side
//! 4. admit auto chunks in score order up to the auto budget
//! 5. report budgets actually used, the truncation flag, and dedup counts
//!
//! Explicit context is never crowded out by auto: the explicit reserve is
//! spent before any auto chunk is considered, and pinned chunks always
//! precede auto chunks in the output.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::core::chunks::{estimate_tokens, CodeChunk};
use crate::context::explicit::PinnedChunk;

/// A retrieval result offered to fusion.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The retrieved chunk
    pub chunk: CodeChunk,
    /// Retrieval score in [0, 1]
    pub score: f64,
}

/// Fusion parameters.
#[derive(Debug, Clone)]
pub struct FusionOptions {
    /// Total token budget for the fused context
    pub max_tokens: usize,
    /// Fraction of the budget reserved for pinned chunks
    pub explicit_context_reserve: f64,
    /// When false, the auto arm stops at the first chunk that would
    /// overflow instead of trying smaller later ones
    pub allow_partial_auto: bool,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 8_000,
            explicit_context_reserve: 0.4,
            allow_partial_auto: true,
        }
    }
}

/// Deduplication counters reported by fusion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DeduplicationStats {
    /// Auto chunks that collided with a pinned span
    pub duplicates_found: usize,
    /// Collisions removed from the auto arm
    pub duplicates_removed: usize,
}

/// Output of context fusion.
#[derive(Debug, Clone)]
pub struct FusionResult {
    /// Fused chunks: pinned first (priority order), then auto (score order)
    pub chunks: Vec<CodeChunk>,
    /// Tokens spent on pinned chunks
    pub explicit_tokens: usize,
    /// Tokens spent on auto chunks
    pub auto_tokens: usize,
    /// Total tokens admitted; never exceeds the budget
    pub total_tokens: usize,
    /// Whether anything was excluded for budget reasons
    pub truncated: bool,
    /// Dedup counters
    pub deduplication: DeduplicationStats,
}

/// Fuse pinned and auto-retrieved chunks under a budget.
pub fn fuse(
    pinned: Vec<PinnedChunk>,
    auto: Vec<ScoredChunk>,
    options: &FusionOptions,
) -> FusionResult {
    let mut pinned = pinned;
    pinned.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.added_at.cmp(&b.added_at))
            .then_with(|| a.sequence.cmp(&b.sequence))
    });

    let mut auto = auto;
    auto.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });

    // Step 1: dedupe by span; the pinned copy wins.
    let pinned_spans: AHashSet<(String, usize, usize)> =
        pinned.iter().map(|p| p.chunk.span_key()).collect();
    let mut dedup = DeduplicationStats::default();
    let mut seen_auto_spans: AHashSet<(String, usize, usize)> = AHashSet::new();
    auto.retain(|scored| {
        let span = scored.chunk.span_key();
        if pinned_spans.contains(&span) || !seen_auto_spans.insert(span) {
            dedup.duplicates_found += 1;
            dedup.duplicates_removed += 1;
            false
        } else {
            true
        }
    });

    // Step 2: budget partition.
    let explicit_budget =
        (options.max_tokens as f64 * options.explicit_context_reserve).floor() as usize;

    // Step 3: pinned chunks in priority order.
    let mut chunks = Vec::new();
    let mut explicit_tokens = 0usize;
    let mut truncated = false;
    for pin in pinned {
        let cost = estimate_tokens(&pin.chunk.content);
        if explicit_tokens + cost > explicit_budget {
            truncated = true;
            continue;
        }
        explicit_tokens += cost;
        chunks.push(pin.chunk);
    }

    // Unused explicit budget spills to the auto side.
    let auto_budget = options.max_tokens - explicit_tokens;

    // Step 4: auto chunks in score order.
    let mut auto_tokens = 0usize;
    for scored in auto {
        let cost = estimate_tokens(&scored.chunk.content);
        if auto_tokens + cost > auto_budget {
            truncated = true;
            if options.allow_partial_auto {
                continue;
            }
            break;
        }
        auto_tokens += cost;
        chunks.push(scored.chunk);
    }

    FusionResult {
        total_tokens: explicit_tokens + auto_tokens,
        explicit_tokens,
        auto_tokens,
        truncated,
        deduplication: dedup,
        chunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunks::ChunkKind;
    use chrono::Utc;

    fn chunk_of_tokens(path: &str, line: usize, tokens: usize) -> CodeChunk {
        CodeChunk::new(path, "x".repeat(tokens * 4), line, line + 1, ChunkKind::Function)
    }

    fn pin(chunk: CodeChunk, priority: u8, sequence: u64) -> PinnedChunk {
        PinnedChunk {
            chunk,
            added_at: Utc::now(),
            reason: "test".to_string(),
            priority,
            sequence,
        }
    }

    #[test]
    fn test_spill_and_partial_auto() {
        // One pinned chunk of 300 tokens (priority 10); two auto chunks of
        // 400 and 300 tokens (scores 0.9, 0.85); budget 700 at reserve 0.6.
        let pinned = vec![pin(chunk_of_tokens("src/p.ts", 1, 300), 10, 0)];
        let auto = vec![
            ScoredChunk {
                chunk: chunk_of_tokens("src/a.ts", 1, 400),
                score: 0.9,
            },
            ScoredChunk {
                chunk: chunk_of_tokens("src/b.ts", 1, 300),
                score: 0.85,
            },
        ];
        let options = FusionOptions {
            max_tokens: 700,
            explicit_context_reserve: 0.6,
            allow_partial_auto: true,
        };

        let result = fuse(pinned, auto, &options);

        assert_eq!(result.explicit_tokens, 300);
        assert_eq!(result.auto_tokens, 400);
        assert_eq!(result.total_tokens, 700);
        assert!(result.truncated);
        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.chunks[0].file_path, "src/p.ts");
        assert_eq!(result.chunks[1].file_path, "src/a.ts");
    }

    #[test]
    fn test_budget_respected() {
        let pinned = vec![
            pin(chunk_of_tokens("src/p1.ts", 1, 200), 8, 0),
            pin(chunk_of_tokens("src/p2.ts", 1, 200), 7, 1),
        ];
        let auto = (0..20)
            .map(|i| ScoredChunk {
                chunk: chunk_of_tokens(&format!("src/a{i}.ts"), 1, 90),
                score: 1.0 - f64::from(i) / 100.0,
            })
            .collect();
        let options = FusionOptions {
            max_tokens: 600,
            explicit_context_reserve: 0.5,
            allow_partial_auto: true,
        };

        let result = fuse(pinned, auto, &options);
        assert!(result.total_tokens <= 600);
        assert_eq!(
            result.total_tokens,
            result.explicit_tokens + result.auto_tokens
        );
    }

    #[test]
    fn test_pinned_copy_wins_dedup() {
        let shared = chunk_of_tokens("src/shared.ts", 10, 50);
        let pinned = vec![pin(shared.clone(), 9, 0)];
        let auto = vec![ScoredChunk {
            chunk: shared,
            score: 0.99,
        }];

        let result = fuse(pinned, auto, &FusionOptions::default());

        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.deduplication.duplicates_found, 1);
        assert_eq!(result.deduplication.duplicates_removed, 1);
        assert_eq!(result.auto_tokens, 0);
    }

    #[test]
    fn test_strict_auto_stops_at_first_overflow() {
        let auto = vec![
            ScoredChunk {
                chunk: chunk_of_tokens("src/a.ts", 1, 500),
                score: 0.9,
            },
            ScoredChunk {
                chunk: chunk_of_tokens("src/b.ts", 1, 10),
                score: 0.8,
            },
        ];
        let options = FusionOptions {
            max_tokens: 100,
            explicit_context_reserve: 0.0,
            allow_partial_auto: false,
        };

        let result = fuse(vec![], auto.clone(), &options);
        assert!(result.chunks.is_empty());
        assert!(result.truncated);

        // Partial mode skips the oversized chunk and admits the small one.
        let options = FusionOptions {
            allow_partial_auto: true,
            ..options
        };
        let result = fuse(vec![], auto, &options);
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].file_path, "src/b.ts");
    }

    #[test]
    fn test_deterministic_ordering() {
        let make_inputs = || {
            let pinned = vec![
                pin(chunk_of_tokens("src/p1.ts", 1, 10), 5, 1),
                pin(chunk_of_tokens("src/p2.ts", 1, 10), 5, 0),
                pin(chunk_of_tokens("src/p3.ts", 1, 10), 9, 2),
            ];
            let auto = vec![
                ScoredChunk {
                    chunk: chunk_of_tokens("src/b.ts", 1, 10),
                    score: 0.5,
                },
                ScoredChunk {
                    chunk: chunk_of_tokens("src/a.ts", 1, 10),
                    score: 0.5,
                },
            ];
            (pinned, auto)
        };

        let (p1, a1) = make_inputs();
        let (p2, a2) = make_inputs();
        let r1 = fuse(p1, a1, &FusionOptions::default());
        let r2 = fuse(p2, a2, &FusionOptions::default());

        let order1: Vec<&str> = r1.chunks.iter().map(|c| c.file_path.as_str()).collect();
        let order2: Vec<&str> = r2.chunks.iter().map(|c| c.file_path.as_str()).collect();
        assert_eq!(order1, order2);
        // priority 9 first, then equal priorities by insertion sequence,
        // then equal scores by path
        assert_eq!(
            order1,
            vec!["src/p3.ts", "src/p2.ts", "src/p1.ts", "src/a.ts", "src/b.ts"]
        );
    }

    #[test]
    fn test_explicit_never_crowded_out() {
        // Auto offers far more content than pinned, but the pinned chunk
        // fits its reserve and must be admitted.
        let pinned = vec![pin(chunk_of_tokens("src/p.ts", 1, 100), 5, 0)];
        let auto = (0..50)
            .map(|i| ScoredChunk {
                chunk: chunk_of_tokens(&format!("src/a{i}.ts"), 1, 100),
                score: 1.0,
            })
            .collect();
        let options = FusionOptions {
            max_tokens: 1_000,
            explicit_context_reserve: 0.1,
            allow_partial_auto: true,
        };

        let result = fuse(pinned, auto, &options);
        assert_eq!(result.explicit_tokens, 100);
        assert_eq!(result.chunks[0].file_path, "src/p.ts");
    }
}
