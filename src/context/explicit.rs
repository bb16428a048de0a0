//! User-pinned context with priority and focus scope.
//!
//! The explicit context manager holds chunks a user pinned for the length
//! of a session. Pinned chunks outrank anything retrieval finds; files
//! default to priority 5 and functions to 7. The focus scope is a
//! whitelist of path prefixes — empty means everything is in focus.
//!
//! State is session-scoped and guarded by a mutex so a manager shared
//! across concurrent generation calls stays consistent.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::chunks::{estimate_tokens, CodeChunk};

/// Default priority for pinned files.
pub const FILE_PRIORITY: u8 = 5;

/// Default priority for pinned functions.
pub const FUNCTION_PRIORITY: u8 = 7;

/// A chunk pinned by user action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnedChunk {
    /// The pinned chunk
    pub chunk: CodeChunk,

    /// When the pin happened
    pub added_at: DateTime<Utc>,

    /// Why the user pinned it
    pub reason: String,

    /// Priority in [1, 10]; higher sorts first
    pub priority: u8,

    /// Insertion sequence, breaking `added_at` ties deterministically
    pub sequence: u64,
}

/// Options for a pin operation.
#[derive(Debug, Clone, Default)]
pub struct PinOptions {
    /// Priority override; defaults depend on the pin kind
    pub priority: Option<u8>,
    /// Reason recorded with the pin
    pub reason: Option<String>,
}

/// Snapshot of the explicit context at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Pinned chunks in stable priority order
    pub pinned_chunks: Vec<PinnedChunk>,

    /// Focus scope path prefixes; empty matches everything
    pub focus_scope: Vec<String>,

    /// Estimated tokens across all pinned content
    pub estimated_tokens: usize,

    /// Snapshot timestamp
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct ExplicitState {
    /// chunk id -> pin
    pinned: indexmap::IndexMap<String, PinnedChunk>,
    focus_scope: Vec<String>,
    next_sequence: u64,
}

/// Session-scoped manager of user-pinned context.
#[derive(Default)]
pub struct ExplicitContextManager {
    state: Mutex<ExplicitState>,
}

impl ExplicitContextManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin every chunk of a file (default priority 5).
    pub fn add_file(&self, path: &str, chunks: Vec<CodeChunk>, options: PinOptions) {
        let priority = clamp_priority(options.priority.unwrap_or(FILE_PRIORITY));
        let reason = options
            .reason
            .unwrap_or_else(|| format!("pinned file {path}"));
        self.pin_chunks(chunks, priority, reason);
    }

    /// Pin the chunks of a single function (default priority 7).
    pub fn add_function(&self, name: &str, chunks: Vec<CodeChunk>, options: PinOptions) {
        let priority = clamp_priority(options.priority.unwrap_or(FUNCTION_PRIORITY));
        let reason = options
            .reason
            .unwrap_or_else(|| format!("pinned function {name}"));
        self.pin_chunks(chunks, priority, reason);
    }

    fn pin_chunks(&self, chunks: Vec<CodeChunk>, priority: u8, reason: String) {
        let mut state = self.state.lock();
        let now = Utc::now();
        for chunk in chunks {
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.pinned.insert(
                chunk.id.clone(),
                PinnedChunk {
                    chunk,
                    added_at: now,
                    reason: reason.clone(),
                    priority,
                    sequence,
                },
            );
        }
    }

    /// Remove every pinned chunk belonging to a file.
    pub fn remove_file(&self, path: &str) -> usize {
        let path = path.replace('\\', "/");
        let mut state = self.state.lock();
        let before = state.pinned.len();
        state.pinned.retain(|_, pin| pin.chunk.file_path != path);
        before - state.pinned.len()
    }

    /// Remove one pinned chunk by id.
    pub fn remove_chunk(&self, chunk_id: &str) -> bool {
        self.state.lock().pinned.shift_remove(chunk_id).is_some()
    }

    /// Replace the focus scope.
    pub fn set_focus(&self, paths: Vec<String>) {
        self.state.lock().focus_scope = paths
            .into_iter()
            .map(|p| p.replace('\\', "/"))
            .collect();
    }

    /// Add one path prefix to the focus scope.
    pub fn add_to_focus(&self, path: &str) {
        let path = path.replace('\\', "/");
        let mut state = self.state.lock();
        if !state.focus_scope.contains(&path) {
            state.focus_scope.push(path);
        }
    }

    /// Remove one path prefix from the focus scope.
    pub fn remove_from_focus(&self, path: &str) {
        let path = path.replace('\\', "/");
        self.state.lock().focus_scope.retain(|p| p != &path);
    }

    /// Whether a path is inside the focus scope.
    ///
    /// An empty scope matches everything; otherwise a path matches when a
    /// scope entry equals it or is an ancestor directory.
    pub fn is_in_focus(&self, path: &str) -> bool {
        let path = path.replace('\\', "/");
        let state = self.state.lock();
        if state.focus_scope.is_empty() {
            return true;
        }
        state.focus_scope.iter().any(|scope| {
            let scope = scope.trim_end_matches('/');
            path == scope || path.starts_with(&format!("{scope}/"))
        })
    }

    /// Pinned chunks in stable order: priority descending, then insertion
    /// order ascending.
    pub fn get_pinned_chunks(&self) -> Vec<PinnedChunk> {
        let state = self.state.lock();
        let mut pins: Vec<PinnedChunk> = state.pinned.values().cloned().collect();
        pins.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.added_at.cmp(&b.added_at))
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        pins
    }

    /// Current snapshot with token estimate.
    pub fn get_current_context(&self) -> ContextSnapshot {
        let pinned_chunks = self.get_pinned_chunks();
        let estimated_tokens = pinned_chunks
            .iter()
            .map(|p| estimate_tokens(&p.chunk.content))
            .sum();
        let focus_scope = self.state.lock().focus_scope.clone();

        ContextSnapshot {
            pinned_chunks,
            focus_scope,
            estimated_tokens,
            timestamp: Utc::now(),
        }
    }

    /// Number of pinned chunks.
    pub fn len(&self) -> usize {
        self.state.lock().pinned.len()
    }

    /// Whether nothing is pinned.
    pub fn is_empty(&self) -> bool {
        self.state.lock().pinned.is_empty()
    }

    /// Clear all pins and focus (session reset).
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pinned.clear();
        state.focus_scope.clear();
    }
}

fn clamp_priority(priority: u8) -> u8 {
    priority.clamp(1, 10)
}
