//! Diff-First review: render generated tests as reviewable diffs and
//! apply them to the target filesystem.
//!
//! Nothing is written without an explicit apply call. New files render as
//! an additions-only block with 4-wide line numbers; existing files get a
//! line diff where unchanged regions outside a 3-line window around
//! changes are elided with an ellipsis marker. Application creates parent
//! directories and writes atomically (temp + rename).

use std::path::{Path, PathBuf};

use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::errors::{Result, TestMindError};
use crate::generation::generator::TestSuite;

/// Context lines kept around each change in an edit diff.
const CONTEXT_WINDOW: usize = 3;

/// Marker for elided context runs.
const ELLIPSIS: &str = "    ...";

/// A rendered diff for one test suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResult {
    /// Target path relative to the project root
    pub file_path: String,
    /// Whether the target already exists
    pub exists: bool,
    /// Rendered diff text (uncolored)
    pub diff: String,
    /// Prior content when the target exists
    pub original_content: Option<String>,
    /// Content after applying
    pub new_content: String,
}

/// Diff renderer and applier for one target project.
pub struct DiffReviewer {
    project_root: PathBuf,
}

impl DiffReviewer {
    /// Create a reviewer rooted at the target project.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    /// Render the diff a suite would produce.
    pub fn generate_diff(&self, suite: &TestSuite) -> Result<DiffResult> {
        let target = self.project_root.join(&suite.file_path);
        let exists = target.exists();

        if !exists {
            return Ok(DiffResult {
                file_path: suite.file_path.clone(),
                exists: false,
                diff: render_new_file(&suite.file_path, &suite.code),
                original_content: None,
                new_content: suite.code.clone(),
            });
        }

        let original = std::fs::read_to_string(&target).map_err(|e| {
            TestMindError::io(format!("failed to read {}", target.display()), e)
        })?;

        Ok(DiffResult {
            file_path: suite.file_path.clone(),
            exists: true,
            diff: render_edit(&suite.file_path, &original, &suite.code),
            original_content: Some(original),
            new_content: suite.code.clone(),
        })
    }

    /// Write the suite to disk: parent directories first, then an atomic
    /// temp-and-rename of the file itself.
    pub fn apply_test(&self, suite: &TestSuite) -> Result<PathBuf> {
        let target = self.project_root.join(&suite.file_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TestMindError::io(format!("failed to create {}", parent.display()), e)
            })?;
        }

        let tmp = target.with_extension("testmind.tmp");
        std::fs::write(&tmp, &suite.code)
            .map_err(|e| TestMindError::io("failed to write test file", e))?;
        std::fs::rename(&tmp, &target)
            .map_err(|e| TestMindError::io("failed to commit test file", e))?;

        info!(file = %target.display(), "test file applied");
        Ok(target)
    }

    /// Colorize a rendered diff for terminal display.
    pub fn format_for_cli(&self, diff: &str) -> String {
        diff.lines()
            .map(|line| {
                if line.starts_with("===") || line.starts_with("---") || line.starts_with("+++") {
                    line.cyan().bold().to_string()
                } else if line.starts_with('+') {
                    line.green().to_string()
                } else if line.starts_with('-') {
                    line.red().to_string()
                } else if line.starts_with(ELLIPSIS) {
                    line.dimmed().to_string()
                } else {
                    line.dimmed().to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Additions-only rendering for a file that does not exist yet.
fn render_new_file(file_path: &str, content: &str) -> String {
    let mut out = format!("=== New file: {file_path} ===\n");
    for (index, line) in content.lines().enumerate() {
        out.push_str(&format!("+{:4} | {line}\n", index + 1));
    }
    out
}

/// Line diff between old and new content with elided context.
fn render_edit(file_path: &str, original: &str, updated: &str) -> String {
    let old_lines: Vec<&str> = original.lines().collect();
    let new_lines: Vec<&str> = updated.lines().collect();
    let ops = diff_ops(&old_lines, &new_lines);

    // Mark which ops are within the context window of a change.
    let mut keep = vec![false; ops.len()];
    for (index, op) in ops.iter().enumerate() {
        if !matches!(op, DiffOp::Context(_)) {
            let start = index.saturating_sub(CONTEXT_WINDOW);
            let end = (index + CONTEXT_WINDOW + 1).min(ops.len());
            for flag in &mut keep[start..end] {
                *flag = true;
            }
        }
    }

    let mut out = format!("--- a/{file_path}\n+++ b/{file_path}\n");
    let mut elided = false;
    for (index, op) in ops.iter().enumerate() {
        if !keep[index] {
            if !elided {
                out.push_str(ELLIPSIS);
                out.push('\n');
                elided = true;
            }
            continue;
        }
        elided = false;
        match op {
            DiffOp::Context(line) => out.push_str(&format!("  {line}\n")),
            DiffOp::Removed(line) => out.push_str(&format!("- {line}\n")),
            DiffOp::Added(line) => out.push_str(&format!("+ {line}\n")),
        }
    }
    out
}

enum DiffOp {
    Context(String),
    Removed(String),
    Added(String),
}

/// Longest-common-subsequence line diff.
fn diff_ops(old_lines: &[&str], new_lines: &[&str]) -> Vec<DiffOp> {
    let n = old_lines.len();
    let m = new_lines.len();

    // LCS length table.
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old_lines[i] == new_lines[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old_lines[i] == new_lines[j] {
            ops.push(DiffOp::Context(old_lines[i].to_string()));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push(DiffOp::Removed(old_lines[i].to_string()));
            i += 1;
        } else {
            ops.push(DiffOp::Added(new_lines[j].to_string()));
            j += 1;
        }
    }
    while i < n {
        ops.push(DiffOp::Removed(old_lines[i].to_string()));
        i += 1;
    }
    while j < m {
        ops.push(DiffOp::Added(new_lines[j].to_string()));
        j += 1;
    }
    ops
}
