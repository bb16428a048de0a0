//! Structural side-effect inference.
//!
//! Classifies the effects a function performs by matching its call sites
//! against a configurable allowlist of effectful targets. The inferencer
//! produces at most one effect record per unique `(kind, target)` pair per
//! function, so twenty `axios.get` calls still report one network effect.

use serde::{Deserialize, Serialize};

use crate::core::chunks::{SideEffect, SideEffectKind};
use crate::lang::common::FunctionInfo;

/// One allowlist rule: a callee pattern and the effect it implies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectRule {
    /// Callee prefix to match (`axios.` matches `axios.get`); an exact
    /// match is also accepted for prefix-free rules like `fetch`.
    pub pattern: String,

    /// Effect kind implied by a match
    pub kind: SideEffectKind,
}

impl EffectRule {
    fn new(pattern: &str, kind: SideEffectKind) -> Self {
        Self {
            pattern: pattern.to_string(),
            kind,
        }
    }

    /// Whether a callee expression matches this rule.
    fn matches(&self, callee: &str) -> bool {
        if self.pattern.ends_with('.') {
            callee.starts_with(&self.pattern)
        } else {
            callee == self.pattern
                || callee.starts_with(&format!("{}.", self.pattern))
                || callee.starts_with(&format!("{}(", self.pattern))
        }
    }
}

/// Configuration for the side-effect inferencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideEffectConfig {
    /// Allowlist rules checked in order; first match wins per call site
    pub rules: Vec<EffectRule>,
}

impl Default for SideEffectConfig {
    fn default() -> Self {
        use SideEffectKind::*;

        Self {
            rules: vec![
                // Network clients
                EffectRule::new("fetch", Network),
                EffectRule::new("axios.", Network),
                EffectRule::new("axios", Network),
                EffectRule::new("http.", Network),
                EffectRule::new("https.", Network),
                EffectRule::new("new WebSocket", Network),
                EffectRule::new("new XMLHttpRequest", Network),
                // Filesystem
                EffectRule::new("fs.", Filesystem),
                EffectRule::new("fsPromises.", Filesystem),
                EffectRule::new("readFile", Filesystem),
                EffectRule::new("readFileSync", Filesystem),
                EffectRule::new("writeFile", Filesystem),
                EffectRule::new("writeFileSync", Filesystem),
                EffectRule::new("mkdir", Filesystem),
                EffectRule::new("unlink", Filesystem),
                // Database clients
                EffectRule::new("db.", Database),
                EffectRule::new("pool.", Database),
                EffectRule::new("client.query", Database),
                EffectRule::new("knex", Database),
                EffectRule::new("prisma.", Database),
                EffectRule::new("new Pool", Database),
                EffectRule::new("mongoose.", Database),
                // Browser/global state
                EffectRule::new("localStorage.", State),
                EffectRule::new("sessionStorage.", State),
                EffectRule::new("document.", State),
                EffectRule::new("window.", State),
                EffectRule::new("globalThis.", State),
                // Console and process I/O
                EffectRule::new("console.", Io),
                EffectRule::new("process.stdout", Io),
                EffectRule::new("process.stderr", Io),
                EffectRule::new("process.exit", Io),
            ],
        }
    }
}

/// Side-effect inferencer.
#[derive(Debug, Clone, Default)]
pub struct SideEffectInferencer {
    config: SideEffectConfig,
}

impl SideEffectInferencer {
    /// Create an inferencer with the default allowlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an inferencer with a custom allowlist.
    pub fn with_config(config: SideEffectConfig) -> Self {
        Self { config }
    }

    /// Infer the effects of one function from its recorded call sites.
    pub fn infer(&self, function: &FunctionInfo) -> Vec<SideEffect> {
        let mut seen: ahash::AHashSet<(SideEffectKind, String)> = ahash::AHashSet::new();
        let mut effects = Vec::new();

        for call in &function.calls {
            let Some(rule) = self.config.rules.iter().find(|r| r.matches(&call.callee)) else {
                continue;
            };

            let target = effect_target(&call.callee);
            if !seen.insert((rule.kind, target.clone())) {
                continue;
            }

            effects.push(SideEffect {
                kind: rule.kind,
                description: format!("{} via {}", describe(rule.kind), target),
                location: format!("{}:{}", function.signature.file_path, call.line),
            });
        }

        effects
    }
}

/// Root of a callee expression used as the dedup target (`axios.get` ->
/// `axios.get`, `fs.promises.readFile` -> `fs.promises.readFile`).
fn effect_target(callee: &str) -> String {
    callee.trim_start_matches("new ").to_string()
}

fn describe(kind: SideEffectKind) -> &'static str {
    match kind {
        SideEffectKind::Io => "console/process I/O",
        SideEffectKind::Network => "HTTP request",
        SideEffectKind::State => "shared state mutation",
        SideEffectKind::Database => "database access",
        SideEffectKind::Filesystem => "filesystem access",
    }
}
