//! Ordered recovery strategies.
//!
//! A [`Cascade`] asks each strategy in turn for a [`FixCandidate`]; the first
//! one offered wins. Declining costs nothing, so strategies return `None`
//! whenever they are not sure rather than guessing.

pub mod fallback;
pub mod generative;
pub mod imports;
pub mod pattern;

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::core::cancel::CancelSignal;
use crate::core::types::{Diagnostic, FixCandidate, FixScope, SourceTree};

/// Per-pass facts handed to every strategy.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    /// Builds already run in this session, the failing one included.
    pub attempts_used: u32,
    pub attempt_budget: u32,
    pub deadline: Instant,
    pub cancel: &'a CancelSignal,
    /// Set when nothing but the last resort can follow this pass.
    pub final_pass: bool,
}

impl PassContext<'_> {
    /// True when the next build is the last one the budget allows, or the
    /// session would otherwise end here.
    pub fn fallback_eligible(&self) -> bool {
        self.final_pass || self.attempts_used.saturating_add(1) >= self.attempt_budget
    }
}

/// One recovery technique.
pub trait RecoveryStrategy {
    fn name(&self) -> &str;

    /// Propose changes for `diagnostics` against `tree`, or decline.
    fn try_fix(
        &self,
        ctx: &PassContext<'_>,
        diagnostics: &[Diagnostic],
        tree: &SourceTree,
    ) -> Option<FixCandidate>;
}

#[derive(Default)]
pub struct Cascade<'a> {
    strategies: Vec<Box<dyn RecoveryStrategy + 'a>>,
}

impl<'a> Cascade<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, strategy: impl RecoveryStrategy + 'a) {
        self.strategies.push(Box::new(strategy));
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run strategies in priority order and return the first usable candidate.
    ///
    /// Changes that would leave a file as it already is are dropped; a
    /// `Files` candidate naming a path outside the tree is discarded.
    pub fn run(
        &self,
        ctx: &PassContext<'_>,
        diagnostics: &[Diagnostic],
        tree: &SourceTree,
    ) -> Option<FixCandidate> {
        for strategy in &self.strategies {
            if ctx.cancel.is_cancelled() {
                debug!("cascade interrupted by cancellation");
                return None;
            }
            let Some(mut candidate) = strategy.try_fix(ctx, diagnostics, tree) else {
                debug!(strategy = strategy.name(), "strategy declined");
                continue;
            };
            if candidate.scope == FixScope::Files {
                if let Some(path) = candidate.touched_paths().find(|p| !tree.contains(p)) {
                    warn!(
                        strategy = strategy.name(),
                        path, "candidate touches a path outside the tree; discarded"
                    );
                    continue;
                }
                candidate.changes = changed_only(candidate.changes, tree);
            }
            if candidate.changes.is_empty() {
                debug!(strategy = strategy.name(), "candidate was a no-op");
                continue;
            }
            info!(
                strategy = %candidate.strategy_name,
                files = candidate.changes.len(),
                confidence = candidate.confidence,
                "strategy produced a candidate"
            );
            return Some(candidate);
        }
        None
    }
}

/// Keep only the entries whose content differs from `tree`.
pub(crate) fn changed_only(
    changes: BTreeMap<String, String>,
    tree: &SourceTree,
) -> BTreeMap<String, String> {
    changes
        .into_iter()
        .filter(|(path, content)| tree.get(path) != Some(content.as_str()))
        .collect()
}
