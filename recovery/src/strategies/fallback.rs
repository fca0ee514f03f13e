//! Last-resort substitution of a minimal known-good tree.

use std::collections::BTreeMap;

use tracing::warn;

use crate::core::types::{Diagnostic, FixCandidate, SourceTree};
use crate::strategies::{PassContext, RecoveryStrategy};

pub const FALLBACK_STRATEGY_NAME: &str = "last-resort-fallback";

/// Replaces the whole tree with the configured skeleton, but only when the
/// next build is the last one the budget allows.
pub struct FallbackStrategy<'a> {
    files: &'a BTreeMap<String, String>,
}

impl<'a> FallbackStrategy<'a> {
    pub fn new(files: &'a BTreeMap<String, String>) -> Self {
        Self { files }
    }
}

impl RecoveryStrategy for FallbackStrategy<'_> {
    fn name(&self) -> &str {
        FALLBACK_STRATEGY_NAME
    }

    fn try_fix(
        &self,
        ctx: &PassContext<'_>,
        _diagnostics: &[Diagnostic],
        tree: &SourceTree,
    ) -> Option<FixCandidate> {
        if !ctx.fallback_eligible() || self.files.is_empty() {
            return None;
        }
        let already_fallback = tree.len() == self.files.len()
            && tree
                .iter()
                .all(|(path, content)| self.files.get(path).map(String::as_str) == Some(content));
        if already_fallback {
            return None;
        }
        warn!(
            attempts_used = ctx.attempts_used,
            attempt_budget = ctx.attempt_budget,
            "substituting the fallback tree"
        );
        Some(FixCandidate::whole_tree(
            FALLBACK_STRATEGY_NAME,
            self.files.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::CancelSignal;
    use crate::core::types::FixScope;
    use std::time::{Duration, Instant};

    fn skeleton() -> BTreeMap<String, String> {
        BTreeMap::from([("App.swift".to_string(), "@main struct A {}\n".to_string())])
    }

    fn ctx(cancel: &CancelSignal, attempts_used: u32) -> PassContext<'_> {
        PassContext {
            attempts_used,
            attempt_budget: 4,
            deadline: Instant::now() + Duration::from_secs(60),
            cancel,
            final_pass: false,
        }
    }

    #[test]
    fn only_offered_before_the_last_build() {
        let cancel = CancelSignal::new();
        let files = skeleton();
        let fallback = FallbackStrategy::new(&files);
        let tree = SourceTree::from_files([("Broken.swift", "struct {")]).expect("tree");

        assert!(fallback.try_fix(&ctx(&cancel, 2), &[], &tree).is_none());
        let candidate = fallback
            .try_fix(&ctx(&cancel, 3), &[], &tree)
            .expect("candidate");
        assert_eq!(candidate.scope, FixScope::WholeTree);
        assert_eq!(candidate.strategy_name, FALLBACK_STRATEGY_NAME);
        assert_eq!(candidate.confidence, 0.0);
        assert_eq!(candidate.changes, files);
    }

    #[test]
    fn final_pass_makes_it_eligible_early() {
        let cancel = CancelSignal::new();
        let files = skeleton();
        let fallback = FallbackStrategy::new(&files);
        let tree = SourceTree::from_files([("Broken.swift", "struct {")]).expect("tree");
        let mut early = ctx(&cancel, 1);
        assert!(fallback.try_fix(&early, &[], &tree).is_none());
        early.final_pass = true;
        assert!(fallback.try_fix(&early, &[], &tree).is_some());
    }

    #[test]
    fn declines_when_tree_already_is_the_skeleton() {
        let cancel = CancelSignal::new();
        let files = skeleton();
        let fallback = FallbackStrategy::new(&files);
        let tree = SourceTree::from_files(files.clone()).expect("tree");
        assert!(fallback.try_fix(&ctx(&cancel, 3), &[], &tree).is_none());
    }
}
