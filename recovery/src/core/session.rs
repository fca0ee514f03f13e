//! Per-request recovery state.
//!
//! A [`RecoverySession`] is created for one build request, owned by the
//! controller call handling it, and dropped with the terminal result. Nothing
//! here is global: budgets and fingerprints never leak between requests.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};

use crate::core::types::{AttemptRecord, FixCandidate, FixScope, SourceTree, validate_relative_path};

#[derive(Debug, Clone)]
pub struct RecoverySession {
    session_id: String,
    source_tree: SourceTree,
    seen_fingerprints: BTreeMap<String, u32>,
    attempts_used: u32,
    attempt_budget: u32,
    history: Vec<AttemptRecord>,
    fallback_committed: bool,
}

impl RecoverySession {
    pub fn new(
        session_id: impl Into<String>,
        source_tree: SourceTree,
        attempt_budget: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            source_tree,
            seen_fingerprints: BTreeMap::new(),
            attempts_used: 0,
            attempt_budget,
            history: Vec::new(),
            fallback_committed: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn source_tree(&self) -> &SourceTree {
        &self.source_tree
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    pub fn attempt_budget(&self) -> u32 {
        self.attempt_budget
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempt_budget.saturating_sub(self.attempts_used)
    }

    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    pub fn fallback_committed(&self) -> bool {
        self.fallback_committed
    }

    /// Claim the next build attempt. Fails once the budget is spent, so
    /// `attempts_used <= attempt_budget` cannot be violated.
    pub fn begin_attempt(&mut self) -> Result<u32> {
        if self.attempts_used >= self.attempt_budget {
            return Err(anyhow!(
                "attempt budget exhausted ({} of {})",
                self.attempts_used,
                self.attempt_budget
            ));
        }
        self.attempts_used += 1;
        Ok(self.attempts_used)
    }

    /// How many earlier attempts reported this fingerprint.
    pub fn fingerprint_count(&self, fingerprint: &str) -> u32 {
        self.seen_fingerprints.get(fingerprint).copied().unwrap_or(0)
    }

    pub fn seen_fingerprint_total(&self) -> usize {
        self.seen_fingerprints.len()
    }

    pub(crate) fn record_fingerprint(&mut self, fingerprint: String) {
        *self.seen_fingerprints.entry(fingerprint).or_insert(0) += 1;
    }

    pub(crate) fn push_record(&mut self, record: AttemptRecord) {
        self.history.push(record);
    }

    /// Commit a candidate into the tree.
    ///
    /// `Files` candidates may only replace paths already in the tree;
    /// `WholeTree` candidates replace the tree outright and mark the session
    /// as running on the fallback.
    pub fn commit(&mut self, candidate: &FixCandidate) -> Result<()> {
        if candidate.changes.is_empty() {
            return Err(anyhow!(
                "candidate from '{}' has no changes",
                candidate.strategy_name
            ));
        }
        for path in candidate.touched_paths() {
            validate_relative_path(path)?;
        }
        match candidate.scope {
            FixScope::Files => {
                let unknown: Vec<&str> = candidate
                    .touched_paths()
                    .filter(|p| !self.source_tree.contains(p))
                    .collect();
                if !unknown.is_empty() {
                    return Err(anyhow!(
                        "candidate from '{}' references paths outside the tree: {}",
                        candidate.strategy_name,
                        unknown.join(", ")
                    ));
                }
                for (path, content) in &candidate.changes {
                    self.source_tree.insert(path.clone(), content.clone())?;
                }
            }
            FixScope::WholeTree => {
                self.source_tree.replace_all(candidate.changes.clone());
                self.fallback_committed = true;
            }
        }
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (SourceTree, Vec<AttemptRecord>) {
        (self.source_tree, self.history)
    }
}
