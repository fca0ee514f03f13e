//! Diagnostic fingerprints and the repeat-failure loop guard.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::core::session::RecoverySession;
use crate::core::types::Diagnostic;

/// Default number of earlier attempts a fingerprint may appear in before it is stuck.
pub const DEFAULT_MAX_REPEATS_PER_FINGERPRINT: u32 = 2;

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'[^']*'").expect("quoted identifier regex should compile"));
static DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digit regex should compile"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex should compile"));

/// Strip the parts of a message that vary across otherwise-identical errors.
pub fn normalize_message(message: &str) -> String {
    let message = QUOTED_RE.replace_all(message, "'_'");
    let message = DIGITS_RE.replace_all(&message, "#");
    WHITESPACE_RE
        .replace_all(message.trim(), " ")
        .to_ascii_lowercase()
}

/// Hex SHA-256 of `(category, file, normalized message)`.
pub fn fingerprint(diag: &Diagnostic) -> String {
    let mut hasher = Sha256::new();
    hasher.update(diag.category.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(diag.file.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_message(&diag.raw_message).as_bytes());
    hex::encode(hasher.finalize())
}

/// Diagnostics split by the loop guard for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Screening {
    /// Error diagnostics still eligible for the cascade.
    pub actionable: Vec<Diagnostic>,
    /// Error diagnostics whose fingerprint repeated past the limit.
    pub stuck: Vec<Diagnostic>,
    /// Distinct stuck fingerprints, sorted.
    pub stuck_fingerprints: Vec<String>,
}

impl Screening {
    /// True when there was something to act on and all of it is stuck.
    pub fn all_stuck(&self) -> bool {
        self.actionable.is_empty() && !self.stuck.is_empty()
    }
}

/// Repeat-failure guard keyed on diagnostic fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopGuard {
    max_repeats_per_fingerprint: u32,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REPEATS_PER_FINGERPRINT)
    }
}

impl LoopGuard {
    pub fn new(max_repeats_per_fingerprint: u32) -> Self {
        Self {
            max_repeats_per_fingerprint,
        }
    }

    pub fn max_repeats(&self) -> u32 {
        self.max_repeats_per_fingerprint
    }

    /// Whether `diag` may still be handed to the cascade, given what the
    /// session has already seen. Does not record anything.
    pub fn should_attempt(&self, diag: &Diagnostic, session: &RecoverySession) -> bool {
        if diag.is_build_timeout() {
            return true;
        }
        session.fingerprint_count(&fingerprint(diag)) < self.max_repeats_per_fingerprint
    }

    /// Screen the error diagnostics of one attempt and record their fingerprints.
    ///
    /// Each distinct fingerprint is counted once per attempt, so five copies of
    /// the same error in one build do not exhaust the limit on their own.
    /// Build-timeout diagnostics are always actionable and never recorded.
    pub fn screen(&self, diagnostics: &[Diagnostic], session: &mut RecoverySession) -> Screening {
        let mut screening = Screening::default();
        let mut stuck_fps = BTreeSet::new();
        let mut to_record = BTreeSet::new();

        for diag in diagnostics.iter().filter(|d| d.is_error()) {
            if self.should_attempt(diag, session) {
                screening.actionable.push(diag.clone());
            } else {
                stuck_fps.insert(fingerprint(diag));
                screening.stuck.push(diag.clone());
            }
            if !diag.is_build_timeout() {
                to_record.insert(fingerprint(diag));
            }
        }

        for fp in to_record {
            session.record_fingerprint(fp);
        }
        screening.stuck_fingerprints = stuck_fps.into_iter().collect();
        screening
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Category, Severity, SourceTree};

    fn diag(file: &str, line: u32, message: &str) -> Diagnostic {
        Diagnostic {
            file: file.to_string(),
            line,
            column: 1,
            raw_message: message.to_string(),
            category: Category::ReservedIdentifierConflict,
            severity: Severity::Error,
        }
    }

    fn session() -> RecoverySession {
        RecoverySession::new("s-1", SourceTree::new(), 6)
    }

    #[test]
    fn normalization_strips_identifiers_and_numbers() {
        assert_eq!(
            normalize_message("invalid  redeclaration of 'Task' at 12"),
            "invalid redeclaration of '_' at #"
        );
    }

    #[test]
    fn fingerprint_ignores_line_and_identifier() {
        let a = diag("A.swift", 3, "invalid redeclaration of 'Task'");
        let b = diag("A.swift", 40, "invalid redeclaration of 'Color'");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_depends_on_file() {
        let a = diag("A.swift", 3, "invalid redeclaration of 'Task'");
        let b = diag("B.swift", 3, "invalid redeclaration of 'Task'");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn duplicates_within_one_attempt_count_once() {
        let guard = LoopGuard::new(2);
        let mut session = session();
        let diags = vec![diag("A.swift", 1, "x 'a'"), diag("A.swift", 2, "x 'b'")];
        let screening = guard.screen(&diags, &mut session);
        assert_eq!(screening.actionable.len(), 2);
        assert_eq!(session.fingerprint_count(&fingerprint(&diags[0])), 1);
    }

    #[test]
    fn repeated_fingerprint_becomes_stuck_after_limit() {
        let guard = LoopGuard::new(2);
        let mut session = session();
        let diags = vec![diag("A.swift", 1, "invalid redeclaration of 'Task'")];

        assert!(!guard.screen(&diags, &mut session).all_stuck());
        assert!(!guard.screen(&diags, &mut session).all_stuck());
        let third = guard.screen(&diags, &mut session);
        assert!(third.all_stuck());
        assert_eq!(third.stuck_fingerprints, vec![fingerprint(&diags[0])]);
    }

    #[test]
    fn warnings_and_timeouts_are_not_recorded() {
        let guard = LoopGuard::new(1);
        let mut session = session();
        let mut warning = diag("A.swift", 1, "deprecated");
        warning.severity = Severity::Warning;
        let timeout = Diagnostic::build_timeout(5);

        for _ in 0..3 {
            let screening = guard.screen(&[warning.clone(), timeout.clone()], &mut session);
            assert_eq!(screening.actionable, vec![timeout.clone()]);
            assert!(screening.stuck.is_empty());
        }
        assert_eq!(session.fingerprint_count(&fingerprint(&warning)), 0);
    }
}
