//! Shared deterministic types for the recovery pipeline.
//!
//! These types define stable contracts between the classifier, the strategy
//! cascade and the session controller. They must not depend on external state
//! or I/O, and they serialize through ordered maps so build logs stay stable
//! across runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Message prefix of the synthetic diagnostic recorded when a build times out.
pub const BUILD_TIMEOUT_PREFIX: &str = "build timed out";

/// Ordered mapping from relative file path to file content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceTree {
    files: BTreeMap<String, String>,
}

impl SourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, content)` pairs, rejecting paths that escape the root.
    pub fn from_files<I, P, C>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let mut tree = Self::new();
        for (path, content) in files {
            tree.insert(path, content)?;
        }
        Ok(tree)
    }

    /// Insert or replace a file. Returns the previous content, if any.
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Option<String>> {
        let path = path.into();
        validate_relative_path(&path)?;
        Ok(self.files.insert(path, content.into()))
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub(crate) fn replace_all(&mut self, files: BTreeMap<String, String>) {
        self.files = files;
    }
}

/// Reject empty, absolute, or parent-escaping paths.
pub fn validate_relative_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(anyhow!("source path must not be empty"));
    }
    let parsed = Path::new(path);
    for component in parsed.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(anyhow!("source path must be relative and stay in the tree: {path}")),
        }
    }
    Ok(())
}

/// Compiler-reported severity. Ordered so `>= Error` comparisons read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "note" | "remark" => Some(Self::Note),
            "warning" => Some(Self::Warning),
            "error" | "fatal error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Closed set of diagnostic families. Drives strategy eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SyntaxError,
    MissingImport,
    ReservedIdentifierConflict,
    ProtocolConformanceMissing,
    DeprecatedApiUsage,
    StringLiteralMalformed,
    ExhaustivenessMissing,
    ConcurrencyIsolationViolation,
    Unknown,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SyntaxError => "syntax_error",
            Self::MissingImport => "missing_import",
            Self::ReservedIdentifierConflict => "reserved_identifier_conflict",
            Self::ProtocolConformanceMissing => "protocol_conformance_missing",
            Self::DeprecatedApiUsage => "deprecated_api_usage",
            Self::StringLiteralMalformed => "string_literal_malformed",
            Self::ExhaustivenessMissing => "exhaustiveness_missing",
            Self::ConcurrencyIsolationViolation => "concurrency_isolation_violation",
            Self::Unknown => "unknown",
        }
    }

    /// Known categories are eligible for every strategy; `Unknown` only for
    /// the generative fixer and the fallback.
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

/// A single structured compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Path relative to the tree root; empty for file-less diagnostics.
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub raw_message: String,
    pub category: Category,
    pub severity: Severity,
}

impl Diagnostic {
    /// Synthetic diagnostic standing in for a build that never finished.
    pub fn build_timeout(timeout_secs: u64) -> Self {
        Self {
            file: String::new(),
            line: 0,
            column: 0,
            raw_message: format!("{BUILD_TIMEOUT_PREFIX} after {timeout_secs}s"),
            category: Category::Unknown,
            severity: Severity::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }

    pub fn has_file(&self) -> bool {
        !self.file.is_empty()
    }

    pub fn is_build_timeout(&self) -> bool {
        !self.has_file() && self.raw_message.starts_with(BUILD_TIMEOUT_PREFIX)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_file() {
            write!(
                f,
                "{}:{}:{}: {}: {}",
                self.file,
                self.line,
                self.column,
                self.severity.as_str(),
                self.raw_message
            )
        } else {
            write!(f, "{}: {}", self.severity.as_str(), self.raw_message)
        }
    }
}

/// What a candidate is allowed to touch when committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixScope {
    /// Replace the content of files already present in the tree.
    Files,
    /// Replace the whole tree (last-resort fallback only).
    WholeTree,
}

/// A proposed, not-yet-committed set of file changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixCandidate {
    pub strategy_name: String,
    pub changes: BTreeMap<String, String>,
    pub confidence: f32,
    pub scope: FixScope,
}

impl FixCandidate {
    pub fn patch(
        strategy_name: impl Into<String>,
        changes: BTreeMap<String, String>,
        confidence: f32,
    ) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            changes,
            confidence: confidence.clamp(0.0, 1.0),
            scope: FixScope::Files,
        }
    }

    pub fn whole_tree(strategy_name: impl Into<String>, files: BTreeMap<String, String>) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            changes: files,
            confidence: 0.0,
            scope: FixScope::WholeTree,
        }
    }

    pub fn touched_paths(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }
}

/// How a single build attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Build passed.
    Succeeded,
    /// Build failed and a fix was committed for the next attempt.
    FixCommitted,
    /// Build failed and every strategy declined.
    NoFixAvailable,
    /// Every actionable diagnostic repeated past the loop-guard limit.
    AllStuck,
    /// Build timed out with no fix available; the tree is rebuilt unchanged.
    TimedOutRetrying,
    /// Build failed with no attempts left.
    BudgetExhausted,
    /// The caller cancelled the session.
    Cancelled,
}

/// Append-only audit entry for one build attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-indexed build number within the session.
    pub attempt_number: u32,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub diagnostics: Vec<Diagnostic>,
    /// Fingerprints excluded from the cascade because they repeated too often.
    pub stuck: Vec<String>,
    pub strategy_applied: Option<String>,
    pub outcome: AttemptOutcome,
}

/// Terminal status of a recovery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Succeeded,
    Exhausted,
    FallbackApplied,
}

impl RecoveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
            Self::FallbackApplied => "fallback_applied",
        }
    }
}

/// Terminal value returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryResult {
    pub session_id: String,
    pub status: RecoveryStatus,
    pub final_source_tree: SourceTree,
    /// Diagnostics from the last build, verbatim.
    pub diagnostics: Vec<Diagnostic>,
    pub attempts_used: u32,
    pub attempt_budget: u32,
    /// Diagnostics the loop guard gave up on.
    pub stuck_diagnostics: Vec<Diagnostic>,
    pub history: Vec<AttemptRecord>,
    /// Human-readable one-line summary suitable for showing to a user.
    pub summary: String,
    pub build_log_path: Option<std::path::PathBuf>,
}
