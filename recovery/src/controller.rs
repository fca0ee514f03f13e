//! Session controller: build, classify, recover, rebuild.
//!
//! One call to [`Orchestrator::run_recovery`] owns one [`RecoverySession`]
//! from the first build to the terminal [`RecoveryResult`]. The orchestrator
//! itself holds only configuration and the two external seams, so it can be
//! shared by concurrent sessions.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, info_span, warn};

use crate::core::budget::{ComplexityProfile, attempt_budget, clipped_timeout};
use crate::core::cancel::CancelSignal;
use crate::core::classifier::classify;
use crate::core::fingerprint::{LoopGuard, fingerprint};
use crate::core::rules::RuleTable;
use crate::core::session::RecoverySession;
use crate::core::types::{
    AttemptOutcome, AttemptRecord, Category, Diagnostic, RecoveryResult, RecoveryStatus, Severity,
    SourceTree,
};
use crate::io::build::{
    BuildAdapter, BuildOutput, BuildRequest, BuildSpawnError, CompilerBuildAdapter,
};
use crate::io::build_log::{BuildLog, SessionSummary};
use crate::io::config::OrchestratorConfig;
use crate::io::fix_service::FixService;
use crate::io::scratch::{ScratchDir, new_session_id};
use crate::strategies::fallback::FallbackStrategy;
use crate::strategies::generative::GenerativeFixer;
use crate::strategies::imports::ImportFixer;
use crate::strategies::pattern::PatternFixer;
use crate::strategies::{Cascade, PassContext, RecoveryStrategy};

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Succeeded,
    BudgetSpent,
    AllStuck,
    NoFix,
    Cancelled,
    DeadlineReached,
}

impl StopReason {
    fn describe(self) -> &'static str {
        match self {
            Self::Succeeded => "build succeeded",
            Self::BudgetSpent => "attempt budget spent",
            Self::AllStuck => "every remaining error repeated without progress",
            Self::NoFix => "no strategy could fix the remaining errors",
            Self::Cancelled => "cancelled",
            Self::DeadlineReached => "session deadline reached",
        }
    }
}

pub struct Orchestrator<B: BuildAdapter, S: FixService> {
    config: OrchestratorConfig,
    rules: RuleTable,
    adapter: B,
    service: S,
}

impl<S: FixService> Orchestrator<CompilerBuildAdapter, S> {
    /// Orchestrator that builds with the configured compiler command.
    pub fn with_compiler(config: OrchestratorConfig, service: S) -> Result<Self> {
        let adapter = CompilerBuildAdapter::new(&config.compiler)?;
        Self::new(config, adapter, service)
    }
}

impl<B: BuildAdapter, S: FixService> Orchestrator<B, S> {
    pub fn new(config: OrchestratorConfig, adapter: B, service: S) -> Result<Self> {
        config.validate()?;
        let rules = RuleTable::with_extra(&config.rules).context("compile classifier rules")?;
        Ok(Self {
            config,
            rules,
            adapter,
            service,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Attempts granted to a request of the given complexity.
    pub fn attempt_budget_for(&self, profile: &ComplexityProfile) -> u32 {
        attempt_budget(
            profile,
            self.config.budget.baseline_attempts,
            self.config.budget.max_attempts,
        )
    }

    fn cascade(&self) -> Cascade<'_> {
        let mut cascade = Cascade::new();
        cascade.push(PatternFixer::new(&self.rules));
        cascade.push(ImportFixer::new(&self.rules));
        if self.config.generative.enabled {
            cascade.push(GenerativeFixer::new(
                &self.service,
                Duration::from_secs(self.config.generative.timeout_secs),
            ));
        }
        cascade.push(FallbackStrategy::new(&self.config.fallback.files));
        cascade
    }

    /// Drive one build request to a terminal result.
    ///
    /// Returns `Err` only for infrastructure failures: the compiler could not
    /// be invoked (the error carries a [`BuildSpawnError`]) or session
    /// artifacts could not be written. Every other outcome, including
    /// timeouts and cancellation, is an `Ok` result.
    pub fn run_recovery(
        &self,
        source_tree: SourceTree,
        profile: ComplexityProfile,
        cancel: &CancelSignal,
    ) -> Result<RecoveryResult> {
        let session_id = new_session_id();
        let budget = self.attempt_budget_for(&profile);
        let span = info_span!("session", session_id = %session_id, tier = ?profile.tier, budget);
        let _enter = span.enter();

        let deadline = Instant::now() + Duration::from_secs(self.config.session.timeout_secs);
        let scratch = ScratchDir::create(&self.config.session.scratch_root, &session_id)
            .context("create session scratch dir")?;
        let mut log = BuildLog::create(&self.config.session.log_dir, &session_id)?;
        let mut session = RecoverySession::new(session_id.clone(), source_tree, budget);
        let guard = LoopGuard::new(self.config.budget.max_repeats_per_fingerprint);
        let cascade = self.cascade();
        let last_resort = FallbackStrategy::new(&self.config.fallback.files);
        let compiler_timeout = Duration::from_secs(self.config.compiler.timeout_secs);
        info!(strategies = ?cascade.names(), "recovery session started");

        let mut last_diagnostics: Vec<Diagnostic> = Vec::new();
        let mut stuck_diagnostics: Vec<Diagnostic> = Vec::new();

        let stop = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            let build_timeout = match clipped_timeout(compiler_timeout, deadline) {
                Ok(timeout) => timeout,
                Err(_) => break StopReason::DeadlineReached,
            };
            let attempt = session.begin_attempt()?;

            let invoked = self.adapter.invoke(&BuildRequest {
                session_id: &session_id,
                attempt,
                workdir: scratch.path(),
                tree: session.source_tree(),
                timeout: build_timeout,
                cancel,
            });
            let output = match invoked {
                Ok(output) => output,
                Err(err) => {
                    error!(attempt, err = %format!("{err:#}"), "compiler could not be invoked");
                    // The session still leaves a sealed log and summary behind.
                    if let Err(seal_err) = log.finish(&SessionSummary {
                        session_id: &session_id,
                        status: RecoveryStatus::Exhausted,
                        attempts_used: session.attempts_used(),
                        attempt_budget: session.attempt_budget(),
                        history: session.history(),
                    }) {
                        warn!(err = %format!("{seal_err:#}"), "could not seal the build log");
                    }
                    return Err(err.context(BuildSpawnError {
                        session_id: session_id.clone(),
                        attempt,
                    }));
                }
            };
            log.append_attempt(attempt, &output)?;

            let mut diagnostics = classify(&output.raw_diagnostics, &self.rules);
            if output.timed_out {
                diagnostics.push(Diagnostic::build_timeout(build_timeout.as_secs()));
            }
            debug!(
                attempt,
                exit_code = ?output.exit_code,
                timed_out = output.timed_out,
                diagnostics = diagnostics.len(),
                "build finished"
            );

            if output.cancelled {
                session.push_record(attempt_record(
                    attempt,
                    &output,
                    &diagnostics,
                    Vec::new(),
                    None,
                    AttemptOutcome::Cancelled,
                ));
                last_diagnostics = diagnostics;
                break StopReason::Cancelled;
            }

            let has_errors = diagnostics.iter().any(Diagnostic::is_error);
            if !output.timed_out && output.exit_code == Some(0) && !has_errors {
                session.push_record(attempt_record(
                    attempt,
                    &output,
                    &diagnostics,
                    Vec::new(),
                    None,
                    AttemptOutcome::Succeeded,
                ));
                last_diagnostics = diagnostics;
                break StopReason::Succeeded;
            }
            if !has_errors {
                diagnostics.push(unparsed_failure(output.exit_code));
            }

            let screening = guard.screen(&diagnostics, &mut session);
            for diag in &screening.stuck {
                let fp = fingerprint(diag);
                if !stuck_diagnostics.iter().any(|d| fingerprint(d) == fp) {
                    stuck_diagnostics.push(diag.clone());
                }
            }
            if !screening.stuck_fingerprints.is_empty() {
                warn!(
                    attempt,
                    stuck = screening.stuck_fingerprints.len(),
                    "diagnostics repeated past the loop-guard limit"
                );
            }
            last_diagnostics = diagnostics.clone();

            let record = |strategy: Option<String>, outcome| {
                attempt_record(
                    attempt,
                    &output,
                    &diagnostics,
                    screening.stuck_fingerprints.clone(),
                    strategy,
                    outcome,
                )
            };

            if screening.all_stuck() {
                session.push_record(record(None, AttemptOutcome::AllStuck));
                break StopReason::AllStuck;
            }
            if session.attempts_remaining() == 0 {
                session.push_record(record(None, AttemptOutcome::BudgetExhausted));
                break StopReason::BudgetSpent;
            }

            let mut ctx = PassContext {
                attempts_used: session.attempts_used(),
                attempt_budget: session.attempt_budget(),
                deadline,
                cancel,
                final_pass: false,
            };
            // The last build the budget allows is reserved for the fallback tree.
            let mut candidate = None;
            if session.attempts_remaining() == 1
                && !session.fallback_committed()
                && !cancel.is_cancelled()
            {
                candidate =
                    last_resort.try_fix(&ctx, &screening.actionable, session.source_tree());
            }
            if candidate.is_none() {
                candidate = cascade.run(&ctx, &screening.actionable, session.source_tree());
            }
            // Nothing else applies and attempts remain: the fallback gets its turn now.
            if candidate.is_none()
                && !output.timed_out
                && !cancel.is_cancelled()
                && !session.fallback_committed()
            {
                ctx.final_pass = true;
                candidate = last_resort.try_fix(&ctx, &screening.actionable, session.source_tree());
            }

            match candidate {
                Some(candidate) => {
                    session
                        .commit(&candidate)
                        .with_context(|| format!("commit fix from {}", candidate.strategy_name))?;
                    info!(attempt, strategy = %candidate.strategy_name, "fix committed");
                    session.push_record(record(
                        Some(candidate.strategy_name),
                        AttemptOutcome::FixCommitted,
                    ));
                }
                None if cancel.is_cancelled() => {
                    session.push_record(record(None, AttemptOutcome::Cancelled));
                    break StopReason::Cancelled;
                }
                None if output.timed_out => {
                    warn!(attempt, "build timed out and no fix applies; retrying unchanged");
                    session.push_record(record(None, AttemptOutcome::TimedOutRetrying));
                }
                None => {
                    session.push_record(record(None, AttemptOutcome::NoFixAvailable));
                    break StopReason::NoFix;
                }
            }
        };

        let status = match stop {
            StopReason::Succeeded if session.fallback_committed() => {
                RecoveryStatus::FallbackApplied
            }
            StopReason::Succeeded => RecoveryStatus::Succeeded,
            _ => RecoveryStatus::Exhausted,
        };
        let summary = summarize(status, stop, &session, &last_diagnostics);
        let log_paths = log.finish(&SessionSummary {
            session_id: &session_id,
            status,
            attempts_used: session.attempts_used(),
            attempt_budget: session.attempt_budget(),
            history: session.history(),
        })?;
        info!(status = status.as_str(), attempts_used = session.attempts_used(), "{summary}");

        let attempts_used = session.attempts_used();
        let (final_source_tree, history) = session.into_parts();
        Ok(RecoveryResult {
            session_id,
            status,
            final_source_tree,
            diagnostics: last_diagnostics,
            attempts_used,
            attempt_budget: budget,
            stuck_diagnostics,
            history,
            summary,
            build_log_path: Some(log_paths.log_path),
        })
    }
}

fn attempt_record(
    attempt: u32,
    output: &BuildOutput,
    diagnostics: &[Diagnostic],
    stuck: Vec<String>,
    strategy_applied: Option<String>,
    outcome: AttemptOutcome,
) -> AttemptRecord {
    AttemptRecord {
        attempt_number: attempt,
        exit_code: output.exit_code,
        timed_out: output.timed_out,
        duration_ms: output.duration_ms,
        diagnostics: diagnostics.to_vec(),
        stuck,
        strategy_applied,
        outcome,
    }
}

/// Stand-in for a failed build whose output named no error.
fn unparsed_failure(exit_code: Option<i32>) -> Diagnostic {
    let status = exit_code.map_or_else(
        || "build was terminated".to_string(),
        |code| format!("build failed with exit code {code}"),
    );
    Diagnostic {
        file: String::new(),
        line: 0,
        column: 0,
        raw_message: format!("{status} and no parsable diagnostics"),
        category: Category::Unknown,
        severity: Severity::Error,
    }
}

fn summarize(
    status: RecoveryStatus,
    stop: StopReason,
    session: &RecoverySession,
    diagnostics: &[Diagnostic],
) -> String {
    let attempts = format!(
        "{} of {} attempts",
        session.attempts_used(),
        session.attempt_budget()
    );
    match status {
        RecoveryStatus::Succeeded => format!("build succeeded after {attempts}"),
        RecoveryStatus::FallbackApplied => {
            format!("build succeeded on the fallback tree after {attempts}")
        }
        RecoveryStatus::Exhausted => {
            let errors = diagnostics.iter().filter(|d| d.is_error()).count();
            let mut summary = format!(
                "recovery stopped after {attempts}: {}; {errors} error(s) remain",
                stop.describe()
            );
            if let Some(first) = diagnostics.iter().find(|d| d.is_error()) {
                summary.push_str(&format!(" (first: {first})"));
            }
            summary
        }
    }
}
