//! Session-level scenarios driven through `Orchestrator::run_recovery`.
//!
//! Builds are simulated with adapters that inspect the submitted tree the way
//! a compiler would, so each test checks the whole build → classify → repair
//! → rebuild cycle rather than a single strategy.

use recovery::controller::Orchestrator;
use recovery::core::budget::{ComplexityProfile, ComplexityTier};
use recovery::core::cancel::CancelSignal;
use recovery::core::types::{AttemptOutcome, RecoveryStatus, SourceTree};
use recovery::io::fix_service::DisabledFixService;
use recovery::strategies::fallback::FALLBACK_STRATEGY_NAME;
use recovery::strategies::generative::GENERATIVE_STRATEGY_NAME;
use recovery::strategies::imports::IMPORT_STRATEGY_NAME;
use recovery::strategies::pattern::PATTERN_STRATEGY_NAME;
use recovery::test_support::{
    FnBuildAdapter, ScriptedBuild, ScriptedBuildAdapter, ScriptedFix, ScriptedFixService,
    test_config, tree,
};

fn profile(tier: ComplexityTier) -> ComplexityProfile {
    ComplexityProfile::new(tier)
}

fn file<'a>(tree: &'a SourceTree, path: &str) -> &'a str {
    tree.get(path).expect("file in tree")
}

/// Whether `source` uses `ident` as a whole word.
fn mentions(source: &str, ident: &str) -> bool {
    source
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|word| word == ident)
}

/// Unterminated string literal in one file.
///
/// Attempt 1 fails with `unterminated string literal`; the pattern fixer
/// closes the literal; attempt 2 builds cleanly.
#[test]
fn unterminated_string_is_fixed_in_two_attempts() {
    let temp = tempfile::tempdir().expect("tempdir");
    let adapter = FnBuildAdapter::new(|req| {
        let view = req.tree.get("ContentView.swift").unwrap_or_default();
        if view.contains("Text(\"Hello)") {
            ScriptedBuild::failure("ContentView.swift:5:14: error: unterminated string literal")
        } else {
            ScriptedBuild::success()
        }
    });
    let orchestrator =
        Orchestrator::new(test_config(temp.path()), adapter, DisabledFixService).expect("new");

    let result = orchestrator
        .run_recovery(
            tree([(
                "ContentView.swift",
                "import SwiftUI\n\nstruct ContentView: View {\n    var body: some View {\n        Text(\"Hello)\n    }\n}\n",
            )]),
            profile(ComplexityTier::Simple),
            &CancelSignal::new(),
        )
        .expect("run");

    assert_eq!(result.status, RecoveryStatus::Succeeded);
    assert_eq!(result.attempts_used, 2);
    assert_eq!(
        result.history[0].strategy_applied.as_deref(),
        Some(PATTERN_STRATEGY_NAME)
    );
    assert!(
        file(&result.final_source_tree, "ContentView.swift").contains("Text(\"Hello\")"),
        "literal should be closed: {}",
        file(&result.final_source_tree, "ContentView.swift")
    );
    assert!(result.diagnostics.is_empty());
}

/// A type named like a platform type, used across three files.
///
/// The rename must reach every file in one commit, otherwise attempt 2 would
/// fail on the files that still say `Task`.
#[test]
fn reserved_identifier_is_renamed_across_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let adapter = FnBuildAdapter::new(|req| {
        let stale: Vec<&str> = req
            .tree
            .iter()
            .filter(|(_, content)| mentions(content, "Task"))
            .map(|(path, _)| path)
            .collect();
        match stale.first() {
            Some(path) => ScriptedBuild::failure(&format!(
                "{path}:1:8: error: invalid redeclaration of 'Task'"
            )),
            None => ScriptedBuild::success(),
        }
    });
    let orchestrator =
        Orchestrator::new(test_config(temp.path()), adapter, DisabledFixService).expect("new");

    let result = orchestrator
        .run_recovery(
            tree([
                ("Models/Task.swift", "struct Task {\n    let title: String\n}\n"),
                ("TaskStore.swift", "final class TaskStore {\n    var tasks: [Task] = []\n}\n"),
                ("TaskRow.swift", "struct TaskRow {\n    let task: Task\n}\n"),
            ]),
            profile(ComplexityTier::Moderate),
            &CancelSignal::new(),
        )
        .expect("run");

    assert_eq!(result.status, RecoveryStatus::Succeeded);
    assert_eq!(result.attempts_used, 2);
    let files = &result.final_source_tree;
    assert!(file(files, "Models/Task.swift").starts_with("struct AppTask {"));
    assert!(file(files, "TaskStore.swift").contains("[AppTask]"));
    assert!(file(files, "TaskRow.swift").contains("let task: AppTask"));
    // Names that merely contain the identifier are left alone.
    assert!(file(files, "TaskStore.swift").starts_with("final class TaskStore"));
}

/// Missing framework import resolved by the import fixer.
#[test]
fn missing_import_is_added() {
    let temp = tempfile::tempdir().expect("tempdir");
    let adapter = FnBuildAdapter::new(|req| {
        if req.tree.get("Home.swift").is_some_and(|c| c.contains("import SwiftUI")) {
            ScriptedBuild::success()
        } else {
            ScriptedBuild::failure("Home.swift:1:14: error: cannot find type 'View' in scope")
        }
    });
    let orchestrator =
        Orchestrator::new(test_config(temp.path()), adapter, DisabledFixService).expect("new");
    let result = orchestrator
        .run_recovery(
            tree([(
                "Home.swift",
                "struct Home: View {\n    var body: some View { Text(\"Hi\") }\n}\n",
            )]),
            profile(ComplexityTier::Simple),
            &CancelSignal::new(),
        )
        .expect("run");

    assert_eq!(result.status, RecoveryStatus::Succeeded);
    assert_eq!(
        result.history[0].strategy_applied.as_deref(),
        Some(IMPORT_STRATEGY_NAME)
    );
}

/// Every build times out.
///
/// Timeouts carry no file to repair, so attempts are retried unchanged until
/// the fallback becomes eligible; the session then ends exhausted with the
/// whole budget spent.
#[test]
fn persistent_timeout_spends_the_budget() {
    let temp = tempfile::tempdir().expect("tempdir");
    let adapter = ScriptedBuildAdapter::new(vec![ScriptedBuild::timeout()]);
    let orchestrator =
        Orchestrator::new(test_config(temp.path()), &adapter, DisabledFixService).expect("new");

    let result = orchestrator
        .run_recovery(
            tree([("App.swift", "@main struct Slow {}\n")]),
            profile(ComplexityTier::Simple),
            &CancelSignal::new(),
        )
        .expect("run");

    assert_eq!(result.status, RecoveryStatus::Exhausted);
    assert_eq!(result.attempt_budget, 3);
    assert_eq!(result.attempts_used, result.attempt_budget);
    assert_eq!(adapter.invocations(), 3);
    assert!(result.history.iter().all(|r| r.timed_out));
    assert_eq!(result.history[0].outcome, AttemptOutcome::TimedOutRetrying);
    assert_eq!(
        result.history[1].strategy_applied.as_deref(),
        Some(FALLBACK_STRATEGY_NAME)
    );
    assert_eq!(
        result.history.last().map(|r| r.outcome),
        Some(AttemptOutcome::BudgetExhausted)
    );
    assert!(result.diagnostics.iter().any(|d| d.is_build_timeout()));
}

/// A fix that changes the file but never the error.
///
/// With `max_repeats_per_fingerprint = 2` the error is handed to the cascade
/// twice and then declared stuck, so the session stops after three builds
/// even though six were allowed.
#[test]
fn repeating_error_stops_after_max_repeats_plus_one() {
    let temp = tempfile::tempdir().expect("tempdir");
    let adapter = ScriptedBuildAdapter::new(vec![ScriptedBuild::failure(
        "Store.swift:4:9: error: ambiguous use of 'init'",
    )]);
    let service = ScriptedFixService::new([
        ScriptedFix::files([("Store.swift", "struct Store { init() {} }\n")]),
        ScriptedFix::files([("Store.swift", "struct Store { init() { } }\n")]),
        ScriptedFix::files([("Store.swift", "struct Store { init() {  } }\n")]),
    ]);
    let orchestrator =
        Orchestrator::new(test_config(temp.path()), &adapter, &service).expect("new");

    let result = orchestrator
        .run_recovery(
            tree([("Store.swift", "struct Store { init() {} init() {} }\n")]),
            profile(ComplexityTier::VeryComplex),
            &CancelSignal::new(),
        )
        .expect("run");

    assert_eq!(result.status, RecoveryStatus::Exhausted);
    assert_eq!(result.attempt_budget, 6);
    assert_eq!(result.attempts_used, 3);
    assert_eq!(service.requests().len(), 2);
    assert_eq!(
        result.history.last().map(|r| r.outcome),
        Some(AttemptOutcome::AllStuck)
    );
    assert_eq!(result.stuck_diagnostics.len(), 1);
    assert!(result.summary.contains("repeated without progress"));
}

/// Nothing in the cascade can repair the tree, but the skeleton builds.
#[test]
fn fallback_tree_is_applied_when_nothing_else_works() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let skeleton = SourceTree::from_files(config.fallback.files.clone()).expect("skeleton");
    let expected = skeleton.clone();
    let adapter = FnBuildAdapter::new(move |req| {
        if *req.tree == skeleton {
            ScriptedBuild::success()
        } else {
            ScriptedBuild::failure("Main.swift:7:3: error: generic parameter 'T' could not be inferred")
        }
    });
    let orchestrator = Orchestrator::new(config, adapter, DisabledFixService).expect("new");

    let result = orchestrator
        .run_recovery(
            tree([("Main.swift", "let x = make()\n")]),
            profile(ComplexityTier::Simple),
            &CancelSignal::new(),
        )
        .expect("run");

    assert_eq!(result.status, RecoveryStatus::FallbackApplied);
    assert_eq!(result.final_source_tree, expected);
    assert!(result.attempts_used <= result.attempt_budget);
    assert!(result.summary.contains("fallback tree"));
}

/// The generative fixer repairs what the deterministic strategies cannot.
#[test]
fn generative_fix_is_used_for_unknown_errors() {
    let temp = tempfile::tempdir().expect("tempdir");
    let adapter = FnBuildAdapter::new(|req| {
        if req.tree.get("Store.swift").is_some_and(|c| c.matches("init()").count() > 1) {
            ScriptedBuild::failure("Store.swift:1:30: error: ambiguous use of 'init'")
        } else {
            ScriptedBuild::success()
        }
    });
    let service = ScriptedFixService::new([ScriptedFix::raw(
        "```json\n{\"files\": {\"Store.swift\": \"struct Store { init() {} }\\n\"}}\n```",
    )]);
    let orchestrator =
        Orchestrator::new(test_config(temp.path()), adapter, &service).expect("new");

    let result = orchestrator
        .run_recovery(
            tree([
                ("Store.swift", "struct Store { init() {} init() {} }\n"),
                ("App.swift", "@main struct A {}\n"),
            ]),
            profile(ComplexityTier::Simple),
            &CancelSignal::new(),
        )
        .expect("run");

    assert_eq!(result.status, RecoveryStatus::Succeeded);
    assert_eq!(result.attempts_used, 2);
    assert_eq!(
        result.history[0].strategy_applied.as_deref(),
        Some(GENERATIVE_STRATEGY_NAME)
    );
    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].files.contains_key("Store.swift"));
    assert!(!requests[0].files.contains_key("App.swift"));
    assert_eq!(file(&result.final_source_tree, "App.swift"), "@main struct A {}\n");
}

/// A rejected generative answer is not committed and costs no build.
#[test]
fn rejected_fix_response_costs_no_attempt() {
    let temp = tempfile::tempdir().expect("tempdir");
    let adapter = ScriptedBuildAdapter::new(vec![
        ScriptedBuild::failure("Store.swift:1:30: error: ambiguous use of 'init'"),
        ScriptedBuild::success(),
    ]);
    let service = ScriptedFixService::new([ScriptedFix::files([(
        "Store.swift",
        "struct Store { init() {\n",
    )])]);
    let orchestrator =
        Orchestrator::new(test_config(temp.path()), &adapter, &service).expect("new");

    let result = orchestrator
        .run_recovery(
            tree([("Store.swift", "struct Store { init() {} init() {} }\n")]),
            profile(ComplexityTier::Simple),
            &CancelSignal::new(),
        )
        .expect("run");

    assert_eq!(service.requests().len(), 1);
    // The unbalanced answer never reached a build.
    let trees = adapter.trees();
    assert_eq!(trees.len(), 2);
    assert!(
        trees
            .iter()
            .all(|t| t.get("Store.swift") != Some("struct Store { init() {\n"))
    );
    assert_eq!(
        result.history[0].strategy_applied.as_deref(),
        Some(FALLBACK_STRATEGY_NAME)
    );
    assert_eq!(result.status, RecoveryStatus::FallbackApplied);
}

/// `attempts_used <= attempt_budget` for every tier, whatever the builds say.
#[test]
fn attempts_never_exceed_budget() {
    for tier in [
        ComplexityTier::Simple,
        ComplexityTier::Moderate,
        ComplexityTier::Complex,
        ComplexityTier::VeryComplex,
    ] {
        let temp = tempfile::tempdir().expect("tempdir");
        let adapter = FnBuildAdapter::new(|req| {
            ScriptedBuild::failure(&format!(
                "App.swift:{}:1: error: unterminated string literal",
                req.attempt
            ))
        });
        let orchestrator =
            Orchestrator::new(test_config(temp.path()), adapter, DisabledFixService)
                .expect("new");
        let source = (1..=8)
            .map(|n| format!("let s{n} = \"open"))
            .collect::<Vec<_>>()
            .join("\n");
        let result = orchestrator
            .run_recovery(
                tree([("App.swift", source.as_str())]),
                profile(tier),
                &CancelSignal::new(),
            )
            .expect("run");

        assert_eq!(result.attempt_budget, 3 + tier.level());
        assert!(
            result.attempts_used <= result.attempt_budget,
            "{tier:?}: {} > {}",
            result.attempts_used,
            result.attempt_budget
        );
        assert_eq!(result.history.len(), result.attempts_used as usize);
        assert_eq!(result.status, RecoveryStatus::Exhausted);
    }
}

/// Pattern fixes keep applying but never clear the build.
///
/// The pass before the last build must substitute the skeleton instead of
/// spending the final build on another pattern fix.
#[test]
fn last_build_is_reserved_for_the_fallback() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = test_config(temp.path());
    let skeleton = SourceTree::from_files(config.fallback.files.clone()).expect("skeleton");
    let expected = skeleton.clone();
    let adapter = FnBuildAdapter::new(move |req| {
        if *req.tree == skeleton {
            ScriptedBuild::success()
        } else {
            ScriptedBuild::failure(&format!(
                "App.swift:{}:1: error: unterminated string literal",
                req.attempt
            ))
        }
    });
    let orchestrator = Orchestrator::new(config, adapter, DisabledFixService).expect("new");
    let source = (1..=8)
        .map(|n| format!("let s{n} = \"open"))
        .collect::<Vec<_>>()
        .join("\n");

    let result = orchestrator
        .run_recovery(
            tree([("App.swift", source.as_str())]),
            profile(ComplexityTier::Simple),
            &CancelSignal::new(),
        )
        .expect("run");

    assert_eq!(result.status, RecoveryStatus::FallbackApplied);
    assert_eq!(result.attempts_used, 3);
    let applied: Vec<Option<&str>> = result
        .history
        .iter()
        .map(|r| r.strategy_applied.as_deref())
        .collect();
    assert_eq!(
        applied,
        [
            Some(PATTERN_STRATEGY_NAME),
            Some(FALLBACK_STRATEGY_NAME),
            None
        ]
    );
    assert_eq!(result.final_source_tree, expected);
}
