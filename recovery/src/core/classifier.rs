//! Deterministic classification of raw compiler output.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::rules::RuleTable;
use crate::core::types::{Category, Diagnostic, Severity};

static LOCATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>[^:\s][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?P<sev>fatal error|error|warning|note|remark):\s*(?P<msg>.+)$",
    )
    .expect("located diagnostic regex should compile")
});

static FILELESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<sev>fatal error|error|warning):\s*(?P<msg>.+)$")
        .expect("file-less diagnostic regex should compile")
});

/// Parse raw compiler output into structured diagnostics.
///
/// - `file:line[:col]: severity: message` lines become located diagnostics.
/// - `severity: message` lines become file-less diagnostics.
/// - Any other line (source echoes, caret markers, build chatter) is skipped.
///
/// The message is categorized by the first matching rule in `rules`; unmatched
/// messages are `Unknown`. Repeats are kept: deduplication is the loop
/// guard's job.
pub fn classify(raw: &str, rules: &RuleTable) -> Vec<Diagnostic> {
    raw.lines()
        .filter_map(|line| parse_line(line.trim_end()))
        .map(|parsed| {
            let category = rules
                .find(&parsed.message)
                .map(|m| m.rule.category)
                .unwrap_or(Category::Unknown);
            Diagnostic {
                file: parsed.file,
                line: parsed.line,
                column: parsed.column,
                raw_message: parsed.message,
                category,
                severity: parsed.severity,
            }
        })
        .collect()
}

struct ParsedLine {
    file: String,
    line: u32,
    column: u32,
    severity: Severity,
    message: String,
}

fn parse_line(line: &str) -> Option<ParsedLine> {
    let trimmed = line.trim_start();
    if let Some(caps) = LOCATED_RE.captures(trimmed) {
        let severity = Severity::parse(&caps["sev"])?;
        let file = caps["file"].trim();
        let file = file.strip_prefix("./").unwrap_or(file).to_string();
        return Some(ParsedLine {
            file,
            line: caps["line"].parse().unwrap_or(0),
            column: caps
                .name("col")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
            severity,
            message: caps["msg"].trim().to_string(),
        });
    }
    let caps = FILELESS_RE.captures(trimmed)?;
    Some(ParsedLine {
        file: String::new(),
        line: 0,
        column: 0,
        severity: Severity::parse(&caps["sev"])?,
        message: caps["msg"].trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_builtin(raw: &str) -> Vec<Diagnostic> {
        classify(raw, RuleTable::builtin())
    }

    #[test]
    fn classifies_located_diagnostic() {
        let raw = "Sources/App.swift:4:19: error: unterminated string literal\n    let s = \"oops\n                  ^\n";
        let diags = classify_builtin(raw);
        assert_eq!(diags.len(), 1);
        let d = &diags[0];
        assert_eq!(d.file, "Sources/App.swift");
        assert_eq!((d.line, d.column), (4, 19));
        assert_eq!(d.category, Category::StringLiteralMalformed);
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn unmatched_messages_are_unknown() {
        let diags = classify_builtin("App.swift:1:1: error: the compiler is sad today");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].category, Category::Unknown);
    }

    #[test]
    fn non_diagnostic_lines_are_skipped() {
        let raw = "Compiling App\n[1/3] Building\n    ^~~~\nBuild failed\n";
        assert!(classify_builtin(raw).is_empty());
    }

    #[test]
    fn fileless_and_columnless_diagnostics_parse() {
        let raw = "error: no such module 'Charts'\n./Model.swift:12: warning: 'NavigationView' was deprecated in iOS 16.0";
        let diags = classify_builtin(raw);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].file, "");
        assert_eq!(diags[0].category, Category::MissingImport);
        assert_eq!(diags[1].file, "Model.swift");
        assert_eq!(diags[1].column, 0);
        assert_eq!(diags[1].severity, Severity::Warning);
        assert_eq!(diags[1].category, Category::DeprecatedApiUsage);
    }

    #[test]
    fn repeated_root_cause_is_not_deduplicated() {
        let raw = "\
A.swift:1:9: error: cannot find type 'Store' in scope
A.swift:5:9: error: cannot find type 'Store' in scope
A.swift:9:9: error: cannot find type 'Store' in scope";
        let diags = classify_builtin(raw);
        assert_eq!(diags.len(), 3);
        assert!(diags.iter().all(|d| d.category == Category::MissingImport));
    }

    #[test]
    fn covers_each_builtin_family() {
        let raw = "\
A.swift:1:1: error: expected '}' in struct
A.swift:2:1: error: invalid redeclaration of 'Task'
A.swift:3:1: error: type 'Item' does not conform to protocol 'Identifiable'
A.swift:4:1: error: switch must be exhaustive
A.swift:5:1: error: main actor-isolated property 'count' can not be referenced from a nonisolated context
A.swift:6:1: error: single-quoted string literal found, use '\"'";
        let categories: Vec<Category> = classify_builtin(raw).iter().map(|d| d.category).collect();
        assert_eq!(
            categories,
            vec![
                Category::SyntaxError,
                Category::ReservedIdentifierConflict,
                Category::ProtocolConformanceMissing,
                Category::ExhaustivenessMissing,
                Category::ConcurrencyIsolationViolation,
                Category::StringLiteralMalformed,
            ]
        );
    }
}
