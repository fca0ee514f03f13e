//! Deterministic rewrites keyed by the classifier's rule table.
//!
//! Each rule may carry a [`Rewrite`]. This strategy applies the rewrites of
//! every known-category error it is handed and declines when the result is
//! identical to the input, which makes it idempotent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::core::rules::{Rewrite, RuleTable};
use crate::core::source_text::{
    block_end, count_unescaped_quotes, indentation, insert_import, join_lines,
    last_unescaped_quote,
};
use crate::core::types::{Diagnostic, FixCandidate, SourceTree};
use crate::strategies::{PassContext, RecoveryStrategy, changed_only};

pub const PATTERN_STRATEGY_NAME: &str = "pattern";

const PATTERN_CONFIDENCE: f32 = 0.9;

/// Framework names that user code must not redeclare, and their replacements.
const RESERVED_RENAMES: &[(&str, &str)] = &[
    ("Task", "AppTask"),
    ("Color", "AppColor"),
    ("Image", "AppImage"),
    ("Text", "AppText"),
    ("Data", "AppData"),
    ("View", "AppView"),
    ("State", "AppState"),
    ("Binding", "AppBinding"),
    ("Timer", "AppTimer"),
    ("Notification", "AppNotification"),
    ("Category", "ItemCategory"),
];

static DEPRECATED_REPLACEMENTS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bNavigationView\b", "NavigationStack"),
        (r"\.foregroundColor\(", ".foregroundStyle("),
        (r"\.navigationBarTitle\(", ".navigationTitle("),
        (r"\.edgesIgnoringSafeArea\(\.all\)", ".ignoresSafeArea()"),
        (r"\.accentColor\(", ".tint("),
        (
            r"\.autocapitalization\(\.none\)",
            ".textInputAutocapitalization(.never)",
        ),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("deprecation regex should compile"),
            replacement,
        )
    })
    .collect()
});

static PREVIEW_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:#Preview\b|struct\s+\w+\s*:\s*PreviewProvider\b)")
        .expect("preview regex should compile")
});

static SINGLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'((?:[^'\\]|\\.)*)'").expect("single quote regex should compile")
});

/// Rewrites anchored to a reported line. Ordered so edits on one line apply
/// in a stable sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LineEdit {
    CloseString,
    NormalizeQuotes,
    AddDefault,
    RemovePreview,
}

#[derive(Debug, Default)]
struct Plan {
    lines: BTreeMap<String, BTreeSet<(u32, LineEdit)>>,
    imports: BTreeSet<(String, String)>,
    deprecated: BTreeSet<String>,
    renames: BTreeSet<String>,
}

impl Plan {
    fn line_edit(&mut self, diag: &Diagnostic, edit: LineEdit) {
        if diag.line == 0 {
            return;
        }
        self.lines
            .entry(diag.file.clone())
            .or_default()
            .insert((diag.line, edit));
    }
}

pub struct PatternFixer<'a> {
    rules: &'a RuleTable,
}

impl<'a> PatternFixer<'a> {
    pub fn new(rules: &'a RuleTable) -> Self {
        Self { rules }
    }

    fn plan(&self, diagnostics: &[Diagnostic], tree: &SourceTree) -> Plan {
        let mut plan = Plan::default();
        for diag in diagnostics {
            if !diag.is_error() || !diag.category.is_known() {
                continue;
            }
            let Some(found) = self.rules.find(&diag.raw_message) else {
                continue;
            };
            let Some(rewrite) = &found.rule.rewrite else {
                continue;
            };
            match rewrite {
                Rewrite::RenameReserved => {
                    if let Some(ident) = found.ident {
                        plan.renames.insert(ident.to_string());
                    }
                }
                _ if !tree.contains(&diag.file) => {}
                Rewrite::InsertImport { module } => {
                    plan.imports.insert((diag.file.clone(), module.clone()));
                }
                Rewrite::ReplaceDeprecated => {
                    plan.deprecated.insert(diag.file.clone());
                }
                Rewrite::CloseStringLiteral => plan.line_edit(diag, LineEdit::CloseString),
                Rewrite::NormalizeQuotes => plan.line_edit(diag, LineEdit::NormalizeQuotes),
                Rewrite::AddDefaultCase => plan.line_edit(diag, LineEdit::AddDefault),
                Rewrite::RemovePreviewBlock => plan.line_edit(diag, LineEdit::RemovePreview),
            }
        }
        plan
    }
}

impl RecoveryStrategy for PatternFixer<'_> {
    fn name(&self) -> &str {
        PATTERN_STRATEGY_NAME
    }

    fn try_fix(
        &self,
        _ctx: &PassContext<'_>,
        diagnostics: &[Diagnostic],
        tree: &SourceTree,
    ) -> Option<FixCandidate> {
        let plan = self.plan(diagnostics, tree);
        let mut files = BTreeMap::new();

        // Line-anchored edits first, while reported line numbers still hold.
        for (path, edits) in &plan.lines {
            if let Some(original) = tree.get(path) {
                files.insert(path.clone(), apply_line_edits(original, edits));
            }
        }
        for (path, module) in &plan.imports {
            let current = current_content(&files, tree, path);
            if let Some(updated) = insert_import(&current, module) {
                files.insert(path.clone(), updated);
            }
        }
        for path in &plan.deprecated {
            let current = current_content(&files, tree, path);
            files.insert(path.clone(), replace_deprecated(&current));
        }
        for ident in &plan.renames {
            rename_reserved(ident, tree, &mut files);
        }

        let changes = changed_only(files, tree);
        if changes.is_empty() {
            debug!("no rewrite changed the tree");
            return None;
        }
        Some(FixCandidate::patch(
            PATTERN_STRATEGY_NAME,
            changes,
            PATTERN_CONFIDENCE,
        ))
    }
}

fn current_content(files: &BTreeMap<String, String>, tree: &SourceTree, path: &str) -> String {
    files
        .get(path)
        .cloned()
        .or_else(|| tree.get(path).map(str::to_string))
        .unwrap_or_default()
}

fn apply_line_edits(original: &str, edits: &BTreeSet<(u32, LineEdit)>) -> String {
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();
    let mut removed: Vec<(usize, usize)> = Vec::new();

    // Bottom-up, so an edit never shifts the lines of an edit still pending.
    for &(line, edit) in edits.iter().rev() {
        let idx = line as usize - 1;
        if idx >= lines.len() || removed.iter().any(|&(s, e)| (s..=e).contains(&idx)) {
            continue;
        }
        match edit {
            LineEdit::CloseString => {
                if let Some(fixed) = close_string_literal(&lines[idx]) {
                    lines[idx] = fixed;
                }
            }
            LineEdit::NormalizeQuotes => {
                lines[idx] = normalize_quotes(&lines[idx]);
            }
            LineEdit::AddDefault => {
                add_default_case(&mut lines, idx);
            }
            LineEdit::RemovePreview => {
                let block = {
                    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
                    preview_block_around(&refs, idx)
                };
                if let Some((start, end)) = block {
                    lines.drain(start..=end);
                    removed.push((start, end));
                }
            }
        }
    }
    join_lines(lines, original.ends_with('\n'))
}

/// Close the string literal left open on `line`, placing the quote before any
/// trailing closers that belong to the surrounding call.
fn close_string_literal(line: &str) -> Option<String> {
    if line.contains("\"\"\"") || count_unescaped_quotes(line) % 2 == 0 {
        return None;
    }
    let quote = last_unescaped_quote(line)?;
    let open = unmatched_openers(&line[..quote]);
    let tail = &line[quote + 1..];

    let mut insert_at = tail.len();
    let mut closers = 0;
    for (idx, ch) in tail.char_indices().rev() {
        match ch {
            ')' | ']' if closers < open => {
                closers += 1;
                insert_at = idx;
            }
            '{' | ',' | ';' => insert_at = idx,
            c if c.is_whitespace() => insert_at = idx,
            _ => break,
        }
    }
    let split = quote + 1 + insert_at;
    Some(format!("{}\"{}", &line[..split], &line[split..]))
}

fn unmatched_openers(prefix: &str) -> usize {
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for ch in prefix.chars() {
        if in_str {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }
        match ch {
            '"' => in_str = true,
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

fn normalize_quotes(line: &str) -> String {
    map_code_segments(line, |segment| {
        SINGLE_QUOTED
            .replace_all(segment, |caps: &regex::Captures<'_>| format!("\"{}\"", &caps[1]))
            .into_owned()
    })
}

/// Insert `default: break` before the closing brace of the `switch` on `idx`.
fn add_default_case(lines: &mut Vec<String>, idx: usize) -> bool {
    let (end, indent) = {
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        if !refs[idx].contains("switch") {
            return false;
        }
        let Some(end) = block_end(&refs, idx) else {
            return false;
        };
        if end == idx || !refs[end].trim_start().starts_with('}') {
            return false;
        }
        let has_default = refs[idx..end].iter().any(|l| {
            let t = l.trim_start();
            t.starts_with("default:") || t.starts_with("@unknown default")
        });
        if has_default {
            return false;
        }
        (end, indentation(refs[end]).to_string())
    };
    lines.insert(end, format!("{indent}default:"));
    lines.insert(end + 1, format!("{indent}    break"));
    true
}

fn preview_block_around(lines: &[&str], idx: usize) -> Option<(usize, usize)> {
    let start = (0..=idx).rev().find(|&i| PREVIEW_START.is_match(lines[i]))?;
    let end = block_end(lines, start)?;
    (end >= idx).then_some((start, end))
}

fn replace_deprecated(source: &str) -> String {
    map_code(source, |segment| {
        DEPRECATED_REPLACEMENTS
            .iter()
            .fold(segment.to_string(), |acc, (regex, replacement)| {
                regex.replace_all(&acc, *replacement).into_owned()
            })
    })
}

fn reserved_replacement(ident: &str) -> Option<&'static str> {
    RESERVED_RENAMES
        .iter()
        .find(|(name, _)| *name == ident)
        .map(|(_, replacement)| *replacement)
}

fn declares_type(tree: &SourceTree, name: &str) -> bool {
    let pattern = format!(
        r"\b(?:struct|class|enum|protocol|actor|typealias)\s+{}\b",
        regex::escape(name)
    );
    let Ok(decl) = Regex::new(&pattern) else {
        return false;
    };
    tree.iter().any(|(_, content)| decl.is_match(content))
}

/// Rename a user-declared type that shadows a framework name, in every file
/// that references it.
fn rename_reserved(ident: &str, tree: &SourceTree, files: &mut BTreeMap<String, String>) {
    let Some(replacement) = reserved_replacement(ident) else {
        debug!(ident, "no reserved-name replacement known");
        return;
    };
    if !declares_type(tree, ident) {
        debug!(ident, "reserved name is not declared in the tree");
        return;
    }
    if declares_type(tree, replacement) {
        warn!(ident, replacement, "replacement name already declared; skipping rename");
        return;
    }
    let Ok(usage) = Regex::new(&format!(r"(^|[^.\w]){}\b", regex::escape(ident))) else {
        return;
    };
    let substitution = format!("${{1}}{replacement}");
    for path in tree.paths() {
        let current = current_content(files, tree, path);
        let renamed = map_code(&current, |segment| {
            usage.replace_all(segment, substitution.as_str()).into_owned()
        });
        if renamed != current {
            files.insert(path.to_string(), renamed);
        }
    }
}

fn map_code(source: &str, f: impl Fn(&str) -> String) -> String {
    let lines = source
        .lines()
        .map(|line| map_code_segments(line, &f))
        .collect();
    join_lines(lines, source.ends_with('\n'))
}

/// Apply `f` to the parts of `line` outside double-quoted string literals.
fn map_code_segments(line: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(line.len());
    let mut seg_start = 0;
    let mut in_str = false;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        if in_str {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                out.push_str(&line[seg_start..=idx]);
                seg_start = idx + 1;
                in_str = false;
            }
        } else if ch == '"' {
            out.push_str(&f(&line[seg_start..idx]));
            seg_start = idx;
            in_str = true;
        }
    }
    let rest = &line[seg_start..];
    if in_str {
        out.push_str(rest);
    } else {
        out.push_str(&f(rest));
    }
    out
}
