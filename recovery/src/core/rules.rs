//! Data-driven classification rules.
//!
//! Each rule maps a compiler message shape to a [`Category`] and, optionally,
//! to a deterministic [`Rewrite`] the pattern fixer knows how to apply. Adding
//! a new error family means adding a row here (or a `[[rules]]` entry in the
//! config file), never a new branch in the classifier.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::Category;

/// Deterministic rewrite attached to a rule. Applied by the pattern fixer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rewrite {
    /// Close a string literal left open at the end of the reported line.
    CloseStringLiteral,
    /// Turn `'text'` literals on the reported line into `"text"`.
    NormalizeQuotes,
    /// Rename the captured identifier through the reserved-name table.
    RenameReserved,
    /// Drop a `#Preview { ... }` block containing the reported line.
    RemovePreviewBlock,
    /// Add `import <module>` to the reported file.
    InsertImport { module: String },
    /// Add a `default:` arm to the `switch` on the reported line.
    AddDefaultCase,
    /// Replace deprecated spellings through the deprecation table.
    ReplaceDeprecated,
}

/// Serializable rule definition, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    /// Regex matched against the diagnostic message. An `ident` capture group,
    /// when present, names the offending identifier.
    pub pattern: String,
    pub category: Category,
    #[serde(default)]
    pub rewrite: Option<Rewrite>,
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub regex: Regex,
    pub category: Category,
    pub rewrite: Option<Rewrite>,
}

/// A rule that matched a message, with its extracted identifier.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    pub rule: &'a CompiledRule,
    pub ident: Option<&'a str>,
}

/// Ordered rule table. The first matching rule wins.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<CompiledRule>,
}

static BUILTIN: LazyLock<RuleTable> = LazyLock::new(|| {
    RuleTable::compile(&builtin_specs()).expect("builtin classifier rules should compile")
});

impl RuleTable {
    pub fn builtin() -> &'static RuleTable {
        &BUILTIN
    }

    /// Compile `extra` rules ahead of the built-in table.
    pub fn with_extra(extra: &[RuleSpec]) -> Result<Self> {
        let mut specs = extra.to_vec();
        specs.extend(builtin_specs());
        Self::compile(&specs)
    }

    pub fn compile(specs: &[RuleSpec]) -> Result<Self> {
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(anyhow!("classifier rule name must be non-empty"));
            }
            let regex = Regex::new(&spec.pattern)
                .map_err(|err| anyhow!("invalid pattern for rule '{}': {err}", spec.name))?;
            rules.push(CompiledRule {
                name: spec.name.clone(),
                regex,
                category: spec.category,
                rewrite: spec.rewrite.clone(),
            });
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the first rule matching `message`.
    pub fn find<'a>(&'a self, message: &'a str) -> Option<RuleMatch<'a>> {
        self.rules.iter().find_map(|rule| {
            let caps = rule.regex.captures(message)?;
            Some(RuleMatch {
                rule,
                ident: caps.name("ident").map(|m| m.as_str()),
            })
        })
    }
}

fn spec(name: &str, pattern: &str, category: Category, rewrite: Option<Rewrite>) -> RuleSpec {
    RuleSpec {
        name: name.to_string(),
        pattern: pattern.to_string(),
        category,
        rewrite,
    }
}

/// Built-in rules for Swift-style compiler output.
pub fn builtin_specs() -> Vec<RuleSpec> {
    vec![
        spec(
            "unterminated_string",
            r"unterminated string literal",
            Category::StringLiteralMalformed,
            Some(Rewrite::CloseStringLiteral),
        ),
        spec(
            "single_quoted_string",
            r#"single-quoted string literal found, use '"'"#,
            Category::StringLiteralMalformed,
            Some(Rewrite::NormalizeQuotes),
        ),
        spec(
            "multiline_string_layout",
            r"multi-line string literal (?:content|closing delimiter) must",
            Category::StringLiteralMalformed,
            None,
        ),
        spec(
            "reserved_redeclaration",
            r"invalid redeclaration of '(?P<ident>\w+)'",
            Category::ReservedIdentifierConflict,
            Some(Rewrite::RenameReserved),
        ),
        spec(
            "ambiguous_type_lookup",
            r"'(?P<ident>\w+)' is ambiguous for type lookup",
            Category::ReservedIdentifierConflict,
            Some(Rewrite::RenameReserved),
        ),
        spec(
            "keyword_as_identifier",
            r"keyword '(?P<ident>\w+)' cannot be used as an identifier",
            Category::ReservedIdentifierConflict,
            None,
        ),
        spec(
            "combine_symbol",
            r"cannot find (?:type )?'(?P<ident>ObservableObject|Published|AnyCancellable|PassthroughSubject|CurrentValueSubject)' in scope",
            Category::MissingImport,
            Some(Rewrite::InsertImport {
                module: "Combine".to_string(),
            }),
        ),
        spec(
            "missing_type",
            r"cannot find type '(?P<ident>\w+)' in scope",
            Category::MissingImport,
            Some(Rewrite::RemovePreviewBlock),
        ),
        spec(
            "missing_symbol",
            r"cannot find '(?P<ident>\w+)' in scope",
            Category::MissingImport,
            Some(Rewrite::RemovePreviewBlock),
        ),
        spec(
            "no_such_module",
            r"no such module '(?P<ident>[\w.]+)'",
            Category::MissingImport,
            None,
        ),
        spec(
            "protocol_conformance",
            r"type '(?P<ident>\w+)' does not conform to protocol '\w+'",
            Category::ProtocolConformanceMissing,
            None,
        ),
        spec(
            "deprecated_api",
            r"'(?P<ident>[\w.]+)(?:\([^']*\))?' (?:was deprecated|is deprecated|is unavailable|has been renamed)",
            Category::DeprecatedApiUsage,
            Some(Rewrite::ReplaceDeprecated),
        ),
        spec(
            "non_exhaustive_switch",
            r"switch must be exhaustive",
            Category::ExhaustivenessMissing,
            Some(Rewrite::AddDefaultCase),
        ),
        spec(
            "actor_isolation",
            r"(?:actor-isolated .* (?:from|in) a (?:nonisolated|synchronous)|risks causing data races|non-sendable type|is not concurrency-safe)",
            Category::ConcurrencyIsolationViolation,
            None,
        ),
        spec(
            "syntax",
            r"^(?:expected |consecutive statements on a line|extraneous '|unexpected '|expressions are not allowed at the top level)",
            Category::SyntaxError,
            None,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_compiles() {
        assert_eq!(RuleTable::builtin().len(), builtin_specs().len());
    }

    #[test]
    fn find_extracts_identifier() {
        let m = RuleTable::builtin()
            .find("invalid redeclaration of 'Task'")
            .expect("match");
        assert_eq!(m.rule.category, Category::ReservedIdentifierConflict);
        assert_eq!(m.ident, Some("Task"));
        assert_eq!(m.rule.rewrite, Some(Rewrite::RenameReserved));
    }

    #[test]
    fn specific_import_rule_wins_over_generic_missing_type() {
        let m = RuleTable::builtin()
            .find("cannot find type 'ObservableObject' in scope")
            .expect("match");
        assert_eq!(m.rule.name, "combine_symbol");
    }

    #[test]
    fn extra_rules_are_consulted_first() {
        let table = RuleTable::with_extra(&[spec(
            "custom_syntax",
            r"unterminated string literal",
            Category::SyntaxError,
            None,
        )])
        .expect("compile");
        let m = table.find("unterminated string literal").expect("match");
        assert_eq!(m.rule.name, "custom_syntax");
        assert_eq!(table.len(), builtin_specs().len() + 1);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = RuleTable::compile(&[spec("bad", r"(", Category::Unknown, None)]).unwrap_err();
        assert!(err.to_string().contains("rule 'bad'"));
    }

    #[test]
    fn rule_spec_parses_from_toml() {
        let raw = r#"
name = "needs_import"
pattern = "cannot find 'URLSession' in scope"
category = "missing_import"

[rewrite]
kind = "insert_import"
module = "Foundation"
"#;
        let parsed: RuleSpec = toml::from_str(raw).expect("parse");
        assert_eq!(parsed.category, Category::MissingImport);
        assert_eq!(
            parsed.rewrite,
            Some(Rewrite::InsertImport {
                module: "Foundation".to_string()
            })
        );
    }
}
