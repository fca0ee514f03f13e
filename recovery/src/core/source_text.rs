//! Lightweight lexical helpers over source text.
//!
//! These are not a parser for any language. They understand just enough of
//! C-family syntax (string literals, `//` and `/* */` comments, bracket
//! nesting) to anchor deterministic rewrites and to sanity-check generated
//! files before they are committed.

use std::sync::LazyLock;

use regex::Regex;

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:@\w+\s+)*import\s+(?:(?:struct|class|enum|protocol|func|var|typealias)\s+)?(?P<module>[\w]+)")
        .expect("import regex should compile")
});

/// Count `"` characters on a line that are not escaped with a backslash.
pub fn count_unescaped_quotes(line: &str) -> usize {
    let mut count = 0;
    let mut escaped = false;
    for ch in line.chars() {
        match ch {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => count += 1,
            _ => escaped = false,
        }
        if ch != '\\' {
            escaped = false;
        }
    }
    count
}

/// Byte offset of the last unescaped `"` on a line.
pub fn last_unescaped_quote(line: &str) -> Option<usize> {
    let mut last = None;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        if ch == '"' && !escaped {
            last = Some(idx);
        }
        escaped = ch == '\\' && !escaped;
    }
    last
}

/// Code-level characters of `source`, with string literal and comment
/// contents replaced by spaces. Newlines are kept so line numbers survive.
fn code_chars(source: &str) -> Vec<char> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        Str,
        MultiStr,
        LineComment,
        BlockComment,
    }
    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut state = State::Code;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        let triple_quote = ch == '"' && next == Some('"') && chars.get(i + 2) == Some(&'"');
        match state {
            State::Code => match (ch, next) {
                ('/', Some('/')) => {
                    state = State::LineComment;
                    out.push(' ');
                }
                ('/', Some('*')) => {
                    state = State::BlockComment;
                    out.extend([' ', ' ']);
                    i += 1;
                }
                ('"', _) if triple_quote => {
                    state = State::MultiStr;
                    out.extend(['"', ' ', ' ']);
                    i += 2;
                }
                ('"', _) => {
                    state = State::Str;
                    out.push('"');
                }
                _ => out.push(ch),
            },
            // `"""` literals span lines and may hold bare quotes.
            State::MultiStr => match ch {
                '\\' => {
                    out.push(' ');
                    if let Some(n) = next {
                        out.push(if n == '\n' { '\n' } else { ' ' });
                        i += 1;
                    }
                }
                '"' if triple_quote => {
                    state = State::Code;
                    out.extend([' ', ' ', '"']);
                    i += 2;
                }
                '\n' => out.push('\n'),
                _ => out.push(' '),
            },
            State::Str => match ch {
                '\\' => {
                    out.push(' ');
                    if let Some(n) = next {
                        out.push(if n == '\n' { '\n' } else { ' ' });
                        i += 1;
                    }
                }
                '"' => {
                    state = State::Code;
                    out.push('"');
                }
                '\n' => {
                    // Unterminated on this line; multi-line literals stay open.
                    out.push('\n');
                }
                _ => out.push(' '),
            },
            State::LineComment => {
                if ch == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if ch == '*' && next == Some('/') {
                    state = State::Code;
                    out.extend([' ', ' ']);
                    i += 1;
                } else {
                    out.push(if ch == '\n' { '\n' } else { ' ' });
                }
            }
        }
        i += 1;
    }
    out
}

/// True when `()`, `[]` and `{}` nest correctly outside literals and comments,
/// and no string literal is left open at the end of the text.
pub fn delimiters_balanced(source: &str) -> bool {
    let mut stack = Vec::new();
    let mut quotes = 0usize;
    for ch in code_chars(source) {
        match ch {
            '(' | '[' | '{' => stack.push(ch),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return false;
                }
            }
            '"' => quotes += 1,
            _ => {}
        }
    }
    stack.is_empty() && quotes % 2 == 0
}

/// Given 0-indexed `start_line`, find the 0-indexed line holding the `}` that
/// closes the first `{` opened at or after `start_line`.
pub fn block_end(lines: &[&str], start_line: usize) -> Option<usize> {
    let text = lines.get(start_line..)?.join("\n");
    let mut depth = 0usize;
    let mut opened = false;
    let mut line = start_line;
    for ch in code_chars(&text) {
        match ch {
            '\n' => line += 1,
            '{' => {
                depth += 1;
                opened = true;
            }
            '}' if opened => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(line);
                }
            }
            _ => {}
        }
    }
    None
}

/// Leading whitespace of a line.
pub fn indentation(line: &str) -> &str {
    let trimmed = line.trim_start();
    &line[..line.len() - trimmed.len()]
}

/// Modules imported by `source`.
pub fn imported_modules(source: &str) -> Vec<String> {
    IMPORT_RE
        .captures_iter(source)
        .map(|caps| caps["module"].to_string())
        .collect()
}

/// Insert `import <module>` after the last existing import (or at the top).
/// Returns `None` when the module is already imported.
pub fn insert_import(source: &str, module: &str) -> Option<String> {
    if imported_modules(source).iter().any(|m| m == module) {
        return None;
    }
    let lines: Vec<&str> = source.lines().collect();
    let insert_at = lines
        .iter()
        .rposition(|line| IMPORT_RE.is_match(line))
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let mut out: Vec<String> = lines.iter().map(|l| (*l).to_string()).collect();
    out.insert(insert_at, format!("import {module}"));
    Some(join_lines(out, source.ends_with('\n')))
}

/// Join lines, restoring the trailing newline when the original had one.
pub fn join_lines(lines: Vec<String>, trailing_newline: bool) -> String {
    let mut joined = lines.join("\n");
    if trailing_newline {
        joined.push('\n');
    }
    joined
}

/// Strip a surrounding Markdown code fence (```lang ... ```), if present.
pub fn unwrap_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return content;
    };
    let Some(body_start) = rest.find('\n') else {
        return content;
    };
    let body = &rest[body_start + 1..];
    match body.trim_end().strip_suffix("```") {
        Some(inner) => inner,
        None => content,
    }
}
