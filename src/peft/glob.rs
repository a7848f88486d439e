//! Shell-style glob patterns for layer names
//!
//! Same semantics as POSIX `fnmatch` without path awareness: `*` matches any
//! run of characters (dots included), `?` one character, `[seq]` a character
//! class and `[!seq]` its negation. Matching is case sensitive and anchored to
//! the whole name.

use crate::error::{Error, Result};
use regex::Regex;

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let translated = translate(pattern);
        let regex = Regex::new(&translated).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { pattern: pattern.to_string(), regex })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for GlobPattern {}

/// Compile a list of patterns, failing on the first malformed one.
pub fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<GlobPattern>> {
    patterns.iter().map(|p| GlobPattern::new(p.as_ref())).collect()
}

/// Whether any pattern matches; an empty list admits everything.
pub fn any_match(patterns: &[GlobPattern], name: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| p.matches(name))
}

/// Translate a glob into an anchored regex.
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push_str("^(?s:");

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => {
                // Collapse runs of '*'.
                while i < chars.len() && chars[i] == '*' {
                    i += 1;
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.push_str(&translate_class(&chars[i..end]));
                    i = end + 1;
                }
                None => out.push_str("\\["),
            },
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push_str(")$");
    out
}

/// Index of the `]` closing a class that opens just before `start`.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start;
    if j < chars.len() && chars[j] == '!' {
        j += 1;
    }
    // A leading ']' is a literal member.
    if j < chars.len() && chars[j] == ']' {
        j += 1;
    }
    while j < chars.len() && chars[j] != ']' {
        j += 1;
    }
    (j < chars.len()).then_some(j)
}

fn translate_class(body: &[char]) -> String {
    let mut out = String::from("[");
    let mut rest = body;
    if let Some(('!', tail)) = rest.split_first() {
        out.push('^');
        rest = tail;
    }
    for &c in rest {
        match c {
            '\\' | '[' | ']' | '^' | '&' | '~' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push(']');
    out
}
