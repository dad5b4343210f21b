//! Source-level denylist scan.
//!
//! The scan is textual: it matches constructs whether or not they are
//! reachable, including inside strings and comments.

use std::sync::LazyLock;

use regex::Regex;

/// Dynamic code execution, dynamic import, compilation and raw file access.
pub const FORBIDDEN_CALLS: &[&str] = &["eval", "exec", "compile", "__import__", "open"];

static FORBIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(eval|exec|compile|__import__|open)\s*\(").expect("forbidden-call regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenUse {
    pub construct: String,
    /// 1-based.
    pub line: usize,
    /// 1-based, in characters.
    pub column: usize,
}

pub fn is_forbidden(name: &str) -> bool {
    FORBIDDEN_CALLS.contains(&name)
}

/// Every forbidden call in `source`, in source order.
///
/// Whitespace between the name and the parenthesis may span lines; the
/// position reported is that of the name.
pub fn scan(source: &str) -> Vec<ForbiddenUse> {
    FORBIDDEN_RE
        .captures_iter(source)
        .filter_map(|captures| captures.get(1))
        .map(|name| {
            let before = &source[..name.start()];
            let line_start = before.rfind('\n').map_or(0, |newline| newline + 1);
            ForbiddenUse {
                construct: format!("{}(", name.as_str()),
                line: before.matches('\n').count() + 1,
                column: before[line_start..].chars().count() + 1,
            }
        })
        .collect()
}
