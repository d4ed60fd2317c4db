//! Pattern compilation for `like`, `rlike` and `irlike`
//!
//! Patterns are compiled at most once per evaluation. Compile failures are
//! cached too; every use of a malformed pattern still reports a warning.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};

/// How a pattern string is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    /// Shell glob (`like`, `matches`)
    Glob,
    /// Regular expression (`rlike`, `regex`)
    Regex,
    /// Case-insensitive regular expression (`irlike`)
    RegexNoCase,
}

/// Cache of compiled patterns
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: HashMap<(PatternKind, String), Result<Regex, String>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile (or fetch) a pattern; the error is a human-readable reason
    pub fn get(&mut self, kind: PatternKind, pattern: &str) -> Result<Regex, String> {
        self.compiled
            .entry((kind, pattern.to_string()))
            .or_insert_with(|| compile(kind, pattern))
            .clone()
    }

    /// Number of distinct patterns seen
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

fn compile(kind: PatternKind, pattern: &str) -> Result<Regex, String> {
    let (source, case_insensitive) = match kind {
        PatternKind::Glob => (glob_to_regex(pattern)?, false),
        PatternKind::Regex => (pattern.to_string(), false),
        PatternKind::RegexNoCase => (pattern.to_string(), true),
    };
    RegexBuilder::new(&source)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| e.to_string())
}

/// Translate a shell glob into an anchored regex.
///
/// `*` matches any run of characters (newlines included), `?` one character,
/// `[abc]` / `[!abc]` a character class, and `\x` the literal `x`.
pub fn glob_to_regex(glob: &str) -> Result<String, String> {
    let mut out = String::from("(?s)^");
    let mut chars = glob.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(next) => out.push_str(&regex::escape(&next.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('!' | '^')) {
                    chars.next();
                    out.push('^');
                }
                // A leading ']' is a literal member of the class
                if chars.peek() == Some(&']') {
                    chars.next();
                    out.push_str(r"\]");
                }
                let mut closed = false;
                for member in chars.by_ref() {
                    match member {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | '&' | '~' | '^' => {
                            out.push('\\');
                            out.push(member);
                        }
                        other => out.push(other),
                    }
                }
                if !closed {
                    return Err(format!("unclosed character class in pattern '{}'", glob));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(pattern: &str, text: &str) -> bool {
        PatternCache::new()
            .get(PatternKind::Glob, pattern)
            .unwrap()
            .is_match(text)
    }

    #[test]
    fn test_glob_wildcards() {
        assert!(glob("foo*", "foobar"));
        assert!(glob("*bar", "foobar"));
        assert!(glob("f?o", "foo"));
        assert!(!glob("f?o", "fooo"));
        assert!(glob("*", ""));
        assert!(glob("a*c", "a\nb\nc"));
    }

    #[test]
    fn test_glob_is_anchored_and_case_sensitive() {
        assert!(!glob("foo", "xfoo"));
        assert!(!glob("foo", "FOO"));
    }

    #[test]
    fn test_glob_classes() {
        assert!(glob("[abc]x", "bx"));
        assert!(!glob("[abc]x", "dx"));
        assert!(glob("[!abc]x", "dx"));
        assert!(glob("[a-c]", "b"));
        assert!(glob("[]]", "]"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        assert!(glob("a.b", "a.b"));
        assert!(!glob("a.b", "axb"));
        assert!(glob("(x)+", "(x)+"));
        assert!(glob(r"\*", "*"));
        assert!(!glob(r"\*", "x"));
    }

    #[test]
    fn test_unclosed_class_is_an_error() {
        assert!(glob_to_regex("[abc").is_err());
        assert!(PatternCache::new().get(PatternKind::Glob, "[abc").is_err());
    }

    #[test]
    fn test_regex_kinds() {
        let mut cache = PatternCache::new();
        assert!(cache.get(PatternKind::Regex, "^a+$").unwrap().is_match("aaa"));
        assert!(!cache.get(PatternKind::Regex, "^a+$").unwrap().is_match("AAA"));
        assert!(cache.get(PatternKind::RegexNoCase, "^a+$").unwrap().is_match("AAA"));
        assert!(cache.get(PatternKind::Regex, "(unclosed").is_err());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_failures_are_cached() {
        let mut cache = PatternCache::new();
        let first = cache.get(PatternKind::Regex, "[");
        let second = cache.get(PatternKind::Regex, "[");
        assert_eq!(first.err(), second.err());
        assert_eq!(cache.len(), 1);
    }
}
