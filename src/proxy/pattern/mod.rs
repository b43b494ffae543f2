//! Multi-strategy hostname/IP pattern matcher used by the deny engine.
//!
//! Rule kinds and classification order mirror the original dnscrypt-proxy-
//! derived matcher: suffix, prefix, substring, glob, exact, tried in that
//! order by `eval`.

use crate::error::{ProxyError, Result};
use glob::Pattern as GlobPattern;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Prefix,
    Suffix,
    Substring,
    Glob,
    Exact,
}

fn is_glob_candidate(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    let last = chars.len().saturating_sub(1);
    chars
        .iter()
        .enumerate()
        .any(|(i, &c)| c == '?' || c == '[' || (c == '*' && i != 0 && i != last))
}

pub struct PatternMatcher<V> {
    prefixes: Vec<(String, Option<V>)>,
    /// Stored reversed, so a longest-prefix scan against a reversed query
    /// name realizes a longest-suffix match against the query name.
    suffixes: Vec<(String, Option<V>)>,
    substrings: Vec<String>,
    globs: Vec<String>,
    exact: HashMap<String, V>,
    indirect: HashMap<String, V>,
}

impl<V: Clone> Default for PatternMatcher<V> {
    fn default() -> Self {
        Self {
            prefixes: Vec::new(),
            suffixes: Vec::new(),
            substrings: Vec::new(),
            globs: Vec::new(),
            exact: HashMap::new(),
            indirect: HashMap::new(),
        }
    }
}

impl<V: Clone> PatternMatcher<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule_text: &str, val: Option<V>, line_no: usize) -> Result<()> {
        let leading_star = rule_text.starts_with('*');
        let trailing_star = rule_text.ends_with('*');
        let exact = rule_text.starts_with('=');

        let (kind, mut pattern) = if is_glob_candidate(rule_text) {
            if rule_text.len() < 2 || GlobPattern::new(rule_text).is_err() {
                return Err(ProxyError::SyntaxError { line: line_no });
            }
            (Kind::Glob, rule_text.to_string())
        } else if leading_star && trailing_star {
            if rule_text.len() < 3 {
                return Err(ProxyError::SyntaxError { line: line_no });
            }
            (Kind::Substring, rule_text[1..rule_text.len() - 1].to_string())
        } else if trailing_star {
            if rule_text.len() < 2 {
                return Err(ProxyError::SyntaxError { line: line_no });
            }
            (Kind::Prefix, rule_text[..rule_text.len() - 1].to_string())
        } else if exact {
            if rule_text.len() < 2 {
                return Err(ProxyError::SyntaxError { line: line_no });
            }
            (Kind::Exact, rule_text[1..].to_string())
        } else {
            let mut p = rule_text;
            if leading_star {
                p = &p[1..];
            }
            let p = p.strip_prefix('.').unwrap_or(p);
            (Kind::Suffix, p.to_string())
        };

        if pattern.is_empty() {
            // The original matcher only logs and keeps loading the rest of
            // the file for this case; no minimum length is documented for
            // a bare suffix pattern (e.g. a lone "." or "*") the way the
            // other kinds enforce above.
            log::error!("syntax error in block rule at line {line_no}");
            return Ok(());
        }
        pattern = pattern.to_lowercase();

        match kind {
            Kind::Substring => {
                if let Some(v) = val.clone() {
                    self.indirect.insert(pattern.clone(), v);
                }
                self.substrings.push(pattern);
            }
            Kind::Glob => {
                if let Some(v) = val.clone() {
                    self.indirect.insert(pattern.clone(), v);
                }
                self.globs.push(pattern);
            }
            Kind::Prefix => self.prefixes.push((pattern, val)),
            Kind::Suffix => self.suffixes.push((reverse(&pattern), val)),
            Kind::Exact => {
                if let Some(v) = val {
                    self.exact.insert(pattern, v);
                }
            }
        }
        Ok(())
    }

    /// Returns `(rejected, matched rule text, payload)`.
    pub fn eval(&self, name: &str) -> (bool, Option<String>, Option<V>) {
        if name.len() < 2 {
            return (false, None, None);
        }
        let name = &name.to_lowercase();
        let rev_name = reverse(name);

        if let Some((matched, xval)) = longest_prefix(&self.suffixes, &rev_name) {
            let boundary_hit = matched.len() == rev_name.len()
                || rev_name.as_bytes()[matched.len()] == b'.';
            if boundary_hit {
                return (true, Some(format!("*.{}", reverse(matched))), xval.clone());
            }
            // Retry one label up in the reversed name, reusing the outer
            // match's payload even though the retry may land on a
            // different suffix entry. Preserved from the original matcher.
            if let Some(i) = rev_name.rfind('.') {
                if i > 0 {
                    let p_name = &rev_name[..i];
                    if let Some((retry_match, _)) = longest_prefix(&self.suffixes, p_name) {
                        let retry_boundary = retry_match.len() == p_name.len()
                            || p_name.as_bytes()[retry_match.len()] == b'.';
                        if retry_boundary {
                            return (
                                true,
                                Some(format!("*.{}", reverse(retry_match))),
                                xval.clone(),
                            );
                        }
                    }
                }
            }
        }

        if let Some((matched, xval)) = longest_prefix(&self.prefixes, name) {
            return (true, Some(format!("{matched}*")), xval.clone());
        }

        for sub in &self.substrings {
            if name.contains(sub.as_str()) {
                return (
                    true,
                    Some(format!("*{sub}*")),
                    self.indirect.get(sub).cloned(),
                );
            }
        }

        for pat in &self.globs {
            if GlobPattern::new(pat).map(|p| p.matches(name)).unwrap_or(false) {
                return (true, Some(pat.clone()), self.indirect.get(pat).cloned());
            }
        }

        if let Some(v) = self.exact.get(name.as_str()) {
            return (true, Some(name.clone()), Some(v.clone()));
        }

        (false, None, None)
    }
}

fn longest_prefix<'a, V>(
    entries: &'a [(String, Option<V>)],
    key: &str,
) -> Option<(&'a str, &'a Option<V>)> {
    entries
        .iter()
        .filter(|(k, _)| key.starts_with(k.as_str()))
        .max_by_key(|(k, _)| k.len())
        .map(|(k, v)| (k.as_str(), v))
}

fn reverse(s: &str) -> String {
    s.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_deny_binds_on_label_boundary() {
        let mut m: PatternMatcher<()> = PatternMatcher::new();
        m.add(".ads.example", Some(()), 1).unwrap();

        assert!(m.eval("x.ads.example").0);
        assert!(m.eval("ads.example").0);
        assert!(!m.eval("example").0);
        // shares a character suffix but not on a label boundary
        assert!(!m.eval("notads.example").0);
    }

    #[test]
    fn exact_rule_requires_leading_equals() {
        let mut m: PatternMatcher<()> = PatternMatcher::new();
        m.add("=10.0.0.7", Some(()), 1).unwrap();
        assert!(m.eval("10.0.0.7").0);
        assert!(!m.eval("10.0.0.70").0);
    }

    #[test]
    fn prefix_and_substring_and_glob() {
        let mut m: PatternMatcher<()> = PatternMatcher::new();
        m.add("bad*", Some(()), 1).unwrap();
        m.add("*mid*", Some(()), 2).unwrap();
        m.add("g?b.example", Some(()), 3).unwrap();

        assert!(m.eval("badhost.com").0);
        assert!(m.eval("a.mid.dle").0);
        assert!(m.eval("gab.example").0);
        assert!(!m.eval("good.example").0);
    }

    #[test]
    fn short_names_never_rejected() {
        let mut m: PatternMatcher<()> = PatternMatcher::new();
        m.add("=a", Some(()), 1).unwrap();
        assert_eq!(m.eval("a"), (false, None, None));
    }

    #[test]
    fn glob_syntax_error_reports_line() {
        let mut m: PatternMatcher<()> = PatternMatcher::new();
        let err = m.add("?", Some(()), 7).unwrap_err();
        matches!(err, ProxyError::SyntaxError { line: 7 });
    }

    #[test]
    fn empty_suffix_pattern_is_skipped_not_fatal() {
        let mut m: PatternMatcher<()> = PatternMatcher::new();
        // "." strips to an empty suffix pattern; the original logs and
        // keeps loading rather than aborting the whole file.
        assert!(m.add(".", Some(()), 3).is_ok());
        assert!(m.add(".ads.example", Some(()), 4).is_ok());
        assert!(m.eval("x.ads.example").0);
    }
}
