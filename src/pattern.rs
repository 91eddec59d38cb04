//! Pattern matchers: both the `match`-statement matcher values (variants:
//! exact-string, regex, object-pattern, list-pattern, union, path-pattern,
//! host-pattern, URL-pattern) and the entity-subsumption rule the
//! permission model needs are expressions of the same underlying idea:
//! "does this concrete thing fall under this pattern". This module gives
//! both callers one definition.
//!
//! Path/host/URL classification distinguishes exact vs. prefix vs. glob.

use regex_lite::Regex;

use crate::value::Value;

#[derive(Debug, Clone)]
pub enum Pattern {
    ExactString(String),
    Regex(RegexPattern),
    Object(Vec<(Vec<String>, Pattern)>),
    List(Vec<Pattern>),
    Union(Vec<Pattern>),
    /// `prefix == true` marks a pattern built from a trailing `...`.
    Path { text: String, prefix: bool },
    /// A host token containing a `*` in host position, e.g. `*.example.com`.
    Host { text: String },
    Url { text: String, prefix: bool },
}

#[derive(Debug, Clone)]
pub struct RegexPattern {
    pub source: String,
    compiled: Regex,
}

impl RegexPattern {
    pub fn compile(source: &str) -> Result<Self, regex_lite::Error> {
        Ok(RegexPattern {
            source: source.to_string(),
            compiled: Regex::new(source)?,
        })
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Pattern {
    /// Does `value` fall under this pattern?
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Pattern::ExactString(s) => matches!(value, Value::Str(v) if v == s),
            Pattern::Regex(r) => matches!(value, Value::Str(v) if r.compiled.is_match(v)),
            Pattern::List(elems) => match value {
                Value::List(items) => {
                    let items = items.lock().unwrap();
                    items.len() == elems.len()
                        && elems.iter().zip(items.iter()).all(|(p, v)| p.matches(v))
                }
                _ => false,
            },
            Pattern::Object(fields) => match value {
                Value::Object(obj) => {
                    let obj = obj.lock().unwrap();
                    fields.iter().all(|(keys, pat)| {
                        keys.iter()
                            .filter_map(|k| obj.get(k))
                            .any(|v| pat.matches(v))
                    })
                }
                _ => false,
            },
            Pattern::Union(alts) => alts.iter().any(|p| p.matches(value)),
            Pattern::Path { text, prefix } => match value {
                Value::Path(p) => path_matches(text, *prefix, p.to_string_lossy().as_ref()),
                _ => false,
            },
            Pattern::Host { text } => match value {
                Value::Host(h) => host_matches(text, h),
                _ => false,
            },
            Pattern::Url { text, prefix } => match value {
                Value::Url(u) => path_matches(text, *prefix, u),
                _ => false,
            },
        }
    }
}

/// Classification used by both the `Pattern` matcher above and the
/// permission inclusion rule in `permission.rs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityClass {
    Exact(String),
    Prefix(String),
    Glob(String),
}

/// Mirrors `tiers.rs`'s `classify_path_pattern`: no wildcard characters and
/// no terminal `...` means an exact match; a terminal `...` (after
/// stripping) means a prefix match; anything else containing `*`/`?`/`[`
/// is treated as a glob.
pub fn classify(text: &str) -> EntityClass {
    if let Some(stripped) = text.strip_suffix("...") {
        return EntityClass::Prefix(stripped.to_string());
    }
    if text.contains('*') || text.contains('?') || text.contains('[') {
        return EntityClass::Glob(text.to_string());
    }
    EntityClass::Exact(text.to_string())
}

fn path_matches(pattern: &str, prefix: bool, candidate: &str) -> bool {
    if prefix {
        candidate.starts_with(pattern)
    } else {
        candidate == pattern
    }
}

/// A host pattern has exactly one `*` occupying a whole label, e.g.
/// `*.example.com` matching `api.example.com`.
fn host_matches(pattern: &str, candidate: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == candidate;
    }
    let pat_labels: Vec<&str> = pattern.split('.').collect();
    let cand_labels: Vec<&str> = candidate.split('.').collect();
    if pat_labels.len() != cand_labels.len() {
        return false;
    }
    pat_labels
        .iter()
        .zip(cand_labels.iter())
        .all(|(p, c)| *p == "*" || p == c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_trailing_ellipsis_is_prefix() {
        assert_eq!(classify("/var/log/..."), EntityClass::Prefix("/var/log/".to_string()));
    }

    #[test]
    fn classify_plain_path_is_exact() {
        assert_eq!(classify("/var/log/app.log"), EntityClass::Exact("/var/log/app.log".to_string()));
    }

    #[test]
    fn classify_star_is_glob() {
        assert_eq!(classify("*.example.com"), EntityClass::Glob("*.example.com".to_string()));
    }

    #[test]
    fn host_wildcard_matches_one_label() {
        assert!(host_matches("*.example.com", "api.example.com"));
        assert!(!host_matches("*.example.com", "a.b.example.com"));
    }

    #[test]
    fn exact_string_pattern() {
        let p = Pattern::ExactString("hi".to_string());
        assert!(p.matches(&Value::Str("hi".to_string())));
        assert!(!p.matches(&Value::Str("bye".to_string())));
    }
}
