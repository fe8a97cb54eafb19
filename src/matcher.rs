//! Action key matchers used by the include/exclude/skip-dedupe filters.
//!
//! In config files a matcher is either a bare string (exact match) or a
//! table `{ pattern = "<regex>" }`.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(try_from = "MatcherRepr", into = "MatcherRepr")]
pub enum Matcher {
    Exact(String),
    Pattern(Regex),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum MatcherRepr {
    Exact(String),
    Pattern { pattern: String },
}

impl TryFrom<MatcherRepr> for Matcher {
    type Error = Error;

    fn try_from(repr: MatcherRepr) -> Result<Self> {
        match repr {
            MatcherRepr::Exact(key) => Ok(Matcher::Exact(key)),
            MatcherRepr::Pattern { pattern } => Matcher::pattern(&pattern),
        }
    }
}

impl From<Matcher> for MatcherRepr {
    fn from(matcher: Matcher) -> Self {
        match matcher {
            Matcher::Exact(key) => MatcherRepr::Exact(key),
            Matcher::Pattern(re) => MatcherRepr::Pattern {
                pattern: re.as_str().to_string(),
            },
        }
    }
}

impl Matcher {
    pub fn exact(key: impl Into<String>) -> Self {
        Matcher::Exact(key.into())
    }

    /// Compile a regex matcher.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Matcher::Pattern)
            .map_err(|e| Error::Config(format!("bad action pattern {pattern:?}: {e}")))
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Matcher::Exact(expected) => expected == key,
            Matcher::Pattern(re) => re.is_match(key),
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Matcher::Exact(a), Matcher::Exact(b)) => a == b,
            (Matcher::Pattern(a), Matcher::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

/// True if any matcher in the list accepts `key`.
pub fn any_match(matchers: &[Matcher], key: &str) -> bool {
    matchers.iter().any(|m| m.matches(key))
}
