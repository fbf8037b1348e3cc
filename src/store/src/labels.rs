//! Label sets and label matchers with Prometheus semantics.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;

/// A single label name-value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Label set identifying a time series, kept sorted by name with unique names.
///
/// Ordering compares the pairs lexicographically, which is the order series
/// are emitted in.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new(labels: impl IntoIterator<Item = Label>) -> Self {
        let mut labels: Vec<Label> = labels.into_iter().collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        // Last write wins for duplicated names.
        labels.reverse();
        labels.dedup_by(|later, earlier| later.name == earlier.name);
        labels.reverse();
        Self(labels)
    }

    /// Build from flat `name, value, name, value, ...` pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self::new(pairs.iter().map(|(n, v)| Label::new(*n, *v)))
    }

    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        Self::new(map.iter().map(|(n, v)| Label::new(n.clone(), v.clone())))
    }

    /// Value of the label, empty when absent.
    pub fn get(&self, name: &str) -> &str {
        self.find(name).unwrap_or("")
    }

    pub fn find(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|l| l.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge `overrides` into this set; on a name clash the override wins.
    pub fn merged_with(&self, overrides: &Labels) -> Labels {
        Labels::new(self.0.iter().chain(overrides.0.iter()).cloned())
    }

    /// Whether every matcher accepts this label set.
    pub fn matches_all(&self, matchers: &[Matcher]) -> bool {
        matchers.iter().all(|m| m.matches(self.get(&m.name)))
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", l.name, l.value)?;
        }
        write!(f, "}}")
    }
}

impl IntoIterator for Labels {
    type Item = Label;
    type IntoIter = std::vec::IntoIter<Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Label matcher types matching Prometheus semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherOp {
    /// Exact string match (=)
    Equal,
    /// Not equal (!=)
    NotEqual,
    /// Regex match (=~)
    RegexMatch,
    /// Regex not match (!~)
    RegexNotMatch,
}

impl fmt::Display for MatcherOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::RegexMatch => write!(f, "=~"),
            Self::RegexNotMatch => write!(f, "!~"),
        }
    }
}

/// A single label matcher.
///
/// Regular expressions are fully anchored. A label missing from a series
/// is matched as the empty string.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub name: String,
    pub op: MatcherOp,
    pub value: String,
    re: Option<Regex>,
}

impl Matcher {
    pub fn new(
        op: MatcherOp,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        let value = value.into();
        let re = match op {
            MatcherOp::RegexMatch | MatcherOp::RegexNotMatch => {
                Some(Regex::new(&format!("^(?:{value})$"))?)
            }
            MatcherOp::Equal | MatcherOp::NotEqual => None,
        };
        Ok(Self {
            name: name.into(),
            op,
            value,
            re,
        })
    }

    pub fn equal(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            op: MatcherOp::Equal,
            value: value.to_string(),
            re: None,
        }
    }

    pub fn not_equal(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            op: MatcherOp::NotEqual,
            value: value.to_string(),
            re: None,
        }
    }

    pub fn regex_match(name: &str, pattern: &str) -> Result<Self, regex::Error> {
        Self::new(MatcherOp::RegexMatch, name, pattern)
    }

    pub fn regex_not_match(name: &str, pattern: &str) -> Result<Self, regex::Error> {
        Self::new(MatcherOp::RegexNotMatch, name, pattern)
    }

    pub fn matches(&self, value: &str) -> bool {
        match (self.op, &self.re) {
            (MatcherOp::Equal, _) => value == self.value,
            (MatcherOp::NotEqual, _) => value != self.value,
            (MatcherOp::RegexMatch, Some(re)) => re.is_match(value),
            (MatcherOp::RegexNotMatch, Some(re)) => !re.is_match(value),
            (MatcherOp::RegexMatch | MatcherOp::RegexNotMatch, None) => false,
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

/// Split matchers against a store's external labels.
///
/// Returns `None` when a matcher on an external label rejects its value,
/// meaning the store cannot hold any matching series. Otherwise returns the
/// matchers that still have to be evaluated by the local database.
pub fn match_external_labels(matchers: &[Matcher], external: &Labels) -> Option<Vec<Matcher>> {
    let mut remaining = Vec::with_capacity(matchers.len());
    for m in matchers {
        match external.find(&m.name) {
            Some(value) if !m.matches(value) => return None,
            Some(_) => {}
            None => remaining.push(m.clone()),
        }
    }
    Some(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_sorted_and_deduplicated() {
        let labels = Labels::from_pairs(&[("job", "api"), ("env", "dev"), ("job", "web")]);

        assert_eq!(labels.names().collect::<Vec<_>>(), vec!["env", "job"]);
        assert_eq!(labels.get("job"), "web");
        assert_eq!(labels.get("missing"), "");
        assert_eq!(labels.find("missing"), None);
        assert_eq!(labels.to_string(), r#"{env="dev", job="web"}"#);
    }

    #[test]
    fn test_merge_external_labels_override() {
        let series = Labels::from_pairs(&[("foo", "bar"), ("region", "local")]);
        let external = Labels::from_pairs(&[("region", "eu-west")]);

        let merged = series.merged_with(&external);
        let expected = Labels::from_pairs(&[("foo", "bar"), ("region", "eu-west")]);
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_labels_ordering() {
        let a = Labels::from_pairs(&[("a", "1")]);
        let b = Labels::from_pairs(&[("a", "1"), ("b", "1")]);
        let c = Labels::from_pairs(&[("a", "2")]);
        let mut all = vec![c.clone(), b.clone(), a.clone()];
        all.sort();
        assert_eq!(all, vec![a, b, c]);
    }

    #[test]
    fn test_label_matcher_display() {
        assert_eq!(format!("{}", MatcherOp::Equal), "=");
        assert_eq!(format!("{}", MatcherOp::NotEqual), "!=");
        assert_eq!(format!("{}", MatcherOp::RegexMatch), "=~");
        assert_eq!(format!("{}", MatcherOp::RegexNotMatch), "!~");
        assert_eq!(Matcher::equal("foo", "bar").to_string(), r#"foo="bar""#);
    }

    #[test]
    fn test_matchers() {
        assert!(Matcher::equal("foo", "bar").matches("bar"));
        assert!(!Matcher::equal("foo", "bar").matches("baz"));
        assert!(Matcher::not_equal("foo", "bar").matches(""));

        let re = Matcher::regex_match("foo", "ba.").unwrap();
        assert!(re.matches("bar"));
        // Anchored on both ends.
        assert!(!re.matches("xbar"));
        assert!(!re.matches("barx"));

        let nre = Matcher::regex_not_match("foo", "a|b").unwrap();
        assert!(nre.matches("ab"));
        assert!(!nre.matches("b"));

        assert!(Matcher::regex_match("foo", "(").is_err());
    }

    #[test]
    fn test_missing_label_matches_empty() {
        let labels = Labels::from_pairs(&[("foo", "bar")]);
        assert!(labels.matches_all(&[Matcher::equal("missing", "")]));
        assert!(!labels.matches_all(&[Matcher::not_equal("missing", "")]));
        assert!(labels.matches_all(&[]));
    }

    #[test]
    fn test_match_external_labels() {
        let external = Labels::from_pairs(&[("region", "eu-west")]);

        let matchers = vec![
            Matcher::equal("region", "eu-west"),
            Matcher::equal("foo", "bar"),
        ];
        let remaining = match_external_labels(&matchers, &external).unwrap();
        assert_eq!(remaining, vec![Matcher::equal("foo", "bar")]);

        let other_region = vec![Matcher::equal("region", "us-east")];
        assert!(match_external_labels(&other_region, &external).is_none());

        let re = vec![Matcher::regex_match("region", "eu-.*").unwrap()];
        assert_eq!(match_external_labels(&re, &external), Some(vec![]));
    }
}
