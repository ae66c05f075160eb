//! Kubernetes label selectors in their string form.
//!
//! CAPI objects publish selectors as strings in their status (for example
//! `cluster.x-k8s.io/cluster-name=mgmt,cluster.x-k8s.io/control-plane`).
//! They are parsed up front so a malformed selector fails before any API call,
//! and so the mock store can evaluate them.

use crate::error::StoreError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|l| values.contains(l)),
            Requirement::NotIn(k, values) => labels.get(k).is_none_or(|l| !values.contains(l)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(k, v) => write!(f, "{}={}", k, v),
            Requirement::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Requirement::In(k, values) => write!(f, "{} in ({})", k, values.join(",")),
            Requirement::NotIn(k, values) => write!(f, "{} notin ({})", k, values.join(",")),
            Requirement::Exists(k) => write!(f, "{}", k),
            Requirement::DoesNotExist(k) => write!(f, "!{}", k),
        }
    }
}

/// A conjunction of label requirements. The empty selector matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Equality selector built from a set of labels.
    pub fn from_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            requirements: labels
                .into_iter()
                .map(|(k, v)| Requirement::Equals(k.into(), v.into()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Whether a label set satisfies every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, requirement) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", requirement)?;
        }
        Ok(())
    }
}

impl FromStr for LabelSelector {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| StoreError::InvalidSelector {
            selector: s.to_string(),
            reason: reason.to_string(),
        };

        if s.trim().is_empty() {
            return Ok(Self::everything());
        }

        let mut requirements = Vec::new();
        for term in split_terms(s).map_err(|e| invalid(e))? {
            requirements.push(parse_term(term.trim()).map_err(|e| invalid(&e))?);
        }

        Ok(Self { requirements })
    }
}

/// Splits on commas that are not inside a parenthesised value list.
fn split_terms(s: &str) -> Result<Vec<&str>, &'static str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1).ok_or("unbalanced parenthesis")?,
            ',' if depth == 0 => {
                terms.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced parenthesis");
    }
    terms.push(&s[start..]);

    Ok(terms)
}

fn parse_term(term: &str) -> Result<Requirement, String> {
    if term.is_empty() {
        return Err("empty requirement".to_string());
    }

    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(validate_key(key.trim())?));
    }

    if let Some(open) = term.find('(') {
        let values = term[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| format!("expected ')' at end of {:?}", term))?;
        let mut head = term[..open].split_whitespace();
        let (key, op) = match (head.next(), head.next(), head.next()) {
            (Some(key), Some(op), None) => (validate_key(key)?, op),
            _ => return Err(format!("expected '<key> in|notin (<values>)', got {:?}", term)),
        };
        let values = values
            .split(',')
            .map(|v| validate_value(v.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        if values.iter().all(String::is_empty) {
            return Err(format!("set requirement for {:?} has no values", key));
        }
        return match op {
            "in" => Ok(Requirement::In(key, values)),
            "notin" => Ok(Requirement::NotIn(key, values)),
            other => Err(format!("unknown set operator {:?}", other)),
        };
    }

    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(validate_key(key.trim())?, validate_value(value.trim())?));
    }
    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement::Equals(validate_key(key.trim())?, validate_value(value.trim())?));
    }

    Ok(Requirement::Exists(validate_key(term)?))
}

fn validate_key(key: &str) -> Result<String, String> {
    if key.is_empty() {
        return Err("empty label key".to_string());
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')) {
        return Err(format!("invalid label key {:?}", key));
    }
    Ok(key.to_string())
}

fn validate_value(value: &str) -> Result<String, String> {
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
        return Err(format!("invalid label value {:?}", value));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_capi_control_plane_selector() {
        let selector: LabelSelector =
            "cluster.x-k8s.io/cluster-name=mgmt,cluster.x-k8s.io/control-plane".parse().unwrap();

        assert!(selector.matches(&labels(&[
            ("cluster.x-k8s.io/cluster-name", "mgmt"),
            ("cluster.x-k8s.io/control-plane", ""),
        ])));
        assert!(!selector.matches(&labels(&[("cluster.x-k8s.io/cluster-name", "mgmt")])));
        assert!(!selector.matches(&labels(&[
            ("cluster.x-k8s.io/cluster-name", "other"),
            ("cluster.x-k8s.io/control-plane", ""),
        ])));
    }

    #[test]
    fn test_set_based_requirements() {
        let selector: LabelSelector = "tier in (web, db),env notin (dev),!legacy".parse().unwrap();

        assert!(selector.matches(&labels(&[("tier", "db"), ("env", "prod")])));
        assert!(selector.matches(&labels(&[("tier", "web")])));
        assert!(!selector.matches(&labels(&[("tier", "cache")])));
        assert!(!selector.matches(&labels(&[("tier", "web"), ("env", "dev")])));
        assert!(!selector.matches(&labels(&[("tier", "web"), ("legacy", "true")])));
    }

    #[test]
    fn test_not_equals_matches_missing_label() {
        let selector: LabelSelector = "role!=worker".parse().unwrap();
        assert!(selector.matches(&labels(&[])));
        assert!(!selector.matches(&labels(&[("role", "worker")])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector: LabelSelector = "".parse().unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn test_display_is_parseable() {
        let text = "a=b,c!=d,e in (f,g),h notin (i),j,!k";
        let selector: LabelSelector = text.parse().unwrap();
        assert_eq!(selector.to_string(), text);
        assert_eq!(selector.to_string().parse::<LabelSelector>().unwrap(), selector);
    }

    #[test]
    fn test_rejects_malformed_selectors() {
        for bad in ["a,,b", "a in (b", "a in ()", "a between (b)", "a=b c", "=b"] {
            let err = bad.parse::<LabelSelector>().unwrap_err();
            assert!(matches!(err, StoreError::InvalidSelector { .. }), "{bad}: {err}");
        }
    }
}
