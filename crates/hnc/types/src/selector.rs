//! Propagation selectors
//!
//! Source objects may narrow where they are copied with three annotations:
//! a label selector over the destination namespace's labels, a tree selector
//! naming subtrees by their root, and a boolean that turns propagation off.

use crate::keys;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid selector {selector:?}: {message}")]
    Invalid { selector: String, message: String },
}

impl SelectorError {
    fn invalid(selector: &str, message: impl Into<String>) -> Self {
        SelectorError::Invalid {
            selector: selector.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, set) => labels.get(k).is_some_and(|v| set.contains(v)),
            Requirement::NotIn(k, set) => labels.get(k).map_or(true, |v| !set.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// Conjunction of requirements; the empty selector matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pub requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        for term in split_terms(selector) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            requirements.push(parse_term(selector, term)?);
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// Splits on commas that are not inside a parenthesised value set
fn split_terms(selector: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&selector[start..]);
    terms
}

fn parse_term(selector: &str, term: &str) -> Result<Requirement, SelectorError> {
    if let Some(key) = term.strip_prefix('!') {
        let key = validate_key(selector, key.trim())?;
        return Ok(Requirement::DoesNotExist(key));
    }
    if let Some((k, v)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(
            validate_key(selector, k.trim())?,
            validate_value(selector, v.trim())?,
        ));
    }
    if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement::Equals(
            validate_key(selector, k.trim())?,
            validate_value(selector, v.trim())?,
        ));
    }
    if let Some(open) = term.find('(') {
        let head: Vec<&str> = term[..open].split_whitespace().collect();
        let body = term[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| SelectorError::invalid(selector, "unterminated value set"))?;
        let values = body
            .split(',')
            .map(|v| validate_value(selector, v.trim()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        return match head.as_slice() {
            [key, "in"] => Ok(Requirement::In(validate_key(selector, key)?, values)),
            [key, "notin"] => Ok(Requirement::NotIn(validate_key(selector, key)?, values)),
            _ => Err(SelectorError::invalid(selector, format!("bad set term {:?}", term))),
        };
    }
    Ok(Requirement::Exists(validate_key(selector, term)?))
}

fn validate_key(selector: &str, key: &str) -> Result<String, SelectorError> {
    let (prefix, name) = match key.rsplit_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        let ok = !prefix.is_empty()
            && prefix.len() <= 253
            && prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
        if !ok {
            return Err(SelectorError::invalid(selector, format!("bad key prefix {:?}", prefix)));
        }
    }
    if name.is_empty() || name.len() > 63 || !is_label_text(name) {
        return Err(SelectorError::invalid(selector, format!("bad key {:?}", key)));
    }
    Ok(key.to_string())
}

fn validate_value(selector: &str, value: &str) -> Result<String, SelectorError> {
    if value.len() > 63 || (!value.is_empty() && !is_label_text(value)) {
        return Err(SelectorError::invalid(selector, format!("bad value {:?}", value)));
    }
    Ok(value.to_string())
}

fn is_label_text(s: &str) -> bool {
    let alnum = |c: char| c.is_ascii_alphanumeric();
    s.starts_with(alnum)
        && s.ends_with(alnum)
        && s.chars().all(|c| alnum(c) || c == '-' || c == '_' || c == '.')
}

/// Parses a tree selector (`a, !b`) into the equivalent depth-label selector
pub fn parse_tree_selector(selector: &str) -> Result<LabelSelector, SelectorError> {
    let mut requirements = Vec::new();
    for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (negated, name) = match term.strip_prefix('!') {
            Some(name) => (true, name.trim()),
            None => (false, term),
        };
        if !is_dns_label(name) {
            return Err(SelectorError::invalid(
                selector,
                format!("{:?} is not a namespace name", name),
            ));
        }
        let key = keys::depth_label(name);
        requirements.push(if negated {
            Requirement::DoesNotExist(key)
        } else {
            Requirement::Exists(key)
        });
    }
    Ok(LabelSelector { requirements })
}

/// Parses the `none` annotation; only `true` and `false` are accepted
pub fn parse_none_selector(value: &str) -> Result<bool, SelectorError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(SelectorError::invalid(value, "must be true or false")),
    }
}

/// RFC 1123 label: lowercase alphanumerics and `-`, at most 63 characters
pub fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// Where a source object may be copied, compiled from its annotations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationSelector {
    select: LabelSelector,
    tree: LabelSelector,
    none: bool,
}

impl PropagationSelector {
    /// Builds the selector from an object's annotations
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self, SelectorError> {
        let select = match annotations.get(keys::ANNOTATION_SELECTOR) {
            Some(s) => LabelSelector::parse(s)?,
            None => LabelSelector::default(),
        };
        let tree = match annotations.get(keys::ANNOTATION_TREE_SELECTOR) {
            Some(s) => parse_tree_selector(s)?,
            None => LabelSelector::default(),
        };
        let none = match annotations.get(keys::ANNOTATION_NONE_SELECTOR) {
            Some(s) => parse_none_selector(s)?,
            None => false,
        };
        Ok(Self { select, tree, none })
    }

    /// Does a destination namespace with these labels receive a copy?
    pub fn admits(&self, namespace_labels: &BTreeMap<String, String>) -> bool {
        !self.none && self.select.matches(namespace_labels) && self.tree.matches(namespace_labels)
    }

    pub fn is_unrestricted(&self) -> bool {
        !self.none && self.select.is_empty() && self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_label_selector_operators() {
        let sel = LabelSelector::parse("env=prod, tier in (a, b), !legacy, team").unwrap();
        assert_eq!(sel.requirements.len(), 4);
        assert!(sel.matches(&labels(&[("env", "prod"), ("tier", "a"), ("team", "x")])));
        assert!(!sel.matches(&labels(&[("env", "prod"), ("tier", "c"), ("team", "x")])));
        assert!(!sel.matches(&labels(&[
            ("env", "prod"),
            ("tier", "a"),
            ("team", "x"),
            ("legacy", "1")
        ])));
    }

    #[test]
    fn test_label_selector_not_operators() {
        let sel = LabelSelector::parse("env!=dev,tier notin (x)").unwrap();
        assert!(sel.matches(&labels(&[])));
        assert!(!sel.matches(&labels(&[("env", "dev")])));
        assert!(!sel.matches(&labels(&[("tier", "x")])));
    }

    #[test]
    fn test_label_selector_rejects_garbage() {
        assert!(LabelSelector::parse("a in (b").is_err());
        assert!(LabelSelector::parse("=x").is_err());
        assert!(LabelSelector::parse("a=b c").is_err());
        assert!(LabelSelector::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_tree_selector_uses_depth_labels() {
        let sel = parse_tree_selector("team-a, !team-a-legacy").unwrap();
        let inside = labels(&[("team-a.tree.hnc.x-k8s.io/depth", "1")]);
        let excluded = labels(&[
            ("team-a.tree.hnc.x-k8s.io/depth", "2"),
            ("team-a-legacy.tree.hnc.x-k8s.io/depth", "1"),
        ]);
        assert!(sel.matches(&inside));
        assert!(!sel.matches(&excluded));
        assert!(parse_tree_selector("Not_A_Name").is_err());
    }

    #[test]
    fn test_propagation_selector() {
        let mut annotations = BTreeMap::new();
        assert!(PropagationSelector::from_annotations(&annotations)
            .unwrap()
            .is_unrestricted());

        annotations.insert(keys::ANNOTATION_NONE_SELECTOR.to_string(), "true".to_string());
        let sel = PropagationSelector::from_annotations(&annotations).unwrap();
        assert!(!sel.admits(&labels(&[])));

        annotations.insert(keys::ANNOTATION_NONE_SELECTOR.to_string(), "maybe".to_string());
        assert!(PropagationSelector::from_annotations(&annotations).is_err());
    }
}
