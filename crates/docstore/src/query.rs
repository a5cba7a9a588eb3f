//! Document queries
//!
//! A [`Query`] is a conjunction of conditions over dotted field paths.
//! Backends build queries instead of scanning collections by hand, so the
//! database can count them and tests can pin how many a code path issues.

use serde_json::Value as Json;

/// One condition over a dotted path.
#[derive(Debug, Clone)]
pub enum Cond {
    /// Equality. When the stored value is an array and the target is
    /// not, any equal element satisfies the condition.
    Eq(Json),
    /// Equality against any of the listed values.
    In(Vec<Json>),
    /// Regular-expression match over a string value, or over elements
    /// of an array of strings. An invalid pattern matches nothing.
    Regex(String),
    /// Whether the path resolves at all.
    Exists(bool),
}

impl Cond {
    fn eq_one(value: &Json, target: &Json) -> bool {
        if value == target {
            return true;
        }
        match (value, target) {
            (Json::Array(items), t) if !t.is_array() => items.iter().any(|i| i == t),
            _ => false,
        }
    }

    /// Evaluate against the value at the path, or `None` when the path
    /// does not resolve.
    pub fn matches(&self, value: Option<&Json>) -> bool {
        match self {
            Cond::Exists(expected) => value.is_some() == *expected,
            Cond::Eq(target) => match value {
                Some(v) => Self::eq_one(v, target),
                None => false,
            },
            Cond::In(targets) => match value {
                Some(v) => targets.iter().any(|t| Self::eq_one(v, t)),
                None => false,
            },
            Cond::Regex(pattern) => {
                let Some(v) = value else {
                    return false;
                };
                let re = match regex::Regex::new(pattern) {
                    Ok(re) => re,
                    Err(err) => {
                        tracing::warn!(target: "modulestore::docstore", pattern = %pattern, error = %err, "Invalid query regex");
                        return false;
                    }
                };
                match v {
                    Json::String(s) => re.is_match(s),
                    Json::Array(items) => items
                        .iter()
                        .filter_map(|i| i.as_str())
                        .any(|s| re.is_match(s)),
                    _ => false,
                }
            }
        }
    }
}

/// Resolve a dotted path (`metadata.display_name`) inside a document.
pub fn path_value<'a>(doc: &'a Json, path: &str) -> Option<&'a Json> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// A conjunction of conditions over dotted paths.
#[derive(Debug, Clone, Default)]
pub struct Query {
    conds: Vec<(String, Cond)>,
}

impl Query {
    /// A query with no conditions; matches every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require equality at a path.
    pub fn eq(mut self, path: impl Into<String>, value: Json) -> Self {
        self.conds.push((path.into(), Cond::Eq(value)));
        self
    }

    /// Require equality against any of the listed values.
    pub fn is_in(mut self, path: impl Into<String>, values: Vec<Json>) -> Self {
        self.conds.push((path.into(), Cond::In(values)));
        self
    }

    /// Require a regular-expression match at a path.
    pub fn regex(mut self, path: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.conds.push((path.into(), Cond::Regex(pattern.into())));
        self
    }

    /// Require the path to resolve (or not).
    pub fn exists(mut self, path: impl Into<String>, expected: bool) -> Self {
        self.conds.push((path.into(), Cond::Exists(expected)));
        self
    }

    /// The conditions, in insertion order.
    pub fn conds(&self) -> &[(String, Cond)] {
        &self.conds
    }

    /// True when no conditions are set.
    pub fn is_empty(&self) -> bool {
        self.conds.is_empty()
    }

    /// Evaluate every condition against one document.
    pub fn matches(&self, doc: &Json) -> bool {
        self.conds
            .iter()
            .all(|(path, cond)| cond.matches(path_value(doc, path)))
    }
}
