//! Block categories and category policy sets
//!
//! Categories are open-ended (installations add their own leaf types), so
//! [`BlockType`] wraps an arbitrary validated string rather than an enum.
//! The two policy sets that drive store behavior are defined here:
//!
//! - **direct-only** categories live on the published branch only and are
//!   auto-published on every write
//! - **detached** categories are reachable without a parent and are exempt
//!   from orphan detection

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::{validate_field, KeyResult};

/// Categories that are always published and never draft-only.
pub const DIRECT_ONLY_CATEGORIES: &[&str] =
    &["course", "chapter", "sequential", "static_tab", "course_info"];

/// Categories excluded from orphan detection.
pub const DETACHED_CATEGORIES: &[&str] = &["static_tab", "about", "course_info"];

/// A block category ("course", "chapter", "problem", ...).
///
/// Validated on construction: non-empty, `[A-Za-z0-9_.-]` only. Category
/// strings participate in key serialization, so the same character rules as
/// other key components apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockType(String);

impl BlockType {
    /// Create a validated block type.
    ///
    /// # Errors
    /// Returns a `KeyError` when the string is empty or carries a character
    /// outside the key alphabet.
    pub fn new(category: impl Into<String>) -> KeyResult<Self> {
        let category = category.into();
        validate_field("category", &category)?;
        Ok(Self(category))
    }

    /// The category string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether writes to this category are auto-published and a draft-only
    /// revision is forbidden.
    pub fn is_direct_only(&self) -> bool {
        DIRECT_ONLY_CATEGORIES.contains(&self.0.as_str())
    }

    /// Whether this category is draft-capable (the complement of
    /// [`is_direct_only`](Self::is_direct_only)).
    pub fn is_draft_capable(&self) -> bool {
        !self.is_direct_only()
    }

    /// Whether orphan detection skips this category.
    pub fn is_detached(&self) -> bool {
        DETACHED_CATEGORIES.contains(&self.0.as_str())
    }

    /// The course root category.
    pub fn course() -> Self {
        Self("course".to_string())
    }

    /// The seeded about-section category.
    pub fn about() -> Self {
        Self("about".to_string())
    }

    /// The static-tab category, synchronized with the course tab list.
    pub fn static_tab() -> Self {
        Self("static_tab".to_string())
    }

    /// True for the course root category.
    pub fn is_course(&self) -> bool {
        self.0 == "course"
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for BlockType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BlockType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for BlockType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for BlockType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
