//! Usage keys
//!
//! A [`UsageKey`] names one block inside one course: course key + category +
//! block name, plus an optional document revision used by the per-block
//! backend (`Some(Draft)` marks the draft copy of a block; `None` is the
//! published document).
//!
//! ## Deprecated string form
//!
//! The stable serialized form predates run-aware course keys:
//!
//! ```text
//! i4x://org/course/category/name          published
//! i4x://org/course/category/name@draft    draft copy
//! ```
//!
//! The string has no run, so parsing yields a course key with an empty run;
//! [`UsageKey::map_into_course`] restores the full course identity from
//! context. Child lists and reference fields persist this form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::block_type::BlockType;
use crate::course::{Branch, CourseKey};
use crate::error::{validate_field, KeyError, KeyResult};
use crate::USAGE_TAG;

/// Opaque identity of a block within a course.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsageKey {
    course_key: CourseKey,
    block_type: BlockType,
    name: String,
    revision: Option<Branch>,
}

impl UsageKey {
    /// Create a usage key with no document revision.
    ///
    /// # Errors
    /// `KeyError` when the name is empty or carries a character outside the
    /// key alphabet.
    pub fn new(
        course_key: CourseKey,
        block_type: BlockType,
        name: impl Into<String>,
    ) -> KeyResult<Self> {
        let name = name.into();
        validate_field("name", &name)?;
        Ok(Self {
            course_key,
            block_type,
            name,
            revision: None,
        })
    }

    /// The owning course.
    pub fn course_key(&self) -> &CourseKey {
        &self.course_key
    }

    /// The block category.
    pub fn block_type(&self) -> &BlockType {
        &self.block_type
    }

    /// The block name (unique per category within a course).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Alias of [`name`](Self::name); reads better at versioned-backend
    /// call sites that pair it with `block_type`.
    pub fn block_id(&self) -> &str {
        &self.name
    }

    /// The document revision carried by this key, if any.
    pub fn revision(&self) -> Option<Branch> {
        self.revision
    }

    /// Whether this key addresses the draft document.
    pub fn is_draft(&self) -> bool {
        self.revision == Some(Branch::Draft)
    }

    /// Category policy passthrough: auto-published, never draft-only.
    pub fn is_direct_only(&self) -> bool {
        self.block_type.is_direct_only()
    }

    /// Copy addressing the draft document.
    pub fn as_draft(&self) -> Self {
        self.with_revision(Some(Branch::Draft))
    }

    /// Copy addressing the published document.
    pub fn as_published(&self) -> Self {
        self.with_revision(None)
    }

    /// Copy with the given document revision.
    pub fn with_revision(&self, revision: Option<Branch>) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }

    /// Copy bound to another course identity, keeping category, name, and
    /// revision. Restores the run (and branch) lost by the deprecated
    /// string form.
    pub fn map_into_course(&self, course_key: CourseKey) -> Self {
        Self {
            course_key,
            ..self.clone()
        }
    }

    /// Copy with the course branch replaced; the document revision is
    /// untouched (course branch and document revision are distinct axes).
    pub fn for_branch(&self, branch: Option<Branch>) -> Self {
        Self {
            course_key: self.course_key.for_branch(branch),
            ..self.clone()
        }
    }

    /// The stable serialized form, without run:
    /// `i4x://org/course/category/name[@draft]`.
    pub fn to_deprecated_string(&self) -> String {
        let mut s = format!(
            "{}://{}/{}/{}/{}",
            USAGE_TAG,
            self.course_key.org(),
            self.course_key.course(),
            self.block_type,
            self.name
        );
        if let Some(revision) = self.revision {
            s.push('@');
            s.push_str(revision.as_str());
        }
        s
    }

    /// Parse the deprecated string form. The resulting course key has an
    /// empty run; callers restore it with
    /// [`map_into_course`](Self::map_into_course).
    ///
    /// # Errors
    /// `KeyError::UnknownTag` for a tag other than `i4x`,
    /// `KeyError::WrongFormat` for a segment-count mismatch, plus per-field
    /// validation errors.
    pub fn parse_deprecated(s: &str) -> KeyResult<Self> {
        let (tag, body) = s.split_once("://").ok_or(KeyError::WrongFormat {
            expected: "i4x://org/course/category/name[@revision]",
            got: s.to_string(),
        })?;
        if tag != USAGE_TAG {
            return Err(KeyError::UnknownTag(tag.to_string()));
        }

        let segments: Vec<&str> = body.split('/').collect();
        let [org, course, category, last] = segments.as_slice() else {
            return Err(KeyError::WrongFormat {
                expected: "i4x://org/course/category/name[@revision]",
                got: s.to_string(),
            });
        };

        let (name, revision) = match last.split_once('@') {
            Some((name, revision)) => (name, Some(Branch::from_str(revision)?)),
            None => (*last, None),
        };

        let course_key = CourseKey::without_run(*org, *course)?;
        let block_type = BlockType::new(*category)?;
        let mut key = Self::new(course_key, block_type, name)?;
        key.revision = revision;
        Ok(key)
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_deprecated_string())
    }
}

impl FromStr for UsageKey {
    type Err = KeyError;

    fn from_str(s: &str) -> KeyResult<Self> {
        Self::parse_deprecated(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn toy() -> CourseKey {
        CourseKey::new("edX", "toy", "2012_Fall").unwrap()
    }

    fn problem() -> UsageKey {
        UsageKey::new(toy(), BlockType::new("problem").unwrap(), "p1").unwrap()
    }

    // ========================================
    // Construction Tests
    // ========================================

    #[test]
    fn test_new_validates_name() {
        assert!(UsageKey::new(toy(), BlockType::course(), "2012_Fall").is_ok());
        assert!(UsageKey::new(toy(), BlockType::course(), "").is_err());
        assert!(UsageKey::new(toy(), BlockType::course(), "a b").is_err());
    }

    #[test]
    fn test_accessors() {
        let key = problem();
        assert_eq!(key.course_key(), &toy());
        assert_eq!(key.block_type().as_str(), "problem");
        assert_eq!(key.name(), "p1");
        assert_eq!(key.block_id(), "p1");
        assert_eq!(key.revision(), None);
    }

    // ========================================
    // Revision Tests
    // ========================================

    #[test]
    fn test_as_draft_and_back() {
        let draft = problem().as_draft();
        assert!(draft.is_draft());
        assert_eq!(draft.revision(), Some(Branch::Draft));
        let published = draft.as_published();
        assert!(!published.is_draft());
        assert_eq!(published, problem());
    }

    #[test]
    fn test_revision_distinguishes_keys() {
        let mut set = std::collections::HashSet::new();
        set.insert(problem());
        set.insert(problem().as_draft());
        assert_eq!(set.len(), 2);
    }

    // ========================================
    // Deprecated String Tests
    // ========================================

    #[test]
    fn test_deprecated_string_published() {
        assert_eq!(problem().to_deprecated_string(), "i4x://edX/toy/problem/p1");
    }

    #[test]
    fn test_deprecated_string_draft() {
        assert_eq!(
            problem().as_draft().to_deprecated_string(),
            "i4x://edX/toy/problem/p1@draft"
        );
    }

    #[test]
    fn test_parse_deprecated_loses_run() {
        let parsed = UsageKey::parse_deprecated("i4x://edX/toy/problem/p1").unwrap();
        assert_eq!(parsed.course_key().org(), "edX");
        assert_eq!(parsed.course_key().course(), "toy");
        assert!(!parsed.course_key().has_run());
        assert_eq!(parsed.name(), "p1");
    }

    #[test]
    fn test_parse_deprecated_draft_revision() {
        let parsed = UsageKey::parse_deprecated("i4x://edX/toy/problem/p1@draft").unwrap();
        assert!(parsed.is_draft());
    }

    #[test]
    fn test_parse_rejects_unknown_tag() {
        let err = UsageKey::parse_deprecated("c5x://edX/toy/problem/p1").unwrap_err();
        assert_eq!(err, KeyError::UnknownTag("c5x".to_string()));
    }

    #[test]
    fn test_parse_rejects_missing_tag() {
        let err = UsageKey::parse_deprecated("edX/toy/problem/p1").unwrap_err();
        assert_eq!(err.reason_code(), "wrong_format");
    }

    #[test]
    fn test_parse_rejects_wrong_segments() {
        for bad in [
            "i4x://edX/toy/problem",
            "i4x://edX/toy/problem/p1/extra",
            "i4x://",
        ] {
            assert!(UsageKey::parse_deprecated(bad).is_err(), "input: {:?}", bad);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_revision() {
        assert!(UsageKey::parse_deprecated("i4x://edX/toy/problem/p1@beta").is_err());
    }

    // ========================================
    // map_into_course Tests
    // ========================================

    #[test]
    fn test_map_into_course_restores_run() {
        let parsed = UsageKey::parse_deprecated("i4x://edX/toy/problem/p1@draft").unwrap();
        let mapped = parsed.map_into_course(toy());
        assert_eq!(mapped.course_key(), &toy());
        assert_eq!(mapped.name(), "p1");
        assert!(mapped.is_draft(), "revision survives the mapping");
    }

    #[test]
    fn test_roundtrip_through_deprecated_string() {
        let original = problem().as_draft();
        let parsed = UsageKey::parse_deprecated(&original.to_deprecated_string()).unwrap();
        let restored = parsed.map_into_course(toy());
        assert_eq!(restored, original);
    }

    // ========================================
    // Branch Mapping Tests
    // ========================================

    #[test]
    fn test_for_branch_maps_course_only() {
        let draft_doc = problem().as_draft();
        let branched = draft_doc.for_branch(Some(Branch::Published));
        assert_eq!(branched.course_key().branch(), Some(Branch::Published));
        assert!(branched.is_draft(), "document revision untouched");
        let agnostic = branched.for_branch(None);
        assert!(agnostic.course_key().is_branch_agnostic());
    }

    // ========================================
    // Policy Passthrough Tests
    // ========================================

    #[test]
    fn test_is_direct_only_passthrough() {
        let chapter = UsageKey::new(toy(), BlockType::new("chapter").unwrap(), "ch1").unwrap();
        assert!(chapter.is_direct_only());
        assert!(!problem().is_direct_only());
    }

    // ========================================
    // Property Tests
    // ========================================

    fn segment() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_.-]{1,16}"
    }

    proptest! {
        #[test]
        fn prop_deprecated_string_roundtrip(
            org in segment(),
            course in segment(),
            category in segment(),
            name in segment(),
            draft in proptest::bool::ANY,
        ) {
            let course_key = CourseKey::without_run(org, course).unwrap();
            let mut key = UsageKey::new(course_key, BlockType::new(category).unwrap(), name).unwrap();
            if draft {
                key = key.as_draft();
            }
            let parsed = UsageKey::parse_deprecated(&key.to_deprecated_string()).unwrap();
            prop_assert_eq!(parsed, key);
        }
    }
}
