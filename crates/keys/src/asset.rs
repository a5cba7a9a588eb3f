//! Asset keys
//!
//! An [`AssetKey`] names one binary asset within a course: course key +
//! asset category (`asset`, `thumbnail`, ...) + file name. The string form
//! parallels the deprecated usage form and likewise carries no run:
//!
//! ```text
//! c4x://org/course/asset/logo.png
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::course::CourseKey;
use crate::error::{validate_field, KeyError, KeyResult};
use crate::ASSET_TAG;

/// Opaque identity of a course asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    course_key: CourseKey,
    category: String,
    name: String,
}

impl AssetKey {
    /// Create an asset key.
    ///
    /// # Errors
    /// `KeyError` when the category or name is empty or carries a character
    /// outside the key alphabet.
    pub fn new(
        course_key: CourseKey,
        category: impl Into<String>,
        name: impl Into<String>,
    ) -> KeyResult<Self> {
        let (category, name) = (category.into(), name.into());
        validate_field("category", &category)?;
        validate_field("name", &name)?;
        Ok(Self {
            course_key,
            category,
            name,
        })
    }

    /// The owning course.
    pub fn course_key(&self) -> &CourseKey {
        &self.course_key
    }

    /// The asset category (`asset`, `thumbnail`, ...).
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The asset file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy bound to another course identity, keeping category and name.
    /// Used when copying all assets from one course to another.
    pub fn map_into_course(&self, course_key: CourseKey) -> Self {
        Self {
            course_key,
            ..self.clone()
        }
    }

    /// The serialized form `c4x://org/course/category/name` (no run).
    pub fn to_deprecated_string(&self) -> String {
        format!(
            "{}://{}/{}/{}/{}",
            ASSET_TAG,
            self.course_key.org(),
            self.course_key.course(),
            self.category,
            self.name
        )
    }

    /// Parse the serialized form. The resulting course key has an empty run.
    ///
    /// # Errors
    /// `KeyError::UnknownTag` for a tag other than `c4x`,
    /// `KeyError::WrongFormat` for a segment-count mismatch, plus per-field
    /// validation errors.
    pub fn parse_deprecated(s: &str) -> KeyResult<Self> {
        let (tag, body) = s.split_once("://").ok_or(KeyError::WrongFormat {
            expected: "c4x://org/course/category/name",
            got: s.to_string(),
        })?;
        if tag != ASSET_TAG {
            return Err(KeyError::UnknownTag(tag.to_string()));
        }

        let segments: Vec<&str> = body.split('/').collect();
        let [org, course, category, name] = segments.as_slice() else {
            return Err(KeyError::WrongFormat {
                expected: "c4x://org/course/category/name",
                got: s.to_string(),
            });
        };

        let course_key = CourseKey::without_run(*org, *course)?;
        Self::new(course_key, *category, *name)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_deprecated_string())
    }
}

impl FromStr for AssetKey {
    type Err = KeyError;

    fn from_str(s: &str) -> KeyResult<Self> {
        Self::parse_deprecated(s)
    }
}
