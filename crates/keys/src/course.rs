//! Course keys
//!
//! A [`CourseKey`] names one course run as `org/course/run`. Two optional
//! qualifiers refine *which view* of the course is meant:
//!
//! - a [`Branch`] pins the draft or published revision channel
//! - a [`VersionGuid`] pins one immutable structure version (versioned
//!   backend only)
//!
//! The branch-agnostic, version-agnostic form is the identity used for map
//! keys and routing; [`CourseKey::for_branch`] with `None` produces it.
//!
//! ## String grammar
//!
//! ```text
//! org/course/run            canonical
//! org/course/run@draft      branch-qualified
//! org/course/run#<uuid>     version-qualified
//! org/course                legacy (run unknown; see fill_in_run)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::asset::AssetKey;
use crate::block_type::BlockType;
use crate::error::{validate_field, KeyError, KeyResult};
use crate::usage::UsageKey;

/// The two revision channels of a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// Work-in-progress revisions, visible to authors.
    Draft,
    /// Live revisions, visible to learners.
    Published,
}

impl Branch {
    /// The wire name ("draft" / "published").
    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Draft => "draft",
            Branch::Published => "published",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Branch {
    type Err = KeyError;

    fn from_str(s: &str) -> KeyResult<Self> {
        match s {
            "draft" => Ok(Branch::Draft),
            "published" => Ok(Branch::Published),
            other => Err(KeyError::UnknownBranch(other.to_string())),
        }
    }
}

/// Immutable identifier of one structure version in the versioned backend.
///
/// Also used for definition documents, which version independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionGuid(Uuid);

impl VersionGuid {
    /// Mint a fresh random guid.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the hyphenated or plain hex UUID form.
    ///
    /// # Errors
    /// `KeyError::InvalidGuid` when the string is not a UUID.
    pub fn from_string(s: &str) -> KeyResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| KeyError::InvalidGuid(s.to_string()))
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for VersionGuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VersionGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of a course run.
///
/// Identity for routing and map keys is the branch- and version-agnostic
/// triple (org, course, run). Equality and ordering are structural over all
/// five fields; normalize with [`for_branch`](Self::for_branch)`(None)`
/// before using a key from an arbitrary caller as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CourseKey {
    org: String,
    course: String,
    run: String,
    branch: Option<Branch>,
    version_guid: Option<VersionGuid>,
}

impl CourseKey {
    /// Create a canonical course key.
    ///
    /// # Errors
    /// `KeyError` when any component is empty or carries a character outside
    /// the key alphabet.
    pub fn new(
        org: impl Into<String>,
        course: impl Into<String>,
        run: impl Into<String>,
    ) -> KeyResult<Self> {
        let (org, course, run) = (org.into(), course.into(), run.into());
        validate_field("org", &org)?;
        validate_field("course", &course)?;
        validate_field("run", &run)?;
        Ok(Self {
            org,
            course,
            run,
            branch: None,
            version_guid: None,
        })
    }

    /// Create a legacy key whose run is not yet known.
    ///
    /// Deprecated usage strings (`i4x://org/course/...`) carry no run; the
    /// router's `fill_in_run` resolves the missing component against the
    /// known courses.
    pub fn without_run(org: impl Into<String>, course: impl Into<String>) -> KeyResult<Self> {
        let (org, course) = (org.into(), course.into());
        validate_field("org", &org)?;
        validate_field("course", &course)?;
        Ok(Self {
            org,
            course,
            run: String::new(),
            branch: None,
            version_guid: None,
        })
    }

    /// Parse the string grammar described in the module docs.
    ///
    /// # Errors
    /// `KeyError::WrongFormat` for a segment-count mismatch, plus the usual
    /// per-field validation errors.
    pub fn parse(s: &str) -> KeyResult<Self> {
        // Strip qualifiers right to left: #version first, then @branch.
        let (body, version_guid) = match s.split_once('#') {
            Some((body, guid)) => (body, Some(VersionGuid::from_string(guid)?)),
            None => (s, None),
        };
        let (body, branch) = match body.split_once('@') {
            Some((body, branch)) => (body, Some(Branch::from_str(branch)?)),
            None => (body, None),
        };

        let segments: Vec<&str> = body.split('/').collect();
        let mut key = match segments.as_slice() {
            [org, course, run] => Self::new(*org, *course, *run)?,
            [org, course] => Self::without_run(*org, *course)?,
            _ => {
                return Err(KeyError::WrongFormat {
                    expected: "org/course/run",
                    got: s.to_string(),
                })
            }
        };
        key.branch = branch;
        key.version_guid = version_guid;
        Ok(key)
    }

    /// The organization component.
    pub fn org(&self) -> &str {
        &self.org
    }

    /// The course component.
    pub fn course(&self) -> &str {
        &self.course
    }

    /// The run component; empty for legacy keys awaiting `fill_in_run`.
    pub fn run(&self) -> &str {
        &self.run
    }

    /// Whether the run component is present.
    pub fn has_run(&self) -> bool {
        !self.run.is_empty()
    }

    /// The pinned branch, if any.
    pub fn branch(&self) -> Option<Branch> {
        self.branch
    }

    /// The pinned structure version, if any.
    pub fn version_guid(&self) -> Option<VersionGuid> {
        self.version_guid
    }

    /// Replace the branch. Passing `None` yields the branch-agnostic form;
    /// the version qualifier is dropped in every case, so
    /// `for_branch(None)` is the canonical map-key normalizer.
    pub fn for_branch(&self, branch: Option<Branch>) -> Self {
        Self {
            branch,
            version_guid: None,
            ..self.clone()
        }
    }

    /// Replace the version qualifier, keeping the branch.
    pub fn for_version(&self, version_guid: Option<VersionGuid>) -> Self {
        Self {
            version_guid,
            ..self.clone()
        }
    }

    /// Drop the version qualifier.
    pub fn version_agnostic(&self) -> Self {
        self.for_version(None)
    }

    /// True when neither branch nor version is pinned.
    pub fn is_branch_agnostic(&self) -> bool {
        self.branch.is_none() && self.version_guid.is_none()
    }

    /// Return a copy with the run filled in.
    ///
    /// # Errors
    /// `KeyError` when the run fails field validation.
    pub fn with_run(&self, run: impl Into<String>) -> KeyResult<Self> {
        let run = run.into();
        validate_field("run", &run)?;
        Ok(Self {
            run,
            ..self.clone()
        })
    }

    /// Name a block inside this course.
    pub fn make_usage_key(&self, block_type: BlockType, name: impl Into<String>) -> KeyResult<UsageKey> {
        UsageKey::new(self.clone(), block_type, name)
    }

    /// Name an asset inside this course.
    pub fn make_asset_key(
        &self,
        category: impl Into<String>,
        name: impl Into<String>,
    ) -> KeyResult<AssetKey> {
        AssetKey::new(self.clone(), category, name)
    }

    /// The usage key of the course root block.
    ///
    /// By convention the root block's category is `course` and its name is
    /// the run, which is how the per-block backend stores course documents.
    ///
    /// # Errors
    /// `KeyError::EmptyField` when the run is missing.
    pub fn course_root_usage(&self) -> KeyResult<UsageKey> {
        if !self.has_run() {
            return Err(KeyError::EmptyField("run"));
        }
        UsageKey::new(
            self.for_branch(None),
            BlockType::course(),
            self.run.clone(),
        )
    }

    /// Case-insensitive identity comparison over (org, course, run).
    pub fn matches_ignore_case(&self, other: &CourseKey) -> bool {
        self.org.eq_ignore_ascii_case(&other.org)
            && self.course.eq_ignore_ascii_case(&other.course)
            && self.run.eq_ignore_ascii_case(&other.run)
    }

    /// Case-insensitive comparison of (org, course) only, used by the
    /// duplicate-course guard where runs may differ.
    pub fn same_org_course_ignore_case(&self, other: &CourseKey) -> bool {
        self.org.eq_ignore_ascii_case(&other.org)
            && self.course.eq_ignore_ascii_case(&other.course)
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.course)?;
        if self.has_run() {
            write!(f, "/{}", self.run)?;
        }
        if let Some(branch) = self.branch {
            write!(f, "@{}", branch)?;
        }
        if let Some(guid) = self.version_guid {
            write!(f, "#{}", guid)?;
        }
        Ok(())
    }
}

impl FromStr for CourseKey {
    type Err = KeyError;

    fn from_str(s: &str) -> KeyResult<Self> {
        Self::parse(s)
    }
}
