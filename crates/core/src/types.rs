//! Shared store types
//!
//! This module defines the small value types used across backends:
//! - UserId: the acting user stamped into edit info
//! - PublishState: derived {private, draft, public}
//! - BranchSetting: the per-operation read preference
//! - RevisionOption: explicit revision arguments to get/has/delete
//! - StoreType: backend tag returned by `get_modulestore_type`
//! - EditInfo: authorship and version lineage carried by every block

use chrono::{DateTime, Utc};
use modulestore_keys::VersionGuid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The acting user recorded on writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derived publish state of a block.
///
/// - `Private`: only a draft revision exists
/// - `Public`: only a published revision exists, or draft and published are
///   content-equal
/// - `Draft`: both revisions exist and differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishState {
    /// Only a draft revision exists.
    Private,
    /// Draft and published revisions exist and differ.
    Draft,
    /// The published revision is authoritative.
    Public,
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublishState::Private => "private",
            PublishState::Draft => "draft",
            PublishState::Public => "public",
        };
        f.write_str(s)
    }
}

/// Per-operation read preference carried by the store context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchSetting {
    /// Return a draft revision when one exists, else the published one.
    DraftPreferred,
    /// Only published revisions are visible.
    PublishedOnly,
}

impl BranchSetting {
    /// The wire name ("draft_preferred" / "published_only").
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchSetting::DraftPreferred => "draft_preferred",
            BranchSetting::PublishedOnly => "published_only",
        }
    }
}

impl fmt::Display for BranchSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit revision argument accepted by reads and deletes.
///
/// Each operation allows a subset; an argument outside the allowed subset
/// fails with `Error::UnsupportedRevision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionOption {
    /// Drafts only.
    DraftOnly,
    /// Published revisions only.
    PublishedOnly,
    /// Draft when present, else published.
    DraftPreferred,
    /// Both revisions (deletes only).
    All,
}

impl RevisionOption {
    /// The wire name of this option.
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionOption::DraftOnly => "draft_only",
            RevisionOption::PublishedOnly => "published_only",
            RevisionOption::DraftPreferred => "draft_preferred",
            RevisionOption::All => "all",
        }
    }
}

impl fmt::Display for RevisionOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag identifying which backend owns a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Read-only directory-tree backend.
    TreeOfFiles,
    /// One document per block, draft/published revisions.
    PerBlock,
    /// Structure documents with immutable version chaining.
    Versioned,
}

impl StoreType {
    /// The wire name of this backend tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::TreeOfFiles => "tree_of_files",
            StoreType::PerBlock => "per_block",
            StoreType::Versioned => "versioned",
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorship and lineage metadata carried by every block.
///
/// The per-block backend fills the first four fields. The versioned backend
/// also chains `previous_version` → `update_version` per block and tracks
/// the structure a publish was grafted from in `source_version`. Subtree
/// fields are computed on demand (max edit over the subtree) and never
/// persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditInfo {
    /// Who last edited this block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_by: Option<UserId>,
    /// When this block was last edited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_on: Option<DateTime<Utc>>,
    /// Who last published this block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_by: Option<UserId>,
    /// When this block was last published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<DateTime<Utc>>,
    /// Structure version in which this block previously changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<VersionGuid>,
    /// Structure version in which this block last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_version: Option<VersionGuid>,
    /// Structure version a publish copied this block from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<VersionGuid>,
    /// Who edited the most recently edited block in this subtree.
    #[serde(skip)]
    pub subtree_edited_by: Option<UserId>,
    /// When the most recently edited block in this subtree changed.
    #[serde(skip)]
    pub subtree_edited_on: Option<DateTime<Utc>>,
}

impl EditInfo {
    /// Stamp a fresh edit by `user` at `now`.
    pub fn edited(user: UserId, now: DateTime<Utc>) -> Self {
        Self {
            edited_by: Some(user),
            edited_on: Some(now),
            ..Self::default()
        }
    }

    /// Record a new edit, preserving publish and lineage fields.
    pub fn touch(&mut self, user: UserId, now: DateTime<Utc>) {
        self.edited_by = Some(user);
        self.edited_on = Some(now);
    }

    /// Record a publish.
    pub fn mark_published(&mut self, user: UserId, now: DateTime<Utc>) {
        self.published_by = Some(user);
        self.published_date = Some(now);
    }

    /// Advance the version lineage: the current update version becomes the
    /// previous one and `version` becomes current.
    pub fn advance_version(&mut self, version: VersionGuid) {
        self.previous_version = self.update_version;
        self.update_version = Some(version);
    }
}
