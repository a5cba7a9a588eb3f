//! The store contract
//!
//! [`ModuleStore`] is the one trait every backend implements and the
//! router fans out to. Read operations are required; write operations
//! default to `Error::ReadOnlyStore`, so a read-only backend implements
//! only the read half.

use crate::block::XBlock;
use crate::context::StoreContext;
use crate::error::{Error, Result};
use crate::types::{PublishState, RevisionOption, StoreType, UserId};
use modulestore_keys::{BlockType, CourseKey, UsageKey};
use serde_json::{Map as JsonMap, Value as Json};
use tracing::warn;

/// One condition a field value must satisfy.
#[derive(Debug, Clone)]
pub enum ValueMatch {
    /// Exact equality. When the stored value is a list and the target is
    /// not, any matching element satisfies the condition.
    Eq(Json),
    /// Regular-expression match over string values. When the stored
    /// value is a list, any matching string element satisfies the
    /// condition. An invalid pattern matches nothing.
    Regex(String),
}

impl ValueMatch {
    /// Evaluate against a resolved field value.
    pub fn matches(&self, value: &Json) -> bool {
        match self {
            ValueMatch::Eq(target) => {
                if value == target {
                    return true;
                }
                match (value, target) {
                    (Json::Array(items), t) if !t.is_array() => items.iter().any(|i| i == t),
                    _ => false,
                }
            }
            ValueMatch::Regex(pattern) => {
                let re = match regex::Regex::new(pattern) {
                    Ok(re) => re,
                    Err(err) => {
                        warn!(target: "modulestore::query", pattern = %pattern, error = %err, "Invalid query regex");
                        return false;
                    }
                };
                match value {
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

/// Field conditions for `get_items`.
///
/// Category and name address the key; settings and content conditions
/// evaluate against resolved field values, inherited ones included.
#[derive(Debug, Clone, Default)]
pub struct Qualifiers {
    category: Option<BlockType>,
    name: Option<String>,
    settings: Vec<(String, ValueMatch)>,
    content: Vec<(String, ValueMatch)>,
}

impl Qualifiers {
    /// No conditions; matches every block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a block category.
    pub fn with_category(mut self, category: BlockType) -> Self {
        self.category = Some(category);
        self
    }

    /// Require a block name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Require a settings field to satisfy a condition.
    pub fn with_setting(mut self, field: impl Into<String>, m: ValueMatch) -> Self {
        self.settings.push((field.into(), m));
        self
    }

    /// Require a content field to satisfy a condition.
    pub fn with_content(mut self, field: impl Into<String>, m: ValueMatch) -> Self {
        self.content.push((field.into(), m));
        self
    }

    /// The required category, if any.
    pub fn category(&self) -> Option<&BlockType> {
        self.category.as_ref()
    }

    /// The required block name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// True when no conditions are set.
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.name.is_none()
            && self.settings.is_empty()
            && self.content.is_empty()
    }

    /// Evaluate every condition against one block. Conditions on fields
    /// the block does not declare match nothing.
    pub fn matches_block(&self, block: &XBlock) -> bool {
        if let Some(category) = &self.category {
            if block.category() != category {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if block.location().name() != name {
                return false;
            }
        }
        for (field, m) in self.settings.iter().chain(self.content.iter()) {
            match block.get_json(field) {
                Ok(value) => {
                    if !m.matches(&value) {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
        true
    }
}

/// Reject a revision argument outside the subset an operation allows.
pub fn check_revision(
    operation: &'static str,
    revision: Option<RevisionOption>,
    allowed: &[RevisionOption],
) -> Result<()> {
    match revision {
        None => Ok(()),
        Some(rev) if allowed.contains(&rev) => Ok(()),
        Some(rev) => Err(Error::UnsupportedRevision(format!(
            "{} does not accept revision '{}'",
            operation, rev
        ))),
    }
}

/// Contract implemented by every backend and by the router.
///
/// Write operations default to failing with `Error::ReadOnlyStore`.
pub trait ModuleStore: Send + Sync {
    /// Which backend this is.
    fn store_type(&self) -> StoreType;

    // ------------------------------------------------------------------
    // courses
    // ------------------------------------------------------------------

    /// The canonical course key when the course exists. With
    /// `ignore_case` the (org, course, run) comparison is
    /// case-insensitive; the returned key is always the stored casing.
    fn has_course(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        ignore_case: bool,
    ) -> Result<Option<CourseKey>>;

    /// The course root block.
    fn get_course(&self, ctx: &StoreContext, course: &CourseKey) -> Result<XBlock>;

    /// Every course root in this store.
    fn get_courses(&self, ctx: &StoreContext) -> Result<Vec<XBlock>>;

    /// Branch-agnostic keys of courses whose root has the given wiki
    /// slug.
    fn get_courses_for_wiki(&self, ctx: &StoreContext, wiki_slug: &str) -> Result<Vec<CourseKey>>;

    // ------------------------------------------------------------------
    // items
    // ------------------------------------------------------------------

    /// True when a block exists under the revision rule.
    fn has_item(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        revision: Option<RevisionOption>,
    ) -> Result<bool>;

    /// Load one block. `depth` limits descendant prefetch; `None` means
    /// the whole subtree.
    fn get_item(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        depth: Option<u32>,
        revision: Option<RevisionOption>,
    ) -> Result<XBlock>;

    /// Every block of a course satisfying the qualifiers.
    fn get_items(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        qualifiers: &Qualifiers,
        revision: Option<RevisionOption>,
    ) -> Result<Vec<XBlock>>;

    /// The parent whose child list names `key`, under the revision rule.
    fn get_parent_location(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        revision: Option<RevisionOption>,
    ) -> Result<Option<UsageKey>>;

    /// Blocks no parent references, excluding the root and detached
    /// categories.
    fn get_orphans(&self, ctx: &StoreContext, course: &CourseKey) -> Result<Vec<UsageKey>>;

    // ------------------------------------------------------------------
    // publish inspection
    // ------------------------------------------------------------------

    /// Where a block stands in the draft/published lifecycle.
    fn compute_publish_state(&self, ctx: &StoreContext, block: &XBlock) -> Result<PublishState>;

    /// True when the block or any descendant has unpublished changes.
    fn has_changes(&self, ctx: &StoreContext, key: &UsageKey) -> Result<bool>;

    // ------------------------------------------------------------------
    // writes
    // ------------------------------------------------------------------

    /// Create a course root (and seeded structure).
    fn create_course(
        &self,
        _ctx: &StoreContext,
        _user: UserId,
        _org: &str,
        _course: &str,
        _run: &str,
        _fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        Err(Error::ReadOnlyStore(self.store_type()))
    }

    /// Delete a course and all its blocks.
    fn delete_course(&self, _ctx: &StoreContext, _user: UserId, _course: &CourseKey) -> Result<()> {
        Err(Error::ReadOnlyStore(self.store_type()))
    }

    /// Create a block without attaching it to a parent.
    fn create_item(
        &self,
        _ctx: &StoreContext,
        _user: UserId,
        _course: &CourseKey,
        _category: &BlockType,
        _block_id: Option<&str>,
        _fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        Err(Error::ReadOnlyStore(self.store_type()))
    }

    /// Create a block and append it to `parent`'s child list.
    fn create_child(
        &self,
        _ctx: &StoreContext,
        _user: UserId,
        _parent: &UsageKey,
        _category: &BlockType,
        _block_id: Option<&str>,
        _fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        Err(Error::ReadOnlyStore(self.store_type()))
    }

    /// Persist a modified block. With `allow_not_found` the write
    /// creates the block when it does not exist yet.
    fn update_item(
        &self,
        _ctx: &StoreContext,
        _block: &XBlock,
        _user: UserId,
        _allow_not_found: bool,
    ) -> Result<XBlock> {
        Err(Error::ReadOnlyStore(self.store_type()))
    }

    /// Delete a block and its descendants under the revision rule.
    fn delete_item(
        &self,
        _ctx: &StoreContext,
        _key: &UsageKey,
        _user: UserId,
        _revision: Option<RevisionOption>,
    ) -> Result<()> {
        Err(Error::ReadOnlyStore(self.store_type()))
    }

    /// Publish a subtree, children first.
    fn publish(&self, _ctx: &StoreContext, _key: &UsageKey, _user: UserId) -> Result<()> {
        Err(Error::ReadOnlyStore(self.store_type()))
    }

    /// Turn the published version into a draft, removing the published
    /// version.
    fn unpublish(&self, _ctx: &StoreContext, _key: &UsageKey, _user: UserId) -> Result<()> {
        Err(Error::ReadOnlyStore(self.store_type()))
    }

    /// Discard draft changes, restoring the published version.
    fn revert_to_published(&self, _ctx: &StoreContext, _key: &UsageKey, _user: UserId) -> Result<()> {
        Err(Error::ReadOnlyStore(self.store_type()))
    }

    /// Copy the published subtree into draft for editing.
    fn convert_to_draft(&self, _ctx: &StoreContext, _key: &UsageKey, _user: UserId) -> Result<XBlock> {
        Err(Error::ReadOnlyStore(self.store_type()))
    }
}
