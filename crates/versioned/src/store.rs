//! The versioned backend
//!
//! Every course version is one immutable structure document; a course
//! index names the head structure of the draft and published branches.
//! A read resolves exactly one structure (head of a branch, or the
//! version pinned on the course key) and sees a consistent snapshot of
//! the whole course. Writes derive a new structure and advance the
//! branch pointer last, so readers never observe a half-applied write.
//!
//! Inherited settings are materialized into each block when a version is
//! written; reads hand them to the field layer without recomputing.

use crate::document::{
    block_id, block_usage, CourseIndexDoc, DefinitionDoc, StructureBlock, StructureDoc,
    COURSE_INDEXES, DEFINITIONS, STRUCTURES,
};
use modulestore_core::{
    check_revision, BranchSetting, DocumentKvs, Error, FieldSetRegistry, ModuleStore,
    PublishState, Qualifiers, Result, RevisionOption, ScopeIds, StoreContext, StoreType, UserId,
    XBlock,
};
use modulestore_docstore::{Collection, DocumentDatabase};
use modulestore_keys::{BlockType, Branch, CourseKey, UsageKey, VersionGuid};
use serde_json::{Map as JsonMap, Value as Json};
use std::sync::Arc;
use tracing::warn;

/// The structure one read operation resolves to.
pub(crate) struct Entry {
    /// Branch the structure was reached through; `None` when the course
    /// key pinned an explicit version (historical read).
    pub(crate) branch: Option<Branch>,
    /// Guid of the resolved structure.
    pub(crate) guid: VersionGuid,
    /// The resolved structure.
    pub(crate) structure: StructureDoc,
}

/// Branch-and-version backend over immutable structure documents.
pub struct VersionedStore {
    db: DocumentDatabase,
    pub(crate) structures: Collection,
    pub(crate) definitions: Collection,
    pub(crate) indexes: Collection,
    pub(crate) registry: Arc<FieldSetRegistry>,
}

impl VersionedStore {
    /// Assemble a store over a document database.
    pub fn new(db: DocumentDatabase, registry: Arc<FieldSetRegistry>) -> Self {
        let structures = db.collection(STRUCTURES);
        let definitions = db.collection(DEFINITIONS);
        let indexes = db.collection(COURSE_INDEXES);
        Self {
            db,
            structures,
            definitions,
            indexes,
            registry,
        }
    }

    /// A fully in-memory store with the standard field registry.
    pub fn in_memory() -> Self {
        Self::new(
            DocumentDatabase::in_memory(),
            Arc::new(FieldSetRegistry::standard()),
        )
    }

    /// The backing database.
    pub fn database(&self) -> &DocumentDatabase {
        &self.db
    }

    // ------------------------------------------------------------------
    // document access
    // ------------------------------------------------------------------

    pub(crate) fn load_index(&self, course: &CourseKey) -> Result<Option<CourseIndexDoc>> {
        match self.indexes.get(&CourseIndexDoc::doc_id(course)) {
            Some(value) => Ok(Some(CourseIndexDoc::from_json(value)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn require_index(&self, course: &CourseKey) -> Result<CourseIndexDoc> {
        self.load_index(course)?
            .ok_or_else(|| Error::not_found(course.for_branch(None)))
    }

    /// The request-cache key of one structure: the course root usage with
    /// the structure guid pinned on its course. Normalizing the cached
    /// key by course makes write eviction cover every cached version.
    fn structure_cache_key(course: &CourseKey, guid: VersionGuid) -> Option<UsageKey> {
        if !course.has_run() {
            return None;
        }
        let pinned = course.for_branch(None).for_version(Some(guid));
        let run = pinned.run().to_string();
        UsageKey::new(pinned, BlockType::course(), run).ok()
    }

    /// Load a structure through the request document cache. Structures
    /// are immutable, so a cached copy never goes stale; eviction on
    /// write only bounds what one request holds.
    pub(crate) fn fetch_structure(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        guid: VersionGuid,
    ) -> Result<Option<StructureDoc>> {
        let cache_key = Self::structure_cache_key(course, guid);
        if let Some(key) = &cache_key {
            if let Some(value) = ctx.request().cached_document(key) {
                return Ok(Some(StructureDoc::from_json(value)?));
            }
        }
        match self.structures.get(&StructureDoc::doc_id(guid)) {
            Some(value) => {
                if let Some(key) = &cache_key {
                    ctx.request().cache_document(key, value.clone());
                }
                Ok(Some(StructureDoc::from_json(value)?))
            }
            None => Ok(None),
        }
    }

    /// Load a structure a branch pointer names. A missing document here
    /// is corruption, not absence.
    pub(crate) fn require_structure(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        branch: Branch,
        guid: VersionGuid,
    ) -> Result<StructureDoc> {
        self.fetch_structure(ctx, course, guid)?.ok_or_else(|| {
            Error::Storage(format!(
                "course '{}' {} head points at missing structure '{}'",
                course.for_branch(None),
                branch.as_str(),
                guid
            ))
        })
    }

    pub(crate) fn load_definition(&self, id: &str) -> Result<DefinitionDoc> {
        match self.definitions.get(id) {
            Some(value) => DefinitionDoc::from_json(value),
            None => Err(Error::Storage(format!(
                "definition '{id}' referenced but not stored"
            ))),
        }
    }

    // ------------------------------------------------------------------
    // entry resolution
    // ------------------------------------------------------------------

    /// The branch an operation reads. An explicit revision argument wins
    /// over a branch pinned on the course key, which wins over the
    /// context default.
    pub(crate) fn branch_for(
        ctx: &StoreContext,
        course: &CourseKey,
        revision: Option<RevisionOption>,
    ) -> Branch {
        match revision {
            Some(RevisionOption::DraftOnly) | Some(RevisionOption::DraftPreferred) => Branch::Draft,
            Some(RevisionOption::PublishedOnly) => Branch::Published,
            _ => match course.branch() {
                Some(branch) => branch,
                None => match ctx.branch() {
                    BranchSetting::DraftPreferred => Branch::Draft,
                    BranchSetting::PublishedOnly => Branch::Published,
                },
            },
        }
    }

    /// Resolve the structure an operation reads. `None` when the course
    /// or the selected branch does not exist; a branch pointer naming a
    /// missing structure is corruption and surfaces as `Storage`.
    pub(crate) fn entry(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        revision: Option<RevisionOption>,
    ) -> Result<Option<Entry>> {
        ctx.check_cancelled()?;
        if let Some(guid) = course.version_guid() {
            return Ok(self.fetch_structure(ctx, course, guid)?.map(|structure| Entry {
                branch: None,
                guid,
                structure,
            }));
        }
        let Some(index) = self.load_index(course)? else {
            return Ok(None);
        };
        let branch = Self::branch_for(ctx, course, revision);
        let Some(guid) = index.branch_version(branch) else {
            return Ok(None);
        };
        match self.fetch_structure(ctx, course, guid)? {
            Some(structure) => Ok(Some(Entry {
                branch: Some(branch),
                guid,
                structure,
            })),
            None => Err(Error::Storage(format!(
                "course '{}' branch '{}' points at missing structure '{}'",
                course.for_branch(None),
                branch.as_str(),
                guid
            ))),
        }
    }

    pub(crate) fn require_entry(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        revision: Option<RevisionOption>,
    ) -> Result<Entry> {
        self.entry(ctx, course, revision)?
            .ok_or_else(|| Error::not_found(course.for_branch(None)))
    }

    /// Head structure of the published branch, if one exists. Draft
    /// reads consult it for publish stamps and draft status.
    pub(crate) fn published_view(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
    ) -> Result<Option<StructureDoc>> {
        let Some(index) = self.load_index(course)? else {
            return Ok(None);
        };
        let Some(guid) = index.branch_version(Branch::Published) else {
            return Ok(None);
        };
        self.fetch_structure(ctx, course, guid)
    }

    /// Head version of the branch the context selects, or of the pinned
    /// version when the course key carries one.
    pub fn head_version(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
    ) -> Result<Option<VersionGuid>> {
        Ok(self.entry(ctx, course, None)?.map(|entry| entry.guid))
    }

    // ------------------------------------------------------------------
    // block assembly
    // ------------------------------------------------------------------

    /// A published copy is current when the publish recorded the draft
    /// copy's present update version as its source.
    pub(crate) fn lineage_current(draft: &StructureBlock, published: &StructureBlock) -> bool {
        published.edit_info.source_version.is_some()
            && published.edit_info.source_version == draft.edit_info.update_version
    }

    /// Build a runtime block from a structure entry. `published` is the
    /// published head when `entry` came through the draft branch; it
    /// supplies publish stamps and decides draft status.
    pub(crate) fn build_block(
        &self,
        course: &CourseKey,
        entry: &Entry,
        id: &str,
        published: Option<&StructureDoc>,
    ) -> Result<XBlock> {
        let stored = entry
            .structure
            .get(id)
            .ok_or_else(|| Error::not_found(format!("{}/{}", course.for_branch(None), id)))?;
        let usage = block_usage(course, id)?;
        let definition = self.load_definition(&stored.definition)?;
        let kvs = DocumentKvs::from_snapshot(stored.snapshot(definition.fields))
            .with_inherited(stored.inherited_settings.clone());
        let field_set = self.registry.for_category(usage.block_type());
        let scope_ids = ScopeIds::with_definition(usage, stored.definition_key()?);

        let mut edit_info = stored.edit_info.clone();
        let (subtree_by, subtree_on) = entry.structure.subtree_edited(id);
        edit_info.subtree_edited_by = subtree_by;
        edit_info.subtree_edited_on = subtree_on;

        let mut is_draft = false;
        match entry.branch {
            Some(Branch::Draft) => match published.and_then(|s| s.get(id)) {
                Some(copy) => {
                    edit_info.published_by = copy.edit_info.edited_by;
                    edit_info.published_date = copy.edit_info.edited_on;
                    is_draft = !Self::lineage_current(stored, copy);
                }
                None => is_draft = true,
            },
            Some(Branch::Published) => {
                edit_info.published_by = edit_info.edited_by;
                edit_info.published_date = edit_info.edited_on;
            }
            None => {}
        }

        Ok(XBlock::new(scope_ids, field_set, Box::new(kvs))
            .with_edit_info(edit_info)
            .with_draft(is_draft))
    }

    /// Build one block out of an entry, loading the published view when
    /// the entry is a draft read.
    fn build_entry_block(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        entry: &Entry,
        id: &str,
    ) -> Result<XBlock> {
        let published = match entry.branch {
            Some(Branch::Draft) => self.published_view(ctx, course)?,
            _ => None,
        };
        self.build_block(&course.for_branch(None), entry, id, published.as_ref())
    }
}

impl ModuleStore for VersionedStore {
    fn store_type(&self) -> StoreType {
        StoreType::Versioned
    }

    fn has_course(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        ignore_case: bool,
    ) -> Result<Option<CourseKey>> {
        ctx.check_cancelled()?;
        let branch = Self::branch_for(ctx, course, None);
        if let Some(index) = self.load_index(course)? {
            if index.branch_version(branch).is_some() {
                return Ok(Some(index.course_key()?));
            }
        }
        if !ignore_case {
            return Ok(None);
        }
        for id in self.indexes.ids() {
            let Some(value) = self.indexes.get(&id) else {
                continue;
            };
            let index = CourseIndexDoc::from_json(value)?;
            let stored = index.course_key()?;
            if stored.matches_ignore_case(course) && index.branch_version(branch).is_some() {
                return Ok(Some(stored));
            }
        }
        Ok(None)
    }

    fn get_course(&self, ctx: &StoreContext, course: &CourseKey) -> Result<XBlock> {
        let entry = self.require_entry(ctx, course, None)?;
        let root = entry.structure.root.clone();
        self.build_entry_block(ctx, course, &entry, &root)
    }

    fn get_courses(&self, ctx: &StoreContext) -> Result<Vec<XBlock>> {
        ctx.check_cancelled()?;
        let mut courses = Vec::new();
        for id in self.indexes.ids() {
            let Some(value) = self.indexes.get(&id) else {
                continue;
            };
            let course = match CourseIndexDoc::from_json(value).and_then(|index| index.course_key())
            {
                Ok(course) => course,
                Err(err) => {
                    warn!(target: "modulestore::versioned", index = %id, error = %err, "Skipping unreadable course index");
                    continue;
                }
            };
            match self.get_course(ctx, &course) {
                Ok(block) => courses.push(block),
                // no head on the selected branch: not a course here
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!(target: "modulestore::versioned", course = %course, error = %err, "Skipping unreadable course");
                }
            }
        }
        Ok(courses)
    }

    fn get_courses_for_wiki(&self, ctx: &StoreContext, wiki_slug: &str) -> Result<Vec<CourseKey>> {
        ctx.check_cancelled()?;
        let mut keys = Vec::new();
        for id in self.indexes.ids() {
            let Some(value) = self.indexes.get(&id) else {
                continue;
            };
            let course = CourseIndexDoc::from_json(value)?.course_key()?;
            let Some(entry) = self.entry(ctx, &course, None)? else {
                continue;
            };
            let slug = entry
                .structure
                .get(&entry.structure.root)
                .and_then(|root| root.fields.get("wiki_slug"))
                .and_then(Json::as_str);
            if slug == Some(wiki_slug) {
                keys.push(course.for_branch(None));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn has_item(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        revision: Option<RevisionOption>,
    ) -> Result<bool> {
        check_revision(
            "has_item",
            revision,
            &[
                RevisionOption::DraftOnly,
                RevisionOption::PublishedOnly,
                RevisionOption::DraftPreferred,
            ],
        )?;
        match self.entry(ctx, key.course_key(), revision)? {
            Some(entry) => Ok(entry.structure.contains(&block_id(key))),
            None => Ok(false),
        }
    }

    fn get_item(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        _depth: Option<u32>,
        revision: Option<RevisionOption>,
    ) -> Result<XBlock> {
        check_revision(
            "get_item",
            revision,
            &[
                RevisionOption::DraftOnly,
                RevisionOption::PublishedOnly,
                RevisionOption::DraftPreferred,
            ],
        )?;
        // the resolved structure already holds the whole course and is
        // request-cached, so a depth hint has nothing left to warm
        let entry = self
            .entry(ctx, key.course_key(), revision)?
            .ok_or_else(|| Error::not_found(key.as_published()))?;
        let id = block_id(key);
        if !entry.structure.contains(&id) {
            return Err(Error::not_found(key.as_published()));
        }
        self.build_entry_block(ctx, key.course_key(), &entry, &id)
    }

    fn get_items(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        qualifiers: &Qualifiers,
        revision: Option<RevisionOption>,
    ) -> Result<Vec<XBlock>> {
        check_revision(
            "get_items",
            revision,
            &[RevisionOption::DraftOnly, RevisionOption::PublishedOnly],
        )?;
        let Some(entry) = self.entry(ctx, course, revision)? else {
            return Ok(Vec::new());
        };
        let identity = course.for_branch(None);
        let published = match entry.branch {
            Some(Branch::Draft) => self.published_view(ctx, course)?,
            _ => None,
        };

        let mut blocks = Vec::new();
        for (id, stored) in &entry.structure.blocks {
            if let Some(category) = qualifiers.category() {
                // cheap pre-filter saves the definition fetch
                if stored.block_type != category.as_str() {
                    continue;
                }
            }
            let block = self.build_block(&identity, &entry, id, published.as_ref())?;
            if qualifiers.matches_block(&block) {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    fn get_parent_location(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        revision: Option<RevisionOption>,
    ) -> Result<Option<UsageKey>> {
        check_revision(
            "get_parent_location",
            revision,
            &[RevisionOption::DraftPreferred, RevisionOption::PublishedOnly],
        )?;
        let Some(entry) = self.entry(ctx, key.course_key(), revision)? else {
            return Ok(None);
        };
        match entry.structure.parent_id(&block_id(key)) {
            Some(parent) => Ok(Some(block_usage(key.course_key(), &parent)?)),
            None => Ok(None),
        }
    }

    fn get_orphans(&self, ctx: &StoreContext, course: &CourseKey) -> Result<Vec<UsageKey>> {
        let entry = self.require_entry(ctx, course, None)?;
        let reachable = entry.structure.reachable_ids();
        let identity = course.for_branch(None);
        let mut orphans = Vec::new();
        for (id, stored) in &entry.structure.blocks {
            if reachable.contains(id) {
                continue;
            }
            if BlockType::new(&stored.block_type)?.is_detached() {
                continue;
            }
            orphans.push(block_usage(&identity, id)?);
        }
        orphans.sort();
        Ok(orphans)
    }

    fn compute_publish_state(&self, ctx: &StoreContext, block: &XBlock) -> Result<PublishState> {
        self.publish_state_of(ctx, block.location())
    }

    fn has_changes(&self, ctx: &StoreContext, key: &UsageKey) -> Result<bool> {
        self.do_has_changes(ctx, key)
    }

    fn create_course(
        &self,
        ctx: &StoreContext,
        user: UserId,
        org: &str,
        course: &str,
        run: &str,
        fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        self.do_create_course(ctx, user, org, course, run, fields)
    }

    fn delete_course(&self, ctx: &StoreContext, user: UserId, course: &CourseKey) -> Result<()> {
        self.do_delete_course(ctx, user, course)
    }

    fn create_item(
        &self,
        ctx: &StoreContext,
        user: UserId,
        course: &CourseKey,
        category: &BlockType,
        block_id: Option<&str>,
        fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        self.do_create_item(ctx, user, course, category, block_id, fields)
    }

    fn create_child(
        &self,
        ctx: &StoreContext,
        user: UserId,
        parent: &UsageKey,
        category: &BlockType,
        block_id: Option<&str>,
        fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        self.do_create_child(ctx, user, parent, category, block_id, fields)
    }

    fn update_item(
        &self,
        ctx: &StoreContext,
        block: &XBlock,
        user: UserId,
        allow_not_found: bool,
    ) -> Result<XBlock> {
        self.do_update_item(ctx, block, user, allow_not_found)
    }

    fn delete_item(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        user: UserId,
        revision: Option<RevisionOption>,
    ) -> Result<()> {
        self.do_delete_item(ctx, key, user, revision)
    }

    fn publish(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<()> {
        self.do_publish(ctx, key, user)
    }

    fn unpublish(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<()> {
        self.do_unpublish(ctx, key, user)
    }

    fn convert_to_draft(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<XBlock> {
        self.do_convert_to_draft(ctx, key, user)
    }

    fn revert_to_published(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        user: UserId,
    ) -> Result<()> {
        self.do_revert_to_published(ctx, key, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{course_key, populated_store, user, vertical_key};
    use modulestore_core::ValueMatch;
    use serde_json::json;

    fn chapter_key() -> UsageKey {
        course_key()
            .make_usage_key(BlockType::new("chapter").unwrap(), "ch1")
            .unwrap()
    }

    // ========================================
    // Course Lookup Tests
    // ========================================

    #[test]
    fn test_create_course_populates_draft_branch_only() {
        let (store, ctx) = populated_store();
        let index = store.require_index(&course_key()).unwrap();
        assert!(index.branch_version(Branch::Draft).is_some());
        assert!(index.branch_version(Branch::Published).is_none());

        assert!(store.has_course(&ctx, &course_key(), false).unwrap().is_some());
        let published_ctx = ctx.with_branch(BranchSetting::PublishedOnly);
        assert!(store
            .has_course(&published_ctx, &course_key(), false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_has_course_ignore_case_returns_stored_casing() {
        let (store, ctx) = populated_store();
        let shouty = CourseKey::new("EDX", "TOY", "2012_FALL").unwrap();
        assert!(store.has_course(&ctx, &shouty, false).unwrap().is_none());
        let found = store.has_course(&ctx, &shouty, true).unwrap().unwrap();
        assert_eq!(found, course_key());
    }

    #[test]
    fn test_get_courses_skips_branchless_courses() {
        let (store, ctx) = populated_store();
        assert_eq!(store.get_courses(&ctx).unwrap().len(), 1);

        // nothing is published yet, so the published view has no courses
        let published_ctx = ctx.with_branch(BranchSetting::PublishedOnly);
        assert!(store.get_courses(&published_ctx).unwrap().is_empty());
    }

    #[test]
    fn test_get_courses_for_wiki_matches_explicit_slug() {
        let (store, ctx) = populated_store();
        let mut root = store.get_course(&ctx, &course_key()).unwrap();
        root.set("wiki_slug", &json!("physics-101")).unwrap();
        store.update_item(&ctx, &root, user(), false).unwrap();

        assert_eq!(
            store.get_courses_for_wiki(&ctx, "physics-101").unwrap(),
            vec![course_key()]
        );
        assert!(store.get_courses_for_wiki(&ctx, "other").unwrap().is_empty());
    }

    // ========================================
    // Item Read Tests
    // ========================================

    #[test]
    fn test_get_item_returns_branch_agnostic_location() {
        let (store, ctx) = populated_store();
        let block = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        assert_eq!(block.location(), &vertical_key());
        assert!(block.location().course_key().branch().is_none());
        assert!(block.is_draft(), "unpublished block reads as draft");
    }

    #[test]
    fn test_get_item_respects_published_only_revision() {
        let (store, ctx) = populated_store();
        let err = store
            .get_item(
                &ctx,
                &vertical_key(),
                None,
                Some(RevisionOption::PublishedOnly),
            )
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_get_item_rejects_revision_all() {
        let (store, ctx) = populated_store();
        let err = store
            .get_item(&ctx, &vertical_key(), None, Some(RevisionOption::All))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedRevision(_)));
    }

    #[test]
    fn test_version_pinned_read_sees_history() {
        let (store, ctx) = populated_store();
        let before = store.head_version(&ctx, &course_key()).unwrap().unwrap();

        let mut block = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        block.set("display_name", &json!("Renamed Unit")).unwrap();
        store.update_item(&ctx, &block, user(), false).unwrap();

        let after = store.head_version(&ctx, &course_key()).unwrap().unwrap();
        assert_ne!(before, after);

        let pinned_course = course_key().for_version(Some(before));
        let old_key = pinned_course
            .make_usage_key(BlockType::new("vertical").unwrap(), "v1")
            .unwrap();
        let old = store.get_item(&ctx, &old_key, None, None).unwrap();
        assert_eq!(old.display_name().as_deref(), Some("Unit 1"));

        let new = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        assert_eq!(new.display_name().as_deref(), Some("Renamed Unit"));
    }

    #[test]
    fn test_structure_lands_in_request_cache() {
        let (store, ctx) = populated_store();
        store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        assert!(ctx.request().cached_document_count() > 0);

        // a write evicts everything this course put in the cache
        let mut block = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        block.set("display_name", &json!("Touched")).unwrap();
        store.update_item(&ctx, &block, user(), false).unwrap();
        assert_eq!(ctx.request().cached_document_count(), 0);
    }

    // ========================================
    // Query Tests
    // ========================================

    #[test]
    fn test_get_items_filters_by_category_and_field() {
        let (store, ctx) = populated_store();
        let chapters = store
            .get_items(
                &ctx,
                &course_key(),
                &Qualifiers::new().with_category(BlockType::new("chapter").unwrap()),
                None,
            )
            .unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].location(), &chapter_key());

        let graded = store
            .get_items(
                &ctx,
                &course_key(),
                &Qualifiers::new().with_setting("graded", ValueMatch::Eq(json!(true))),
                None,
            )
            .unwrap();
        // the chapter sets graded and its descendants inherit it
        assert_eq!(graded.len(), 3);
    }

    #[test]
    fn test_get_items_published_only_sees_published_branch() {
        let (store, ctx) = populated_store();
        let published = store
            .get_items(
                &ctx,
                &course_key(),
                &Qualifiers::new(),
                Some(RevisionOption::PublishedOnly),
            )
            .unwrap();
        assert!(published.is_empty());
    }

    #[test]
    fn test_get_items_unknown_course_is_empty() {
        let (store, ctx) = populated_store();
        let other = CourseKey::new("MIT", "ghost", "2024").unwrap();
        assert!(store
            .get_items(&ctx, &other, &Qualifiers::new(), None)
            .unwrap()
            .is_empty());
    }

    // ========================================
    // Tree Shape Tests
    // ========================================

    #[test]
    fn test_get_parent_location_walks_child_lists() {
        let (store, ctx) = populated_store();
        let root = course_key().course_root_usage().unwrap();
        assert_eq!(
            store
                .get_parent_location(&ctx, &chapter_key(), None)
                .unwrap(),
            Some(root)
        );
        assert_eq!(
            store
                .get_parent_location(
                    &ctx,
                    &chapter_key(),
                    Some(RevisionOption::PublishedOnly)
                )
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_get_orphans_reports_unreachable_blocks() {
        let (store, ctx) = populated_store();
        assert!(store.get_orphans(&ctx, &course_key()).unwrap().is_empty());

        // creating without a parent leaves the block unreachable
        let stray = store
            .create_item(
                &ctx,
                user(),
                &course_key(),
                &BlockType::new("html").unwrap(),
                Some("stray"),
                &JsonMap::new(),
            )
            .unwrap();
        assert_eq!(
            store.get_orphans(&ctx, &course_key()).unwrap(),
            vec![stray.location().clone()]
        );

        // detached categories never count as orphans
        store
            .create_item(
                &ctx,
                user(),
                &course_key(),
                &BlockType::static_tab(),
                Some("syllabus"),
                &JsonMap::new(),
            )
            .unwrap();
        assert_eq!(store.get_orphans(&ctx, &course_key()).unwrap().len(), 1);
    }

    // ========================================
    // Persistence Tests
    // ========================================

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let reopen = || {
            VersionedStore::new(
                DocumentDatabase::open(dir.path()).unwrap(),
                Arc::new(FieldSetRegistry::standard()),
            )
        };
        let head = {
            let store = reopen();
            let ctx = StoreContext::draft_preferred();
            store
                .create_course(&ctx, user(), "edX", "toy", "2012_Fall", &JsonMap::new())
                .unwrap();
            store.head_version(&ctx, &course_key()).unwrap()
        };
        assert!(head.is_some());

        let store = reopen();
        let ctx = StoreContext::draft_preferred();
        assert_eq!(
            store.has_course(&ctx, &course_key(), false).unwrap(),
            Some(course_key())
        );
        assert_eq!(store.head_version(&ctx, &course_key()).unwrap(), head);
        let course = store.get_course(&ctx, &course_key()).unwrap();
        assert_eq!(course.location().name(), "2012_Fall");
    }
}
