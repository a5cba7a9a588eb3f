//! The per-block backend
//!
//! Each block revision is one document; the draft copy lives beside the
//! published one under an id suffixed `@draft`. Reads resolve draft
//! first under a draft-preferred branch (except for direct-only
//! categories, which never have drafts), falling back to published.
//!
//! Course identity here is (org, course); the run appears only as the
//! course root document's name.

use crate::document::{BlockDocument, COLLECTION};
use modulestore_core::{
    check_revision, compute_inheritance, BranchSetting, DocumentKvs, Error, FieldSetRegistry,
    InProcessInheritanceCache, InheritanceMap, InheritanceSeed, ModuleStore, PublishState,
    Qualifiers, Result, RevisionOption, ScopeIds, SharedInheritanceCache, StoreContext, StoreType,
    UserId, XBlock,
};
use modulestore_docstore::{Collection, DocumentDatabase, Query};
use modulestore_keys::{BlockType, CourseKey, UsageKey};
use rustc_hash::FxHashSet;
use serde_json::{json, Map as JsonMap, Value as Json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a read resolves between the draft and published copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadMode {
    /// Draft when present (draft-capable categories only), else published.
    DraftPreferred,
    /// Draft copy only.
    DraftOnly,
    /// Published copy only.
    PublishedOnly,
}

/// Draft/published backend keeping one document per block revision.
pub struct PerBlockStore {
    db: DocumentDatabase,
    pub(crate) collection: Collection,
    pub(crate) registry: Arc<FieldSetRegistry>,
    shared_cache: Arc<dyn SharedInheritanceCache>,
}

impl PerBlockStore {
    /// Assemble a store over a document database.
    pub fn new(
        db: DocumentDatabase,
        registry: Arc<FieldSetRegistry>,
        shared_cache: Arc<dyn SharedInheritanceCache>,
    ) -> Self {
        let collection = db.collection(COLLECTION);
        Self {
            db,
            collection,
            registry,
            shared_cache,
        }
    }

    /// A fully in-memory store with the standard field registry.
    pub fn in_memory() -> Self {
        Self::new(
            DocumentDatabase::in_memory(),
            Arc::new(FieldSetRegistry::standard()),
            Arc::new(InProcessInheritanceCache::new()),
        )
    }

    /// The backing database.
    pub fn database(&self) -> &DocumentDatabase {
        &self.db
    }

    // ------------------------------------------------------------------
    // document access
    // ------------------------------------------------------------------

    pub(crate) fn get_doc(&self, key: &UsageKey) -> Result<Option<BlockDocument>> {
        match self.collection.get(&BlockDocument::doc_id(key)) {
            Some(value) => Ok(Some(BlockDocument::from_json(value)?)),
            None => Ok(None),
        }
    }

    /// Read through the request document cache. Writers use [`get_doc`]
    /// directly; every write evicts the course from this cache.
    ///
    /// [`get_doc`]: Self::get_doc
    fn fetch_doc(&self, ctx: &StoreContext, key: &UsageKey) -> Result<Option<BlockDocument>> {
        let cache_key = key.for_branch(None);
        if let Some(value) = ctx.request().cached_document(&cache_key) {
            return Ok(Some(BlockDocument::from_json(value)?));
        }
        match self.collection.get(&BlockDocument::doc_id(key)) {
            Some(value) => {
                ctx.request().cache_document(&cache_key, value.clone());
                Ok(Some(BlockDocument::from_json(value)?))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn put_doc(&self, key: &UsageKey, doc: &BlockDocument) -> Result<()> {
        self.collection.upsert(&BlockDocument::doc_id(key), doc.to_json()?)
    }

    pub(crate) fn insert_doc(&self, key: &UsageKey, doc: &BlockDocument) -> Result<()> {
        let id = BlockDocument::doc_id(key);
        if self.collection.contains(&id) {
            return Err(Error::duplicate(key));
        }
        self.collection.insert(&id, doc.to_json()?)
    }

    pub(crate) fn remove_doc(&self, key: &UsageKey) -> Result<bool> {
        self.collection.remove(&BlockDocument::doc_id(key))
    }

    // ------------------------------------------------------------------
    // revision resolution
    // ------------------------------------------------------------------

    pub(crate) fn read_mode(
        ctx: &StoreContext,
        revision: Option<RevisionOption>,
    ) -> Result<ReadMode> {
        match revision {
            Some(RevisionOption::DraftOnly) => Ok(ReadMode::DraftOnly),
            Some(RevisionOption::PublishedOnly) => Ok(ReadMode::PublishedOnly),
            Some(RevisionOption::DraftPreferred) => Ok(ReadMode::DraftPreferred),
            Some(RevisionOption::All) => Err(Error::UnsupportedRevision(
                "reads do not accept revision 'all'".to_string(),
            )),
            None => Ok(match ctx.branch() {
                BranchSetting::DraftPreferred => ReadMode::DraftPreferred,
                BranchSetting::PublishedOnly => ReadMode::PublishedOnly,
            }),
        }
    }

    /// Find the stored copy of a block under the read mode. The returned
    /// key carries the revision of the copy actually read.
    pub(crate) fn resolve(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        revision: Option<RevisionOption>,
    ) -> Result<Option<(UsageKey, BlockDocument)>> {
        ctx.check_cancelled()?;
        let mode = Self::read_mode(ctx, revision)?;
        let published = key.as_published();
        match mode {
            ReadMode::PublishedOnly => Ok(self.fetch_doc(ctx, &published)?.map(|d| (published, d))),
            ReadMode::DraftOnly => {
                if key.is_direct_only() {
                    return Ok(None);
                }
                let draft = key.as_draft();
                Ok(self.fetch_doc(ctx, &draft)?.map(|d| (draft, d)))
            }
            ReadMode::DraftPreferred => {
                if !key.is_direct_only() {
                    let draft = key.as_draft();
                    if let Some(doc) = self.fetch_doc(ctx, &draft)? {
                        return Ok(Some((draft, doc)));
                    }
                }
                Ok(self.fetch_doc(ctx, &published)?.map(|d| (published, d)))
            }
        }
    }

    // ------------------------------------------------------------------
    // inheritance
    // ------------------------------------------------------------------

    pub(crate) fn inheritance(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
    ) -> Result<Arc<InheritanceMap>> {
        if let Some(map) = ctx.request().inheritance_map(course) {
            return Ok(map);
        }
        if let Some(map) = self.shared_cache.get(course) {
            ctx.request().store_inheritance(course, Arc::clone(&map));
            return Ok(map);
        }
        let map = Arc::new(self.compute_course_inheritance(ctx, course)?);
        self.shared_cache.put(course, Arc::clone(&map));
        ctx.request().store_inheritance(course, Arc::clone(&map));
        Ok(map)
    }

    fn compute_course_inheritance(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
    ) -> Result<InheritanceMap> {
        let Ok(root) = course.course_root_usage() else {
            return Ok(InheritanceMap::empty(course.for_branch(None)));
        };
        let mut seed = InheritanceSeed::new(
            course.for_branch(None),
            root.clone(),
            self.registry.inheritable_names().clone(),
        );
        let mut queue = vec![root];
        let mut visited: FxHashSet<UsageKey> = FxHashSet::default();
        while let Some(key) = queue.pop() {
            if !visited.insert(key.as_published()) {
                continue;
            }
            let Some((_, doc)) = self.resolve(ctx, &key, None)? else {
                continue;
            };
            let children = doc.child_keys(course)?;
            seed.add_block(&key, &doc.metadata, children.clone());
            queue.extend(children);
        }
        Ok(compute_inheritance(&seed))
    }

    /// Drop all caches for a course after a write.
    pub(crate) fn invalidate_course(&self, ctx: &StoreContext, course: &CourseKey) {
        self.shared_cache.invalidate(course);
        ctx.request().evict_course(course);
    }

    // ------------------------------------------------------------------
    // block assembly
    // ------------------------------------------------------------------

    /// Build a runtime block from a stored document. The returned
    /// location is always the published form; the draft origin rides in
    /// `is_draft`.
    pub(crate) fn build_block(
        &self,
        ctx: &StoreContext,
        stored_key: UsageKey,
        doc: BlockDocument,
    ) -> Result<XBlock> {
        let is_draft = stored_key.is_draft();
        let logical = stored_key.as_published();
        let inherited = self
            .inheritance(ctx, logical.course_key())?
            .inherited_for(&logical);
        let field_set = self.registry.for_category(logical.block_type());
        let kvs = DocumentKvs::from_snapshot(doc.snapshot()).with_inherited(inherited);
        Ok(XBlock::new(ScopeIds::new(logical), field_set, Box::new(kvs))
            .with_edit_info(doc.edit_info)
            .with_draft(is_draft))
    }

    // ------------------------------------------------------------------
    // course scans
    // ------------------------------------------------------------------

    pub(crate) fn course_query(course: &CourseKey) -> Query {
        Query::new()
            .eq("org", json!(course.org()))
            .eq("course", json!(course.course()))
    }

    /// Every stored document of a course, keyed by its stored usage key.
    pub(crate) fn course_docs(
        &self,
        course: &CourseKey,
    ) -> Result<Vec<(UsageKey, BlockDocument)>> {
        self.collection
            .find(&Self::course_query(course))
            .into_iter()
            .map(|(id, value)| {
                let key = UsageKey::parse_deprecated(&id)?.map_into_course(course.for_branch(None));
                Ok((key, BlockDocument::from_json(value)?))
            })
            .collect()
    }

    fn stored_course_key(id: &str, doc: &BlockDocument) -> Result<CourseKey> {
        let parsed = UsageKey::parse_deprecated(id)?;
        Ok(CourseKey::new(&doc.org, &doc.course, parsed.name())?)
    }

    fn course_matches(stored: &CourseKey, wanted: &CourseKey, ignore_case: bool) -> bool {
        if ignore_case {
            if wanted.has_run() {
                stored.matches_ignore_case(wanted)
            } else {
                stored.same_org_course_ignore_case(wanted)
            }
        } else if wanted.has_run() {
            stored.org() == wanted.org()
                && stored.course() == wanted.course()
                && stored.run() == wanted.run()
        } else {
            stored.org() == wanted.org() && stored.course() == wanted.course()
        }
    }

    /// Stored course keys, optionally filtered to one (org, course, run).
    pub(crate) fn find_course_keys(
        &self,
        wanted: Option<(&CourseKey, bool)>,
    ) -> Result<Vec<CourseKey>> {
        let mut keys = Vec::new();
        for (id, value) in self
            .collection
            .find(&Query::new().eq("category", json!("course")))
        {
            let doc = BlockDocument::from_json(value)?;
            let stored = Self::stored_course_key(&id, &doc)?;
            match wanted {
                Some((wanted_key, ignore_case)) => {
                    if Self::course_matches(&stored, wanted_key, ignore_case) {
                        keys.push(stored);
                    }
                }
                None => keys.push(stored),
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Warm the request document cache with descendants. `depth` counts
    /// levels below `roots`; `None` walks the whole subtree. Failures
    /// are logged and never surface to the triggering read.
    fn prefetch(
        &self,
        ctx: &StoreContext,
        roots: Vec<UsageKey>,
        depth: Option<u32>,
        revision: Option<RevisionOption>,
    ) {
        let mut visited: FxHashSet<UsageKey> = FxHashSet::default();
        let mut stack: Vec<(UsageKey, Option<u32>)> =
            roots.into_iter().map(|k| (k, depth)).collect();
        while let Some((key, remaining)) = stack.pop() {
            if ctx.check_cancelled().is_err() {
                return;
            }
            if !visited.insert(key.as_published()) {
                continue;
            }
            match self.resolve(ctx, &key, revision) {
                Ok(Some((_, doc))) => {
                    if remaining == Some(0) {
                        continue;
                    }
                    let below = remaining.map(|d| d - 1);
                    match doc.child_keys(key.course_key()) {
                        Ok(children) => {
                            stack.extend(children.into_iter().map(|c| (c, below)));
                        }
                        Err(err) => {
                            debug!(target: "modulestore::perblock", block = %key, error = %err, "Prefetch skipped malformed child list");
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(target: "modulestore::perblock", block = %key, error = %err, "Prefetch read failed");
                }
            }
        }
    }

    /// The current child list of a block under the read mode, for
    /// traversals.
    pub(crate) fn children_of(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        revision: Option<RevisionOption>,
    ) -> Result<Vec<UsageKey>> {
        match self.resolve(ctx, key, revision)? {
            Some((_, doc)) => doc.child_keys(key.course_key()),
            None => Ok(Vec::new()),
        }
    }

    /// Stored publish state from the two document copies.
    pub(crate) fn stored_publish_state(&self, key: &UsageKey) -> Result<PublishState> {
        if key.is_direct_only() {
            return Ok(PublishState::Public);
        }
        let draft = self.get_doc(&key.as_draft())?;
        let published = self.get_doc(&key.as_published())?;
        Ok(match (draft, published) {
            (Some(_), None) => PublishState::Private,
            (None, Some(_)) | (None, None) => PublishState::Public,
            (Some(d), Some(p)) => {
                if d.content_equal(&p) {
                    PublishState::Public
                } else {
                    PublishState::Draft
                }
            }
        })
    }

    fn subtree_has_changes(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        visited: &mut FxHashSet<UsageKey>,
    ) -> Result<bool> {
        if !visited.insert(key.as_published()) {
            return Ok(false);
        }
        if !key.is_direct_only() && self.stored_publish_state(key)? != PublishState::Public {
            return Ok(true);
        }
        for child in self.children_of(ctx, key, Some(RevisionOption::DraftPreferred))? {
            if self.subtree_has_changes(ctx, &child, visited)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl ModuleStore for PerBlockStore {
    fn store_type(&self) -> StoreType {
        StoreType::PerBlock
    }

    fn has_course(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        ignore_case: bool,
    ) -> Result<Option<CourseKey>> {
        ctx.check_cancelled()?;
        if !ignore_case && course.has_run() {
            let root = course.course_root_usage()?;
            return Ok(self.get_doc(&root)?.map(|_| course.for_branch(None)));
        }
        let matches = self.find_course_keys(Some((course, ignore_case)))?;
        Ok(matches.into_iter().next())
    }

    fn get_course(&self, ctx: &StoreContext, course: &CourseKey) -> Result<XBlock> {
        let canonical = self
            .has_course(ctx, course, false)?
            .ok_or_else(|| Error::not_found(course))?;
        let root = canonical.course_root_usage()?;
        self.get_item(ctx, &root, None, None)
    }

    fn get_courses(&self, ctx: &StoreContext) -> Result<Vec<XBlock>> {
        ctx.check_cancelled()?;
        let mut courses = Vec::new();
        for key in self.find_course_keys(None)? {
            let root = key.course_root_usage()?;
            match self
                .resolve(ctx, &root, None)
                .and_then(|found| match found {
                    Some((stored, doc)) => self.build_block(ctx, stored, doc).map(Some),
                    None => Ok(None),
                }) {
                Ok(Some(block)) => courses.push(block),
                Ok(None) => {}
                Err(err) => {
                    warn!(target: "modulestore::perblock", course = %key, error = %err, "Skipping unreadable course");
                }
            }
        }
        Ok(courses)
    }

    fn get_courses_for_wiki(&self, ctx: &StoreContext, wiki_slug: &str) -> Result<Vec<CourseKey>> {
        ctx.check_cancelled()?;
        let query = Query::new()
            .eq("category", json!("course"))
            .eq("metadata.wiki_slug", json!(wiki_slug));
        let mut keys = Vec::new();
        for (id, value) in self.collection.find(&query) {
            let doc = BlockDocument::from_json(value)?;
            keys.push(Self::stored_course_key(&id, &doc)?);
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
        Ok(self.resolve(ctx, key, revision)?.is_some())
    }

    fn get_item(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        depth: Option<u32>,
        revision: Option<RevisionOption>,
    ) -> Result<XBlock> {
        let (stored, doc) = self
            .resolve(ctx, key, revision)?
            .ok_or_else(|| Error::not_found(key))?;
        if depth != Some(0) {
            if let Ok(children) = doc.child_keys(key.course_key()) {
                self.prefetch(ctx, children, depth.map(|d| d - 1), revision);
            }
        }
        self.build_block(ctx, stored, doc)
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
        ctx.check_cancelled()?;

        let mut query = Self::course_query(course);
        if let Some(category) = qualifiers.category() {
            query = query.eq("category", json!(category.as_str()));
        }

        // logical id -> chosen copy; draft entries overwrite published
        // ones under a draft-preferred view
        let mut chosen: BTreeMap<String, (UsageKey, BlockDocument)> = BTreeMap::new();
        let mode = Self::read_mode(ctx, revision)?;
        for (id, value) in self.collection.find(&query) {
            let stored = UsageKey::parse_deprecated(&id)?.map_into_course(course.for_branch(None));
            let doc = BlockDocument::from_json(value)?;
            let logical_id = stored.as_published().to_deprecated_string();
            match mode {
                ReadMode::PublishedOnly => {
                    if !stored.is_draft() {
                        chosen.insert(logical_id, (stored, doc));
                    }
                }
                ReadMode::DraftOnly => {
                    if stored.is_draft() {
                        chosen.insert(logical_id, (stored, doc));
                    }
                }
                ReadMode::DraftPreferred => {
                    if stored.is_draft() {
                        chosen.insert(logical_id, (stored, doc));
                    } else {
                        chosen.entry(logical_id).or_insert((stored, doc));
                    }
                }
            }
        }

        let mut blocks = Vec::new();
        for (_, (stored, doc)) in chosen {
            let block = self.build_block(ctx, stored, doc)?;
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
        ctx.check_cancelled()?;

        let child_ref = key.as_published().to_deprecated_string();
        let course = key.course_key().for_branch(None);
        let query =
            Self::course_query(&course).eq("definition.children", json!(child_ref.as_str()));

        let prefer_draft = match revision {
            Some(RevisionOption::DraftPreferred) => true,
            Some(_) => false,
            None => ctx.branch() == BranchSetting::DraftPreferred,
        };

        let mut draft_parent: Option<UsageKey> = None;
        let mut published_parent: Option<UsageKey> = None;
        for (id, _) in self.collection.find(&query) {
            let stored = UsageKey::parse_deprecated(&id)?.map_into_course(course.clone());
            if stored.is_draft() {
                if draft_parent.is_none() {
                    draft_parent = Some(stored.as_published());
                }
            } else if published_parent.is_none() {
                published_parent = Some(stored);
            }
        }

        if prefer_draft {
            Ok(draft_parent.or(published_parent))
        } else {
            Ok(published_parent)
        }
    }

    fn get_orphans(&self, ctx: &StoreContext, course: &CourseKey) -> Result<Vec<UsageKey>> {
        ctx.check_cancelled()?;
        let canonical = self
            .has_course(ctx, course, false)?
            .ok_or_else(|| Error::not_found(course))?;
        let root = canonical.course_root_usage()?;

        let mut reachable: FxHashSet<UsageKey> = FxHashSet::default();
        let mut queue = vec![root.clone()];
        while let Some(key) = queue.pop() {
            if !reachable.insert(key.as_published()) {
                continue;
            }
            queue.extend(self.children_of(ctx, &key, Some(RevisionOption::DraftPreferred))?);
        }

        let mut orphans: FxHashSet<UsageKey> = FxHashSet::default();
        for (stored, _) in self.course_docs(&canonical)? {
            let logical = stored.as_published();
            if logical == root
                || logical.block_type().is_detached()
                || reachable.contains(&logical)
            {
                continue;
            }
            orphans.insert(logical);
        }
        let mut orphans: Vec<UsageKey> = orphans.into_iter().collect();
        orphans.sort();
        Ok(orphans)
    }

    fn compute_publish_state(&self, _ctx: &StoreContext, block: &XBlock) -> Result<PublishState> {
        self.stored_publish_state(block.location())
    }

    fn has_changes(&self, ctx: &StoreContext, key: &UsageKey) -> Result<bool> {
        let mut visited = FxHashSet::default();
        self.subtree_has_changes(ctx, key, &mut visited)
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

    fn revert_to_published(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<()> {
        self.do_revert_to_published(ctx, key, user)
    }

    fn convert_to_draft(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<XBlock> {
        self.do_convert_to_draft(ctx, key, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{course_key, populated_store, user, vertical_key};
    use modulestore_core::ValueMatch;

    // ========================================
    // Course Lookup Tests
    // ========================================

    #[test]
    fn test_has_course_exact_and_case_insensitive() {
        let (store, ctx) = populated_store();
        let found = store.has_course(&ctx, &course_key(), false).unwrap();
        assert_eq!(found, Some(course_key()));

        let shouted = CourseKey::new("EDX", "TOY", "2012_Fall").unwrap();
        assert_eq!(store.has_course(&ctx, &shouted, false).unwrap(), None);
        assert_eq!(
            store.has_course(&ctx, &shouted, true).unwrap(),
            Some(course_key()),
            "case-insensitive match returns stored casing"
        );
    }

    #[test]
    fn test_has_course_fills_missing_run() {
        let (store, ctx) = populated_store();
        let legacy = CourseKey::without_run("edX", "toy").unwrap();
        let found = store.has_course(&ctx, &legacy, false).unwrap();
        assert_eq!(found, Some(course_key()));
    }

    #[test]
    fn test_get_courses_lists_roots() {
        let (store, ctx) = populated_store();
        let courses = store.get_courses(&ctx).unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].category().as_str(), "course");
        assert_eq!(courses[0].location().name(), "2012_Fall");
    }

    // ========================================
    // Item Read Tests
    // ========================================

    #[test]
    fn test_get_item_draft_preferred_falls_back() {
        let (store, ctx) = populated_store();
        // vertical was created draft-capable, so it resolves to its draft
        let block = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        assert!(block.is_draft());
        assert_eq!(block.location(), &vertical_key());

        // chapters are direct-only: published copy, never draft
        let chapter = course_key().make_usage_key(BlockType::new("chapter").unwrap(), "ch1").unwrap();
        let block = store.get_item(&ctx, &chapter, None, None).unwrap();
        assert!(!block.is_draft());
    }

    #[test]
    fn test_get_item_published_only_misses_private() {
        let (store, ctx) = populated_store();
        let published_ctx = ctx.with_branch(BranchSetting::PublishedOnly);
        let err = store
            .get_item(&published_ctx, &vertical_key(), None, None)
            .unwrap_err();
        assert!(err.is_not_found());

        assert!(!store
            .has_item(&ctx, &vertical_key(), Some(RevisionOption::PublishedOnly))
            .unwrap());
        assert!(store
            .has_item(&ctx, &vertical_key(), Some(RevisionOption::DraftOnly))
            .unwrap());
    }

    #[test]
    fn test_get_items_draft_shadow_dedupe() {
        let (store, ctx) = populated_store();
        store.do_publish(&ctx, &vertical_key(), user()).unwrap();
        // edit to create a diverging draft beside the published copy
        let mut block = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        block.set("display_name", &json!("Edited")).unwrap();
        store.do_update_item(&ctx, &block, user(), false).unwrap();

        let verticals = store
            .get_items(
                &ctx,
                &course_key(),
                &Qualifiers::new().with_category(BlockType::new("vertical").unwrap()),
                None,
            )
            .unwrap();
        assert_eq!(verticals.len(), 1, "draft shadows its published copy");
        assert!(verticals[0].is_draft());
        assert_eq!(verticals[0].display_name().as_deref(), Some("Edited"));

        let published = store
            .get_items(
                &ctx,
                &course_key(),
                &Qualifiers::new().with_category(BlockType::new("vertical").unwrap()),
                Some(RevisionOption::PublishedOnly),
            )
            .unwrap();
        assert_eq!(published.len(), 1);
        assert!(!published[0].is_draft());
    }

    #[test]
    fn test_get_items_rejects_draft_preferred_revision() {
        let (store, ctx) = populated_store();
        let err = store
            .get_items(
                &ctx,
                &course_key(),
                &Qualifiers::new(),
                Some(RevisionOption::DraftPreferred),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedRevision(_)));
    }

    #[test]
    fn test_get_items_settings_qualifier() {
        let (store, ctx) = populated_store();
        let hits = store
            .get_items(
                &ctx,
                &course_key(),
                &Qualifiers::new()
                    .with_setting("display_name", ValueMatch::Eq(json!("Week 1"))),
                None,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category().as_str(), "chapter");
    }

    // ========================================
    // Parent / Orphan Tests
    // ========================================

    #[test]
    fn test_parent_of_published_child() {
        let (store, ctx) = populated_store();
        let sequential = course_key()
            .make_usage_key(BlockType::new("sequential").unwrap(), "s1")
            .unwrap();
        let parent = store
            .get_parent_location(&ctx, &sequential, None)
            .unwrap()
            .unwrap();
        assert_eq!(parent.block_type().as_str(), "chapter");
        assert_eq!(parent.name(), "ch1");
    }

    #[test]
    fn test_orphans_excludes_reachable_and_detached() {
        let (store, ctx) = populated_store();
        assert!(store.get_orphans(&ctx, &course_key()).unwrap().is_empty());

        // detach the vertical from its parent: it becomes an orphan
        let sequential = course_key()
            .make_usage_key(BlockType::new("sequential").unwrap(), "s1")
            .unwrap();
        let mut parent = store.get_item(&ctx, &sequential, None, None).unwrap();
        parent.set_children(&[]).unwrap();
        store.do_update_item(&ctx, &parent, user(), false).unwrap();

        let orphans = store.get_orphans(&ctx, &course_key()).unwrap();
        assert_eq!(orphans, vec![vertical_key()]);
    }

    // ========================================
    // Publish State Tests
    // ========================================

    #[test]
    fn test_publish_state_private_then_public() {
        let (store, ctx) = populated_store();
        let block = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        assert_eq!(
            store.compute_publish_state(&ctx, &block).unwrap(),
            PublishState::Private
        );

        store.do_publish(&ctx, &vertical_key(), user()).unwrap();
        let block = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        assert_eq!(
            store.compute_publish_state(&ctx, &block).unwrap(),
            PublishState::Public
        );
    }

    #[test]
    fn test_direct_only_always_public() {
        let (store, ctx) = populated_store();
        let chapter = course_key()
            .make_usage_key(BlockType::new("chapter").unwrap(), "ch1")
            .unwrap();
        let block = store.get_item(&ctx, &chapter, None, None).unwrap();
        assert_eq!(
            store.compute_publish_state(&ctx, &block).unwrap(),
            PublishState::Public
        );
    }

    // ========================================
    // Inheritance Wiring Tests
    // ========================================

    #[test]
    fn test_inherited_settings_reach_leaves() {
        let (store, ctx) = populated_store();
        // chapter sets graded=true in the fixture; the vertical inherits it
        let block = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        assert_eq!(block.get_json("graded").unwrap(), json!(true));
        assert!(!block.is_set("graded"), "inherited, not explicit");
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let reopen = || {
            PerBlockStore::new(
                DocumentDatabase::open(dir.path()).unwrap(),
                Arc::new(FieldSetRegistry::standard()),
                Arc::new(InProcessInheritanceCache::new()),
            )
        };
        {
            let store = reopen();
            let ctx = StoreContext::draft_preferred();
            store
                .create_course(&ctx, user(), "edX", "toy", "2012_Fall", &JsonMap::new())
                .unwrap();
        }
        let store = reopen();
        let ctx = StoreContext::draft_preferred();
        assert_eq!(
            store.has_course(&ctx, &course_key(), false).unwrap(),
            Some(course_key())
        );
        let course = store.get_course(&ctx, &course_key()).unwrap();
        assert_eq!(course.location().name(), "2012_Fall");
    }

    #[test]
    fn test_request_cache_skips_inheritance_recompute() {
        let (store, ctx) = populated_store();
        store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        store.database().reset_stats();
        store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        let stats = store.database().stats();
        assert!(
            stats.gets <= 2,
            "warm read should not re-walk the course, saw {} gets",
            stats.gets
        );
    }
}
