//! Create, update, and delete operations
//!
//! Every write follows the same shape: load the draft head structure,
//! apply the mutation to a copy, then commit. Committing stamps the
//! touched blocks with the new version guid, rematerializes inherited
//! settings across the whole structure, inserts the structure under a
//! fresh guid, and advances the branch pointer as the final step.
//! Deletes run the same cycle once per branch the revision argument
//! selects.
//!
//! Definitions are minted for new blocks and for content edits; a
//! settings-only edit keeps sharing the previous definition.

use crate::document::{
    block_id, block_usage, CourseIndexDoc, DefinitionDoc, StructureBlock, StructureDoc,
};
use crate::store::{Entry, VersionedStore};
use chrono::Utc;
use modulestore_core::{
    check_revision, compute_inheritance, DocumentKvs, Error, InheritanceSeed, KvsSnapshot, Result,
    RevisionOption, ScopeIds, StoreContext, UserId, XBlock,
};
use modulestore_keys::{BlockType, Branch, CourseKey, DefinitionKey, UsageKey, VersionGuid};
use rustc_hash::FxHashSet;
use serde_json::{json, Map as JsonMap, Value as Json};
use tracing::{debug, info};
use uuid::Uuid;

/// Overview text seeded into the about/overview block of a new course.
const ABOUT_OVERVIEW_TEMPLATE: &str = "<section class=\"about\">\n  <h2>About This Course</h2>\n  <p>Include your long course description here.</p>\n</section>";

/// Copy-on-write edit of one structure.
///
/// Mutations through [`touch`] and [`insert`] mark blocks as edited in
/// this version; committing stamps exactly those. [`carry`] places a
/// block without marking it, for copies whose lineage is set by hand.
///
/// [`touch`]: StructureEdit::touch
/// [`insert`]: StructureEdit::insert
/// [`carry`]: StructureEdit::carry
pub(crate) struct StructureEdit {
    version: VersionGuid,
    structure: StructureDoc,
    touched: FxHashSet<String>,
}

impl StructureEdit {
    /// Start an edit deriving a new version from `base`.
    pub(crate) fn new(base: StructureDoc) -> Self {
        Self {
            version: VersionGuid::new(),
            structure: base,
            touched: FxHashSet::default(),
        }
    }

    /// The guid the committed structure will be stored under.
    pub(crate) fn version(&self) -> VersionGuid {
        self.version
    }

    /// The structure as edited so far.
    pub(crate) fn structure(&self) -> &StructureDoc {
        &self.structure
    }

    /// Whether a block exists under `id`.
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.structure.contains(id)
    }

    /// The block under `id`, if present.
    pub(crate) fn block(&self, id: &str) -> Option<&StructureBlock> {
        self.structure.get(id)
    }

    /// Mutable access to an existing block, marking it edited.
    pub(crate) fn touch(&mut self, id: &str) -> Result<&mut StructureBlock> {
        let Some(block) = self.structure.blocks.get_mut(id) else {
            return Err(Error::not_found(id));
        };
        self.touched.insert(id.to_string());
        Ok(block)
    }

    /// Insert a brand-new block, marking it edited.
    pub(crate) fn insert(&mut self, key: &UsageKey, block: StructureBlock) -> Result<()> {
        let id = block_id(key);
        if self.structure.blocks.contains_key(&id) {
            return Err(Error::duplicate(key.as_published()));
        }
        self.touched.insert(id.clone());
        self.structure.blocks.insert(id, block);
        Ok(())
    }

    /// Insert or replace a block copied from another structure. The
    /// copy keeps its hand-set edit info and is not stamped at commit.
    pub(crate) fn carry(&mut self, id: &str, block: StructureBlock) {
        self.touched.remove(id);
        self.structure.blocks.insert(id.to_string(), block);
    }

    /// Remove a block outright.
    pub(crate) fn remove(&mut self, id: &str) {
        self.touched.remove(id);
        self.structure.blocks.remove(id);
    }

    fn touched_ids(&self) -> Vec<String> {
        self.touched.iter().cloned().collect()
    }
}

/// Result of committing one structure edit.
pub(crate) struct Committed {
    pub(crate) version: VersionGuid,
    pub(crate) structure: StructureDoc,
}

impl VersionedStore {
    // ------------------------------------------------------------------
    // commit machinery
    // ------------------------------------------------------------------

    /// Stamp, rematerialize inheritance, persist the structure, and
    /// advance the branch pointer. The pointer write is the commit
    /// point; an abort before it leaves only an unreferenced structure
    /// behind and readers keep seeing the previous head.
    pub(crate) fn commit(
        &self,
        ctx: &StoreContext,
        user: UserId,
        course: &CourseKey,
        branch: Branch,
        previous: Option<VersionGuid>,
        mut edit: StructureEdit,
    ) -> Result<Committed> {
        ctx.check_cancelled()?;
        let now = Utc::now();
        let version = edit.version();
        for id in edit.touched_ids() {
            if let Some(block) = edit.structure.blocks.get_mut(&id) {
                block.edit_info.advance_version(version);
                block.edit_info.touch(user, now);
            }
        }
        let mut structure = edit.structure;
        structure.previous_version = previous;
        structure.edited_by = user;
        structure.edited_on = now;
        self.materialize_inheritance(course, &mut structure)?;

        self.structures
            .insert(&StructureDoc::doc_id(version), structure.to_json()?)?;

        let mut index = match self.load_index(course)? {
            Some(index) => index,
            None => CourseIndexDoc::new(course, user, now),
        };
        index.set_branch(branch, version);
        index.edited_by = user;
        index.edited_on = now;
        ctx.check_cancelled()?;
        self.indexes
            .upsert(&CourseIndexDoc::doc_id(course), index.to_json()?)?;

        ctx.request().evict_course(course);
        Ok(Committed { version, structure })
    }

    /// Recompute every block's materialized inherited settings for a
    /// structure about to be stored. Blocks unreachable from the root
    /// inherit nothing.
    fn materialize_inheritance(
        &self,
        course: &CourseKey,
        structure: &mut StructureDoc,
    ) -> Result<()> {
        let identity = course.for_branch(None);
        let root = block_usage(&identity, &structure.root)?;
        let mut seed = InheritanceSeed::new(
            identity.clone(),
            root,
            self.registry.inheritable_names().clone(),
        );
        for (id, block) in &structure.blocks {
            let key = block_usage(&identity, id)?;
            seed.add_block(&key, &block.fields, block.child_keys(&identity)?);
        }
        let map = compute_inheritance(&seed);
        for (id, block) in structure.blocks.iter_mut() {
            let key = block_usage(&identity, id)?;
            block.inherited_settings = map.inherited_for(&key);
        }
        Ok(())
    }

    /// Run one edit against the draft branch head and commit it.
    pub(crate) fn mutate_draft<T>(
        &self,
        ctx: &StoreContext,
        user: UserId,
        course: &CourseKey,
        op: impl FnOnce(&mut StructureEdit) -> Result<T>,
    ) -> Result<(T, Committed)> {
        ctx.check_cancelled()?;
        let index = self.require_index(course)?;
        let head = index
            .branch_version(Branch::Draft)
            .ok_or_else(|| Error::not_found(course.for_branch(None)))?;
        let base = self.require_structure(ctx, course, Branch::Draft, head)?;
        let mut edit = StructureEdit::new(base);
        let out = op(&mut edit)?;
        let committed = self.commit(ctx, user, course, Branch::Draft, Some(head), edit)?;
        Ok((out, committed))
    }

    /// Validate fields through a fresh block and split them by scope.
    fn validated_snapshot(
        &self,
        key: &UsageKey,
        fields: &JsonMap<String, Json>,
    ) -> Result<KvsSnapshot> {
        let field_set = self.registry.for_category(key.block_type());
        let mut block = XBlock::new(
            ScopeIds::new(key.clone()),
            field_set,
            Box::new(DocumentKvs::new()),
        );
        block.update_fields(fields)?;
        Ok(block.snapshot())
    }

    /// Store a fresh definition document and hand back its key.
    fn insert_definition(
        &self,
        category: &BlockType,
        fields: JsonMap<String, Json>,
    ) -> Result<DefinitionKey> {
        let key = DefinitionKey::fresh(category.clone());
        let doc = DefinitionDoc::new(category, fields);
        self.definitions.insert(&key.to_string(), doc.to_json()?)?;
        Ok(key)
    }

    /// Reject a children list naming `id` or one of its ancestors.
    fn check_no_cycle(structure: &StructureDoc, id: &str, children: &[String]) -> Result<()> {
        let mut ancestors: FxHashSet<String> = FxHashSet::default();
        ancestors.insert(id.to_string());
        let mut cursor = id.to_string();
        while let Some(parent) = structure.parent_id(&cursor) {
            if !ancestors.insert(parent.clone()) {
                break;
            }
            cursor = parent;
        }
        for child_ref in children {
            let child_id = block_id(&UsageKey::parse_deprecated(child_ref)?);
            if ancestors.contains(&child_id) {
                return Err(Error::CircularReference(format!(
                    "'{child_id}' is an ancestor of '{id}'"
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // courses
    // ------------------------------------------------------------------

    pub(crate) fn do_create_course(
        &self,
        ctx: &StoreContext,
        user: UserId,
        org: &str,
        course: &str,
        run: &str,
        fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        ctx.check_cancelled()?;
        let course_key = CourseKey::new(org, course, run)?;

        // (org, course, run) identifies a course index; the comparison
        // is case-insensitive to keep lookups unambiguous
        for id in self.indexes.ids() {
            let Some(value) = self.indexes.get(&id) else {
                continue;
            };
            let stored = CourseIndexDoc::from_json(value)?.course_key()?;
            if stored.matches_ignore_case(&course_key) {
                return Err(Error::DuplicateCourse(stored.to_string()));
            }
        }

        let root = course_key.course_root_usage()?;
        let snapshot = self.validated_snapshot(&root, fields)?;
        let definition = self.insert_definition(root.block_type(), snapshot.content)?;
        let mut root_block = StructureBlock::new(root.block_type(), &definition);
        root_block.fields = snapshot.settings;
        root_block.children = snapshot.children;

        let mut edit = StructureEdit::new(StructureDoc::new(block_id(&root), user, Utc::now()));
        edit.insert(&root, root_block)?;
        self.seed_about_section(&course_key, &mut edit)?;
        let committed = self.commit(ctx, user, &course_key, Branch::Draft, None, edit)?;

        info!(target: "modulestore::versioned", course = %course_key, user = %user, version = %committed.version, "Created course");
        let entry = Entry {
            branch: Some(Branch::Draft),
            guid: committed.version,
            structure: committed.structure,
        };
        self.build_block(&course_key.for_branch(None), &entry, &block_id(&root), None)
    }

    /// Seed the about/overview block of a new course with template text.
    fn seed_about_section(&self, course_key: &CourseKey, edit: &mut StructureEdit) -> Result<()> {
        let about = course_key.make_usage_key(BlockType::about(), "overview")?;
        let mut content = JsonMap::new();
        content.insert("data".to_string(), json!(ABOUT_OVERVIEW_TEMPLATE));
        let definition = self.insert_definition(about.block_type(), content)?;
        edit.insert(&about, StructureBlock::new(about.block_type(), &definition))
    }

    pub(crate) fn do_delete_course(
        &self,
        ctx: &StoreContext,
        user: UserId,
        course: &CourseKey,
    ) -> Result<()> {
        ctx.check_cancelled()?;
        let index = self.require_index(course)?;
        let canonical = index.course_key()?;

        // walk every branch's version chain; definitions stay, they may
        // be shared with other structures
        let mut removed = 0usize;
        let mut seen: FxHashSet<String> = FxHashSet::default();
        for branch in [Branch::Draft, Branch::Published] {
            let mut cursor = index.branch_version(branch);
            while let Some(guid) = cursor {
                let id = StructureDoc::doc_id(guid);
                if !seen.insert(id.clone()) {
                    break;
                }
                let Some(value) = self.structures.get(&id) else {
                    break;
                };
                let doc = StructureDoc::from_json(value)?;
                self.structures.remove(&id)?;
                removed += 1;
                cursor = doc.previous_version;
            }
        }
        self.indexes.remove(&CourseIndexDoc::doc_id(&canonical))?;
        ctx.request().evict_course(&canonical);
        info!(target: "modulestore::versioned", course = %canonical, user = %user, structures = removed, "Deleted course");
        Ok(())
    }

    // ------------------------------------------------------------------
    // items
    // ------------------------------------------------------------------

    pub(crate) fn do_create_item(
        &self,
        ctx: &StoreContext,
        user: UserId,
        course: &CourseKey,
        category: &BlockType,
        block_id_arg: Option<&str>,
        fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        let identity = course.for_branch(None);
        let name = match block_id_arg {
            Some(name) => name.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        let key = identity.make_usage_key(category.clone(), name)?;
        let snapshot = self.validated_snapshot(&key, fields)?;
        let KvsSnapshot {
            settings,
            content,
            children,
            ..
        } = snapshot;
        let display_name = settings
            .get("display_name")
            .and_then(Json::as_str)
            .map(str::to_string);

        let (_, committed) = self.mutate_draft(ctx, user, &identity, |edit| {
            if edit.contains(&block_id(&key)) {
                return Err(Error::duplicate(key.as_published()));
            }
            let definition = self.insert_definition(category, content)?;
            let mut block = StructureBlock::new(category, &definition);
            block.fields = settings;
            block.children = children;
            edit.insert(&key, block)?;
            if *category == BlockType::static_tab() {
                Self::tab_added(edit, &key, display_name)?;
            }
            Ok(())
        })?;

        info!(target: "modulestore::versioned", block = %key, user = %user, version = %committed.version, "Created item");
        let entry = Entry {
            branch: Some(Branch::Draft),
            guid: committed.version,
            structure: committed.structure,
        };
        let published = self.published_view(ctx, &identity)?;
        self.build_block(&identity, &entry, &block_id(&key), published.as_ref())
    }

    pub(crate) fn do_create_child(
        &self,
        ctx: &StoreContext,
        user: UserId,
        parent: &UsageKey,
        category: &BlockType,
        block_id_arg: Option<&str>,
        fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        let identity = parent.course_key().for_branch(None);
        let name = match block_id_arg {
            Some(name) => name.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        let key = identity.make_usage_key(category.clone(), name)?;
        let snapshot = self.validated_snapshot(&key, fields)?;
        let KvsSnapshot {
            settings,
            content,
            children,
            ..
        } = snapshot;
        let display_name = settings
            .get("display_name")
            .and_then(Json::as_str)
            .map(str::to_string);
        let parent_id = block_id(parent);
        let child_ref = key.as_published().to_deprecated_string();

        // the new block and the parent's child list land in one version
        let (_, committed) = self.mutate_draft(ctx, user, &identity, |edit| {
            if !edit.contains(&parent_id) {
                return Err(Error::not_found(parent.as_published()));
            }
            if edit.contains(&block_id(&key)) {
                return Err(Error::duplicate(key.as_published()));
            }
            let definition = self.insert_definition(category, content)?;
            let mut block = StructureBlock::new(category, &definition);
            block.fields = settings;
            block.children = children;
            edit.insert(&key, block)?;
            let parent_block = edit.touch(&parent_id)?;
            if !parent_block.children.iter().any(|r| r == &child_ref) {
                parent_block.children.push(child_ref);
            }
            if *category == BlockType::static_tab() {
                Self::tab_added(edit, &key, display_name)?;
            }
            Ok(())
        })?;

        info!(target: "modulestore::versioned", block = %key, parent = %parent, user = %user, version = %committed.version, "Created child");
        let entry = Entry {
            branch: Some(Branch::Draft),
            guid: committed.version,
            structure: committed.structure,
        };
        let published = self.published_view(ctx, &identity)?;
        self.build_block(&identity, &entry, &block_id(&key), published.as_ref())
    }

    pub(crate) fn do_update_item(
        &self,
        ctx: &StoreContext,
        block: &XBlock,
        user: UserId,
        allow_not_found: bool,
    ) -> Result<XBlock> {
        let logical = block.location().as_published();
        let identity = logical.course_key().for_branch(None);
        let id = block_id(&logical);
        let category = logical.block_type().clone();
        let KvsSnapshot {
            settings,
            content,
            children,
            ..
        } = block.snapshot();
        let display_name = settings
            .get("display_name")
            .and_then(Json::as_str)
            .map(str::to_string);

        let (_, committed) = self.mutate_draft(ctx, user, &identity, |edit| {
            Self::check_no_cycle(edit.structure(), &id, &children)?;
            let existing = edit.block(&id).map(|b| b.definition.clone());
            match existing {
                Some(stored_definition) => {
                    // content edits mint a new definition; settings-only
                    // edits keep sharing the previous one
                    let definition =
                        if self.load_definition(&stored_definition)?.fields == content {
                            stored_definition
                        } else {
                            self.insert_definition(&category, content)?.to_string()
                        };
                    let target = edit.touch(&id)?;
                    target.fields = settings;
                    target.children = children;
                    target.definition = definition;
                }
                None => {
                    if !allow_not_found {
                        return Err(Error::not_found(&logical));
                    }
                    let definition = self.insert_definition(&category, content)?;
                    let mut fresh = StructureBlock::new(&category, &definition);
                    fresh.fields = settings;
                    fresh.children = children;
                    edit.insert(&logical, fresh)?;
                }
            }
            if category == BlockType::static_tab() {
                Self::tab_renamed(edit, &logical, display_name)?;
            }
            Ok(())
        })?;

        debug!(target: "modulestore::versioned", block = %logical, user = %user, version = %committed.version, "Updated item");
        let entry = Entry {
            branch: Some(Branch::Draft),
            guid: committed.version,
            structure: committed.structure,
        };
        let published = self.published_view(ctx, &identity)?;
        self.build_block(&identity, &entry, &id, published.as_ref())
    }

    pub(crate) fn do_delete_item(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        user: UserId,
        revision: Option<RevisionOption>,
    ) -> Result<()> {
        check_revision(
            "delete_item",
            revision,
            &[
                RevisionOption::DraftOnly,
                RevisionOption::PublishedOnly,
                RevisionOption::All,
            ],
        )?;
        ctx.check_cancelled()?;
        let logical = key.as_published();
        let identity = logical.course_key().for_branch(None);
        let id = block_id(&logical);

        // direct-only categories live on both branches; everything else
        // follows the requested revision
        let branches: &[Branch] = if logical.is_direct_only() {
            &[Branch::Draft, Branch::Published]
        } else {
            match revision {
                Some(RevisionOption::DraftOnly) => &[Branch::Draft],
                Some(RevisionOption::PublishedOnly) => &[Branch::Published],
                _ => &[Branch::Draft, Branch::Published],
            }
        };

        let index = self.require_index(&identity)?;
        let mut removed = false;
        for branch in branches {
            let Some(head) = index.branch_version(*branch) else {
                continue;
            };
            let base = self.require_structure(ctx, &identity, *branch, head)?;
            if !base.contains(&id) {
                continue;
            }
            let mut edit = StructureEdit::new(base);
            Self::remove_subtree(&mut edit, &id)?;
            if *logical.block_type() == BlockType::static_tab() {
                Self::tab_removed(&mut edit, &logical)?;
            }
            self.commit(ctx, user, &identity, *branch, Some(head), edit)?;
            removed = true;
        }
        if !removed {
            return Err(Error::not_found(&logical));
        }
        info!(target: "modulestore::versioned", block = %logical, user = %user, "Deleted item");
        Ok(())
    }

    /// Drop the subtree rooted at `id`, then detach every dangling
    /// reference left in surviving child lists.
    pub(crate) fn remove_subtree(edit: &mut StructureEdit, id: &str) -> Result<()> {
        let doomed = edit.structure().subtree_ids(id);
        for gone in &doomed {
            edit.remove(gone);
        }
        let gone: FxHashSet<String> = doomed.into_iter().collect();
        Self::detach_refs(edit, &gone)
    }

    /// Drop references to `gone` ids from every remaining child list,
    /// touching the parents that change.
    pub(crate) fn detach_refs(edit: &mut StructureEdit, gone: &FxHashSet<String>) -> Result<()> {
        let parents: Vec<String> = edit
            .structure()
            .blocks
            .iter()
            .filter(|(_, block)| block.child_ids().iter().any(|child| gone.contains(child)))
            .map(|(pid, _)| pid.clone())
            .collect();
        for pid in parents {
            let block = edit.touch(&pid)?;
            block.children.retain(|r| match UsageKey::parse_deprecated(r) {
                Ok(child) => !gone.contains(&block_id(&child)),
                Err(_) => true,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // static-tab synchronization
    // ------------------------------------------------------------------

    fn with_course_tabs(
        edit: &mut StructureEdit,
        mutate: impl FnOnce(&mut Vec<Json>) -> bool,
    ) -> Result<()> {
        let root = edit.structure().root.clone();
        let mut list = edit
            .block(&root)
            .and_then(|block| block.fields.get("tabs"))
            .and_then(Json::as_array)
            .cloned()
            .unwrap_or_default();
        if mutate(&mut list) {
            let block = edit.touch(&root)?;
            block.fields.insert("tabs".to_string(), Json::Array(list));
        }
        Ok(())
    }

    fn tab_entry(slug: &str, display_name: Option<String>) -> Json {
        json!({
            "type": "static_tab",
            "url_slug": slug,
            "name": display_name.unwrap_or_else(|| "Empty".to_string()),
        })
    }

    fn tab_slug_matches(tab: &Json, slug: &str) -> bool {
        tab.get("url_slug").and_then(Json::as_str) == Some(slug)
    }

    pub(crate) fn tab_added(
        edit: &mut StructureEdit,
        tab_key: &UsageKey,
        display_name: Option<String>,
    ) -> Result<()> {
        let slug = tab_key.name().to_string();
        Self::with_course_tabs(edit, move |list| {
            if list.iter().any(|t| Self::tab_slug_matches(t, &slug)) {
                return false;
            }
            list.push(Self::tab_entry(&slug, display_name));
            true
        })
    }

    pub(crate) fn tab_renamed(
        edit: &mut StructureEdit,
        tab_key: &UsageKey,
        display_name: Option<String>,
    ) -> Result<()> {
        let slug = tab_key.name().to_string();
        let name = display_name.unwrap_or_else(|| "Empty".to_string());
        Self::with_course_tabs(edit, move |list| {
            let mut changed = false;
            for tab in list.iter_mut() {
                if !Self::tab_slug_matches(tab, &slug) {
                    continue;
                }
                if tab.get("name").and_then(Json::as_str) != Some(name.as_str()) {
                    if let Some(obj) = tab.as_object_mut() {
                        obj.insert("name".to_string(), json!(name.clone()));
                        changed = true;
                    }
                }
            }
            changed
        })
    }

    pub(crate) fn tab_removed(edit: &mut StructureEdit, tab_key: &UsageKey) -> Result<()> {
        let slug = tab_key.name().to_string();
        Self::with_course_tabs(edit, move |list| {
            let before = list.len();
            list.retain(|t| !Self::tab_slug_matches(t, &slug));
            list.len() != before
        })
    }

    /// Add the tab entry if it is missing, otherwise sync its name.
    /// Publishing a tab uses this against the published structure.
    pub(crate) fn tab_upserted(
        edit: &mut StructureEdit,
        tab_key: &UsageKey,
        display_name: Option<String>,
    ) -> Result<()> {
        let slug = tab_key.name().to_string();
        let name = display_name.clone().unwrap_or_else(|| "Empty".to_string());
        Self::with_course_tabs(edit, move |list| {
            if !list.iter().any(|t| Self::tab_slug_matches(t, &slug)) {
                list.push(Self::tab_entry(&slug, display_name));
                return true;
            }
            let mut changed = false;
            for tab in list.iter_mut() {
                if !Self::tab_slug_matches(tab, &slug) {
                    continue;
                }
                if tab.get("name").and_then(Json::as_str) != Some(name.as_str()) {
                    if let Some(obj) = tab.as_object_mut() {
                        obj.insert("name".to_string(), json!(name.clone()));
                        changed = true;
                    }
                }
            }
            changed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{course_key, fields, populated_store, user, vertical_key};
    use modulestore_core::ModuleStore;

    fn sequential_key() -> UsageKey {
        course_key()
            .make_usage_key(BlockType::new("sequential").unwrap(), "s1")
            .unwrap()
    }

    fn tab_names(store: &VersionedStore, ctx: &StoreContext) -> Vec<(String, String)> {
        let root = store.get_course(ctx, &course_key()).unwrap();
        root.get_json("tabs")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|tab| {
                (
                    tab["url_slug"].as_str().unwrap().to_string(),
                    tab["name"].as_str().unwrap().to_string(),
                )
            })
            .collect()
    }

    // ========================================
    // Create Course Tests
    // ========================================

    #[test]
    fn test_create_course_seeds_about_overview() {
        let (store, ctx) = populated_store();
        let about = course_key()
            .make_usage_key(BlockType::about(), "overview")
            .unwrap();
        let block = store.get_item(&ctx, &about, None, None).unwrap();
        let data = block.get_json("data").unwrap();
        assert!(data.as_str().unwrap().contains("About This Course"));
    }

    #[test]
    fn test_create_course_rejects_duplicate_ignoring_case() {
        let (store, ctx) = populated_store();
        let err = store
            .create_course(&ctx, user(), "edX", "toy", "2012_Fall", &JsonMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateCourse(_)));

        let err = store
            .create_course(&ctx, user(), "EDX", "TOY", "2012_fall", &JsonMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateCourse(_)));

        // a different run is a different course
        store
            .create_course(&ctx, user(), "edX", "toy", "2013_Spring", &JsonMap::new())
            .unwrap();
    }

    #[test]
    fn test_create_course_starts_a_lineage() {
        let (store, ctx) = populated_store();
        let head = store.head_version(&ctx, &course_key()).unwrap().unwrap();
        let doc = StructureDoc::from_json(
            store
                .structures
                .get(&StructureDoc::doc_id(head))
                .unwrap(),
        )
        .unwrap();
        // course create plus three child creates: one structure each
        let mut cursor = doc.previous_version;
        let mut depth = 0;
        while let Some(guid) = cursor {
            let value = store.structures.get(&StructureDoc::doc_id(guid)).unwrap();
            cursor = StructureDoc::from_json(value).unwrap().previous_version;
            depth += 1;
        }
        assert_eq!(depth, 3);
    }

    // ========================================
    // Create Item Tests
    // ========================================

    #[test]
    fn test_create_item_generates_block_id_when_missing() {
        let (store, ctx) = populated_store();
        let block = store
            .create_item(
                &ctx,
                user(),
                &course_key(),
                &BlockType::new("html").unwrap(),
                None,
                &JsonMap::new(),
            )
            .unwrap();
        let name = block.location().name().to_string();
        assert_eq!(name.len(), 32);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_create_item_duplicate_id_rejected() {
        let (store, ctx) = populated_store();
        let err = store
            .create_item(
                &ctx,
                user(),
                &course_key(),
                &BlockType::new("vertical").unwrap(),
                Some("v1"),
                &JsonMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateItem(_)));
    }

    #[test]
    fn test_create_item_unknown_field_persists_nothing() {
        let (store, ctx) = populated_store();
        let before = store.structures.len();
        let err = store
            .create_item(
                &ctx,
                user(),
                &course_key(),
                &BlockType::new("html").unwrap(),
                Some("h1"),
                &fields(&[("no_such_field", json!(1))]),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));
        assert_eq!(store.structures.len(), before);
    }

    #[test]
    fn test_create_child_appends_to_parent_in_one_version() {
        let (store, ctx) = populated_store();
        let before = store.structures.len();
        let child = store
            .create_child(
                &ctx,
                user(),
                &vertical_key(),
                &BlockType::new("problem").unwrap(),
                Some("p1"),
                &JsonMap::new(),
            )
            .unwrap();
        assert_eq!(store.structures.len(), before + 1);

        let parent = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        assert_eq!(parent.children().unwrap(), vec![child.location().clone()]);
        assert_eq!(
            store.get_parent_location(&ctx, child.location(), None).unwrap(),
            Some(vertical_key())
        );
    }

    #[test]
    fn test_create_child_requires_parent() {
        let (store, ctx) = populated_store();
        let ghost = course_key()
            .make_usage_key(BlockType::new("vertical").unwrap(), "ghost")
            .unwrap();
        let err = store
            .create_child(
                &ctx,
                user(),
                &ghost,
                &BlockType::new("problem").unwrap(),
                Some("p1"),
                &JsonMap::new(),
            )
            .unwrap_err();
        assert!(err.is_not_found());
    }

    // ========================================
    // Update Item Tests
    // ========================================

    #[test]
    fn test_update_settings_reuses_the_definition() {
        let (store, ctx) = populated_store();
        let defs_before = store.definitions.len();
        let definition_before = store
            .get_item(&ctx, &vertical_key(), None, None)
            .unwrap()
            .scope_ids()
            .definition_id()
            .cloned();

        let mut block = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        block.set("display_name", &json!("Renamed")).unwrap();
        let updated = store.update_item(&ctx, &block, user(), false).unwrap();

        assert_eq!(store.definitions.len(), defs_before);
        assert_eq!(updated.scope_ids().definition_id().cloned(), definition_before);
        assert_eq!(updated.display_name().as_deref(), Some("Renamed"));
    }

    #[test]
    fn test_update_content_mints_a_new_definition() {
        let (store, ctx) = populated_store();
        let html = store
            .create_child(
                &ctx,
                user(),
                &vertical_key(),
                &BlockType::new("html").unwrap(),
                Some("h1"),
                &fields(&[("data", json!("<p>one</p>"))]),
            )
            .unwrap();
        let defs_before = store.definitions.len();
        let old_definition = html.scope_ids().definition_id().cloned().unwrap();

        let mut block = store.get_item(&ctx, html.location(), None, None).unwrap();
        block.set("data", &json!("<p>two</p>")).unwrap();
        let updated = store.update_item(&ctx, &block, user(), false).unwrap();

        assert_eq!(store.definitions.len(), defs_before + 1);
        let new_definition = updated.scope_ids().definition_id().cloned().unwrap();
        assert_ne!(new_definition, old_definition);
        // the old payload is immutable and still stored
        assert!(store.definitions.contains(&old_definition.to_string()));
    }

    #[test]
    fn test_update_missing_item_respects_allow_not_found() {
        let (store, ctx) = populated_store();
        let ghost = course_key()
            .make_usage_key(BlockType::new("html").unwrap(), "ghost")
            .unwrap();
        let field_set = store.registry.for_category(ghost.block_type());
        let mut block = XBlock::new(
            ScopeIds::new(ghost.clone()),
            field_set,
            Box::new(DocumentKvs::new()),
        );
        block.set("display_name", &json!("Ghost")).unwrap();

        let err = store.update_item(&ctx, &block, user(), false).unwrap_err();
        assert!(err.is_not_found());

        store.update_item(&ctx, &block, user(), true).unwrap();
        assert!(store.has_item(&ctx, &ghost, None).unwrap());
    }

    #[test]
    fn test_update_rejects_circular_children() {
        let (store, ctx) = populated_store();
        let mut sequential = store.get_item(&ctx, &sequential_key(), None, None).unwrap();
        let chapter = course_key()
            .make_usage_key(BlockType::new("chapter").unwrap(), "ch1")
            .unwrap();
        sequential
            .set_children(&[vertical_key(), chapter])
            .unwrap();
        let err = store
            .update_item(&ctx, &sequential, user(), false)
            .unwrap_err();
        assert!(matches!(err, Error::CircularReference(_)));
    }

    #[test]
    fn test_update_rematerializes_inherited_settings() {
        let (store, ctx) = populated_store();
        let chapter = course_key()
            .make_usage_key(BlockType::new("chapter").unwrap(), "ch1")
            .unwrap();
        let vertical = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        assert_eq!(vertical.get_json("graded").unwrap(), json!(true));

        let mut block = store.get_item(&ctx, &chapter, None, None).unwrap();
        block.set("graded", &json!(false)).unwrap();
        store.update_item(&ctx, &block, user(), false).unwrap();

        let vertical = store.get_item(&ctx, &vertical_key(), None, None).unwrap();
        assert_eq!(vertical.get_json("graded").unwrap(), json!(false));
    }

    // ========================================
    // Delete Item Tests
    // ========================================

    #[test]
    fn test_delete_item_detaches_from_parent() {
        let (store, ctx) = populated_store();
        store
            .delete_item(&ctx, &vertical_key(), user(), None)
            .unwrap();

        assert!(!store.has_item(&ctx, &vertical_key(), None).unwrap());
        let sequential = store.get_item(&ctx, &sequential_key(), None, None).unwrap();
        assert!(sequential.children().unwrap().is_empty());
    }

    #[test]
    fn test_delete_subtree_removes_descendants() {
        let (store, ctx) = populated_store();
        let chapter = course_key()
            .make_usage_key(BlockType::new("chapter").unwrap(), "ch1")
            .unwrap();
        store.delete_item(&ctx, &chapter, user(), None).unwrap();

        for key in [chapter, sequential_key(), vertical_key()] {
            assert!(!store.has_item(&ctx, &key, None).unwrap(), "{key} gone");
        }
    }

    #[test]
    fn test_delete_missing_item_not_found() {
        let (store, ctx) = populated_store();
        let ghost = course_key()
            .make_usage_key(BlockType::new("html").unwrap(), "ghost")
            .unwrap();
        let err = store.delete_item(&ctx, &ghost, user(), None).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_course_drops_structures_and_index() {
        let (store, ctx) = populated_store();
        assert!(store.structures.len() > 0);
        store.delete_course(&ctx, user(), &course_key()).unwrap();

        assert_eq!(store.structures.len(), 0);
        assert!(store.load_index(&course_key()).unwrap().is_none());
        assert!(store.has_course(&ctx, &course_key(), false).unwrap().is_none());
        // shared definitions are left in place
        assert!(store.definitions.len() > 0);
    }

    // ========================================
    // Static Tab Tests
    // ========================================

    #[test]
    fn test_static_tab_lifecycle_updates_course_tabs() {
        let (store, ctx) = populated_store();
        let tab = store
            .create_item(
                &ctx,
                user(),
                &course_key(),
                &BlockType::static_tab(),
                Some("syllabus"),
                &fields(&[("display_name", json!("Syllabus"))]),
            )
            .unwrap();
        assert_eq!(
            tab_names(&store, &ctx),
            vec![("syllabus".to_string(), "Syllabus".to_string())]
        );

        let mut block = store.get_item(&ctx, tab.location(), None, None).unwrap();
        block.set("display_name", &json!("Course Syllabus")).unwrap();
        store.update_item(&ctx, &block, user(), false).unwrap();
        assert_eq!(
            tab_names(&store, &ctx),
            vec![("syllabus".to_string(), "Course Syllabus".to_string())]
        );

        store.delete_item(&ctx, tab.location(), user(), None).unwrap();
        assert!(tab_names(&store, &ctx).is_empty());
    }
}
