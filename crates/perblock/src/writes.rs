//! Create, update, and delete operations
//!
//! Write rules:
//! - direct-only categories write the published document; draft-capable
//!   categories write the draft document
//! - updating a draft-capable block with no draft converts the published
//!   subtree to draft first
//! - deletes detach the block from its parents' child lists, then remove
//!   the subtree depth-first for the targeted revision set
//! - every write stamps edit info and evicts the course from the
//!   inheritance and request caches

use crate::document::BlockDocument;
use crate::store::PerBlockStore;
use chrono::{DateTime, Utc};
use modulestore_core::{
    check_revision, DocumentKvs, Error, ModuleStore, Result, RevisionOption, ScopeIds,
    StoreContext, UserId, XBlock,
};
use modulestore_keys::{BlockType, CourseKey, UsageKey};
use rustc_hash::FxHashSet;
use serde_json::{json, Map as JsonMap, Value as Json};
use tracing::{debug, info};
use uuid::Uuid;

/// Overview text seeded into the about/overview block of a new course.
const ABOUT_OVERVIEW_TEMPLATE: &str = "<section class=\"about\">\n  <h2>About This Course</h2>\n  <p>Include your long course description here.</p>\n</section>";

impl PerBlockStore {
    /// Fresh block with validated fields and an empty document binding.
    fn new_block(&self, key: UsageKey, fields: &JsonMap<String, Json>) -> Result<XBlock> {
        let field_set = self.registry.for_category(key.block_type());
        let mut block = XBlock::new(ScopeIds::new(key), field_set, Box::new(DocumentKvs::new()));
        block.update_fields(fields)?;
        Ok(block)
    }

    /// Reject a children list naming an ancestor of `block_key`.
    fn check_no_cycle(
        &self,
        ctx: &StoreContext,
        block_key: &UsageKey,
        children: &[UsageKey],
    ) -> Result<()> {
        let mut ancestors: FxHashSet<UsageKey> = FxHashSet::default();
        ancestors.insert(block_key.as_published());
        let mut cursor = block_key.as_published();
        while let Some(parent) = self.get_parent_location(ctx, &cursor, None)? {
            let parent = parent.as_published();
            if !ancestors.insert(parent.clone()) {
                break;
            }
            cursor = parent;
        }
        for child in children {
            if ancestors.contains(&child.as_published()) {
                return Err(Error::CircularReference(format!(
                    "'{}' is an ancestor of '{}'",
                    child.as_published().to_deprecated_string(),
                    block_key.as_published().to_deprecated_string(),
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

        // document ids drop the run, so (org, course) must be unique;
        // the comparison is case-insensitive to keep lookups unambiguous
        let sibling = CourseKey::without_run(org, course)?;
        if let Some(existing) = self
            .find_course_keys(Some((&sibling, true)))?
            .into_iter()
            .next()
        {
            return Err(Error::DuplicateCourse(existing.to_string()));
        }

        let root = course_key.course_root_usage()?;
        let block = self.new_block(root.clone(), fields)?;
        let now = Utc::now();
        let mut doc = BlockDocument::from_block(&block);
        doc.stamp_edited(user, now);
        doc.stamp_published(user, now);
        self.insert_doc(&root, &doc)?;

        self.seed_about_section(user, &course_key, now)?;
        self.invalidate_course(ctx, &course_key);
        info!(target: "modulestore::perblock", course = %course_key, user = %user, "Created course");
        self.get_item(ctx, &root, Some(0), None)
    }

    fn seed_about_section(
        &self,
        user: UserId,
        course_key: &CourseKey,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let about = course_key.make_usage_key(BlockType::about(), "overview")?;
        let mut doc = BlockDocument::new(&about);
        doc.definition.data = json!(ABOUT_OVERVIEW_TEMPLATE);
        doc.stamp_edited(user, now);
        doc.stamp_published(user, now);
        self.insert_doc(&about, &doc)
    }

    pub(crate) fn do_delete_course(
        &self,
        ctx: &StoreContext,
        user: UserId,
        course: &CourseKey,
    ) -> Result<()> {
        ctx.check_cancelled()?;
        let canonical = self
            .has_course(ctx, course, false)?
            .ok_or_else(|| Error::not_found(course))?;
        let ids = self.collection.find_ids(&Self::course_query(&canonical));
        let count = ids.len();
        for id in ids {
            self.collection.remove(&id)?;
        }
        self.invalidate_course(ctx, &canonical);
        info!(target: "modulestore::perblock", course = %canonical, user = %user, blocks = count, "Deleted course");
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
        block_id: Option<&str>,
        fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        ctx.check_cancelled()?;
        let name = match block_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        let key = course.make_usage_key(category.clone(), name)?;
        let target = if category.is_direct_only() {
            key.as_published()
        } else {
            key.as_draft()
        };

        let block = self.new_block(key.as_published(), fields)?;
        let now = Utc::now();
        let mut doc = BlockDocument::from_block(&block);
        doc.stamp_edited(user, now);
        if category.is_direct_only() {
            doc.stamp_published(user, now);
        }
        self.insert_doc(&target, &doc)?;

        if *category == BlockType::static_tab() {
            self.tab_added(user, &key.as_published(), block.display_name(), now)?;
        }
        self.invalidate_course(ctx, course);
        debug!(target: "modulestore::perblock", block = %key.as_published(), user = %user, "Created item");
        self.build_block(ctx, target, doc)
    }

    pub(crate) fn do_create_child(
        &self,
        ctx: &StoreContext,
        user: UserId,
        parent: &UsageKey,
        category: &BlockType,
        block_id: Option<&str>,
        fields: &JsonMap<String, Json>,
    ) -> Result<XBlock> {
        let child = self.do_create_item(ctx, user, parent.course_key(), category, block_id, fields)?;

        let mut parent_block = self.get_item(ctx, parent, Some(0), None)?;
        let mut children = parent_block.children()?;
        let child_key = child.location().clone();
        if !children.contains(&child_key) {
            children.push(child_key);
            parent_block.set_children(&children)?;
            self.do_update_item(ctx, &parent_block, user, false)?;
        }
        Ok(child)
    }

    pub(crate) fn do_update_item(
        &self,
        ctx: &StoreContext,
        block: &XBlock,
        user: UserId,
        allow_not_found: bool,
    ) -> Result<XBlock> {
        ctx.check_cancelled()?;
        let logical = block.location().as_published();
        let course = logical.course_key().clone();

        let children = block.children()?;
        if !children.is_empty() {
            self.check_no_cycle(ctx, &logical, &children)?;
        }

        let direct = logical.is_direct_only();
        let target = if direct {
            logical.clone()
        } else {
            logical.as_draft()
        };

        let previous = match self.get_doc(&target)? {
            Some(prev) => Some(prev),
            None if direct => {
                if !allow_not_found {
                    return Err(Error::not_found(&logical));
                }
                None
            }
            None => {
                // no draft yet: a published copy becomes the draft
                // subtree before the write lands on it
                if self.get_doc(&logical)?.is_some() {
                    self.convert_subtree_to_draft(ctx, &logical, user, true)?;
                    Some(
                        self.get_doc(&target)?
                            .ok_or_else(|| Error::not_found(&target))?,
                    )
                } else if allow_not_found {
                    None
                } else {
                    return Err(Error::not_found(&logical));
                }
            }
        };

        let mut doc = BlockDocument::from_block(block);
        let now = Utc::now();
        match previous {
            Some(prev) => doc.edit_info = prev.edit_info,
            None if direct => doc.stamp_published(user, now),
            None => {}
        }
        doc.stamp_edited(user, now);
        self.put_doc(&target, &doc)?;

        if *logical.block_type() == BlockType::static_tab() {
            self.tab_renamed(user, &logical, block.display_name(), now)?;
        }
        self.invalidate_course(ctx, &course);
        debug!(target: "modulestore::perblock", block = %logical, user = %user, "Updated item");
        self.build_block(ctx, target, doc)
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
        let (delete_draft, delete_published) = if logical.is_direct_only() {
            (true, true)
        } else {
            match revision {
                Some(RevisionOption::DraftOnly) => (true, false),
                Some(RevisionOption::PublishedOnly) => (false, true),
                _ => (true, true),
            }
        };

        let draft_exists =
            !logical.is_direct_only() && self.get_doc(&logical.as_draft())?.is_some();
        let published_exists = self.get_doc(&logical)?.is_some();
        if !((delete_draft && draft_exists) || (delete_published && published_exists)) {
            return Err(Error::not_found(&logical));
        }

        let now = Utc::now();
        self.detach_from_parents(user, &logical, delete_draft, delete_published, now)?;

        let mut visited = FxHashSet::default();
        self.delete_subtree(&logical, delete_draft, delete_published, &mut visited)?;

        if *logical.block_type() == BlockType::static_tab() && delete_published {
            self.tab_removed(user, &logical, now)?;
        }
        self.invalidate_course(ctx, logical.course_key());
        info!(target: "modulestore::perblock", block = %logical, user = %user, "Deleted item");
        Ok(())
    }

    /// Remove `logical` from the child lists of its parents. A published
    /// direct-only parent holds the draft children too, so it belongs to
    /// both revision sets.
    fn detach_from_parents(
        &self,
        user: UserId,
        logical: &UsageKey,
        delete_draft: bool,
        delete_published: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let course = logical.course_key().for_branch(None);
        let child_ref = logical.to_deprecated_string();
        let query = Self::course_query(&course).eq("definition.children", json!(child_ref.clone()));
        for (id, value) in self.collection.find(&query) {
            let stored = UsageKey::parse_deprecated(&id)?.map_into_course(course.clone());
            let draftish = stored.is_draft() || stored.is_direct_only();
            let applies =
                (delete_draft && draftish) || (delete_published && !stored.is_draft());
            if !applies {
                continue;
            }
            let mut parent_doc = BlockDocument::from_json(value)?;
            parent_doc.definition.children.retain(|c| c != &child_ref);
            parent_doc.stamp_edited(user, now);
            self.put_doc(&stored, &parent_doc)?;
        }
        Ok(())
    }

    /// Depth-first removal of both copies as selected. Direct-only
    /// descendants keep their published document unless the published
    /// set is being deleted.
    pub(crate) fn delete_subtree(
        &self,
        key: &UsageKey,
        delete_draft: bool,
        delete_published: bool,
        visited: &mut FxHashSet<UsageKey>,
    ) -> Result<()> {
        let logical = key.as_published();
        if !visited.insert(logical.clone()) {
            return Ok(());
        }
        let course = logical.course_key();

        let mut descendants: Vec<UsageKey> = Vec::new();
        if delete_draft && !logical.is_direct_only() {
            if let Some(doc) = self.get_doc(&logical.as_draft())? {
                descendants.extend(doc.child_keys(course)?);
            }
        }
        if delete_published {
            if let Some(doc) = self.get_doc(&logical)? {
                descendants.extend(doc.child_keys(course)?);
            }
        }
        for child in descendants {
            self.delete_subtree(&child, delete_draft, delete_published, visited)?;
        }

        if delete_draft && !logical.is_direct_only() {
            self.remove_doc(&logical.as_draft())?;
        }
        if delete_published {
            self.remove_doc(&logical)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // static-tab synchronization
    // ------------------------------------------------------------------

    fn with_course_tabs(
        &self,
        user: UserId,
        course: &CourseKey,
        now: DateTime<Utc>,
        mutate: impl FnOnce(&mut Vec<Json>) -> bool,
    ) -> Result<()> {
        let root = course.course_root_usage()?;
        let mut course_doc = self
            .get_doc(&root)?
            .ok_or_else(|| Error::not_found(&root))?;
        let tabs = course_doc
            .metadata
            .entry("tabs")
            .or_insert_with(|| json!([]));
        let changed = match tabs.as_array_mut() {
            Some(list) => mutate(list),
            None => false,
        };
        if changed {
            course_doc.stamp_edited(user, now);
            self.put_doc(&root, &course_doc)?;
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

    fn tab_added(
        &self,
        user: UserId,
        tab_key: &UsageKey,
        display_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let slug = tab_key.name().to_string();
        self.with_course_tabs(user, tab_key.course_key(), now, move |list| {
            if list.iter().any(|t| Self::tab_slug_matches(t, &slug)) {
                return false;
            }
            list.push(Self::tab_entry(&slug, display_name));
            true
        })
    }

    fn tab_renamed(
        &self,
        user: UserId,
        tab_key: &UsageKey,
        display_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let slug = tab_key.name().to_string();
        let name = display_name.unwrap_or_else(|| "Empty".to_string());
        self.with_course_tabs(user, tab_key.course_key(), now, move |list| {
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

    fn tab_removed(&self, user: UserId, tab_key: &UsageKey, now: DateTime<Utc>) -> Result<()> {
        let slug = tab_key.name().to_string();
        self.with_course_tabs(user, tab_key.course_key(), now, move |list| {
            let before = list.len();
            list.retain(|t| !Self::tab_slug_matches(t, &slug));
            list.len() != before
        })
    }
}
