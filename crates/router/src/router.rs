//! The mixed store
//!
//! [`MixedRouter`] fronts every configured backend behind the one
//! [`ModuleStore`] contract. A course dispatches to the store an
//! explicit mapping names; unmapped courses are probed for in store
//! order and the owner is cached, falling back to the current default
//! (the first configured store, unless a [`default_store`] scope
//! overrides it). Cross-store concerns live here: course aggregation,
//! duplicate-course protection, run resolution, per-course advisory
//! locks, and the scoped branch and default-store switches.
//!
//! [`default_store`]: MixedRouter::default_store

use crate::contexts::{BranchSettingGuard, DefaultStoreGuard, SettingStack};
use modulestore_contentstore::ContentStore;
use modulestore_core::{
    BranchSetting, Error, FieldSetRegistry, InProcessInheritanceCache, ModuleStore, PublishState,
    Qualifiers, Result, RevisionOption, SharedInheritanceCache, StoreContext, StoreType, UserId,
    XBlock,
};
use modulestore_docstore::DocumentDatabase;
use modulestore_keys::{BlockType, CourseKey, UsageKey};
use modulestore_perblock::PerBlockStore;
use modulestore_versioned::VersionedStore;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map as JsonMap, Value as Json};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct NamedStore {
    name: String,
    store: Arc<dyn ModuleStore>,
}

/// Routes every store operation to the backend owning the course.
///
/// The router implements [`ModuleStore`] itself, so anything written
/// against the store contract runs against the mixed surface unchanged.
/// Contexts for its operations come from [`ctx`](MixedRouter::ctx),
/// which honors the scoped branch setting; tests and embedders may build
/// their own [`StoreContext`] instead.
pub struct MixedRouter {
    stores: Vec<NamedStore>,
    mappings: RwLock<FxHashMap<CourseKey, usize>>,
    branch: SettingStack<BranchSetting>,
    default_index: SettingStack<usize>,
    content_store: ContentStore,
    course_locks: Mutex<FxHashMap<CourseKey, Arc<Mutex<()>>>>,
}

impl MixedRouter {
    pub(crate) fn from_parts(
        stores: Vec<(String, Arc<dyn ModuleStore>)>,
        mappings: FxHashMap<CourseKey, usize>,
        branch: BranchSetting,
        content_store: ContentStore,
    ) -> Self {
        Self {
            stores: stores
                .into_iter()
                .map(|(name, store)| NamedStore { name, store })
                .collect(),
            mappings: RwLock::new(mappings),
            branch: SettingStack::new(branch),
            default_index: SettingStack::new(0),
            content_store,
            course_locks: Mutex::new(FxHashMap::default()),
        }
    }

    /// A fully in-memory router: a per-block store named `draft` as the
    /// default and a versioned store named `split`, sharing one standard
    /// field registry and inheritance cache.
    pub fn in_memory() -> Self {
        let registry = Arc::new(FieldSetRegistry::standard());
        let cache: Arc<dyn SharedInheritanceCache> = Arc::new(InProcessInheritanceCache::new());
        let stores: Vec<(String, Arc<dyn ModuleStore>)> = vec![
            (
                "draft".to_string(),
                Arc::new(PerBlockStore::new(
                    DocumentDatabase::in_memory(),
                    Arc::clone(&registry),
                    cache,
                )),
            ),
            (
                "split".to_string(),
                Arc::new(VersionedStore::new(DocumentDatabase::in_memory(), registry)),
            ),
        ];
        Self::from_parts(
            stores,
            FxHashMap::default(),
            BranchSetting::DraftPreferred,
            ContentStore::new(),
        )
    }

    // ------------------------------------------------------------------
    // contexts and scoped settings
    // ------------------------------------------------------------------

    /// A fresh per-operation context carrying the branch setting
    /// currently in force.
    pub fn ctx(&self) -> StoreContext {
        StoreContext::new(self.branch.current())
    }

    /// Scope a branch setting. Contexts built while the returned guard
    /// lives carry `branch`; dropping the guard restores the previous
    /// setting. Scopes nest.
    pub fn branch_setting(&self, branch: BranchSetting) -> BranchSettingGuard<'_> {
        BranchSettingGuard::new(&self.branch, branch)
    }

    /// Scope the default store to the first configured store of the
    /// given type. While the guard lives, operations on unmapped courses
    /// and `create_course` go to that store. Scopes nest.
    ///
    /// # Errors
    /// `Error::InvalidConfig` when no configured store has the type.
    pub fn default_store(&self, ty: StoreType) -> Result<DefaultStoreGuard<'_>> {
        let index = self
            .stores
            .iter()
            .position(|entry| entry.store.store_type() == ty)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("no configured store of type '{}'", ty))
            })?;
        Ok(DefaultStoreGuard::new(&self.default_index, index))
    }

    /// Scope the default store by configured name.
    ///
    /// # Errors
    /// `Error::InvalidConfig` when no store has the name.
    pub fn default_store_named(&self, name: &str) -> Result<DefaultStoreGuard<'_>> {
        let index = self
            .stores
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| Error::InvalidConfig(format!("no configured store named '{}'", name)))?;
        Ok(DefaultStoreGuard::new(&self.default_index, index))
    }

    // ------------------------------------------------------------------
    // registry introspection
    // ------------------------------------------------------------------

    /// The backend tag of the current default store.
    pub fn default_store_type(&self) -> StoreType {
        self.stores[self.default_index.current()].store.store_type()
    }

    /// The backend tag of the store owning `course`; unmapped and
    /// unknown courses report the current default.
    pub fn get_modulestore_type(&self, course: &CourseKey) -> StoreType {
        let ctx = self.ctx();
        self.stores[self.index_for(&ctx, course)].store.store_type()
    }

    /// Configured store names, in dispatch order.
    pub fn store_names(&self) -> Vec<&str> {
        self.stores.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// The configured store with the given name.
    pub fn store_named(&self, name: &str) -> Option<&Arc<dyn ModuleStore>> {
        self.stores
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.store)
    }

    /// The content store collaborating with this router.
    pub fn content_store(&self) -> &ContentStore {
        &self.content_store
    }

    // ------------------------------------------------------------------
    // course resolution
    // ------------------------------------------------------------------

    /// Fill in a missing run by matching (org, course) against the known
    /// courses. Resolve legacy run-less keys through this before
    /// operations that need an exact course.
    ///
    /// # Errors
    /// `Error::ItemNotFound` when no course matches and
    /// `Error::AmbiguousCourseKey` when several do.
    pub fn fill_in_run(&self, ctx: &StoreContext, course: &CourseKey) -> Result<CourseKey> {
        if course.has_run() {
            return Ok(course.clone());
        }
        let mut matches: Vec<CourseKey> = Vec::new();
        for block in self.get_courses(ctx)? {
            let candidate = block.course_key().for_branch(None);
            if candidate.org() == course.org() && candidate.course() == course.course() {
                matches.push(candidate);
            }
        }
        match matches.as_slice() {
            [] => Err(Error::not_found(course)),
            [only] => Ok(course.with_run(only.run())?),
            several => Err(Error::AmbiguousCourseKey(format!(
                "run is ambiguous for '{}': {} courses match",
                course,
                several.len()
            ))),
        }
    }

    /// The advisory write lock for a course. Branch and version
    /// qualifiers do not split locks. Writes through the router take
    /// this lock themselves; callers running multi-operation edit
    /// sequences can hold it across the sequence.
    pub fn course_lock(&self, course: &CourseKey) -> Arc<Mutex<()>> {
        let norm = course.for_branch(None);
        Arc::clone(self.course_locks.lock().entry(norm).or_default())
    }

    /// The owning store index: explicit mapping first, then a probe over
    /// the stores in order (cached on hit), then the current default.
    fn index_for(&self, ctx: &StoreContext, course: &CourseKey) -> usize {
        let norm = course.for_branch(None);
        if let Some(index) = self.mappings.read().get(&norm).copied() {
            return index;
        }
        for (index, entry) in self.stores.iter().enumerate() {
            match entry.store.has_course(ctx, &norm, false) {
                Ok(Some(_)) => {
                    debug!(
                        target: "modulestore::router",
                        course = %norm,
                        store = %entry.name,
                        "Resolved course to store"
                    );
                    self.mappings.write().insert(norm, index);
                    return index;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        target: "modulestore::router",
                        store = %entry.name,
                        course = %norm,
                        error = %err,
                        "Store probe failed"
                    );
                }
            }
        }
        self.default_index.current()
    }

    fn store_for(&self, ctx: &StoreContext, course: &CourseKey) -> &dyn ModuleStore {
        self.stores[self.index_for(ctx, course)].store.as_ref()
    }

    fn unmap_course(&self, course: &CourseKey) {
        let norm = course.for_branch(None);
        self.mappings.write().remove(&norm);
        self.course_locks.lock().remove(&norm);
    }

    /// Direct-only categories go public immediately after any write.
    /// Called with the course lock already held, so the publish goes to
    /// the resolved store rather than back through the router. A block
    /// that cannot be published yet (e.g. not linked into the course
    /// tree) stays on the draft branch; the write itself stands.
    fn auto_publish(
        &self,
        ctx: &StoreContext,
        store: &dyn ModuleStore,
        key: &UsageKey,
        user: UserId,
    ) {
        if !key.block_type().is_direct_only() {
            return;
        }
        if let Err(err) = store.publish(ctx, key, user) {
            warn!(
                target: "modulestore::router",
                block = %key,
                error = %err,
                "Auto-publish of direct-only block failed"
            );
        }
    }
}

impl fmt::Debug for MixedRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixedRouter")
            .field("stores", &self.store_names())
            .field("mappings", &self.mappings.read().len())
            .finish_non_exhaustive()
    }
}

impl ModuleStore for MixedRouter {
    /// The tag of the current default store; per-course owners come from
    /// [`get_modulestore_type`](MixedRouter::get_modulestore_type).
    fn store_type(&self) -> StoreType {
        self.default_store_type()
    }

    fn has_course(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        ignore_case: bool,
    ) -> Result<Option<CourseKey>> {
        for entry in &self.stores {
            if let Some(existing) = entry.store.has_course(ctx, course, ignore_case)? {
                return Ok(Some(existing));
            }
        }
        Ok(None)
    }

    fn get_course(&self, ctx: &StoreContext, course: &CourseKey) -> Result<XBlock> {
        self.store_for(ctx, course).get_course(ctx, course)
    }

    fn get_courses(&self, ctx: &StoreContext) -> Result<Vec<XBlock>> {
        let mut seen: FxHashSet<CourseKey> = FxHashSet::default();
        let mut courses = Vec::new();
        for entry in &self.stores {
            match entry.store.get_courses(ctx) {
                Ok(found) => {
                    for block in found {
                        if seen.insert(block.course_key().for_branch(None)) {
                            courses.push(block);
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        target: "modulestore::router",
                        store = %entry.name,
                        error = %err,
                        "Skipping store in course listing"
                    );
                }
            }
        }
        Ok(courses)
    }

    fn get_courses_for_wiki(&self, ctx: &StoreContext, wiki_slug: &str) -> Result<Vec<CourseKey>> {
        let mut seen: FxHashSet<CourseKey> = FxHashSet::default();
        let mut courses = Vec::new();
        for entry in &self.stores {
            for course in entry.store.get_courses_for_wiki(ctx, wiki_slug)? {
                let norm = course.for_branch(None);
                if seen.insert(norm.clone()) {
                    courses.push(norm);
                }
            }
        }
        Ok(courses)
    }

    fn has_item(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        revision: Option<RevisionOption>,
    ) -> Result<bool> {
        self.store_for(ctx, key.course_key())
            .has_item(ctx, key, revision)
    }

    fn get_item(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        depth: Option<u32>,
        revision: Option<RevisionOption>,
    ) -> Result<XBlock> {
        self.store_for(ctx, key.course_key())
            .get_item(ctx, key, depth, revision)
    }

    fn get_items(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        qualifiers: &Qualifiers,
        revision: Option<RevisionOption>,
    ) -> Result<Vec<XBlock>> {
        self.store_for(ctx, course)
            .get_items(ctx, course, qualifiers, revision)
    }

    fn get_parent_location(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        revision: Option<RevisionOption>,
    ) -> Result<Option<UsageKey>> {
        self.store_for(ctx, key.course_key())
            .get_parent_location(ctx, key, revision)
    }

    fn get_orphans(&self, ctx: &StoreContext, course: &CourseKey) -> Result<Vec<UsageKey>> {
        self.store_for(ctx, course).get_orphans(ctx, course)
    }

    fn compute_publish_state(&self, ctx: &StoreContext, block: &XBlock) -> Result<PublishState> {
        self.store_for(ctx, block.course_key())
            .compute_publish_state(ctx, block)
    }

    fn has_changes(&self, ctx: &StoreContext, key: &UsageKey) -> Result<bool> {
        self.store_for(ctx, key.course_key()).has_changes(ctx, key)
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
        let key = CourseKey::new(org, course, run)?;
        if let Some(existing) = self.has_course(ctx, &key, true)? {
            return Err(Error::DuplicateCourse(existing.to_string()));
        }

        // new courses skip the probe: an explicit mapping wins, else the
        // scoped default receives the course
        let norm = key.for_branch(None);
        let index = self
            .mappings
            .read()
            .get(&norm)
            .copied()
            .unwrap_or_else(|| self.default_index.current());

        let lock = self.course_lock(&key);
        let _held = lock.lock();
        let entry = &self.stores[index];
        let root = entry.store.create_course(ctx, user, org, course, run, fields)?;
        self.auto_publish(ctx, entry.store.as_ref(), root.location(), user);
        self.mappings.write().insert(norm, index);
        info!(
            target: "modulestore::router",
            course = %key,
            store = %entry.name,
            user = %user,
            "Created course"
        );
        Ok(root)
    }

    fn delete_course(&self, ctx: &StoreContext, user: UserId, course: &CourseKey) -> Result<()> {
        let lock = self.course_lock(course);
        let _held = lock.lock();
        self.store_for(ctx, course).delete_course(ctx, user, course)?;
        self.unmap_course(course);
        info!(target: "modulestore::router", course = %course, user = %user, "Deleted course");
        Ok(())
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
        let lock = self.course_lock(course);
        let _held = lock.lock();
        let store = self.store_for(ctx, course);
        let block = store.create_item(ctx, user, course, category, block_id, fields)?;
        self.auto_publish(ctx, store, block.location(), user);
        Ok(block)
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
        let lock = self.course_lock(parent.course_key());
        let _held = lock.lock();
        let store = self.store_for(ctx, parent.course_key());
        let block = store.create_child(ctx, user, parent, category, block_id, fields)?;
        self.auto_publish(ctx, store, block.location(), user);
        Ok(block)
    }

    fn update_item(
        &self,
        ctx: &StoreContext,
        block: &XBlock,
        user: UserId,
        allow_not_found: bool,
    ) -> Result<XBlock> {
        let course = block.course_key().clone();
        let lock = self.course_lock(&course);
        let _held = lock.lock();
        let store = self.store_for(ctx, &course);
        let updated = store.update_item(ctx, block, user, allow_not_found)?;
        self.auto_publish(ctx, store, updated.location(), user);
        Ok(updated)
    }

    fn delete_item(
        &self,
        ctx: &StoreContext,
        key: &UsageKey,
        user: UserId,
        revision: Option<RevisionOption>,
    ) -> Result<()> {
        let lock = self.course_lock(key.course_key());
        let _held = lock.lock();
        self.store_for(ctx, key.course_key())
            .delete_item(ctx, key, user, revision)
    }

    fn publish(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<()> {
        let lock = self.course_lock(key.course_key());
        let _held = lock.lock();
        self.store_for(ctx, key.course_key()).publish(ctx, key, user)
    }

    fn unpublish(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<()> {
        let lock = self.course_lock(key.course_key());
        let _held = lock.lock();
        self.store_for(ctx, key.course_key()).unpublish(ctx, key, user)
    }

    fn revert_to_published(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<()> {
        let lock = self.course_lock(key.course_key());
        let _held = lock.lock();
        self.store_for(ctx, key.course_key())
            .revert_to_published(ctx, key, user)
    }

    fn convert_to_draft(&self, ctx: &StoreContext, key: &UsageKey, user: UserId) -> Result<XBlock> {
        let lock = self.course_lock(key.course_key());
        let _held = lock.lock();
        self.store_for(ctx, key.course_key())
            .convert_to_draft(ctx, key, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modulestore_keys::Branch;
    use serde_json::json;

    fn user() -> UserId {
        UserId(42)
    }

    fn fields(pairs: &[(&str, Json)]) -> JsonMap<String, Json> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn toy_course(router: &MixedRouter, ctx: &StoreContext) -> CourseKey {
        let root = router
            .create_course(
                ctx,
                user(),
                "edX",
                "toy",
                "2012_Fall",
                &fields(&[("display_name", json!("Toy Course"))]),
            )
            .unwrap();
        root.course_key().clone()
    }

    // ========================================
    // Dispatch Tests
    // ========================================

    #[test]
    fn test_unmapped_course_dispatches_to_default() {
        let router = MixedRouter::in_memory();
        let unknown = CourseKey::new("foo", "bar", "2012_Fall").unwrap();
        assert_eq!(router.get_modulestore_type(&unknown), StoreType::PerBlock);
        assert_eq!(router.store_type(), StoreType::PerBlock);
        assert_eq!(router.store_names(), vec!["draft", "split"]);
    }

    #[test]
    fn test_probe_resolves_course_created_in_non_default_store() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        let course = {
            let _guard = router.default_store(StoreType::Versioned).unwrap();
            toy_course(&router, &ctx)
        };
        // the scope is gone but the mapping recorded at create persists
        assert_eq!(router.get_modulestore_type(&course), StoreType::Versioned);
        assert!(router.get_course(&ctx, &course).is_ok());
    }

    #[test]
    fn test_probe_claims_courses_seeded_behind_the_router() {
        // two stores created outside the router, same course in both
        let registry = Arc::new(FieldSetRegistry::standard());
        let first = Arc::new(PerBlockStore::in_memory());
        let second = Arc::new(VersionedStore::new(
            DocumentDatabase::in_memory(),
            Arc::clone(&registry),
        ));
        let ctx = StoreContext::draft_preferred();
        first
            .create_course(&ctx, user(), "edX", "toy", "2012_Fall", &JsonMap::new())
            .unwrap();
        second
            .create_course(&ctx, user(), "edX", "toy", "2012_Fall", &JsonMap::new())
            .unwrap();

        let router = MixedRouter::from_parts(
            vec![
                ("draft".to_string(), first as Arc<dyn ModuleStore>),
                ("split".to_string(), second as Arc<dyn ModuleStore>),
            ],
            FxHashMap::default(),
            BranchSetting::DraftPreferred,
            ContentStore::new(),
        );

        let course = CourseKey::new("edX", "toy", "2012_Fall").unwrap();
        // first store in order claims the course
        assert_eq!(router.get_modulestore_type(&course), StoreType::PerBlock);
        // aggregation reports the course once
        assert_eq!(router.get_courses(&router.ctx()).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_course_unmaps() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        let course = {
            let _guard = router.default_store(StoreType::Versioned).unwrap();
            toy_course(&router, &ctx)
        };
        router.delete_course(&ctx, user(), &course).unwrap();
        assert!(router.has_course(&ctx, &course, false).unwrap().is_none());
        assert_eq!(router.get_modulestore_type(&course), StoreType::PerBlock);
    }

    // ========================================
    // Scoped Setting Tests
    // ========================================

    #[test]
    fn test_default_store_scope_nests_and_restores() {
        let router = MixedRouter::in_memory();
        assert_eq!(router.default_store_type(), StoreType::PerBlock);
        {
            let _outer = router.default_store(StoreType::Versioned).unwrap();
            assert_eq!(router.default_store_type(), StoreType::Versioned);
            {
                let _inner = router.default_store_named("draft").unwrap();
                assert_eq!(router.default_store_type(), StoreType::PerBlock);
            }
            assert_eq!(router.default_store_type(), StoreType::Versioned);
        }
        assert_eq!(router.default_store_type(), StoreType::PerBlock);
    }

    #[test]
    fn test_default_store_unknown_type_fails() {
        let router = MixedRouter::in_memory();
        let err = router.default_store(StoreType::TreeOfFiles).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        let err = router.default_store_named("bundled").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_branch_setting_scopes_contexts() {
        let router = MixedRouter::in_memory();
        assert_eq!(router.ctx().branch(), BranchSetting::DraftPreferred);
        {
            let _guard = router.branch_setting(BranchSetting::PublishedOnly);
            assert_eq!(router.ctx().branch(), BranchSetting::PublishedOnly);
            {
                let _inner = router.branch_setting(BranchSetting::DraftPreferred);
                assert_eq!(router.ctx().branch(), BranchSetting::DraftPreferred);
            }
            assert_eq!(router.ctx().branch(), BranchSetting::PublishedOnly);
        }
        assert_eq!(router.ctx().branch(), BranchSetting::DraftPreferred);
    }

    #[test]
    fn test_branch_setting_governs_reads() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        let course = toy_course(&router, &ctx);
        let root = course.course_root_usage().unwrap();
        let chapter = router
            .create_child(
                &ctx,
                user(),
                &root,
                &BlockType::new("chapter").unwrap(),
                Some("ch1"),
                &JsonMap::new(),
            )
            .unwrap();
        let vertical = router
            .create_child(
                &ctx,
                user(),
                chapter.location(),
                &BlockType::new("vertical").unwrap(),
                Some("v1"),
                &fields(&[("display_name", json!("Before"))]),
            )
            .unwrap();
        router.publish(&ctx, vertical.location(), user()).unwrap();

        let mut draft = router
            .get_item(&ctx, vertical.location(), Some(0), None)
            .unwrap();
        draft.set("display_name", &json!("After")).unwrap();
        router.update_item(&ctx, &draft, user(), false).unwrap();

        {
            let _guard = router.branch_setting(BranchSetting::PublishedOnly);
            let ctx = router.ctx();
            let seen = router
                .get_item(&ctx, vertical.location(), Some(0), None)
                .unwrap();
            assert_eq!(seen.display_name(), Some("Before".to_string()));
        }
        let ctx = router.ctx();
        let seen = router
            .get_item(&ctx, vertical.location(), Some(0), None)
            .unwrap();
        assert_eq!(seen.display_name(), Some("After".to_string()));
    }

    // ========================================
    // Duplicate Course Tests
    // ========================================

    #[test]
    fn test_duplicate_course_across_backends() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        toy_course(&router, &ctx);

        let _guard = router.default_store(StoreType::Versioned).unwrap();
        let err = router
            .create_course(&ctx, user(), "edX", "toy", "2012_Fall", &JsonMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateCourse(_)));
    }

    #[test]
    fn test_duplicate_course_is_case_insensitive() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        {
            let _guard = router.default_store(StoreType::Versioned).unwrap();
            toy_course(&router, &ctx);
        }
        let err = router
            .create_course(&ctx, user(), "EDX", "TOY", "2012_FALL", &JsonMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateCourse(_)));
    }

    // ========================================
    // Aggregation Tests
    // ========================================

    #[test]
    fn test_get_courses_spans_backends() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        toy_course(&router, &ctx);
        {
            let _guard = router.default_store(StoreType::Versioned).unwrap();
            router
                .create_course(&ctx, user(), "MITx", "999", "2013_Spring", &JsonMap::new())
                .unwrap();
        }
        let mut orgs: Vec<String> = router
            .get_courses(&ctx)
            .unwrap()
            .iter()
            .map(|c| c.course_key().org().to_string())
            .collect();
        orgs.sort();
        assert_eq!(orgs, vec!["MITx".to_string(), "edX".to_string()]);
    }

    struct FailingStore;

    impl ModuleStore for FailingStore {
        fn store_type(&self) -> StoreType {
            StoreType::Versioned
        }
        fn has_course(
            &self,
            _: &StoreContext,
            _: &CourseKey,
            _: bool,
        ) -> Result<Option<CourseKey>> {
            Err(Error::Storage("connection refused".to_string()))
        }
        fn get_course(&self, _: &StoreContext, _: &CourseKey) -> Result<XBlock> {
            Err(Error::Storage("connection refused".to_string()))
        }
        fn get_courses(&self, _: &StoreContext) -> Result<Vec<XBlock>> {
            Err(Error::Storage("connection refused".to_string()))
        }
        fn get_courses_for_wiki(&self, _: &StoreContext, _: &str) -> Result<Vec<CourseKey>> {
            Err(Error::Storage("connection refused".to_string()))
        }
        fn has_item(
            &self,
            _: &StoreContext,
            _: &UsageKey,
            _: Option<RevisionOption>,
        ) -> Result<bool> {
            Err(Error::Storage("connection refused".to_string()))
        }
        fn get_item(
            &self,
            _: &StoreContext,
            _: &UsageKey,
            _: Option<u32>,
            _: Option<RevisionOption>,
        ) -> Result<XBlock> {
            Err(Error::Storage("connection refused".to_string()))
        }
        fn get_items(
            &self,
            _: &StoreContext,
            _: &CourseKey,
            _: &Qualifiers,
            _: Option<RevisionOption>,
        ) -> Result<Vec<XBlock>> {
            Err(Error::Storage("connection refused".to_string()))
        }
        fn get_parent_location(
            &self,
            _: &StoreContext,
            _: &UsageKey,
            _: Option<RevisionOption>,
        ) -> Result<Option<UsageKey>> {
            Err(Error::Storage("connection refused".to_string()))
        }
        fn get_orphans(&self, _: &StoreContext, _: &CourseKey) -> Result<Vec<UsageKey>> {
            Err(Error::Storage("connection refused".to_string()))
        }
        fn compute_publish_state(&self, _: &StoreContext, _: &XBlock) -> Result<PublishState> {
            Err(Error::Storage("connection refused".to_string()))
        }
        fn has_changes(&self, _: &StoreContext, _: &UsageKey) -> Result<bool> {
            Err(Error::Storage("connection refused".to_string()))
        }
    }

    #[test]
    fn test_get_courses_omits_failing_store() {
        let healthy = Arc::new(PerBlockStore::in_memory());
        let ctx = StoreContext::draft_preferred();
        healthy
            .create_course(&ctx, user(), "edX", "toy", "2012_Fall", &JsonMap::new())
            .unwrap();
        let router = MixedRouter::from_parts(
            vec![
                ("draft".to_string(), healthy as Arc<dyn ModuleStore>),
                ("broken".to_string(), Arc::new(FailingStore)),
            ],
            FxHashMap::default(),
            BranchSetting::DraftPreferred,
            ContentStore::new(),
        );
        let courses = router.get_courses(&router.ctx()).unwrap();
        assert_eq!(courses.len(), 1);
    }

    #[test]
    fn test_get_courses_for_wiki_spans_backends() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        router
            .create_course(
                &ctx,
                user(),
                "edX",
                "toy",
                "2012_Fall",
                &fields(&[("wiki_slug", json!("shared"))]),
            )
            .unwrap();
        {
            let _guard = router.default_store(StoreType::Versioned).unwrap();
            router
                .create_course(
                    &ctx,
                    user(),
                    "MITx",
                    "999",
                    "2013_Spring",
                    &fields(&[("wiki_slug", json!("shared"))]),
                )
                .unwrap();
        }
        let wiki_courses = router.get_courses_for_wiki(&ctx, "shared").unwrap();
        assert_eq!(wiki_courses.len(), 2);
        assert!(wiki_courses.iter().all(|key| key.is_branch_agnostic()));
        assert!(router.get_courses_for_wiki(&ctx, "other").unwrap().is_empty());
    }

    // ========================================
    // Run Resolution Tests
    // ========================================

    #[test]
    fn test_fill_in_run_unique_match() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        toy_course(&router, &ctx);
        let partial = CourseKey::without_run("edX", "toy").unwrap();
        let filled = router.fill_in_run(&ctx, &partial).unwrap();
        assert_eq!(filled.run(), "2012_Fall");
        assert_eq!(filled.org(), "edX");
    }

    #[test]
    fn test_fill_in_run_no_match() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        let partial = CourseKey::without_run("edX", "toy").unwrap();
        let err = router.fill_in_run(&ctx, &partial).unwrap_err();
        assert!(matches!(err, Error::ItemNotFound(_)));
    }

    #[test]
    fn test_fill_in_run_ambiguous() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        toy_course(&router, &ctx);
        {
            // same org and course under another run, in the other backend
            let _guard = router.default_store(StoreType::Versioned).unwrap();
            router
                .create_course(&ctx, user(), "edX", "toy", "2013_Spring", &JsonMap::new())
                .unwrap();
        }
        let partial = CourseKey::without_run("edX", "toy").unwrap();
        let err = router.fill_in_run(&ctx, &partial).unwrap_err();
        assert!(matches!(err, Error::AmbiguousCourseKey(_)));
    }

    #[test]
    fn test_fill_in_run_keeps_complete_keys() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        let complete = CourseKey::new("edX", "toy", "2012_Fall").unwrap();
        assert_eq!(router.fill_in_run(&ctx, &complete).unwrap(), complete);
    }

    // ========================================
    // Auto-Publish Tests
    // ========================================

    #[test]
    fn test_direct_only_writes_stay_public() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        let course = toy_course(&router, &ctx);
        let root_block = router.get_course(&ctx, &course).unwrap();
        assert_eq!(
            router.compute_publish_state(&ctx, &root_block).unwrap(),
            PublishState::Public
        );

        let chapter = router
            .create_child(
                &ctx,
                user(),
                &course.course_root_usage().unwrap(),
                &BlockType::new("chapter").unwrap(),
                Some("Overview"),
                &JsonMap::new(),
            )
            .unwrap();
        assert_eq!(
            router.compute_publish_state(&ctx, &chapter).unwrap(),
            PublishState::Public
        );

        let problem = router
            .create_child(
                &ctx,
                user(),
                chapter.location(),
                &BlockType::new("problem").unwrap(),
                Some("p1"),
                &JsonMap::new(),
            )
            .unwrap();
        assert_eq!(
            router.compute_publish_state(&ctx, &problem).unwrap(),
            PublishState::Private
        );
    }

    #[test]
    fn test_direct_only_writes_auto_publish_on_versioned() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        let course = {
            let _guard = router.default_store(StoreType::Versioned).unwrap();
            toy_course(&router, &ctx)
        };
        let root = course.course_root_usage().unwrap();
        let chapter = router
            .create_child(
                &ctx,
                user(),
                &root,
                &BlockType::new("chapter").unwrap(),
                Some("Overview"),
                &JsonMap::new(),
            )
            .unwrap();

        // the published branch exists and carries the chapter
        let published_ctx = ctx.with_branch(BranchSetting::PublishedOnly);
        let root_block = router.get_course(&published_ctx, &course).unwrap();
        assert_eq!(
            router.compute_publish_state(&ctx, &root_block).unwrap(),
            PublishState::Public
        );
        assert_eq!(
            router.compute_publish_state(&ctx, &chapter).unwrap(),
            PublishState::Public
        );
        assert!(router
            .get_item(&published_ctx, chapter.location(), None, None)
            .is_ok());
    }

    #[test]
    fn test_auto_publish_skips_unreachable_direct_only_blocks() {
        // an unlinked chapter cannot be grafted into the published tree;
        // the create itself still succeeds
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        let course = {
            let _guard = router.default_store(StoreType::Versioned).unwrap();
            toy_course(&router, &ctx)
        };
        let orphan = router
            .create_item(
                &ctx,
                user(),
                &course,
                &BlockType::new("chapter").unwrap(),
                Some("orph"),
                &JsonMap::new(),
            )
            .unwrap();
        assert_eq!(
            router.compute_publish_state(&ctx, &orphan).unwrap(),
            PublishState::Private
        );
    }

    // ========================================
    // Error Pass-Through Tests
    // ========================================

    #[test]
    fn test_not_found_crosses_unchanged() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        let missing = CourseKey::new("no", "such", "course").unwrap();
        let err = router.get_course(&ctx, &missing).unwrap_err();
        assert!(matches!(err, Error::ItemNotFound(_)));
    }

    #[test]
    fn test_unsupported_revision_crosses_unchanged() {
        let router = MixedRouter::in_memory();
        let ctx = router.ctx();
        let course = toy_course(&router, &ctx);
        let key = course
            .make_usage_key(BlockType::new("problem").unwrap(), "p1")
            .unwrap();
        let err = router
            .has_item(&ctx, &key, Some(RevisionOption::All))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedRevision(_)));
        let err = router
            .get_items(
                &ctx,
                &course,
                &Qualifiers::new(),
                Some(RevisionOption::DraftPreferred),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedRevision(_)));
    }

    // ========================================
    // Advisory Lock Tests
    // ========================================

    #[test]
    fn test_course_lock_identity() {
        let router = MixedRouter::in_memory();
        let course = CourseKey::new("edX", "toy", "2012_Fall").unwrap();
        let a = router.course_lock(&course);
        let b = router.course_lock(&course.for_branch(Some(Branch::Draft)));
        assert!(Arc::ptr_eq(&a, &b), "branch qualifier must not split locks");

        let other = CourseKey::new("MITx", "999", "2013_Spring").unwrap();
        let c = router.course_lock(&other);
        assert!(!Arc::ptr_eq(&a, &c));
    }

    // ========================================
    // Content Store Tests
    // ========================================

    #[test]
    fn test_content_store_handle() {
        let router = MixedRouter::in_memory();
        let course = CourseKey::new("edX", "toy", "2012_Fall").unwrap();
        let asset = course.make_asset_key("asset", "logo.png").unwrap();
        router
            .content_store()
            .save(&asset, "image/png", vec![1, 2, 3], JsonMap::new())
            .unwrap();
        let found = router.content_store().find(&asset).unwrap();
        assert_eq!(found.data(), &[1, 2, 3]);
    }
}
