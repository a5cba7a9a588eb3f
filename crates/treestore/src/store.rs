//! Read-only store over loaded course trees

use crate::loader::{load_data_dir, LoadError, LoadedCourse};
use modulestore_core::{
    check_revision, DocumentKvs, Error, FieldSetRegistry, ModuleStore, PublishState, Qualifiers,
    Result, RevisionOption, ScopeIds, StoreContext, StoreType, XBlock,
};
use modulestore_keys::{CourseKey, UsageKey};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Backend serving bundled courses straight from a directory tree.
///
/// Every course under the data directory is parsed once at [`open`]
/// and held resident, with inheritance precomputed; reads never touch
/// the filesystem again. There is no draft branch: everything on disk
/// is published, and all write operations fail with
/// `Error::ReadOnlyStore`.
///
/// [`open`]: TreeStore::open
#[derive(Debug)]
pub struct TreeStore {
    data_dir: PathBuf,
    registry: Arc<FieldSetRegistry>,
    courses: FxHashMap<CourseKey, LoadedCourse>,
    errors: Vec<LoadError>,
}

impl TreeStore {
    /// Load every course directory under `data_dir`. Directories that
    /// fail to parse are skipped and reported by [`load_errors`];
    /// a missing data directory is an error.
    ///
    /// [`load_errors`]: TreeStore::load_errors
    pub fn open(data_dir: impl AsRef<Path>, registry: Arc<FieldSetRegistry>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let (loaded, errors) = load_data_dir(&data_dir, registry.inheritable_names())?;
        let mut courses = FxHashMap::default();
        for course in loaded {
            courses.insert(course.key.clone(), course);
        }
        info!(
            target: "modulestore::treestore",
            data_dir = %data_dir.display(),
            courses = courses.len(),
            skipped = errors.len(),
            "Opened tree store"
        );
        Ok(Self {
            data_dir,
            registry,
            courses,
            errors,
        })
    }

    /// The directory this store was loaded from.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Course directories that failed to load at open.
    pub fn load_errors(&self) -> &[LoadError] {
        &self.errors
    }

    fn course(&self, key: &CourseKey) -> Option<&LoadedCourse> {
        self.courses.get(&key.for_branch(None))
    }

    fn course_of(&self, key: &UsageKey) -> Option<&LoadedCourse> {
        self.course(key.course_key())
    }

    /// Sorted usage keys of one course.
    fn sorted_blocks(course: &LoadedCourse) -> Vec<&UsageKey> {
        let mut keys: Vec<&UsageKey> = course.blocks.keys().collect();
        keys.sort();
        keys
    }

    fn build_block(&self, course: &LoadedCourse, key: &UsageKey) -> Result<XBlock> {
        let snapshot = course
            .blocks
            .get(key)
            .ok_or_else(|| Error::not_found(key))?;
        let inherited = course.inheritance.inherited_for(key);
        let field_set = self.registry.for_category(key.block_type());
        let kvs = DocumentKvs::from_snapshot(snapshot.clone())
            .with_inherited(inherited)
            .frozen(StoreType::TreeOfFiles);
        Ok(XBlock::new(ScopeIds::new(key.clone()), field_set, Box::new(kvs)))
    }

    /// True when the revision rule can only ever match a draft. Nothing
    /// in this store is a draft.
    fn drafts_only(revision: Option<RevisionOption>) -> bool {
        matches!(revision, Some(RevisionOption::DraftOnly))
    }
}

impl ModuleStore for TreeStore {
    fn store_type(&self) -> StoreType {
        StoreType::TreeOfFiles
    }

    fn has_course(
        &self,
        ctx: &StoreContext,
        course: &CourseKey,
        ignore_case: bool,
    ) -> Result<Option<CourseKey>> {
        ctx.check_cancelled()?;
        if let Some(found) = self.course(course) {
            return Ok(Some(found.key.clone()));
        }
        if ignore_case {
            for loaded in self.courses.values() {
                if loaded.key.matches_ignore_case(course) {
                    return Ok(Some(loaded.key.clone()));
                }
            }
        }
        Ok(None)
    }

    fn get_course(&self, ctx: &StoreContext, course: &CourseKey) -> Result<XBlock> {
        ctx.check_cancelled()?;
        let loaded = self
            .course(course)
            .ok_or_else(|| Error::not_found(course))?;
        self.build_block(loaded, &loaded.root)
    }

    fn get_courses(&self, ctx: &StoreContext) -> Result<Vec<XBlock>> {
        ctx.check_cancelled()?;
        let mut loaded: Vec<&LoadedCourse> = self.courses.values().collect();
        loaded.sort_by(|a, b| a.key.cmp(&b.key));
        loaded
            .into_iter()
            .map(|course| self.build_block(course, &course.root))
            .collect()
    }

    fn get_courses_for_wiki(&self, ctx: &StoreContext, wiki_slug: &str) -> Result<Vec<CourseKey>> {
        ctx.check_cancelled()?;
        let mut keys: Vec<CourseKey> = self
            .courses
            .values()
            .filter(|course| {
                course.blocks[&course.root]
                    .settings
                    .get("wiki_slug")
                    .and_then(|v| v.as_str())
                    == Some(wiki_slug)
            })
            .map(|course| course.key.clone())
            .collect();
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
        ctx.check_cancelled()?;
        if Self::drafts_only(revision) {
            return Ok(false);
        }
        Ok(self
            .course_of(key)
            .is_some_and(|course| course.blocks.contains_key(&key.as_published())))
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
        ctx.check_cancelled()?;
        if Self::drafts_only(revision) {
            return Err(Error::not_found(key));
        }
        let course = self
            .course_of(key)
            .ok_or_else(|| Error::not_found(key))?;
        self.build_block(course, &key.as_published())
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
        if Self::drafts_only(revision) {
            return Ok(Vec::new());
        }
        let Some(loaded) = self.course(course) else {
            return Ok(Vec::new());
        };

        let mut blocks = Vec::new();
        for key in Self::sorted_blocks(loaded) {
            if let Some(category) = qualifiers.category() {
                if key.block_type() != category {
                    continue;
                }
            }
            let block = self.build_block(loaded, key)?;
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
        let Some(course) = self.course_of(key) else {
            return Ok(None);
        };
        let child_ref = key.as_published().to_deprecated_string();
        for candidate in Self::sorted_blocks(course) {
            if course.blocks[candidate]
                .children
                .iter()
                .any(|c| c == &child_ref)
            {
                return Ok(Some((*candidate).clone()));
            }
        }
        Ok(None)
    }

    fn get_orphans(&self, ctx: &StoreContext, course: &CourseKey) -> Result<Vec<UsageKey>> {
        ctx.check_cancelled()?;
        let loaded = self
            .course(course)
            .ok_or_else(|| Error::not_found(course))?;

        let mut reachable: FxHashSet<UsageKey> = FxHashSet::default();
        let mut queue = vec![loaded.root.clone()];
        while let Some(key) = queue.pop() {
            if !reachable.insert(key.clone()) {
                continue;
            }
            let Some(snapshot) = loaded.blocks.get(&key) else {
                continue;
            };
            for child in &snapshot.children {
                let parsed =
                    UsageKey::parse_deprecated(child)?.map_into_course(loaded.key.clone());
                queue.push(parsed);
            }
        }

        let mut orphans: Vec<UsageKey> = loaded
            .blocks
            .keys()
            .filter(|key| {
                **key != loaded.root
                    && !key.block_type().is_detached()
                    && !reachable.contains(*key)
            })
            .cloned()
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    fn compute_publish_state(&self, ctx: &StoreContext, block: &XBlock) -> Result<PublishState> {
        ctx.check_cancelled()?;
        let _ = block;
        Ok(PublishState::Public)
    }

    fn has_changes(&self, ctx: &StoreContext, key: &UsageKey) -> Result<bool> {
        if !self.has_item(ctx, key, None)? {
            return Err(Error::not_found(key));
        }
        Ok(false)
    }
}
