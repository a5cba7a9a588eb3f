//! Downward settings inheritance
//!
//! Inheritable settings flow from ancestors to descendants: a block's
//! inherited value for a field is the explicitly-set value on its nearest
//! ancestor that sets it. The engine works on a [`InheritanceSeed`]
//! snapshot of one course tree (explicit inheritable settings + child
//! lists) and produces an [`InheritanceMap`] giving each block the merged
//! settings of its strict ancestors.
//!
//! Maps are cached at two levels: per request (inside
//! [`RequestScope`](crate::context::RequestScope)) and across requests in
//! a [`SharedInheritanceCache`]. Writers invalidate the shared entry on
//! every write that can change an inheritable setting or the tree shape.

use dashmap::DashMap;
use modulestore_keys::{CourseKey, UsageKey};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as Json;
use std::sync::Arc;

/// Merged inheritable settings a block receives from its ancestors.
pub type InheritedSettings = serde_json::Map<String, Json>;

/// One block's contribution to the inheritance computation.
#[derive(Debug, Clone, Default)]
pub struct SeedNode {
    /// Explicitly-set inheritable settings on this block.
    pub settings: InheritedSettings,
    /// Ordered children.
    pub children: Vec<UsageKey>,
}

/// Snapshot of one course tree, ready for inheritance computation.
///
/// Nodes are keyed by usage key with the document revision stripped, so
/// the draft and published instances of a block share one entry.
#[derive(Debug, Clone)]
pub struct InheritanceSeed {
    course: CourseKey,
    root: UsageKey,
    inheritable: FxHashSet<String>,
    nodes: FxHashMap<UsageKey, SeedNode>,
}

impl InheritanceSeed {
    /// Start a seed for one course tree. `inheritable` is the set of
    /// field names that flow downward; everything else is dropped at
    /// insertion.
    pub fn new(course: CourseKey, root: UsageKey, inheritable: FxHashSet<String>) -> Self {
        Self {
            course,
            root: root.as_published(),
            inheritable,
            nodes: FxHashMap::default(),
        }
    }

    /// The course this seed describes.
    pub fn course(&self) -> &CourseKey {
        &self.course
    }

    /// The tree root.
    pub fn root(&self) -> &UsageKey {
        &self.root
    }

    /// Record one block's explicit settings and children. Settings
    /// outside the inheritable set are dropped here so the computation
    /// never sees them.
    pub fn add_block(
        &mut self,
        key: &UsageKey,
        explicit_settings: &InheritedSettings,
        children: Vec<UsageKey>,
    ) {
        let settings = explicit_settings
            .iter()
            .filter(|(name, _)| self.inheritable.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        self.nodes.insert(
            key.as_published(),
            SeedNode {
                settings,
                children: children.into_iter().map(|c| c.as_published()).collect(),
            },
        );
    }

    /// Number of recorded blocks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no blocks are recorded.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Inherited settings per block for one course tree.
#[derive(Debug, Clone)]
pub struct InheritanceMap {
    course: CourseKey,
    by_block: FxHashMap<UsageKey, Arc<InheritedSettings>>,
}

impl InheritanceMap {
    /// An empty map for a course.
    pub fn empty(course: CourseKey) -> Self {
        Self {
            course,
            by_block: FxHashMap::default(),
        }
    }

    /// The course this map describes.
    pub fn course(&self) -> &CourseKey {
        &self.course
    }

    /// The settings `key` inherits from its strict ancestors. Blocks the
    /// computation never reached inherit nothing.
    pub fn inherited_for(&self, key: &UsageKey) -> InheritedSettings {
        self.by_block
            .get(&key.as_published())
            .map(|arc| (**arc).clone())
            .unwrap_or_default()
    }

    /// True when the computation reached `key`.
    pub fn covers(&self, key: &UsageKey) -> bool {
        self.by_block.contains_key(&key.as_published())
    }

    /// Number of blocks covered.
    pub fn len(&self) -> usize {
        self.by_block.len()
    }

    /// True when no blocks are covered.
    pub fn is_empty(&self) -> bool {
        self.by_block.is_empty()
    }
}

/// Walk the tree from the root and compute each block's inherited
/// settings.
///
/// A block's entry is the union of its strict ancestors' explicit
/// settings, nearest ancestor winning on a name collision. The walk
/// visits each block once; a child reachable through two parents keeps
/// the entry from the first visit, and reference cycles terminate.
pub fn compute_inheritance(seed: &InheritanceSeed) -> InheritanceMap {
    let mut map = InheritanceMap::empty(seed.course.clone());
    let root = seed.root.clone();
    let from_above = Arc::new(InheritedSettings::new());
    descend(seed, &mut map, &root, from_above);
    map
}

fn descend(
    seed: &InheritanceSeed,
    map: &mut InheritanceMap,
    key: &UsageKey,
    from_above: Arc<InheritedSettings>,
) {
    if map.by_block.contains_key(key) {
        return;
    }
    map.by_block.insert(key.clone(), Arc::clone(&from_above));

    let Some(node) = seed.nodes.get(key) else {
        return;
    };
    if node.children.is_empty() {
        return;
    }

    // what this block passes down: what it inherited, overridden by its
    // own explicit settings
    let passdown = if node.settings.is_empty() {
        from_above
    } else {
        let mut merged = (*from_above).clone();
        for (name, value) in &node.settings {
            merged.insert(name.clone(), value.clone());
        }
        Arc::new(merged)
    };

    for child in &node.children {
        descend(seed, map, child, Arc::clone(&passdown));
    }
}

/// Cross-request cache of computed inheritance maps.
pub trait SharedInheritanceCache: Send + Sync {
    /// The cached map for a course, if present.
    fn get(&self, course: &CourseKey) -> Option<Arc<InheritanceMap>>;

    /// Store a computed map.
    fn put(&self, course: &CourseKey, map: Arc<InheritanceMap>);

    /// Drop the cached map after a write that can change inheritance.
    fn invalidate(&self, course: &CourseKey);
}

/// In-process [`SharedInheritanceCache`] keyed by branch-agnostic course
/// key.
#[derive(Debug, Default)]
pub struct InProcessInheritanceCache {
    maps: DashMap<CourseKey, Arc<InheritanceMap>>,
}

impl InProcessInheritanceCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(course: &CourseKey) -> CourseKey {
        course.for_branch(None)
    }
}

impl SharedInheritanceCache for InProcessInheritanceCache {
    fn get(&self, course: &CourseKey) -> Option<Arc<InheritanceMap>> {
        self.maps
            .get(&Self::cache_key(course))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn put(&self, course: &CourseKey, map: Arc<InheritanceMap>) {
        self.maps.insert(Self::cache_key(course), map);
    }

    fn invalidate(&self, course: &CourseKey) {
        self.maps.remove(&Self::cache_key(course));
    }
}
