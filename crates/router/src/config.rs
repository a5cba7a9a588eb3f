//! Router configuration and assembly
//!
//! A [`RouterConfig`] is the serde-deserializable description of a mixed
//! store: an ordered list of backend stores (the first entry is the
//! default), explicit course-to-store mappings, and the base branch
//! setting. [`RouterBuilder`] turns a config into a running
//! [`MixedRouter`], wiring every backend to one shared field registry
//! and inheritance cache.
//!
//! ```json
//! {
//!   "branch": "draft_preferred",
//!   "stores": [
//!     { "name": "draft", "engine": "per_block",
//!       "doc_store_config": { "data_dir": "/var/data/modulestore" } },
//!     { "name": "split", "engine": "versioned" },
//!     { "name": "bundled", "engine": "tree_of_files",
//!       "options": { "data_dir": "/var/data/courses" } }
//!   ],
//!   "mappings": { "edX/toy/2012_Fall": "split" }
//! }
//! ```

use crate::router::MixedRouter;
use modulestore_contentstore::ContentStore;
use modulestore_core::{
    BranchSetting, Error, FieldSetRegistry, InProcessInheritanceCache, ModuleStore, Result,
    SharedInheritanceCache,
};
use modulestore_docstore::DocumentDatabase;
use modulestore_keys::CourseKey;
use modulestore_perblock::PerBlockStore;
use modulestore_treestore::TreeStore;
use modulestore_versioned::VersionedStore;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Which backend implementation a configured store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Read-only directory-tree backend.
    TreeOfFiles,
    /// One document per block revision.
    PerBlock,
    /// Immutable structure documents with branch pointers.
    Versioned,
}

/// Document-database settings for a configured store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocStoreConfig {
    /// Directory holding collection snapshots. Absent means in-memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Engine-specific options for a configured store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Course data directory. Required by `tree_of_files`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// One configured backend store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Unique name the mappings refer to.
    pub name: String,
    /// Backend implementation.
    pub engine: EngineKind,
    /// Document-database settings (`per_block`, `versioned`).
    #[serde(default)]
    pub doc_store_config: DocStoreConfig,
    /// Engine options (`tree_of_files`).
    #[serde(default)]
    pub options: StoreOptions,
}

impl StoreConfig {
    /// An in-memory store of the given engine.
    pub fn in_memory(name: impl Into<String>, engine: EngineKind) -> Self {
        Self {
            name: name.into(),
            engine,
            doc_store_config: DocStoreConfig::default(),
            options: StoreOptions::default(),
        }
    }
}

fn default_branch() -> BranchSetting {
    BranchSetting::DraftPreferred
}

/// Serializable description of a mixed store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Base branch setting when no scoped override is active.
    #[serde(default = "default_branch")]
    pub branch: BranchSetting,
    /// Ordered backend stores; the first entry is the default.
    pub stores: Vec<StoreConfig>,
    /// Explicit course-to-store assignments, course key string to store
    /// name. Mapped courses dispatch to their store regardless of the
    /// default.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mappings: BTreeMap<String, String>,
}

impl RouterConfig {
    /// A config with the given stores, draft-preferred base branch, and
    /// no mappings.
    pub fn new(stores: Vec<StoreConfig>) -> Self {
        Self {
            branch: default_branch(),
            stores,
            mappings: BTreeMap::new(),
        }
    }
}

/// Assembles a [`MixedRouter`] from a config plus runtime services.
///
/// The registry and inheritance cache are shared by every constructed
/// backend; this is what makes the configured mixin set process-wide.
pub struct RouterBuilder {
    config: RouterConfig,
    registry: Arc<FieldSetRegistry>,
    shared_cache: Arc<dyn SharedInheritanceCache>,
    content_store: ContentStore,
}

impl RouterBuilder {
    /// Start from a config with the standard registry, an in-process
    /// inheritance cache, and a fresh content store.
    pub fn from_config(config: RouterConfig) -> Self {
        Self {
            config,
            registry: Arc::new(FieldSetRegistry::standard()),
            shared_cache: Arc::new(InProcessInheritanceCache::new()),
            content_store: ContentStore::new(),
        }
    }

    /// Use a custom field registry (mixin set) for every backend.
    pub fn with_registry(mut self, registry: Arc<FieldSetRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Use a shared inheritance cache other than the in-process one.
    pub fn with_shared_cache(mut self, cache: Arc<dyn SharedInheritanceCache>) -> Self {
        self.shared_cache = cache;
        self
    }

    /// Attach an existing content store handle.
    pub fn with_content_store(mut self, content_store: ContentStore) -> Self {
        self.content_store = content_store;
        self
    }

    fn build_store(&self, config: &StoreConfig) -> Result<Arc<dyn ModuleStore>> {
        let db = || -> Result<DocumentDatabase> {
            match &config.doc_store_config.data_dir {
                Some(dir) => DocumentDatabase::open(dir),
                None => Ok(DocumentDatabase::in_memory()),
            }
        };
        let store: Arc<dyn ModuleStore> = match config.engine {
            EngineKind::PerBlock => Arc::new(PerBlockStore::new(
                db()?,
                Arc::clone(&self.registry),
                Arc::clone(&self.shared_cache),
            )),
            EngineKind::Versioned => {
                Arc::new(VersionedStore::new(db()?, Arc::clone(&self.registry)))
            }
            EngineKind::TreeOfFiles => {
                let data_dir = config.options.data_dir.as_ref().ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "store '{}': tree_of_files requires options.data_dir",
                        config.name
                    ))
                })?;
                Arc::new(TreeStore::open(data_dir, Arc::clone(&self.registry))?)
            }
        };
        Ok(store)
    }

    /// Construct every configured store and resolve the mappings.
    ///
    /// # Errors
    /// `Error::InvalidConfig` for an empty store list, duplicate store
    /// names, a tree store without a data directory, or a mapping that
    /// names an unknown store or an unparseable course key. Store
    /// construction errors (I/O, corrupt snapshots) propagate unchanged.
    pub fn build(self) -> Result<MixedRouter> {
        if self.config.stores.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one store is required".to_string(),
            ));
        }

        let mut names: Vec<&str> = Vec::with_capacity(self.config.stores.len());
        let mut stores: Vec<(String, Arc<dyn ModuleStore>)> = Vec::new();
        for store_config in &self.config.stores {
            if names.contains(&store_config.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate store name '{}'",
                    store_config.name
                )));
            }
            names.push(&store_config.name);
            stores.push((store_config.name.clone(), self.build_store(store_config)?));
        }

        let mut mappings: FxHashMap<CourseKey, usize> = FxHashMap::default();
        for (course_id, store_name) in &self.config.mappings {
            let course = CourseKey::parse(course_id).map_err(|e| {
                Error::InvalidConfig(format!("mapping '{}' is not a course key: {}", course_id, e))
            })?;
            let index = names
                .iter()
                .position(|name| name == store_name)
                .ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "mapping '{}' names unknown store '{}'",
                        course_id, store_name
                    ))
                })?;
            mappings.insert(course.for_branch(None), index);
        }

        info!(
            target: "modulestore::router",
            stores = stores.len(),
            mappings = mappings.len(),
            branch = %self.config.branch,
            "Assembled mixed router"
        );
        Ok(MixedRouter::from_parts(
            stores,
            mappings,
            self.config.branch,
            self.content_store,
        ))
    }
}
