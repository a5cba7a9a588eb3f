//! Modulestore - versioned hierarchical content store for courseware
//!
//! Courses are trees of blocks (course → chapter → sequential → vertical →
//! leaf components) kept behind one store surface with three backends: a
//! read-only tree-of-files store, a per-block document store with
//! draft/published revisions, and a versioned structural store with
//! immutable course history. A mixed router dispatches each course to its
//! owning backend.
//!
//! # Quick Start
//!
//! ```ignore
//! use modulestore::{BlockType, MixedRouter, ModuleStore, UserId};
//! use serde_json::{json, Map};
//!
//! let store = MixedRouter::in_memory();
//! let ctx = store.ctx();
//! let user = UserId(1);
//!
//! let course = store.create_course(&ctx, user, "edX", "toy", "2012_Fall", &Map::new())?;
//! let chapter = store.create_child(
//!     &ctx,
//!     user,
//!     course.location(),
//!     &BlockType::new("chapter")?,
//!     Some("Overview"),
//!     &Map::new(),
//! )?;
//! ```
//!
//! # Architecture
//!
//! Everything dispatches through the [`ModuleStore`] trait; [`MixedRouter`]
//! implements it over the configured backends and adds the cross-store
//! concerns (duplicate-course protection, scoped branch and default-store
//! switches, advisory course locks). Backends and the embedded document
//! layer are re-exported under their crate modules for direct embedding.

pub use modulestore_contentstore as contentstore;
pub use modulestore_core as model;
pub use modulestore_docstore as docstore;
pub use modulestore_keys as keys;
pub use modulestore_perblock as perblock;
pub use modulestore_router as router;
pub use modulestore_treestore as treestore;
pub use modulestore_versioned as versioned;

pub use modulestore_contentstore::ContentStore;
pub use modulestore_core::{
    BranchSetting, CancelToken, Error, FieldSetRegistry, InProcessInheritanceCache, ModuleStore,
    PublishState, Qualifiers, Result, RevisionOption, SharedInheritanceCache, StoreContext,
    StoreType, UserId, ValueMatch, XBlock,
};
pub use modulestore_keys::{AssetKey, BlockType, Branch, CourseKey, DefinitionKey, UsageKey};
pub use modulestore_perblock::PerBlockStore;
pub use modulestore_router::{EngineKind, MixedRouter, RouterBuilder, RouterConfig, StoreConfig};
pub use modulestore_treestore::TreeStore;
pub use modulestore_versioned::VersionedStore;
