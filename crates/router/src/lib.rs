//! Mixed modulestore router
//!
//! One store surface over every configured backend:
//! - MixedRouter: per-course dispatch, course aggregation,
//!   duplicate-course protection, run resolution, advisory course locks
//! - RouterConfig / RouterBuilder: serde-describable assembly of the
//!   backend list, mappings, and base branch setting
//! - BranchSettingGuard / DefaultStoreGuard: scoped overrides for the
//!   branch setting and the default store

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod contexts;
pub mod router;

pub use config::{
    DocStoreConfig, EngineKind, RouterBuilder, RouterConfig, StoreConfig, StoreOptions,
};
pub use contexts::{BranchSettingGuard, DefaultStoreGuard};
pub use router::MixedRouter;
